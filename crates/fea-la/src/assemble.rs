//! Assembly of forms into solvable operators and vectors.
//!
//! Two strategies coexist, matching the two ways boundary conditions can
//! enter a system. A recorded solve must reuse whichever strategy produced
//! its forward operator when it later builds the adjoint operator.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use serde::{Deserialize, Serialize};

use crate::bc::DirichletBC;
use crate::error::SolveError;
use crate::form::{BilinearForm, LinearForm};

/// How boundary conditions enter the assembled system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssemblyStrategy {
    /// Assemble operator and right-hand side jointly with the constraints
    /// baked in ([`assemble_system`]).
    AssembleSystem,
    /// Assemble the raw values first ([`assemble_matrix`] /
    /// [`assemble_vector`]), then apply each constraint in place.
    AssembleThenApply,
}

impl Default for AssemblyStrategy {
    fn default() -> Self {
        AssemblyStrategy::AssembleSystem
    }
}

/// Assemble `a` and `l` jointly with `bcs` baked in.
pub fn assemble_system(
    a: &BilinearForm,
    l: &LinearForm,
    bcs: &[DirichletBC],
) -> Result<(CsrMatrix<f64>, DVector<f64>), SolveError> {
    if l.len() != a.nrows() {
        return Err(SolveError::DimensionMismatch {
            expected: a.nrows(),
            found: l.len(),
        });
    }
    let mut coo = a.assemble_raw();
    let mut rhs = l.assemble_raw();
    for bc in bcs {
        coo = bc.apply_matrix(coo);
        bc.apply_vector(&mut rhs);
    }
    Ok((CsrMatrix::from(&coo), rhs))
}

/// Assemble the raw operator with no boundary treatment.
pub fn assemble_matrix(a: &BilinearForm) -> CsrMatrix<f64> {
    CsrMatrix::from(&a.assemble_raw())
}

/// Assemble the raw right-hand side with no boundary treatment.
pub fn assemble_vector(l: &LinearForm) -> DVector<f64> {
    l.assemble_raw()
}

/// Assemble the operator under `strategy`, using `l` only to make the
/// constrained system consistent in the `AssembleSystem` path.
pub fn assemble_operator(
    a: &BilinearForm,
    l: &LinearForm,
    bcs: &[DirichletBC],
    strategy: AssemblyStrategy,
) -> Result<CsrMatrix<f64>, SolveError> {
    match strategy {
        AssemblyStrategy::AssembleSystem => {
            let (matrix, _) = assemble_system(a, l, bcs)?;
            Ok(matrix)
        }
        AssemblyStrategy::AssembleThenApply => {
            let mut coo = a.assemble_raw();
            for bc in bcs {
                coo = bc.apply_matrix(coo);
            }
            Ok(CsrMatrix::from(&coo))
        }
    }
}

/// Assemble the right-hand side under `strategy`.
pub fn assemble_rhs(
    a: &BilinearForm,
    l: &LinearForm,
    bcs: &[DirichletBC],
    strategy: AssemblyStrategy,
) -> Result<DVector<f64>, SolveError> {
    match strategy {
        AssemblyStrategy::AssembleSystem => {
            let (_, rhs) = assemble_system(a, l, bcs)?;
            Ok(rhs)
        }
        AssemblyStrategy::AssembleThenApply => {
            let mut rhs = assemble_vector(l);
            for bc in bcs {
                bc.apply_vector(&mut rhs);
            }
            Ok(rhs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn laplacian_form(n: usize) -> BilinearForm {
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, 2.0);
        }
        for i in 0..n - 1 {
            coo.push(i, i + 1, -1.0);
            coo.push(i + 1, i, -1.0);
        }
        BilinearForm::from_matrix(CsrMatrix::from(&coo))
    }

    #[test]
    fn system_assembly_bakes_in_bcs() {
        let a = laplacian_form(3);
        let l = LinearForm::from_vector(DVector::from_vec(vec![1.0, 1.0, 1.0]));
        let bcs = vec![DirichletBC::constant(vec![0], 2.0)];
        let (matrix, rhs) = assemble_system(&a, &l, &bcs).unwrap();
        assert_eq!(rhs[0], 2.0);
        // Constrained row reduced to the unit diagonal
        let row_nnz = matrix
            .triplet_iter()
            .filter(|(i, _, v)| *i == 0 && **v != 0.0)
            .count();
        assert_eq!(row_nnz, 1);
    }

    #[test]
    fn both_strategies_agree_on_the_final_system() {
        let a = laplacian_form(4);
        let l = LinearForm::from_vector(DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]));
        let bcs = vec![DirichletBC::constant(vec![0, 3], 0.0)];

        let m1 = assemble_operator(&a, &l, &bcs, AssemblyStrategy::AssembleSystem).unwrap();
        let m2 = assemble_operator(&a, &l, &bcs, AssemblyStrategy::AssembleThenApply).unwrap();
        let r1 = assemble_rhs(&a, &l, &bcs, AssemblyStrategy::AssembleSystem).unwrap();
        let r2 = assemble_rhs(&a, &l, &bcs, AssemblyStrategy::AssembleThenApply).unwrap();

        assert_eq!(r1, r2);
        let x = DVector::from_vec(vec![1.0, -1.0, 2.0, 0.5]);
        let apply = |m: &CsrMatrix<f64>| {
            let mut y = DVector::<f64>::zeros(4);
            for (i, j, v) in m.triplet_iter() {
                y[i] += v * x[j];
            }
            y
        };
        assert_eq!(apply(&m1), apply(&m2));
    }

    #[test]
    fn raw_assembly_leaves_bcs_alone() {
        let a = laplacian_form(3);
        let m = assemble_matrix(&a);
        assert_eq!(m.nnz(), 7);
    }

    #[test]
    fn rhs_length_mismatch_is_rejected() {
        let a = laplacian_form(3);
        let l = LinearForm::zero(2);
        assert!(assemble_system(&a, &l, &[]).is_err());
    }
}
