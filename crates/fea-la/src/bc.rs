//! Dirichlet boundary conditions.
//!
//! Applied by row elimination with a unit diagonal: constrained rows are
//! cleared, the diagonal is set to one, and the right-hand side carries the
//! prescribed value. The homogenized variant (zero values, same constrained
//! set) is what adjoint systems use.

use nalgebra::DVector;
use nalgebra_sparse::CooMatrix;

use crate::error::SolveError;

/// A set of constrained dofs and their prescribed values.
#[derive(Debug, Clone, PartialEq)]
pub struct DirichletBC {
    dofs: Vec<usize>,
    values: Vec<f64>,
}

impl DirichletBC {
    /// Constrain `dofs[i]` to `values[i]`.
    pub fn new(dofs: Vec<usize>, values: Vec<f64>) -> Result<Self, SolveError> {
        if dofs.len() != values.len() {
            return Err(SolveError::DimensionMismatch {
                expected: dofs.len(),
                found: values.len(),
            });
        }
        Ok(Self { dofs, values })
    }

    /// Constrain every dof in `dofs` to the same `value`.
    pub fn constant(dofs: Vec<usize>, value: f64) -> Self {
        let values = vec![value; dofs.len()];
        Self { dofs, values }
    }

    pub fn dofs(&self) -> &[usize] {
        &self.dofs
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_homogeneous(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// The same constrained set with all prescribed values zeroed.
    pub fn homogenize(&self) -> DirichletBC {
        DirichletBC {
            dofs: self.dofs.clone(),
            values: vec![0.0; self.dofs.len()],
        }
    }

    /// Apply to a matrix: clear constrained rows, set unit diagonals.
    ///
    /// Works on COO triplets (dropped and re-pushed), so call before the
    /// final CSR conversion.
    pub fn apply_matrix(&self, matrix: CooMatrix<f64>) -> CooMatrix<f64> {
        let nrows = matrix.nrows();
        let ncols = matrix.ncols();
        let constrained: Vec<bool> = {
            let mut mask = vec![false; nrows];
            for &d in &self.dofs {
                if d < nrows {
                    mask[d] = true;
                }
            }
            mask
        };

        let (rows, cols, values) = matrix.disassemble();
        let mut out = CooMatrix::new(nrows, ncols);
        for ((i, j), v) in rows.into_iter().zip(cols).zip(values) {
            if !constrained[i] {
                out.push(i, j, v);
            }
        }
        for &d in &self.dofs {
            if d < nrows {
                out.push(d, d, 1.0);
            }
        }
        out
    }

    /// Apply to a vector: overwrite constrained entries with the
    /// prescribed values.
    pub fn apply_vector(&self, vector: &mut DVector<f64>) {
        for (&d, &v) in self.dofs.iter().zip(self.values.iter()) {
            if d < vector.len() {
                vector[d] = v;
            }
        }
    }
}
