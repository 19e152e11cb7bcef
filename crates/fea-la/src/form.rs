//! Affine forms over tracked coefficients.
//!
//! A bilinear form is represented by its affine decomposition
//! `A(m) = sum_k c_k * A_k` (plus optional unweighted terms), where each
//! `c_k` is a scalar [`Coefficient`] carrying a tape variable. Assembly
//! evaluates the sum at the coefficients' current values, so re-assembling
//! after a coefficient update yields the updated operator. Linear forms
//! decompose the same way over vectors.

use std::cell::Cell;
use std::rc::Rc;

use fea_tape::{BlockVariable, Value};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use crate::error::SolveError;

/// A named scalar parameter appearing in a form.
///
/// Cloning shares the underlying value and tape variable. `set` updates the
/// value and refreshes the variable's snapshot so tape replays observe the
/// current data.
#[derive(Debug, Clone)]
pub struct Coefficient {
    name: Rc<str>,
    value: Rc<Cell<f64>>,
    variable: BlockVariable,
}

impl Coefficient {
    pub fn new(name: &str, value: f64) -> Self {
        let variable = BlockVariable::new();
        variable.save(Value::Scalar(value));
        Self {
            name: Rc::from(name),
            value: Rc::new(Cell::new(value)),
            variable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value.get()
    }

    pub fn set(&self, value: f64) {
        self.value.set(value);
        self.variable.save(Value::Scalar(value));
    }

    /// Tape variable tracking this coefficient.
    pub fn block_variable(&self) -> BlockVariable {
        self.variable.clone()
    }
}

/// One term of an affine decomposition: an optional scalar weight times a
/// constant operand.
#[derive(Debug, Clone)]
struct Term<T> {
    coefficient: Option<Coefficient>,
    operand: T,
}

impl<T> Term<T> {
    fn weight(&self) -> f64 {
        self.coefficient.as_ref().map_or(1.0, Coefficient::value)
    }
}

/// Matrix-producing form: `A(m) = sum_k c_k * A_k`.
#[derive(Debug, Clone)]
pub struct BilinearForm {
    nrows: usize,
    ncols: usize,
    terms: Vec<Term<CsrMatrix<f64>>>,
}

impl BilinearForm {
    /// An empty form of the given shape; add terms with [`Self::term`].
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            terms: Vec::new(),
        }
    }

    /// A form consisting of a single constant matrix.
    pub fn from_matrix(matrix: CsrMatrix<f64>) -> Self {
        let (nrows, ncols) = (matrix.nrows(), matrix.ncols());
        let mut form = Self::new(nrows, ncols);
        form.terms.push(Term {
            coefficient: None,
            operand: matrix,
        });
        form
    }

    /// Add a coefficient-weighted term.
    pub fn term(mut self, coefficient: &Coefficient, matrix: CsrMatrix<f64>) -> Result<Self, SolveError> {
        self.check_shape(matrix.nrows(), matrix.ncols())?;
        self.terms.push(Term {
            coefficient: Some(coefficient.clone()),
            operand: matrix,
        });
        Ok(self)
    }

    /// Add an unweighted term.
    pub fn constant_term(mut self, matrix: CsrMatrix<f64>) -> Result<Self, SolveError> {
        self.check_shape(matrix.nrows(), matrix.ncols())?;
        self.terms.push(Term {
            coefficient: None,
            operand: matrix,
        });
        Ok(self)
    }

    fn check_shape(&self, nrows: usize, ncols: usize) -> Result<(), SolveError> {
        if nrows != self.nrows {
            return Err(SolveError::DimensionMismatch {
                expected: self.nrows,
                found: nrows,
            });
        }
        if ncols != self.ncols {
            return Err(SolveError::DimensionMismatch {
                expected: self.ncols,
                found: ncols,
            });
        }
        Ok(())
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Coefficients appearing in the form, in term order.
    pub fn coefficients(&self) -> Vec<Coefficient> {
        self.terms
            .iter()
            .filter_map(|t| t.coefficient.clone())
            .collect()
    }

    /// Evaluate the decomposition at the current coefficient values.
    ///
    /// Returned in COO form so boundary conditions can still be patched in
    /// before conversion to CSR.
    pub fn assemble_raw(&self) -> CooMatrix<f64> {
        let mut coo = CooMatrix::new(self.nrows, self.ncols);
        for term in &self.terms {
            let w = term.weight();
            if w == 0.0 {
                continue;
            }
            for (i, j, v) in term.operand.triplet_iter() {
                coo.push(i, j, w * v);
            }
        }
        coo
    }

    /// The transposed form (same coefficients, transposed constant parts).
    pub fn transpose(&self) -> BilinearForm {
        BilinearForm {
            nrows: self.ncols,
            ncols: self.nrows,
            terms: self
                .terms
                .iter()
                .map(|t| Term {
                    coefficient: t.coefficient.clone(),
                    operand: t.operand.transpose(),
                })
                .collect(),
        }
    }

    /// The action `A(m) * x` at current coefficient values, with no
    /// boundary-condition treatment.
    pub fn action(&self, x: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        if x.len() != self.ncols {
            return Err(SolveError::DimensionMismatch {
                expected: self.ncols,
                found: x.len(),
            });
        }
        let mut y = DVector::zeros(self.nrows);
        for term in &self.terms {
            let w = term.weight();
            if w == 0.0 {
                continue;
            }
            for (i, j, v) in term.operand.triplet_iter() {
                y[i] += w * v * x[j];
            }
        }
        Ok(y)
    }

    /// The action of a single term's constant part, `A_k * x`, ignoring the
    /// coefficient weight. Used for coefficient sensitivities.
    pub fn term_action(&self, index: usize, x: &DVector<f64>) -> Option<DVector<f64>> {
        let term = self.terms.get(index)?;
        let mut y = DVector::zeros(self.nrows);
        for (i, j, v) in term.operand.triplet_iter() {
            y[i] += v * x[j];
        }
        Some(y)
    }

    /// Coefficient of term `index`, if that term is weighted.
    pub fn term_coefficient(&self, index: usize) -> Option<Coefficient> {
        self.terms.get(index)?.coefficient.clone()
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }
}

/// Vector-producing form: `b(m) = sum_k c_k * b_k`.
#[derive(Debug, Clone)]
pub struct LinearForm {
    len: usize,
    terms: Vec<Term<DVector<f64>>>,
}

impl LinearForm {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            terms: Vec::new(),
        }
    }

    /// A form consisting of a single constant vector.
    pub fn from_vector(vector: DVector<f64>) -> Self {
        let len = vector.len();
        let mut form = Self::new(len);
        form.terms.push(Term {
            coefficient: None,
            operand: vector,
        });
        form
    }

    /// A zero form over `len` entries. The adjoint system assembly uses
    /// this as its (irrelevant) right-hand side.
    pub fn zero(len: usize) -> Self {
        Self::new(len)
    }

    pub fn term(mut self, coefficient: &Coefficient, vector: DVector<f64>) -> Result<Self, SolveError> {
        self.check_len(vector.len())?;
        self.terms.push(Term {
            coefficient: Some(coefficient.clone()),
            operand: vector,
        });
        Ok(self)
    }

    pub fn constant_term(mut self, vector: DVector<f64>) -> Result<Self, SolveError> {
        self.check_len(vector.len())?;
        self.terms.push(Term {
            coefficient: None,
            operand: vector,
        });
        Ok(self)
    }

    fn check_len(&self, len: usize) -> Result<(), SolveError> {
        if len != self.len {
            return Err(SolveError::DimensionMismatch {
                expected: self.len,
                found: len,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn coefficients(&self) -> Vec<Coefficient> {
        self.terms
            .iter()
            .filter_map(|t| t.coefficient.clone())
            .collect()
    }

    /// Evaluate the decomposition at the current coefficient values.
    pub fn assemble_raw(&self) -> DVector<f64> {
        let mut v = DVector::zeros(self.len);
        for term in &self.terms {
            let w = term.weight();
            if w == 0.0 {
                continue;
            }
            v += w * &term.operand;
        }
        v
    }

    /// Constant part of term `index`, ignoring its weight.
    pub fn term_vector(&self, index: usize) -> Option<&DVector<f64>> {
        self.terms.get(index).map(|t| &t.operand)
    }

    pub fn term_coefficient(&self, index: usize) -> Option<Coefficient> {
        self.terms.get(index)?.coefficient.clone()
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, 1.0);
        }
        CsrMatrix::from(&coo)
    }

    #[test]
    fn coefficient_set_updates_snapshot() {
        let c = Coefficient::new("kappa", 2.0);
        assert_eq!(c.value(), 2.0);
        c.set(5.0);
        assert_eq!(c.value(), 5.0);
        assert_eq!(
            c.block_variable().saved_output().unwrap().as_scalar(),
            Some(5.0)
        );
    }

    #[test]
    fn bilinear_form_assembles_weighted_sum() {
        let c = Coefficient::new("c", 3.0);
        let form = BilinearForm::new(2, 2)
            .term(&c, identity(2))
            .unwrap()
            .constant_term(identity(2))
            .unwrap();
        let a = CsrMatrix::from(&form.assemble_raw());
        // 3*I + I = 4*I
        let x = DVector::from_vec(vec![1.0, 2.0]);
        let y = form.action(&x).unwrap();
        assert_eq!(y[0], 4.0);
        assert_eq!(y[1], 8.0);
        assert_eq!(a.nnz(), 2);
    }

    #[test]
    fn reassembly_sees_coefficient_updates() {
        let c = Coefficient::new("c", 1.0);
        let form = BilinearForm::new(2, 2).term(&c, identity(2)).unwrap();
        let x = DVector::from_vec(vec![1.0, 1.0]);
        assert_eq!(form.action(&x).unwrap()[0], 1.0);
        c.set(7.0);
        assert_eq!(form.action(&x).unwrap()[0], 7.0);
    }

    #[test]
    fn transpose_swaps_triplets() {
        let mut coo = CooMatrix::new(2, 2);
        coo.push(0, 1, 5.0);
        let form = BilinearForm::from_matrix(CsrMatrix::from(&coo));
        let t = form.transpose();
        let x = DVector::from_vec(vec![1.0, 0.0]);
        let y = t.action(&x).unwrap();
        assert_eq!(y[1], 5.0);
        assert_eq!(y[0], 0.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let c = Coefficient::new("c", 1.0);
        let err = BilinearForm::new(2, 2).term(&c, identity(3)).unwrap_err();
        assert!(matches!(err, SolveError::DimensionMismatch { .. }));
    }

    #[test]
    fn linear_form_assembles_and_lists_coefficients() {
        let c = Coefficient::new("load", 2.0);
        let form = LinearForm::new(2)
            .term(&c, DVector::from_vec(vec![1.0, 3.0]))
            .unwrap();
        let b = form.assemble_raw();
        assert_eq!(b[0], 2.0);
        assert_eq!(b[1], 6.0);
        assert_eq!(form.coefficients().len(), 1);
        assert_eq!(form.coefficients()[0].name(), "load");
    }

    #[test]
    fn zero_linear_form_assembles_to_zeros() {
        let b = LinearForm::zero(3).assemble_raw();
        assert_eq!(b, DVector::zeros(3));
    }
}
