//! Vector unknowns with tape variables attached.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use fea_tape::{BlockVariable, Value};
use nalgebra::DVector;

use crate::error::SolveError;

/// A discrete function space, reduced to its dimension.
///
/// The actual discretization (mesh, elements, dof maps) lives upstream;
/// the instrumentation layer only needs to size vectors consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpace {
    dim: usize,
}

impl FunctionSpace {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// An unknown over a [`FunctionSpace`]: shared vector storage plus the tape
/// variable currently standing for its value.
///
/// Cloning is cheap and clones alias the same storage, mirroring how solver
/// code and recorded blocks both hold the solution object. Each recorded
/// write mints a fresh block variable via [`Function::create_block_variable`]
/// so successive solves into the same function get distinct outputs.
#[derive(Debug, Clone)]
pub struct Function {
    space: FunctionSpace,
    vector: Rc<RefCell<DVector<f64>>>,
    variable: Rc<RefCell<BlockVariable>>,
}

impl Function {
    /// A zero-initialized function over `space`.
    pub fn new(space: FunctionSpace) -> Self {
        Self {
            space,
            vector: Rc::new(RefCell::new(DVector::zeros(space.dim()))),
            variable: Rc::new(RefCell::new(BlockVariable::new())),
        }
    }

    /// A function initialized from `values`.
    pub fn from_vector(space: FunctionSpace, values: DVector<f64>) -> Result<Self, SolveError> {
        if values.len() != space.dim() {
            return Err(SolveError::DimensionMismatch {
                expected: space.dim(),
                found: values.len(),
            });
        }
        let f = Self::new(space);
        *f.vector.borrow_mut() = values;
        Ok(f)
    }

    pub fn space(&self) -> FunctionSpace {
        self.space
    }

    /// Read access to the underlying storage.
    pub fn vector(&self) -> Ref<'_, DVector<f64>> {
        self.vector.borrow()
    }

    /// Write access to the underlying storage (the backend solve writes
    /// the solution through this).
    pub fn vector_mut(&self) -> RefMut<'_, DVector<f64>> {
        self.vector.borrow_mut()
    }

    /// Overwrite the stored values.
    pub fn assign(&self, values: &DVector<f64>) -> Result<(), SolveError> {
        if values.len() != self.space.dim() {
            return Err(SolveError::DimensionMismatch {
                expected: self.space.dim(),
                found: values.len(),
            });
        }
        self.vector.borrow_mut().copy_from(values);
        Ok(())
    }

    /// The tape variable currently standing for this function's value.
    pub fn block_variable(&self) -> BlockVariable {
        self.variable.borrow().clone()
    }

    /// Mint a fresh tape variable for the next recorded write and return it.
    pub fn create_block_variable(&self) -> BlockVariable {
        let fresh = BlockVariable::new();
        *self.variable.borrow_mut() = fresh.clone();
        fresh
    }

    /// Snapshot the current values onto the current tape variable.
    pub fn save_state(&self) {
        self.block_variable()
            .save(Value::Vector(self.vector.borrow().clone()));
    }
}
