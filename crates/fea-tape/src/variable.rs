//! Tape variables and the value snapshots stored on them.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::DVector;

use crate::TapeError;

static NEXT_VARIABLE_ID: AtomicUsize = AtomicUsize::new(0);

/// A value recorded on the tape: either a scalar parameter or a vector of
/// degrees of freedom.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(DVector<f64>),
}

impl Value {
    /// Accumulate `other` into `self` (adjoint values sum over fan-out).
    pub fn accumulate(&mut self, other: &Value) -> Result<(), TapeError> {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => {
                *a += b;
                Ok(())
            }
            (Value::Vector(a), Value::Vector(b)) => {
                if a.len() != b.len() {
                    return Err(TapeError::ShapeMismatch(format!(
                        "vector lengths {} and {}",
                        a.len(),
                        b.len()
                    )));
                }
                *a += b;
                Ok(())
            }
            _ => Err(TapeError::ShapeMismatch(
                "scalar accumulated against vector".to_string(),
            )),
        }
    }

    /// The vector payload, if this value is a vector.
    pub fn as_vector(&self) -> Option<&DVector<f64>> {
        match self {
            Value::Vector(v) => Some(v),
            Value::Scalar(_) => None,
        }
    }

    /// The scalar payload, if this value is a scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(s) => Some(*s),
            Value::Vector(_) => None,
        }
    }
}

#[derive(Debug)]
struct VariableState {
    id: usize,
    saved_output: Option<Value>,
    adj_value: Option<Value>,
}

/// Handle to one variable on the tape.
///
/// Cloning is cheap and clones share state: a block that depends on a
/// variable and the code that later saves or seeds it all observe the same
/// snapshot and adjoint slots.
#[derive(Debug, Clone)]
pub struct BlockVariable {
    state: Rc<RefCell<VariableState>>,
}

impl BlockVariable {
    /// Create a fresh variable with no saved value.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(VariableState {
                id: NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed),
                saved_output: None,
                adj_value: None,
            })),
        }
    }

    /// Unique id of this variable.
    pub fn id(&self) -> usize {
        self.state.borrow().id
    }

    /// Two handles refer to the same variable.
    pub fn same_as(&self, other: &BlockVariable) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Save a snapshot of the variable's current value.
    pub fn save(&self, value: Value) {
        self.state.borrow_mut().saved_output = Some(value);
    }

    /// The saved snapshot, if any.
    pub fn saved_output(&self) -> Option<Value> {
        self.state.borrow().saved_output.clone()
    }

    /// Accumulate an adjoint contribution onto this variable.
    pub fn add_adj_value(&self, value: Value) -> Result<(), TapeError> {
        let mut state = self.state.borrow_mut();
        match state.adj_value.as_mut() {
            Some(existing) => existing.accumulate(&value),
            None => {
                state.adj_value = Some(value);
                Ok(())
            }
        }
    }

    /// The accumulated adjoint value, if any contribution has arrived.
    pub fn adj_value(&self) -> Option<Value> {
        self.state.borrow().adj_value.clone()
    }

    /// Drop any accumulated adjoint value.
    pub fn clear_adj_value(&self) {
        self.state.borrow_mut().adj_value = None;
    }
}

impl Default for BlockVariable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_variables_have_distinct_ids() {
        let a = BlockVariable::new();
        let b = BlockVariable::new();
        assert_ne!(a.id(), b.id());
        assert!(!a.same_as(&b));
    }

    #[test]
    fn clones_share_state() {
        let a = BlockVariable::new();
        let b = a.clone();
        a.save(Value::Scalar(3.0));
        assert_eq!(b.saved_output(), Some(Value::Scalar(3.0)));
        assert!(a.same_as(&b));
    }

    #[test]
    fn adjoint_values_accumulate() {
        let v = BlockVariable::new();
        v.add_adj_value(Value::Vector(DVector::from_vec(vec![1.0, 2.0])))
            .unwrap();
        v.add_adj_value(Value::Vector(DVector::from_vec(vec![0.5, 0.5])))
            .unwrap();
        let adj = v.adj_value().unwrap();
        assert_eq!(adj.as_vector().unwrap()[0], 1.5);
        assert_eq!(adj.as_vector().unwrap()[1], 2.5);
    }

    #[test]
    fn mixed_shape_accumulation_fails() {
        let v = BlockVariable::new();
        v.add_adj_value(Value::Scalar(1.0)).unwrap();
        let err = v
            .add_adj_value(Value::Vector(DVector::zeros(2)))
            .unwrap_err();
        assert!(matches!(err, TapeError::ShapeMismatch(_)));
    }

    #[test]
    fn clear_resets_accumulation() {
        let v = BlockVariable::new();
        v.add_adj_value(Value::Scalar(1.0)).unwrap();
        v.clear_adj_value();
        assert!(v.adj_value().is_none());
    }
}
