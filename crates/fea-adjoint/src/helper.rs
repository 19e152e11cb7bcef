//! Per-node solver reuse cache.

use std::cell::RefCell;
use std::rc::Rc;

use fea_la::KrylovSolver;

type Slot = Option<Rc<RefCell<KrylovSolver>>>;

#[derive(Debug, Default)]
struct Slots {
    forward: Slot,
    adjoint: Slot,
}

/// Holder of two lazily constructed solver handles, one for forward solves
/// and one for adjoint solves.
///
/// Cloning shares the slots: a façade and the blocks it records against the
/// same operator see one cache, so repeated solves reuse one factorization
/// per direction. The cache must be emptied whenever the governing operator
/// changes; a stale handle must never be solved against a new operator.
#[derive(Debug, Clone, Default)]
pub struct SolveHelper {
    slots: Rc<RefCell<Slots>>,
}

impl SolveHelper {
    /// A fresh cache with both slots empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached forward-solve handle, if one has been built.
    pub fn forward_solver(&self) -> Slot {
        self.slots.borrow().forward.clone()
    }

    /// The cached adjoint-solve handle, if one has been built.
    pub fn adjoint_solver(&self) -> Slot {
        self.slots.borrow().adjoint.clone()
    }

    /// Fill the forward slot, returning the stored handle.
    pub fn store_forward(&self, solver: Rc<RefCell<KrylovSolver>>) -> Rc<RefCell<KrylovSolver>> {
        self.slots.borrow_mut().forward = Some(Rc::clone(&solver));
        solver
    }

    /// Fill the adjoint slot, returning the stored handle.
    pub fn store_adjoint(&self, solver: Rc<RefCell<KrylovSolver>>) -> Rc<RefCell<KrylovSolver>> {
        self.slots.borrow_mut().adjoint = Some(Rc::clone(&solver));
        solver
    }

    /// Empty both slots.
    pub fn reset(&self) {
        let mut slots = self.slots.borrow_mut();
        slots.forward = None;
        slots.adjoint = None;
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots.borrow();
        slots.forward.is_none() && slots.adjoint.is_none()
    }

    /// Two helpers share the same slots.
    pub fn shares_slots_with(&self, other: &SolveHelper) -> bool {
        Rc::ptr_eq(&self.slots, &other.slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fea_la::{KrylovMethod, Preconditioner};

    fn handle() -> Rc<RefCell<KrylovSolver>> {
        Rc::new(RefCell::new(KrylovSolver::new(
            KrylovMethod::Cg,
            Preconditioner::None,
        )))
    }

    #[test]
    fn slots_start_empty() {
        let helper = SolveHelper::new();
        assert!(helper.is_empty());
        assert!(helper.forward_solver().is_none());
        assert!(helper.adjoint_solver().is_none());
    }

    #[test]
    fn stored_handles_are_returned() {
        let helper = SolveHelper::new();
        let fwd = helper.store_forward(handle());
        let adj = helper.store_adjoint(handle());
        assert!(Rc::ptr_eq(&helper.forward_solver().unwrap(), &fwd));
        assert!(Rc::ptr_eq(&helper.adjoint_solver().unwrap(), &adj));
        assert!(!helper.is_empty());
    }

    #[test]
    fn clones_share_slots() {
        let helper = SolveHelper::new();
        let clone = helper.clone();
        helper.store_forward(handle());
        assert!(clone.forward_solver().is_some());
        assert!(clone.shares_slots_with(&helper));
        assert!(!clone.shares_slots_with(&SolveHelper::new()));
    }

    #[test]
    fn reset_empties_both_slots() {
        let helper = SolveHelper::new();
        helper.store_forward(handle());
        helper.store_adjoint(handle());
        helper.reset();
        assert!(helper.is_empty());
    }
}
