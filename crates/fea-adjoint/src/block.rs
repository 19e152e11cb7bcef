//! The recorded linear-solve tape node.
//!
//! One [`KrylovSolveBlock`] captures one forward solve: the operand forms,
//! the solution function, the boundary conditions, and a snapshot of the
//! solver configuration. The node can replay the forward solve and solve
//! the corresponding adjoint (transposed) system, reusing lazily built
//! solver handles from its [`SolveHelper`].

use std::cell::RefCell;
use std::rc::Rc;

use fea_la::{
    assemble_operator, assemble_rhs, AssemblyStrategy, BilinearForm, DirichletBC, Function,
    KrylovMethod, LinearForm, Preconditioner, SolveError,
};
use fea_tape::{Block, BlockVariable, Dependency, TapeError, Value};
use nalgebra::DVector;

use crate::helper::SolveHelper;
use crate::options::SolverOptions;

/// Recording-time snapshot of everything the node needs besides operands:
/// solver configuration, method/preconditioner pair, assembly strategy, and
/// the optional preconditioning form.
#[derive(Debug, Clone)]
pub struct KrylovSolveRecord {
    pub options: SolverOptions,
    pub method: KrylovMethod,
    pub preconditioner: Preconditioner,
    pub strategy: AssemblyStrategy,
    pub pc_form: Option<BilinearForm>,
}

/// One forward linear solve recorded on the tape.
pub struct KrylovSolveBlock {
    lhs: BilinearForm,
    rhs: LinearForm,
    func: Function,
    bcs: Vec<DirichletBC>,
    record: KrylovSolveRecord,
    helper: SolveHelper,
    nonzero_initial_guess: bool,
    initial_guess: Option<BlockVariable>,
    dependencies: Vec<Dependency>,
    output: RefCell<Option<BlockVariable>>,
    boundary_adjoint: RefCell<Option<DVector<f64>>>,
}

impl KrylovSolveBlock {
    /// Build the node and wire its dependency edges.
    ///
    /// Every coefficient of the left-hand, right-hand, and preconditioner
    /// forms becomes a `Coefficient` edge. With a nonzero initial guess the
    /// solution's current value is snapshotted for replay; when
    /// `track_initial_guess` is set that snapshot also becomes an explicit
    /// `InitialGuess` edge, otherwise it stays invisible to the graph.
    pub fn new(
        lhs: BilinearForm,
        func: Function,
        rhs: LinearForm,
        bcs: Vec<DirichletBC>,
        record: KrylovSolveRecord,
        helper: SolveHelper,
        track_initial_guess: bool,
    ) -> Self {
        let mut dependencies = Vec::new();
        for c in lhs.coefficients() {
            dependencies.push(Dependency::coefficient(c.block_variable()));
        }
        for c in rhs.coefficients() {
            dependencies.push(Dependency::coefficient(c.block_variable()));
        }
        if let Some(pc_form) = &record.pc_form {
            for c in pc_form.coefficients() {
                dependencies.push(Dependency::coefficient(c.block_variable()));
            }
        }

        let nonzero_initial_guess = record.options.nonzero_initial_guess();
        let initial_guess = if nonzero_initial_guess {
            func.save_state();
            let guess = func.block_variable();
            if track_initial_guess {
                dependencies.push(Dependency::initial_guess(guess.clone()));
            }
            Some(guess)
        } else {
            None
        };

        Self {
            lhs,
            rhs,
            func,
            bcs,
            record,
            helper,
            nonzero_initial_guess,
            initial_guess,
            dependencies,
            output: RefCell::new(None),
            boundary_adjoint: RefCell::new(None),
        }
    }

    /// Register the output variable the post-solve value was saved on.
    pub fn add_output(&self, variable: BlockVariable) {
        *self.output.borrow_mut() = Some(variable);
    }

    pub fn helper(&self) -> &SolveHelper {
        &self.helper
    }

    pub fn strategy(&self) -> AssemblyStrategy {
        self.record.strategy
    }

    pub fn options(&self) -> &SolverOptions {
        &self.record.options
    }

    /// The replay warm-start value saved at construction, if one was taken.
    pub fn saved_initial_guess(&self) -> Option<DVector<f64>> {
        self.initial_guess
            .as_ref()
            .and_then(|v| v.saved_output())
            .and_then(|v| v.as_vector().cloned())
    }

    /// Boundary-contribution term from the most recent adjoint step.
    pub fn boundary_adjoint(&self) -> Option<DVector<f64>> {
        self.boundary_adjoint.borrow().clone()
    }

    fn forward_spec(&self) -> ForwardSpec<'_> {
        ForwardSpec {
            lhs: &self.lhs,
            rhs: &self.rhs,
            bcs: &self.bcs,
            pc_form: self.record.pc_form.as_ref(),
            method: self.record.method,
            preconditioner: self.record.preconditioner,
            strategy: self.record.strategy,
        }
    }

    /// Replay the recorded forward solve and return the solution.
    ///
    /// The forward handle is built lazily on first use and reused by every
    /// later replay sharing this node's cache. The right-hand side is
    /// re-assembled per call; options are re-applied idempotently.
    pub fn forward_solve(&self) -> Result<DVector<f64>, SolveError> {
        let guess = if self.nonzero_initial_guess {
            self.saved_initial_guess()
        } else {
            None
        };
        run_forward_solve(
            &self.helper,
            &self.forward_spec(),
            &self.record.options,
            &self.func,
            guess.as_ref(),
        )
    }

    /// Solve the adjoint system for the incoming seed `djdu`.
    ///
    /// `dfdu_adj` is the form of the transposed forward operator. The seed
    /// is copied before any mutation; the caller's vector is left intact.
    /// With `compute_bdy` the boundary-contribution term
    /// `djdu - dfdu_adj(adj_sol)` (un-homogenized action) is returned as
    /// well: the part of the cotangent absorbed by the Dirichlet data.
    pub fn adjoint_solve(
        &self,
        djdu: &DVector<f64>,
        dfdu_adj: &BilinearForm,
        compute_bdy: bool,
    ) -> Result<(DVector<f64>, Option<DVector<f64>>), SolveError> {
        let hom_bcs: Vec<DirichletBC> = self.bcs.iter().map(DirichletBC::homogenize).collect();

        let solver = match self.helper.adjoint_solver() {
            Some(solver) => solver,
            None => {
                let mut solver =
                    fea_la::KrylovSolver::new(self.record.method, self.record.preconditioner);
                // Zero RHS: only there to get BC-consistent system assembly.
                let zero_rhs = LinearForm::zero(dfdu_adj.nrows());
                let a =
                    assemble_operator(dfdu_adj, &zero_rhs, &hom_bcs, self.record.strategy)?;
                if let Some(pc_form) = &self.record.pc_form {
                    let p = assemble_operator(
                        &pc_form.transpose(),
                        &zero_rhs,
                        &hom_bcs,
                        self.record.strategy,
                    )?;
                    solver.set_operators(a, p);
                } else {
                    solver.set_operator(a);
                }
                self.helper.store_adjoint(Rc::new(RefCell::new(solver)))
            }
        };

        let mut krylov_options = self.record.options.to_krylov_options();
        // The adjoint unknown always starts from zero.
        krylov_options.nonzero_initial_guess = false;
        solver.borrow_mut().set_options(&krylov_options);

        let mut seed = djdu.clone();
        for bc in &hom_bcs {
            bc.apply_vector(&mut seed);
        }

        let mut adj_sol = DVector::zeros(dfdu_adj.ncols());
        solver.borrow().solve(&mut adj_sol, &seed)?;

        let adj_sol_bdy = if compute_bdy {
            Some(djdu - dfdu_adj.action(&adj_sol)?)
        } else {
            None
        };

        Ok((adj_sol, adj_sol_bdy))
    }
}

impl Block for KrylovSolveBlock {
    fn dependencies(&self) -> Vec<Dependency> {
        self.dependencies.clone()
    }

    fn outputs(&self) -> Vec<BlockVariable> {
        self.output.borrow().iter().cloned().collect()
    }

    fn recompute(&self) -> Result<(), TapeError> {
        let solution = self
            .forward_solve()
            .map_err(|e| TapeError::Block(e.to_string()))?;
        if let Some(output) = self.output.borrow().as_ref() {
            output.save(Value::Vector(solution));
        }
        Ok(())
    }

    fn adjoint(&self) -> Result<(), TapeError> {
        let Some(output) = self.output.borrow().as_ref().cloned() else {
            return Ok(());
        };
        let Some(adj) = output.adj_value() else {
            return Ok(());
        };
        let djdu = adj
            .as_vector()
            .ok_or_else(|| TapeError::ShapeMismatch("solve output seeded with a scalar".into()))?
            .clone();

        let dfdu_adj = self.lhs.transpose();
        let compute_bdy = !self.bcs.is_empty();
        let (adj_sol, adj_sol_bdy) = self
            .adjoint_solve(&djdu, &dfdu_adj, compute_bdy)
            .map_err(|e| TapeError::Block(e.to_string()))?;
        *self.boundary_adjoint.borrow_mut() = adj_sol_bdy;

        let u = output
            .saved_output()
            .and_then(|v| v.as_vector().cloned())
            .ok_or(TapeError::MissingValue(output.id()))?;

        // dJ/dc = -lambda' (dF/dc); F(u, c) = A(c) u - b(c).
        for k in 0..self.lhs.num_terms() {
            if let Some(c) = self.lhs.term_coefficient(k) {
                let a_k_u = self
                    .lhs
                    .term_action(k, &u)
                    .ok_or_else(|| TapeError::Block("missing lhs term".into()))?;
                c.block_variable()
                    .add_adj_value(Value::Scalar(-adj_sol.dot(&a_k_u)))?;
            }
        }
        for k in 0..self.rhs.num_terms() {
            if let Some(c) = self.rhs.term_coefficient(k) {
                let b_k = self
                    .rhs
                    .term_vector(k)
                    .ok_or_else(|| TapeError::Block("missing rhs term".into()))?;
                c.block_variable()
                    .add_adj_value(Value::Scalar(adj_sol.dot(b_k)))?;
            }
        }
        // Preconditioner coefficients are tracked but cannot influence the
        // converged solution; their adjoint contribution is exactly zero.
        if let Some(pc_form) = &self.record.pc_form {
            for c in pc_form.coefficients() {
                c.block_variable().add_adj_value(Value::Scalar(0.0))?;
            }
        }
        // Same for the warm start: it steers the iteration, not the limit.
        if let Some(guess) = &self.initial_guess {
            guess.add_adj_value(Value::Vector(DVector::zeros(u.len())))?;
        }

        Ok(())
    }
}

/// Operand bundle for the forward direction.
pub(crate) struct ForwardSpec<'a> {
    pub lhs: &'a BilinearForm,
    pub rhs: &'a LinearForm,
    pub bcs: &'a [DirichletBC],
    pub pc_form: Option<&'a BilinearForm>,
    pub method: KrylovMethod,
    pub preconditioner: Preconditioner,
    pub strategy: AssemblyStrategy,
}

/// Fetch the cached forward handle or build and cache it: assemble the
/// operator (and preconditioning matrix, with the same strategy), bind, and
/// store.
pub(crate) fn obtain_forward_solver(
    helper: &SolveHelper,
    spec: &ForwardSpec<'_>,
) -> Result<Rc<RefCell<fea_la::KrylovSolver>>, SolveError> {
    if let Some(solver) = helper.forward_solver() {
        return Ok(solver);
    }
    let mut solver = fea_la::KrylovSolver::new(spec.method, spec.preconditioner);
    let a = assemble_operator(spec.lhs, spec.rhs, spec.bcs, spec.strategy)?;
    if let Some(pc_form) = spec.pc_form {
        let p = assemble_operator(pc_form, spec.rhs, spec.bcs, spec.strategy)?;
        solver.set_operators(a, p);
    } else {
        solver.set_operator(a);
    }
    Ok(helper.store_forward(Rc::new(RefCell::new(solver))))
}

/// One forward solve against the (possibly cached) forward handle.
///
/// The right-hand side is re-assembled for this call under the recorded
/// strategy; options are applied idempotently; `initial_guess`, when given,
/// pre-populates the solution storage before solving.
pub(crate) fn run_forward_solve(
    helper: &SolveHelper,
    spec: &ForwardSpec<'_>,
    options: &SolverOptions,
    func: &Function,
    initial_guess: Option<&DVector<f64>>,
) -> Result<DVector<f64>, SolveError> {
    let solver = obtain_forward_solver(helper, spec)?;
    let b = assemble_rhs(spec.lhs, spec.rhs, spec.bcs, spec.strategy)?;
    solver.borrow_mut().set_options(&options.to_krylov_options());
    if let Some(guess) = initial_guess {
        func.assign(guess)?;
    }
    {
        let mut x = func.vector_mut();
        solver.borrow().solve(&mut x, &b)?;
    }
    Ok(func.vector().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fea_la::{Coefficient, FunctionSpace};
    use fea_tape::DependencyKind;
    use nalgebra_sparse::{CooMatrix, CsrMatrix};

    fn identity(n: usize) -> CsrMatrix<f64> {
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, 1.0);
        }
        CsrMatrix::from(&coo)
    }

    fn record(strategy: AssemblyStrategy) -> KrylovSolveRecord {
        KrylovSolveRecord {
            options: SolverOptions::default(),
            method: KrylovMethod::Cg,
            preconditioner: Preconditioner::None,
            strategy,
            pc_form: None,
        }
    }

    fn scaled_identity_block(scale: f64, n: usize) -> (KrylovSolveBlock, Function, Coefficient) {
        let c = Coefficient::new("scale", scale);
        let lhs = BilinearForm::new(n, n).term(&c, identity(n)).unwrap();
        let rhs = LinearForm::from_vector(DVector::from_element(n, 4.0));
        let func = Function::new(FunctionSpace::new(n));
        let block = KrylovSolveBlock::new(
            lhs,
            func.clone(),
            rhs,
            vec![],
            record(AssemblyStrategy::AssembleSystem),
            SolveHelper::new(),
            true,
        );
        (block, func, c)
    }

    #[test]
    fn dependencies_cover_all_form_coefficients() {
        let a_coeff = Coefficient::new("a", 1.0);
        let b_coeff = Coefficient::new("b", 1.0);
        let pc_coeff = Coefficient::new("pc", 1.0);
        let lhs = BilinearForm::new(2, 2).term(&a_coeff, identity(2)).unwrap();
        let rhs = LinearForm::new(2)
            .term(&b_coeff, DVector::from_element(2, 1.0))
            .unwrap();
        let pc_form = BilinearForm::new(2, 2).term(&pc_coeff, identity(2)).unwrap();
        let mut rec = record(AssemblyStrategy::AssembleSystem);
        rec.pc_form = Some(pc_form);
        let block = KrylovSolveBlock::new(
            lhs,
            Function::new(FunctionSpace::new(2)),
            rhs,
            vec![],
            rec,
            SolveHelper::new(),
            true,
        );
        let deps = block.dependencies();
        assert_eq!(deps.len(), 3);
        assert!(deps[0].variable.same_as(&a_coeff.block_variable()));
        assert!(deps[1].variable.same_as(&b_coeff.block_variable()));
        assert!(deps[2].variable.same_as(&pc_coeff.block_variable()));
    }

    #[test]
    fn forward_solve_builds_handle_once() {
        let (block, _, _) = scaled_identity_block(2.0, 2);
        assert!(block.helper().forward_solver().is_none());
        let x1 = block.forward_solve().unwrap();
        let id1 = block
            .helper()
            .forward_solver()
            .unwrap()
            .borrow()
            .construction_id();
        let x2 = block.forward_solve().unwrap();
        let id2 = block
            .helper()
            .forward_solver()
            .unwrap()
            .borrow()
            .construction_id();
        assert_eq!(id1, id2);
        assert_eq!(x1, x2);
        assert!((x1[0] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn forward_and_adjoint_use_separate_slots() {
        let (block, _, _) = scaled_identity_block(2.0, 2);
        block.forward_solve().unwrap();
        let seed = DVector::from_element(2, 1.0);
        let dfdu_adj = BilinearForm::from_matrix(identity(2)).transpose();
        let _ = block.adjoint_solve(&seed, &dfdu_adj, false).unwrap();
        let fwd = block.helper().forward_solver().unwrap();
        let adj = block.helper().adjoint_solver().unwrap();
        assert!(!Rc::ptr_eq(&fwd, &adj));
    }

    #[test]
    fn initial_guess_snapshot_taken_at_construction() {
        let n = 2;
        let c = Coefficient::new("scale", 2.0);
        let lhs = BilinearForm::new(n, n).term(&c, identity(n)).unwrap();
        let rhs = LinearForm::from_vector(DVector::from_element(n, 4.0));
        let func = Function::new(FunctionSpace::new(n));
        func.assign(&DVector::from_element(n, 9.0)).unwrap();
        let mut rec = record(AssemblyStrategy::AssembleSystem);
        rec.options = SolverOptions::default().with_nonzero_initial_guess(true);
        let block = KrylovSolveBlock::new(
            lhs,
            func.clone(),
            rhs,
            vec![],
            rec,
            SolveHelper::new(),
            true,
        );
        // Mutating the function afterwards must not change the snapshot.
        func.assign(&DVector::zeros(n)).unwrap();
        assert_eq!(block.saved_initial_guess().unwrap()[0], 9.0);
        let kinds: Vec<DependencyKind> = block.dependencies().iter().map(|d| d.kind).collect();
        assert!(kinds.contains(&DependencyKind::InitialGuess));
    }

    #[test]
    fn untracked_initial_guess_registers_no_edge() {
        let n = 2;
        let lhs = BilinearForm::from_matrix(identity(n));
        let rhs = LinearForm::zero(n);
        let func = Function::new(FunctionSpace::new(n));
        let mut rec = record(AssemblyStrategy::AssembleSystem);
        rec.options = SolverOptions::default().with_nonzero_initial_guess(true);
        let block =
            KrylovSolveBlock::new(lhs, func, rhs, vec![], rec, SolveHelper::new(), false);
        assert!(block
            .dependencies()
            .iter()
            .all(|d| d.kind != DependencyKind::InitialGuess));
        // Snapshot still exists for replay.
        assert!(block.saved_initial_guess().is_some());
    }

    #[test]
    fn adjoint_seed_is_not_mutated() {
        let n = 3;
        let lhs = BilinearForm::from_matrix(identity(n));
        let rhs = LinearForm::from_vector(DVector::from_element(n, 1.0));
        let func = Function::new(FunctionSpace::new(n));
        let bcs = vec![DirichletBC::constant(vec![0], 1.0)];
        let block = KrylovSolveBlock::new(
            lhs.clone(),
            func,
            rhs,
            bcs,
            record(AssemblyStrategy::AssembleThenApply),
            SolveHelper::new(),
            true,
        );
        let seed = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let seed_before = seed.clone();
        let (_, bdy) = block.adjoint_solve(&seed, &lhs.transpose(), true).unwrap();
        assert_eq!(seed, seed_before);
        assert!(bdy.is_some());
    }
}
