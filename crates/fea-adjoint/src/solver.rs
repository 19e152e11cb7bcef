//! The instrumented solver façade.
//!
//! [`KrylovSolver`] is what user code calls `solve` on. When the tape it is
//! handed is recording, every solve is captured as a [`KrylovSolveBlock`];
//! otherwise the call is a plain pass-through to the numeric backend with
//! no bookkeeping.

use fea_la::{
    AssemblyStrategy, BilinearForm, DirichletBC, Function, KrylovMethod, LinearForm,
    Preconditioner, SolveError,
};
use fea_tape::{Tape, Value};
use nalgebra::DVector;

use crate::block::{run_forward_solve, ForwardSpec, KrylovSolveBlock, KrylovSolveRecord};
use crate::helper::SolveHelper;
use crate::options::SolverOptions;

/// Adjoint-aware Krylov solver.
///
/// Two solve entry points with distinct caching behavior:
///
/// - [`KrylovSolver::solve`] uses the configured operator and the façade's
///   own reuse cache, so repeated calls (a time-stepping loop with a fixed
///   operator) construct the underlying solver handle exactly once.
/// - [`KrylovSolver::solve_with_operator`] takes an explicit operator; the
///   recorded node gets a fresh, unshared cache, because the supplied
///   operator may differ from the configured one.
pub struct KrylovSolver {
    method: KrylovMethod,
    preconditioner: Preconditioner,
    operator: Option<BilinearForm>,
    pc_operator: Option<BilinearForm>,
    bcs: Vec<DirichletBC>,
    options: SolverOptions,
    strategy: AssemblyStrategy,
    helper: SolveHelper,
}

impl KrylovSolver {
    /// Construct from method and preconditioner names; unknown names are
    /// rejected immediately.
    pub fn new(method: &str, preconditioner: &str) -> Result<Self, SolveError> {
        Ok(Self::from_config(
            KrylovMethod::parse(method)?,
            Preconditioner::parse(preconditioner)?,
        ))
    }

    /// Construct from parsed configuration.
    pub fn from_config(method: KrylovMethod, preconditioner: Preconditioner) -> Self {
        Self {
            method,
            preconditioner,
            operator: None,
            pc_operator: None,
            bcs: Vec::new(),
            options: SolverOptions::default(),
            strategy: AssemblyStrategy::default(),
            helper: SolveHelper::new(),
        }
    }

    /// Builder-style operator binding.
    pub fn with_operator(mut self, a: BilinearForm) -> Self {
        self.set_operator(a);
        self
    }

    /// Replace the governing operator.
    ///
    /// The reuse cache is replaced with a fresh empty one: the next solve
    /// must rebuild its handle, and nodes already recorded against the old
    /// operator keep their old cache untouched.
    pub fn set_operator(&mut self, a: BilinearForm) {
        self.operator = Some(a);
        self.helper = SolveHelper::new();
    }

    /// Replace the governing operator and bind a distinct preconditioning
    /// matrix form. Resets the reuse cache like [`Self::set_operator`].
    pub fn set_operators(&mut self, a: BilinearForm, p: BilinearForm) {
        self.operator = Some(a);
        self.pc_operator = Some(p);
        self.helper = SolveHelper::new();
    }

    /// Replace the solver configuration used for subsequent solves.
    pub fn set_options(&mut self, options: SolverOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Boundary conditions applied by subsequent solves.
    pub fn set_bcs(&mut self, bcs: Vec<DirichletBC>) {
        self.bcs = bcs;
    }

    /// Choose how boundary conditions enter assembled systems.
    pub fn set_assembly_strategy(&mut self, strategy: AssemblyStrategy) {
        self.strategy = strategy;
    }

    pub fn assembly_strategy(&self) -> AssemblyStrategy {
        self.strategy
    }

    /// The façade's own reuse cache.
    pub fn helper(&self) -> &SolveHelper {
        &self.helper
    }

    /// Solve with the configured operator into `x`.
    ///
    /// Fails fast with [`SolveError::NoOperator`] if no operator has been
    /// configured. Reuses the façade's cache across calls.
    pub fn solve(
        &mut self,
        tape: &mut Tape,
        x: &Function,
        b: &LinearForm,
    ) -> Result<DVector<f64>, SolveError> {
        let a = self.operator.clone().ok_or(SolveError::NoOperator)?;
        let helper = self.helper.clone();
        self.solve_inner(tape, a, x, b, helper)
    }

    /// Solve `a x = b` with an explicitly supplied operator.
    ///
    /// The recorded node owns a fresh cache; the façade's configured
    /// operator and cache are left untouched.
    pub fn solve_with_operator(
        &mut self,
        tape: &mut Tape,
        a: &BilinearForm,
        x: &Function,
        b: &LinearForm,
    ) -> Result<DVector<f64>, SolveError> {
        self.solve_inner(tape, a.clone(), x, b, SolveHelper::new())
    }

    fn solve_inner(
        &mut self,
        tape: &mut Tape,
        a: BilinearForm,
        x: &Function,
        b: &LinearForm,
        helper: SolveHelper,
    ) -> Result<DVector<f64>, SolveError> {
        if tape.is_recording() {
            let record = KrylovSolveRecord {
                options: self.options.clone(),
                method: self.method,
                preconditioner: self.preconditioner,
                strategy: self.strategy,
                pc_form: self.pc_operator.clone(),
            };
            let block = KrylovSolveBlock::new(
                a,
                x.clone(),
                b.clone(),
                self.bcs.clone(),
                record,
                helper,
                tape.tracks_initial_guess(),
            );
            let solution = block.forward_solve()?;
            let output = x.create_block_variable();
            output.save(Value::Vector(solution.clone()));
            block.add_output(output);
            tape.add_block(Box::new(block));
            Ok(solution)
        } else {
            let spec = ForwardSpec {
                lhs: &a,
                rhs: b,
                bcs: &self.bcs,
                pc_form: self.pc_operator.as_ref(),
                method: self.method,
                preconditioner: self.preconditioner,
                strategy: self.strategy,
            };
            run_forward_solve(&helper, &spec, &self.options, x, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fea_la::FunctionSpace;
    use nalgebra_sparse::{CooMatrix, CsrMatrix};

    fn scaled_identity(n: usize, scale: f64) -> BilinearForm {
        let mut coo = CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, scale);
        }
        BilinearForm::from_matrix(CsrMatrix::from(&coo))
    }

    #[test]
    fn unknown_names_fail_at_construction() {
        assert!(KrylovSolver::new("gmres", "default").is_err());
        assert!(KrylovSolver::new("cg", "amg").is_err());
        assert!(KrylovSolver::new("cg", "jacobi").is_ok());
    }

    #[test]
    fn two_arg_solve_without_operator_fails_fast() {
        let mut tape = Tape::new();
        let mut solver = KrylovSolver::new("cg", "none").unwrap();
        let x = Function::new(FunctionSpace::new(2));
        let b = LinearForm::zero(2);
        assert!(matches!(
            solver.solve(&mut tape, &x, &b),
            Err(SolveError::NoOperator)
        ));
    }

    #[test]
    fn recording_appends_one_block_per_solve() {
        let mut tape = Tape::new();
        let mut solver = KrylovSolver::new("cg", "none")
            .unwrap()
            .with_operator(scaled_identity(2, 2.0));
        let x = Function::new(FunctionSpace::new(2));
        let b = LinearForm::from_vector(DVector::from_element(2, 4.0));
        solver.solve(&mut tape, &x, &b).unwrap();
        solver.solve(&mut tape, &x, &b).unwrap();
        assert_eq!(tape.len(), 2);
    }

    #[test]
    fn pass_through_records_nothing() {
        let mut tape = Tape::new();
        tape.stop_recording();
        let mut solver = KrylovSolver::new("cg", "none")
            .unwrap()
            .with_operator(scaled_identity(2, 2.0));
        let x = Function::new(FunctionSpace::new(2));
        let b = LinearForm::from_vector(DVector::from_element(2, 4.0));
        let sol = solver.solve(&mut tape, &x, &b).unwrap();
        assert!(tape.is_empty());
        assert!((sol[0] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn solution_is_written_into_function_storage() {
        let mut tape = Tape::new();
        let mut solver = KrylovSolver::new("cg", "none")
            .unwrap()
            .with_operator(scaled_identity(2, 2.0));
        let x = Function::new(FunctionSpace::new(2));
        let b = LinearForm::from_vector(DVector::from_element(2, 4.0));
        solver.solve(&mut tape, &x, &b).unwrap();
        assert!((x.vector()[0] - 2.0).abs() < 1e-8);
        assert!((x.vector()[1] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn output_variable_carries_post_solve_value() {
        let mut tape = Tape::new();
        let mut solver = KrylovSolver::new("cg", "none")
            .unwrap()
            .with_operator(scaled_identity(2, 2.0));
        let x = Function::new(FunctionSpace::new(2));
        let b = LinearForm::from_vector(DVector::from_element(2, 4.0));
        solver.solve(&mut tape, &x, &b).unwrap();
        let saved = x.block_variable().saved_output().unwrap();
        assert!((saved.as_vector().unwrap()[0] - 2.0).abs() < 1e-8);
    }
}
