//! Implicit-Euler heat conduction on a 1-D bar, demonstrating solver-handle
//! reuse across time steps and a conductivity sensitivity pulled back
//! through a recorded solve.
//!
//! Run with `cargo run --example heat_reuse`.

use fea_adjoint::KrylovSolver;
use fea_la::{
    BilinearForm, Coefficient, DirichletBC, Function, FunctionSpace, LinearForm, SolveError,
};
use fea_tape::{Tape, Value};
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

const NODES: usize = 41;
const STEPS: usize = 20;
const DT: f64 = 1e-3;

/// Tridiagonal stiffness of -d2/dx2 on equispaced nodes over (0, 1).
fn stiffness(n: usize) -> CsrMatrix<f64> {
    let h = 1.0 / (n as f64 - 1.0);
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 2.0 / h);
    }
    for i in 0..n - 1 {
        coo.push(i, i + 1, -1.0 / h);
        coo.push(i + 1, i, -1.0 / h);
    }
    CsrMatrix::from(&coo)
}

/// Lumped mass matrix, h on the diagonal.
fn lumped_mass(n: usize, scale: f64) -> CsrMatrix<f64> {
    let h = 1.0 / (n as f64 - 1.0);
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, scale * h);
    }
    CsrMatrix::from(&coo)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let space = FunctionSpace::new(NODES);
    let h = 1.0 / (NODES as f64 - 1.0);
    let kappa = Coefficient::new("kappa", 1.0);
    let bcs = vec![DirichletBC::constant(vec![0, NODES - 1], 0.0)];

    // (M/dt + kappa K) u_next = M/dt u_prev, fixed operator for all steps.
    let a = BilinearForm::new(NODES, NODES)
        .constant_term(lumped_mass(NODES, 1.0 / DT))?
        .term(&kappa, stiffness(NODES))?;

    let mut tape = Tape::new();
    let mut solver = KrylovSolver::new("cg", "jacobi")?.with_operator(a);
    solver.set_bcs(bcs.clone());

    // Initial condition: a bump in the middle of the bar.
    let u = Function::new(space);
    let bump = DVector::from_fn(NODES, |i, _| {
        let x = i as f64 * h;
        (std::f64::consts::PI * x).sin()
    });
    u.assign(&bump)?;

    for step in 0..STEPS {
        let rhs = LinearForm::from_vector(u.vector().scale(h / DT));
        solver.solve(&mut tape, &u, &rhs)?;
        if step % 5 == 0 {
            let handle = solver
                .helper()
                .forward_solver()
                .map(|s| s.borrow().construction_id());
            println!(
                "step {step:2}: peak temperature {:.6}, handle #{}",
                u.vector().max(),
                handle.unwrap_or(0)
            );
        }
    }
    println!(
        "{STEPS} steps recorded as {} tape nodes against one solver handle",
        tape.len()
    );

    // Steady conduction with the same stiffness: kappa K u = f,
    // J = sum(u). Since u scales like 1/kappa, dJ/dkappa = -J/kappa.
    let mut tape = Tape::new();
    let steady = BilinearForm::new(NODES, NODES).term(&kappa, stiffness(NODES))?;
    let load = LinearForm::from_vector(DVector::from_element(NODES, h));
    let mut solver = KrylovSolver::new("cg", "jacobi")?.with_operator(steady);
    solver.set_bcs(bcs);
    let w = Function::new(space);
    solver.solve(&mut tape, &w, &load)?;
    let j = w.vector().sum();

    w.block_variable()
        .add_adj_value(Value::Vector(DVector::from_element(NODES, 1.0)))?;
    tape.backpropagate()?;
    let grad = kappa
        .block_variable()
        .adj_value()
        .and_then(|v| v.as_scalar())
        .ok_or_else(|| SolveError::Config("no adjoint value on kappa".to_string()))?;

    println!("steady J = {j:.6}");
    println!("dJ/dkappa (adjoint)  = {grad:.6}");
    println!("dJ/dkappa (analytic) = {:.6}", -j / kappa.value());
    Ok(())
}
