//! Solve the Poisson equation -∇²u = 1 in a box with u = 0 on the boundary,
//! using conjugate gradients preconditioned with a Chebyshev smoother.
//!
//! The mesh can be given as a parameter string on the command line, e.g.
//! `cargo run --example poisson_slab -- "24x24x24|bbox:0,0,0,1,1,1"`.
//! Set `RUST_LOG=debug` to see the smoother's eigenvalue estimates
//! and the solver's progress.

use slabworks as sw;
use sw::{na, Preconditioner};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mesh_params = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "16x16x16|bbox:0,0,0,1,1,1|show".to_string());
    let mesh = sw::GeneratedMesh::from_params(&mesh_params, sw::ProcessorLayout::serial())?;

    // the lattice Laplacian has unit spacing,
    // so scale the right-hand side instead of the matrix
    let h = mesh.scale().x;
    let boundary = sw::assembly::boundary_nodes(&mesh);
    let lap = sw::assembly::constrain_rows(sw::assembly::lattice_laplacian(&mesh), &boundary);
    let n = lap.nrows();
    let b = na::DVector::from_fn(n, |i, _| if boundary.contains(i) { 0.0 } else { h * h });

    let params = sw::ParameterList::new()
        .with("chebyshev: degree", 4)
        .with("chebyshev: eigenvalue estimation", "power")
        .with("chebyshev: estimation iterations", 20)
        .with("solver: type", "cg")
        .with("solver: tolerance", 1e-10);

    let mut cheb = sw::Chebyshev::new(&lap);
    cheb.set_parameters(&params)?;
    cheb.compute()?;

    let solver = sw::KrylovSolver::from_parameters(&params)?;
    let mut u = na::DVector::zeros(n);
    let status = solver.solve(&lap, Some(&mut cheb), &b, &mut u)?;
    log::info!(
        "{} finished after {} iterations with relative residual {:e}",
        solver.method.name(),
        status.iterations,
        status.relative_residual
    );

    // the solution peaks at the center of the box
    let coords = mesh.coordinates();
    let (peak_idx, peak) = u
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
    let at = coords[peak_idx];
    log::info!(
        "max u = {peak:.6} at ({:.3}, {:.3}, {:.3})",
        at.x,
        at.y,
        at.z
    );

    log::info!("\n{cheb}");
    Ok(())
}
