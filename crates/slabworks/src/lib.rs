//! `slabworks` generates structured hexahedral meshes split across processes
//! and provides the preconditioners and Krylov solvers
//! to solve problems on them.
//!
//! # Meshes
//!
//! A [`GeneratedMesh`] is described entirely by a few integers:
//! the number of intervals in each direction
//! and the position of this process in the run.
//! Every process computes its own slab of the mesh independently
//! (node and element counts, global ID maps, connectivity and coordinates)
//! without communicating with the others.
//! The easiest way to describe one is with a parameter string:
//!
//! ```
//! # use slabworks as sw;
//! let layout = sw::ProcessorLayout::new(4, 0);
//! let mesh = sw::GeneratedMesh::from_params("8x8x32|shell:zZ|bbox:0,0,0,1,1,4", layout)?;
//! // the first process owns the bottom quarter of the mesh,
//! // including the shells on the bottom face but not the top
//! assert_eq!(mesh.my_num_z(), 8);
//! assert_eq!(mesh.block_element_count_proc(2), 64);
//! assert_eq!(mesh.block_element_count_proc(3), 0);
//! # Ok::<(), sw::generated_mesh::MeshError>(())
//! ```
//!
//! See [`GeneratedMesh::from_params`] for all the options.
//!
//! # Smoothers and solvers
//!
//! Preconditioners implement the [`Preconditioner`] trait
//! and are configured with a [`ParameterList`].
//! The main one is the [`Chebyshev`] polynomial smoother,
//! which needs an estimate of the largest eigenvalue of the diagonally scaled operator;
//! [`PointRelaxation`] provides the classic Jacobi and Gauss-Seidel sweeps.
//! Operators are anything implementing [`RowMatrix`],
//! which includes `nalgebra_sparse`'s `CsrMatrix`.
//!
//! ```
//! # use slabworks as sw;
//! # use sw::Preconditioner;
//! let mesh = sw::GeneratedMesh::new(4, 4, 4, sw::ProcessorLayout::serial())?;
//! let lap = sw::assembly::lattice_laplacian(&mesh);
//!
//! let params = sw::ParameterList::new()
//!     .with("chebyshev: degree", 3)
//!     .with("chebyshev: eigenvalue estimation", "power")
//!     .with("solver: type", "cg");
//! let mut cheb = sw::Chebyshev::new(&lap);
//! cheb.set_parameters(&params)?;
//! cheb.compute()?;
//!
//! let b = sw::na::DVector::repeat(lap.nrows(), 1.0);
//! let mut x = sw::na::DVector::zeros(lap.nrows());
//! let status = sw::KrylovSolver::from_parameters(&params)?
//!     .solve(&lap, Some(&mut cheb), &b, &mut x)?;
//! assert!(status.converged);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[doc(inline)]
pub use slabworks_core::*;
