//! This is the core crate containing all of `slabworks`' functionality.
//! See the `slabworks` crate's documentation for an introduction.

#![warn(missing_docs)]

pub mod comm;
#[doc(inline)]
pub use comm::{Communicator, ProcessorLayout, SerialComm};

pub mod generated_mesh;
#[doc(inline)]
pub use generated_mesh::{GeneratedMesh, ShellLocation, Topology};

pub mod operator;
#[doc(inline)]
pub use operator::RowMatrix;

pub mod parameters;
#[doc(inline)]
pub use parameters::ParameterList;

pub mod preconditioner;
#[doc(inline)]
pub use preconditioner::Preconditioner;

pub mod chebyshev;
#[doc(inline)]
pub use chebyshev::Chebyshev;

pub mod relaxation;
#[doc(inline)]
pub use relaxation::PointRelaxation;

pub mod krylov;
#[doc(inline)]
pub use krylov::{KrylovMethod, KrylovSolver};

pub mod assembly;

// nalgebra re-exports of common types for convenience

pub use nalgebra as na;
pub use nalgebra_sparse as nas;
/// Type alias for a 3D `nalgebra` vector.
pub type Vec3 = na::Vector3<f64>;
