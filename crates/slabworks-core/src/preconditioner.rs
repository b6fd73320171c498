//! The common interface of preconditioners.
//!
//! A preconditioner goes through three phases:
//! it is configured with [`set_parameters`][Preconditioner::set_parameters],
//! [`initialize`][Preconditioner::initialize]d against the structure of its operator,
//! and [`compute`][Preconditioner::compute]d from the operator's values.
//! After that, [`apply_inverse`][Preconditioner::apply_inverse]
//! can be called any number of times.
//! Computing again after the operator's values change is allowed.

use nalgebra as na;
use std::time::{Duration, Instant};

use crate::{
    operator::OperatorError,
    parameters::{ParameterError, ParameterList},
};

/// Error in setting up or applying a preconditioner.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PreconditionerError {
    /// A phase was called before initialization.
    #[error("Preconditioner has not been initialized")]
    NotInitialized,
    /// Applied before computing.
    #[error("Preconditioner has not been computed")]
    NotComputed,
    /// The configuration can't be used to compute the preconditioner.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// An eigenvalue estimate could not be computed.
    #[error("Eigenvalue estimation failed: {0}")]
    EstimationFailed(String),
    #[allow(missing_docs)]
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Operator(#[from] OperatorError),
}

/// A preconditioner for a linear operator,
/// approximating the action of its inverse.
pub trait Preconditioner {
    /// Read configuration from a parameter list.
    /// Parameters not present in the list keep their current values.
    fn set_parameters(&mut self, params: &ParameterList) -> Result<(), PreconditionerError>;

    /// Set up anything that depends only on the operator's structure.
    fn initialize(&mut self) -> Result<(), PreconditionerError>;

    /// Whether [`initialize`][Self::initialize] has been called successfully.
    fn is_initialized(&self) -> bool;

    /// Set up anything that depends on the operator's values.
    /// Initializes first if that hasn't been done yet.
    fn compute(&mut self) -> Result<(), PreconditionerError>;

    /// Whether [`compute`][Self::compute] has been called successfully.
    fn is_computed(&self) -> bool;

    /// Compute `y ≈ A⁻¹ x`.
    ///
    /// Depending on configuration, the initial contents of `y`
    /// may be used as a starting guess.
    fn apply_inverse(
        &mut self,
        x: &na::DVector<f64>,
        y: &mut na::DVector<f64>,
    ) -> Result<(), PreconditionerError>;

    /// Estimated condition number of the preconditioned operator,
    /// if one has been computed.
    fn condest(&self) -> Option<f64>;

    /// A short description of the preconditioner and its main settings.
    fn label(&self) -> String;

    /// Call counts, times and flop estimates of each phase.
    fn stats(&self) -> &PhaseStats;
}

/// Statistics of one phase of a preconditioner.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseTimer {
    /// Number of successful calls.
    pub calls: usize,
    /// Total time spent in successful calls.
    pub time: Duration,
    /// Estimated number of floating point operations in successful calls.
    pub flops: f64,
}

impl PhaseTimer {
    /// Record a call that started at `started` and performed `flops` operations.
    pub fn record(&mut self, started: Instant, flops: f64) {
        self.calls += 1;
        self.time += started.elapsed();
        self.flops += flops;
    }

    /// Flop rate over all calls in millions per second,
    /// or zero if no time has been recorded.
    pub fn mflops(&self) -> f64 {
        let secs = self.time.as_secs_f64();
        if secs > 0.0 {
            self.flops / secs * 1e-6
        } else {
            0.0
        }
    }
}

/// Statistics of all phases of a preconditioner.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseStats {
    #[allow(missing_docs)]
    pub initialize: PhaseTimer,
    #[allow(missing_docs)]
    pub compute: PhaseTimer,
    #[allow(missing_docs)]
    pub apply_inverse: PhaseTimer,
}

impl std::fmt::Display for PhaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:<14}{:>8}{:>14}{:>16}{:>12}",
            "Phase", "# calls", "Total time (s)", "Total MFlops", "MFlops/s"
        )?;
        for (name, timer) in [
            ("Initialize()", &self.initialize),
            ("Compute()", &self.compute),
            ("ApplyInverse()", &self.apply_inverse),
        ] {
            writeln!(
                f,
                "{:<14}{:>8}{:>14.6}{:>16.6}{:>12.3}",
                name,
                timer.calls,
                timer.time.as_secs_f64(),
                timer.flops * 1e-6,
                timer.mflops()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_accumulates() {
        let mut timer = PhaseTimer::default();
        let start = Instant::now();
        timer.record(start, 10.0);
        timer.record(start, 5.0);
        assert_eq!(timer.calls, 2);
        assert_eq!(timer.flops, 15.0);
        assert!(timer.mflops() >= 0.0);
    }

    #[test]
    fn stats_table_has_a_row_per_phase() {
        let stats = PhaseStats::default();
        let table = stats.to_string();
        assert_eq!(table.lines().count(), 4);
        assert!(table.contains("ApplyInverse()"));
    }

    #[test]
    fn errors_convert() {
        let err: PreconditionerError = OperatorError::DimensionMismatch {
            expected: 2,
            found: 3,
        }
        .into();
        assert!(matches!(err, PreconditionerError::Operator(_)));
    }
}
