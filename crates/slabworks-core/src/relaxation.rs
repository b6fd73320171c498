//! Point relaxation smoothers: Jacobi, Gauss-Seidel and symmetric Gauss-Seidel.
//!
//! These update one unknown at a time from its own row of the operator,
//! which makes them cheap but slow to reduce smooth error.
//! They are configured with keys prefixed by `"relaxation: "`.

use nalgebra as na;
use std::time::Instant;

use crate::{
    operator::RowMatrix,
    parameters::{ParameterError, ParameterList},
    preconditioner::{PhaseStats, Preconditioner, PreconditionerError},
};

const PREFIX: &str = "relaxation: ";
const TYPE_KEY: &str = "relaxation: type";
const SWEEPS_KEY: &str = "relaxation: sweeps";
const DAMPING_KEY: &str = "relaxation: damping factor";
const MIN_DIAG_KEY: &str = "relaxation: min diagonal value";
const ZERO_START_KEY: &str = "relaxation: zero starting solution";
const KNOWN_KEYS: [&str; 5] = [
    TYPE_KEY,
    SWEEPS_KEY,
    DAMPING_KEY,
    MIN_DIAG_KEY,
    ZERO_START_KEY,
];

/// The kind of sweep performed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RelaxationType {
    /// Update all unknowns simultaneously from the previous iterate.
    #[default]
    Jacobi,
    /// Update unknowns in order, using already updated values.
    GaussSeidel,
    /// A forward Gauss-Seidel sweep followed by a backward one.
    SymmetricGaussSeidel,
}

impl RelaxationType {
    /// The name used for this type in parameter lists.
    pub fn name(self) -> &'static str {
        match self {
            Self::Jacobi => "Jacobi",
            Self::GaussSeidel => "Gauss-Seidel",
            Self::SymmetricGaussSeidel => "symmetric Gauss-Seidel",
        }
    }
}

impl std::str::FromStr for RelaxationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jacobi" => Ok(Self::Jacobi),
            "gauss-seidel" | "gs" => Ok(Self::GaussSeidel),
            "symmetric gauss-seidel" | "sgs" => Ok(Self::SymmetricGaussSeidel),
            other => Err(format!(
                "unknown relaxation type '{other}', \
                expected 'Jacobi', 'Gauss-Seidel' or 'symmetric Gauss-Seidel'"
            )),
        }
    }
}

/// Configuration of a [`PointRelaxation`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RelaxationParams {
    /// `relaxation: type`, default Jacobi.
    pub kind: RelaxationType,
    /// `relaxation: sweeps`, default 1.
    pub sweeps: usize,
    /// `relaxation: damping factor`, default 1.
    pub damping: f64,
    /// `relaxation: min diagonal value`, default 0.
    /// Diagonal entries smaller than this in absolute value
    /// are replaced by it before inverting.
    pub min_diagonal_value: f64,
    /// `relaxation: zero starting solution`, default true.
    pub zero_starting_solution: bool,
}

impl Default for RelaxationParams {
    fn default() -> Self {
        Self {
            kind: RelaxationType::Jacobi,
            sweeps: 1,
            damping: 1.0,
            min_diagonal_value: 0.0,
            zero_starting_solution: true,
        }
    }
}

impl RelaxationParams {
    /// Update the fields present in a parameter list.
    pub fn update(&mut self, params: &ParameterList) -> Result<(), ParameterError> {
        let kind: String = params.get(TYPE_KEY, self.kind.name().to_string())?;
        self.kind = kind.parse().map_err(|reason| ParameterError::InvalidValue {
            key: TYPE_KEY.to_string(),
            value: kind.clone(),
            reason,
        })?;
        self.sweeps = params.get(SWEEPS_KEY, self.sweeps)?;
        self.damping = params.get(DAMPING_KEY, self.damping)?;
        self.min_diagonal_value = params.get(MIN_DIAG_KEY, self.min_diagonal_value)?;
        self.zero_starting_solution = params.get(ZERO_START_KEY, self.zero_starting_solution)?;

        params.warn_unrecognized(PREFIX, &KNOWN_KEYS);
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum State {
    Uninitialized,
    Initialized,
    Computed { inv_diagonal: na::DVector<f64> },
}

/// A point relaxation preconditioner for an operator.
#[derive(Debug)]
pub struct PointRelaxation<'a, M: RowMatrix + ?Sized> {
    op: &'a M,
    params: RelaxationParams,
    state: State,
    num_my_rows: usize,
    num_my_nonzeros: usize,
    stats: PhaseStats,
}

impl<'a, M: RowMatrix + ?Sized> PointRelaxation<'a, M> {
    /// Create a relaxation with default parameters (one undamped Jacobi sweep).
    pub fn new(op: &'a M) -> Self {
        Self::with_params(op, RelaxationParams::default())
    }

    /// Create a relaxation with the given parameters.
    pub fn with_params(op: &'a M, params: RelaxationParams) -> Self {
        Self {
            op,
            params,
            state: State::Uninitialized,
            num_my_rows: 0,
            num_my_nonzeros: 0,
            stats: PhaseStats::default(),
        }
    }

    /// The current parameters.
    #[inline]
    pub fn params(&self) -> &RelaxationParams {
        &self.params
    }

    fn jacobi_sweep(
        &self,
        inv_diagonal: &na::DVector<f64>,
        x: &na::DVector<f64>,
        y: &mut na::DVector<f64>,
        ay: &mut na::DVector<f64>,
    ) -> Result<(), PreconditionerError> {
        self.op.apply(y, ay)?;
        let correction = inv_diagonal.component_mul(&(x - &*ay));
        y.axpy(self.params.damping, &correction, 1.0);
        Ok(())
    }

    fn gauss_seidel_sweep(
        &self,
        inv_diagonal: &na::DVector<f64>,
        x: &na::DVector<f64>,
        y: &mut na::DVector<f64>,
        rows: impl Iterator<Item = usize>,
    ) {
        for i in rows {
            let row_sum: f64 = self.op.row(i).iter().map(|(j, a)| a * y[j]).sum();
            y[i] += self.params.damping * inv_diagonal[i] * (x[i] - row_sum);
        }
    }
}

impl<'a, M: RowMatrix + ?Sized> Preconditioner for PointRelaxation<'a, M> {
    fn set_parameters(&mut self, params: &ParameterList) -> Result<(), PreconditionerError> {
        self.params.update(params)?;
        if self.is_computed() {
            self.state = State::Initialized;
        }
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PreconditionerError> {
        let started = Instant::now();
        self.num_my_rows = self.op.num_my_rows();
        self.num_my_nonzeros = self.op.num_my_nonzeros();
        self.state = State::Initialized;
        self.stats.initialize.record(started, 0.0);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        !matches!(self.state, State::Uninitialized)
    }

    fn compute(&mut self) -> Result<(), PreconditionerError> {
        let started = Instant::now();
        if !self.is_initialized() {
            self.initialize()?;
        }
        if self.params.sweeps == 0 {
            return Err(PreconditionerError::InvalidConfiguration(
                "number of sweeps must be at least 1".to_string(),
            ));
        }

        let min = self.params.min_diagonal_value;
        let inv_diagonal = self.op.extract_diagonal().map(|d| {
            let d = if d.abs() < min { min } else { d };
            1.0 / d
        });
        self.state = State::Computed { inv_diagonal };
        self.stats.compute.record(started, self.num_my_rows as f64);
        Ok(())
    }

    fn is_computed(&self) -> bool {
        matches!(self.state, State::Computed { .. })
    }

    fn apply_inverse(
        &mut self,
        x: &na::DVector<f64>,
        y: &mut na::DVector<f64>,
    ) -> Result<(), PreconditionerError> {
        let started = Instant::now();
        let State::Computed { inv_diagonal } = &self.state else {
            return Err(PreconditionerError::NotComputed);
        };
        self.op.check_len(x)?;
        self.op.check_len(y)?;

        if self.params.zero_starting_solution {
            y.fill(0.0);
        }
        let n = x.len();
        let mut ay = na::DVector::zeros(n);
        for _ in 0..self.params.sweeps {
            match self.params.kind {
                RelaxationType::Jacobi => self.jacobi_sweep(inv_diagonal, x, y, &mut ay)?,
                RelaxationType::GaussSeidel => self.gauss_seidel_sweep(inv_diagonal, x, y, 0..n),
                RelaxationType::SymmetricGaussSeidel => {
                    self.gauss_seidel_sweep(inv_diagonal, x, y, 0..n);
                    self.gauss_seidel_sweep(inv_diagonal, x, y, (0..n).rev());
                }
            }
        }

        let per_sweep = (2 * self.num_my_nonzeros + 3 * self.num_my_rows) as f64;
        let passes = match self.params.kind {
            RelaxationType::SymmetricGaussSeidel => 2.0,
            _ => 1.0,
        };
        self.stats
            .apply_inverse
            .record(started, passes * per_sweep * self.params.sweeps as f64);
        Ok(())
    }

    fn condest(&self) -> Option<f64> {
        None
    }

    fn label(&self) -> String {
        format!(
            "{}, sweeps = {}, damping = {}",
            self.params.kind.name(),
            self.params.sweeps,
            self.params.damping
        )
    }

    fn stats(&self) -> &PhaseStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra_sparse as nas;

    fn laplacian_1d(n: usize) -> nas::CsrMatrix<f64> {
        let mut coo = nas::CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, 2.0);
            if i > 0 {
                coo.push(i, i - 1, -1.0);
            }
            if i + 1 < n {
                coo.push(i, i + 1, -1.0);
            }
        }
        nas::CsrMatrix::from(&coo)
    }

    fn residual_norm(a: &nas::CsrMatrix<f64>, b: &na::DVector<f64>, y: &na::DVector<f64>) -> f64 {
        let mut ay = na::DVector::zeros(b.len());
        a.apply(y, &mut ay).unwrap();
        (b - ay).norm()
    }

    #[test]
    fn parameters_from_list() {
        let mut params = RelaxationParams::default();
        params
            .update(
                &ParameterList::new()
                    .with(TYPE_KEY, "symmetric Gauss-Seidel")
                    .with(SWEEPS_KEY, 3)
                    .with(DAMPING_KEY, 0.8),
            )
            .unwrap();
        assert_eq!(params.kind, RelaxationType::SymmetricGaussSeidel);
        assert_eq!(params.sweeps, 3);
        assert_eq!(params.damping, 0.8);

        assert!(params
            .update(&ParameterList::new().with(TYPE_KEY, "SOR"))
            .is_err());
    }

    #[test]
    fn single_jacobi_sweep_scales_by_diagonal() {
        let a = laplacian_1d(4);
        let mut relax = PointRelaxation::with_params(
            &a,
            RelaxationParams {
                damping: 0.5,
                ..Default::default()
            },
        );
        relax.compute().unwrap();
        let x = na::DVector::from_vec(vec![4.0, 2.0, -2.0, 8.0]);
        let mut y = na::DVector::repeat(4, 123.0);
        relax.apply_inverse(&x, &mut y).unwrap();
        assert_relative_eq!(y, x * 0.25);
    }

    #[test]
    fn gauss_seidel_solves_triangular_systems() {
        let mut coo = nas::CooMatrix::new(3, 3);
        coo.push(0, 0, 2.0);
        coo.push(1, 0, 1.0);
        coo.push(1, 1, 4.0);
        coo.push(2, 1, -1.0);
        coo.push(2, 2, 1.0);
        let a = nas::CsrMatrix::from(&coo);

        let mut relax = PointRelaxation::with_params(
            &a,
            RelaxationParams {
                kind: RelaxationType::GaussSeidel,
                ..Default::default()
            },
        );
        relax.compute().unwrap();
        let b = na::DVector::from_vec(vec![2.0, 5.0, 0.0]);
        let mut y = na::DVector::zeros(3);
        relax.apply_inverse(&b, &mut y).unwrap();
        assert_relative_eq!(y, na::DVector::from_vec(vec![1.0, 1.0, 1.0]));
    }

    #[test]
    fn sweeps_reduce_the_residual() {
        let n = 16;
        let a = laplacian_1d(n);
        let b = na::DVector::from_fn(n, |i, _| (i % 3) as f64 - 1.0);
        let initial = b.norm();

        for kind in [
            RelaxationType::Jacobi,
            RelaxationType::GaussSeidel,
            RelaxationType::SymmetricGaussSeidel,
        ] {
            let mut relax = PointRelaxation::with_params(
                &a,
                RelaxationParams {
                    kind,
                    sweeps: 4,
                    damping: 2.0 / 3.0,
                    ..Default::default()
                },
            );
            relax.compute().unwrap();
            let mut y = na::DVector::zeros(n);
            relax.apply_inverse(&b, &mut y).unwrap();
            assert!(residual_norm(&a, &b, &y) < initial, "{kind:?}");
        }
    }

    #[test]
    fn gauss_seidel_converges() {
        let n = 8;
        let a = laplacian_1d(n);
        let b = na::DVector::repeat(n, 1.0);
        let mut relax = PointRelaxation::with_params(
            &a,
            RelaxationParams {
                kind: RelaxationType::SymmetricGaussSeidel,
                sweeps: 500,
                ..Default::default()
            },
        );
        relax.compute().unwrap();
        let mut y = na::DVector::zeros(n);
        relax.apply_inverse(&b, &mut y).unwrap();
        assert!(residual_norm(&a, &b, &y) < 1e-8);
    }

    #[test]
    fn apply_before_compute_fails() {
        let a = laplacian_1d(2);
        let mut relax = PointRelaxation::new(&a);
        let mut y = na::DVector::zeros(2);
        assert_eq!(
            relax.apply_inverse(&na::DVector::zeros(2), &mut y),
            Err(PreconditionerError::NotComputed)
        );
        assert_eq!(relax.label(), "Jacobi, sweeps = 1, damping = 1");
    }
}
