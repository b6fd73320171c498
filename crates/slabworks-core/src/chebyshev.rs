//! Chebyshev polynomial smoothing.
//!
//! [`Chebyshev`] approximates `A⁻¹` by a polynomial in the diagonally scaled operator `D⁻¹A`,
//! chosen to damp the error components with eigenvalues in
//! `[λmax / ratio, 1.1 λmax]` as much as possible.
//! This makes it a good smoother for multigrid-style methods:
//! it needs no inner products and only one operator application per degree,
//! so it parallelizes as well as the operator itself.
//!
//! The largest eigenvalue `λmax` of `D⁻¹A` must be given,
//! or estimated with [`power_method`] or [`cg_estimate`]
//! (see [`EigenvalueEstimation`]).
//!
//! ```
//! # use slabworks_core::{chebyshev::Chebyshev, ParameterList, Preconditioner};
//! # use nalgebra_sparse as nas;
//! # use nalgebra as na;
//! let mut coo = nas::CooMatrix::new(3, 3);
//! for i in 0..3 {
//!     coo.push(i, i, 4.0);
//! }
//! let a = nas::CsrMatrix::from(&coo);
//!
//! let mut cheb = Chebyshev::new(&a);
//! cheb.set_parameters(
//!     &ParameterList::new()
//!         .with("chebyshev: degree", 3)
//!         .with("chebyshev: max eigenvalue", 1.0)
//!         .with("chebyshev: ratio eigenvalue", 1.0),
//! )?;
//! cheb.compute()?;
//!
//! let x = na::DVector::repeat(3, 1.0);
//! let mut y = na::DVector::zeros(3);
//! cheb.apply_inverse(&x, &mut y)?;
//! approx::assert_relative_eq!(y, x / 4.0, epsilon = 1e-4);
//! # Ok::<(), slabworks_core::preconditioner::PreconditionerError>(())
//! ```

use nalgebra as na;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Instant;

use crate::{
    operator::{dot, norm2, RowMatrix},
    parameters::{ParameterError, ParameterList},
    preconditioner::{PhaseStats, Preconditioner, PreconditionerError},
};

const PREFIX: &str = "chebyshev: ";
const RATIO_KEY: &str = "chebyshev: ratio eigenvalue";
const MIN_EIG_KEY: &str = "chebyshev: min eigenvalue";
const MAX_EIG_KEY: &str = "chebyshev: max eigenvalue";
const DEGREE_KEY: &str = "chebyshev: degree";
const MIN_DIAG_KEY: &str = "chebyshev: min diagonal value";
const ZERO_START_KEY: &str = "chebyshev: zero starting solution";
const ESTIMATION_KEY: &str = "chebyshev: eigenvalue estimation";
const ESTIMATION_ITERS_KEY: &str = "chebyshev: estimation iterations";
const KNOWN_KEYS: [&str; 8] = [
    RATIO_KEY,
    MIN_EIG_KEY,
    MAX_EIG_KEY,
    DEGREE_KEY,
    MIN_DIAG_KEY,
    ZERO_START_KEY,
    ESTIMATION_KEY,
    ESTIMATION_ITERS_KEY,
];

/// Seed for the random start vectors of eigenvalue estimation,
/// offset by the process rank.
const ESTIMATION_SEED: u64 = 0x5eed;

/// How [`Chebyshev::compute`] obtains the eigenvalue bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EigenvalueEstimation {
    /// Use the configured `max eigenvalue` as is.
    #[default]
    None,
    /// Replace `max eigenvalue` with a [`power_method`] estimate.
    Power,
    /// Replace both `min eigenvalue` and `max eigenvalue`
    /// with a [`cg_estimate`].
    Cg,
}

impl EigenvalueEstimation {
    /// The name used for this option in parameter lists.
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Power => "power",
            Self::Cg => "cg",
        }
    }
}

impl std::str::FromStr for EigenvalueEstimation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "power" => Ok(Self::Power),
            "cg" => Ok(Self::Cg),
            other => Err(format!(
                "unknown estimation method '{other}', expected 'none', 'power' or 'cg'"
            )),
        }
    }
}

/// Configuration of a [`Chebyshev`] smoother.
///
/// Each field corresponds to a parameter key with the prefix `"chebyshev: "`,
/// listed in the field's docs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChebyshevParams {
    /// Ratio of the largest eigenvalue to the smallest one that is damped
    /// (`ratio eigenvalue`, default 30).
    pub eig_ratio: f64,
    /// Smallest eigenvalue of `D⁻¹A` (`min eigenvalue`, default 0).
    ///
    /// Only used to detect the identity operator
    /// (min and max both equal to 1), which is handled as a Jacobi step.
    pub lambda_min: f64,
    /// Largest eigenvalue of `D⁻¹A` (`max eigenvalue`, default 100).
    pub lambda_max: f64,
    /// Degree of the polynomial (`degree`, default 1).
    pub degree: usize,
    /// Diagonal entries smaller than this in absolute value
    /// are replaced by this value instead of being inverted
    /// (`min diagonal value`, default 0).
    pub min_diagonal_value: f64,
    /// Whether to ignore the initial contents of the output vector
    /// (`zero starting solution`, default true).
    pub zero_starting_solution: bool,
    /// Eigenvalue estimation to perform in compute
    /// (`eigenvalue estimation`, one of `none`, `power`, `cg`, default `none`).
    pub estimation: EigenvalueEstimation,
    /// Iterations of eigenvalue estimation
    /// (`estimation iterations`, default 10).
    pub estimation_iterations: usize,
}

impl Default for ChebyshevParams {
    fn default() -> Self {
        Self {
            eig_ratio: 30.0,
            lambda_min: 0.0,
            lambda_max: 100.0,
            degree: 1,
            min_diagonal_value: 0.0,
            zero_starting_solution: true,
            estimation: EigenvalueEstimation::None,
            estimation_iterations: 10,
        }
    }
}

impl ChebyshevParams {
    /// Update the fields present in a parameter list.
    ///
    /// Keys with the `"chebyshev: "` prefix that aren't recognized
    /// are logged as warnings.
    pub fn update(&mut self, params: &ParameterList) -> Result<(), ParameterError> {
        self.eig_ratio = params.get(RATIO_KEY, self.eig_ratio)?;
        self.lambda_min = params.get(MIN_EIG_KEY, self.lambda_min)?;
        self.lambda_max = params.get(MAX_EIG_KEY, self.lambda_max)?;
        self.degree = params.get(DEGREE_KEY, self.degree)?;
        self.min_diagonal_value = params.get(MIN_DIAG_KEY, self.min_diagonal_value)?;
        self.zero_starting_solution = params.get(ZERO_START_KEY, self.zero_starting_solution)?;
        self.estimation_iterations = params.get(ESTIMATION_ITERS_KEY, self.estimation_iterations)?;

        let estimation: String = params.get(ESTIMATION_KEY, self.estimation.name().to_string())?;
        self.estimation = estimation
            .parse()
            .map_err(|reason| ParameterError::InvalidValue {
                key: ESTIMATION_KEY.to_string(),
                value: estimation.clone(),
                reason,
            })?;

        params.warn_unrecognized(PREFIX, &KNOWN_KEYS);
        Ok(())
    }
}

/// Coefficients of the Chebyshev recurrence,
/// derived from the eigenvalue interval `[alpha, beta]` being damped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChebyshevBounds {
    /// Lower end of the damped interval.
    pub alpha: f64,
    /// Upper end of the damped interval.
    pub beta: f64,
    /// `2 / (beta - alpha)`
    pub delta: f64,
    /// Center of the interval.
    pub theta: f64,
    /// `theta * delta`
    pub s1: f64,
}

impl ChebyshevBounds {
    /// Compute the coefficients for a largest eigenvalue and eigenvalue ratio.
    pub fn new(lambda_max: f64, eig_ratio: f64) -> Self {
        let alpha = lambda_max / eig_ratio;
        let beta = 1.1 * lambda_max;
        let delta = 2.0 / (beta - alpha);
        let theta = 0.5 * (beta + alpha);
        Self {
            alpha,
            beta,
            delta,
            theta,
            s1: theta * delta,
        }
    }
}

#[derive(Clone, Debug)]
enum State {
    Uninitialized,
    Initialized,
    Computed {
        inv_diagonal: na::DVector<f64>,
        bounds: ChebyshevBounds,
    },
}

/// A Chebyshev polynomial preconditioner for an operator `A`.
///
/// See the [module-level docs][self] for an example.
#[derive(Debug)]
pub struct Chebyshev<'a, M: RowMatrix + ?Sized> {
    op: &'a M,
    params: ChebyshevParams,
    state: State,
    num_my_rows: usize,
    num_global_rows: usize,
    num_my_nonzeros: usize,
    condest: Option<f64>,
    stats: PhaseStats,
}

impl<'a, M: RowMatrix + ?Sized> Chebyshev<'a, M> {
    /// Create a smoother for an operator with default parameters.
    pub fn new(op: &'a M) -> Self {
        Self::with_params(op, ChebyshevParams::default())
    }

    /// Create a smoother for an operator with the given parameters.
    pub fn with_params(op: &'a M, params: ChebyshevParams) -> Self {
        Self {
            op,
            params,
            state: State::Uninitialized,
            num_my_rows: 0,
            num_global_rows: 0,
            num_my_nonzeros: 0,
            condest: None,
            stats: PhaseStats::default(),
        }
    }

    /// The current parameters.
    ///
    /// After computing with eigenvalue estimation enabled,
    /// these contain the estimated eigenvalues.
    #[inline]
    pub fn params(&self) -> &ChebyshevParams {
        &self.params
    }

    /// The operator this smoother approximates the inverse of.
    #[inline]
    pub fn operator(&self) -> &'a M {
        self.op
    }

    /// The inverted diagonal of the operator, if computed.
    pub fn inverse_diagonal(&self) -> Option<&na::DVector<f64>> {
        match &self.state {
            State::Computed { inv_diagonal, .. } => Some(inv_diagonal),
            _ => None,
        }
    }

    /// The recurrence coefficients, if computed.
    pub fn bounds(&self) -> Option<ChebyshevBounds> {
        match &self.state {
            State::Computed { bounds, .. } => Some(*bounds),
            _ => None,
        }
    }

    /// Estimate the condition number of `D⁻¹A` with a few iterations of CG.
    ///
    /// The estimate is stored and subsequently returned by
    /// [`condest`][Preconditioner::condest].
    pub fn estimate_condition_number(&mut self, iterations: usize) -> Result<f64, PreconditionerError> {
        let State::Computed { inv_diagonal, .. } = &self.state else {
            return Err(PreconditionerError::NotComputed);
        };
        let (lambda_min, lambda_max) = cg_estimate(self.op, inv_diagonal, iterations)?;
        let condest = lambda_max / lambda_min;
        log::debug!("Chebyshev condition number estimate {condest:e}");
        self.condest = Some(condest);
        Ok(condest)
    }

    fn invert_diagonal(&self) -> na::DVector<f64> {
        let min = self.params.min_diagonal_value;
        self.op
            .extract_diagonal()
            .map(|d| if d.abs() < min { min } else { 1.0 / d })
    }
}

impl<'a, M: RowMatrix + ?Sized> Preconditioner for Chebyshev<'a, M> {
    /// Read parameters with the `"chebyshev: "` prefix.
    ///
    /// If the smoother has already been computed,
    /// it needs to be computed again for the new parameters to take effect.
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
        self.num_global_rows = self.op.num_global_rows();
        self.num_my_nonzeros = self.op.num_my_nonzeros();
        self.condest = None;
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
        if self.params.degree == 0 {
            return Err(PreconditionerError::InvalidConfiguration(
                "polynomial degree must be at least 1".to_string(),
            ));
        }
        if !(self.params.eig_ratio > 0.0) {
            return Err(PreconditionerError::InvalidConfiguration(format!(
                "eigenvalue ratio must be positive, got {}",
                self.params.eig_ratio
            )));
        }

        let inv_diagonal = self.invert_diagonal();
        let mut flops = self.num_my_rows as f64;

        let iters = self.params.estimation_iterations;
        match self.params.estimation {
            EigenvalueEstimation::None => {}
            EigenvalueEstimation::Power => {
                self.params.lambda_max = power_method(self.op, &inv_diagonal, iters)?;
                flops += iters as f64 * (2 * self.num_my_nonzeros + 5 * self.num_my_rows) as f64;
            }
            EigenvalueEstimation::Cg => {
                let (lambda_min, lambda_max) = cg_estimate(self.op, &inv_diagonal, iters)?;
                self.params.lambda_min = lambda_min;
                self.params.lambda_max = lambda_max;
                flops += iters as f64 * (2 * self.num_my_nonzeros + 11 * self.num_my_rows) as f64;
            }
        }

        let lambda_max = self.params.lambda_max;
        if !(lambda_max > 0.0 && lambda_max.is_finite()) {
            return Err(PreconditionerError::InvalidConfiguration(format!(
                "largest eigenvalue must be positive and finite, got {lambda_max:e}"
            )));
        }
        let bounds = ChebyshevBounds::new(lambda_max, self.params.eig_ratio);
        if !(bounds.beta > bounds.alpha) {
            return Err(PreconditionerError::InvalidConfiguration(format!(
                "damped interval [{:e}, {:e}] is empty, eigenvalue ratio {} is too small",
                bounds.alpha, bounds.beta, self.params.eig_ratio
            )));
        }
        log::debug!(
            "Chebyshev bounds: lambda_max = {:e}, alpha = {:e}, beta = {:e}",
            self.params.lambda_max,
            bounds.alpha,
            bounds.beta
        );

        self.state = State::Computed {
            inv_diagonal,
            bounds,
        };
        self.stats.compute.record(started, flops);
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
        let State::Computed {
            inv_diagonal,
            bounds,
        } = &self.state
        else {
            return Err(PreconditionerError::NotComputed);
        };
        self.op.check_len(x)?;
        self.op.check_len(y)?;

        let n = self.num_my_rows as f64;
        let nnz = self.num_my_nonzeros as f64;

        // the identity operator, for which the polynomial reduces to a Jacobi step
        if self.params.lambda_min == 1.0 && self.params.lambda_max == 1.0 {
            y.copy_from(&inv_diagonal.component_mul(x));
            self.stats.apply_inverse.record(started, n);
            return Ok(());
        }

        let ChebyshevBounds { delta, theta, s1, .. } = *bounds;
        let mut v = na::DVector::zeros(x.len());

        let mut w = if self.params.zero_starting_solution {
            let w = inv_diagonal.component_mul(x) / theta;
            y.copy_from(&w);
            w
        } else {
            self.op.apply(y, &mut v)?;
            let w = inv_diagonal.component_mul(&(x - &v)) / theta;
            *y += &w;
            w
        };

        let mut rho = 1.0 / s1;
        for _ in 1..self.params.degree {
            self.op.apply(y, &mut v)?;
            let rho_new = 1.0 / (2.0 * s1 - rho);
            let scaled_residual = inv_diagonal.component_mul(&(x - &v));
            w.axpy(2.0 * rho_new * delta, &scaled_residual, rho_new * rho);
            *y += &w;
            rho = rho_new;
        }

        let degree = self.params.degree as f64;
        let flops = 3.0 * n + (degree - 1.0) * (2.0 * nnz + 6.0 * n);
        self.stats.apply_inverse.record(started, flops);
        Ok(())
    }

    fn condest(&self) -> Option<f64> {
        self.condest
    }

    fn label(&self) -> String {
        format!("Chebyshev polynomial, degree = {}", self.params.degree)
    }

    fn stats(&self) -> &PhaseStats {
        &self.stats
    }
}

impl<'a, M: RowMatrix + ?Sized> std::fmt::Display for Chebyshev<'a, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "=".repeat(80);
        writeln!(f, "{rule}")?;
        writeln!(f, "Chebyshev polynomial preconditioner")?;
        writeln!(f, "Degree of polynomial      = {}", self.params.degree)?;
        match self.condest {
            Some(c) => writeln!(f, "Condition number estimate = {c:e}")?,
            None => writeln!(f, "Condition number estimate = (not computed)")?,
        }
        writeln!(f, "Global number of rows     = {}", self.num_global_rows)?;
        writeln!(f, "Eigenvalue ratio          = {:e}", self.params.eig_ratio)?;
        writeln!(f, "Minimum eigenvalue        = {:e}", self.params.lambda_min)?;
        writeln!(f, "Maximum eigenvalue        = {:e}", self.params.lambda_max)?;
        writeln!(
            f,
            "Minimum diagonal value    = {:e}",
            self.params.min_diagonal_value
        )?;
        writeln!(
            f,
            "Zero starting solution    = {}",
            self.params.zero_starting_solution
        )?;
        if let Some(bounds) = self.bounds() {
            writeln!(
                f,
                "Damped interval           = [{:e}, {:e}]",
                bounds.alpha, bounds.beta
            )?;
        }
        writeln!(f)?;
        write!(f, "{}", self.stats)?;
        writeln!(f, "{rule}")
    }
}

//
// eigenvalue estimation
//

fn random_start(len: usize, rank: usize) -> na::DVector<f64> {
    let mut rng = StdRng::seed_from_u64(ESTIMATION_SEED + rank as u64);
    na::DVector::from_fn(len, |_, _| rng.gen_range(-1.0..1.0))
}

/// Estimate the largest eigenvalue of `D⁻¹A` with the power method.
///
/// Starts from a random vector with a fixed seed,
/// so repeated calls give identical results.
pub fn power_method<M: RowMatrix + ?Sized>(
    op: &M,
    inv_diagonal: &na::DVector<f64>,
    iterations: usize,
) -> Result<f64, PreconditionerError> {
    let comm = op.comm();
    let mut x = random_start(op.num_my_rows(), comm.rank());
    let mut y = na::DVector::zeros(x.len());

    let norm = norm2(comm, &x);
    if norm == 0.0 {
        return Err(PreconditionerError::EstimationFailed(
            "start vector has zero norm".to_string(),
        ));
    }
    x /= norm;

    let mut lambda = 0.0;
    for _ in 0..iterations {
        op.apply(&x, &mut y)?;
        y.component_mul_assign(inv_diagonal);
        lambda = dot(comm, &y, &x) / dot(comm, &x, &x);

        let norm = norm2(comm, &y);
        if norm == 0.0 {
            return Err(PreconditionerError::EstimationFailed(
                "power method iterate vanished".to_string(),
            ));
        }
        x.copy_from(&y);
        x /= norm;
    }
    log::debug!("Power method estimate of lambda_max: {lambda:e}");
    Ok(lambda)
}

/// Estimate the smallest and largest eigenvalues of `D⁻¹A`
/// from the coefficients of Jacobi-preconditioned conjugate gradients.
///
/// The CG coefficients define a Lanczos tridiagonal matrix
/// whose extremal eigenvalues approximate those of `D⁻¹A`
/// (assuming `A` is symmetric positive definite).
/// Iteration stops early if the residual vanishes.
pub fn cg_estimate<M: RowMatrix + ?Sized>(
    op: &M,
    inv_diagonal: &na::DVector<f64>,
    iterations: usize,
) -> Result<(f64, f64), PreconditionerError> {
    const RELATIVE_TOLERANCE: f64 = 1e-10;

    let comm = op.comm();
    let n = op.num_my_rows();
    let mut r = random_start(n, comm.rank());
    let mut z = inv_diagonal.component_mul(&r);
    let mut p = z.clone();
    let mut q = na::DVector::zeros(n);
    let mut rz = dot(comm, &r, &z);
    let initial = rz.abs().sqrt();

    let mut alphas: Vec<f64> = Vec::with_capacity(iterations);
    let mut betas: Vec<f64> = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        if !(rz > 0.0) {
            // D⁻¹ is not positive definite along r
            break;
        }
        op.apply(&p, &mut q)?;
        let pq = dot(comm, &p, &q);
        if !(pq > 0.0) {
            // A is not positive definite along p, or the residual vanished
            break;
        }
        let alpha = rz / pq;
        alphas.push(alpha);

        r.axpy(-alpha, &q, 1.0);
        z = inv_diagonal.component_mul(&r);
        let rz_new = dot(comm, &r, &z);
        if rz_new.abs().sqrt() <= RELATIVE_TOLERANCE * initial {
            break;
        }
        let beta = rz_new / rz;
        if !(beta > 0.0) {
            break;
        }
        betas.push(beta);
        p.axpy(1.0, &z, beta);
        rz = rz_new;
    }

    let m = alphas.len();
    if m == 0 {
        return Err(PreconditionerError::EstimationFailed(
            "CG made no progress".to_string(),
        ));
    }

    let mut tri = na::DMatrix::zeros(m, m);
    for j in 0..m {
        tri[(j, j)] = 1.0 / alphas[j];
        if j > 0 {
            tri[(j, j)] += betas[j - 1] / alphas[j - 1];
        }
        if j + 1 < m {
            let off = betas[j].sqrt() / alphas[j];
            tri[(j, j + 1)] = off;
            tri[(j + 1, j)] = off;
        }
    }
    let eigenvalues = na::SymmetricEigen::new(tri).eigenvalues;
    let lambda_min = eigenvalues.min();
    let lambda_max = eigenvalues.max();
    log::debug!("CG estimate of the spectrum: [{lambda_min:e}, {lambda_max:e}] after {m} iterations");
    Ok((lambda_min, lambda_max))
}
