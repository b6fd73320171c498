//! Preconditioned Krylov subspace solvers.
//!
//! The method is chosen once, when building the [`KrylovSolver`],
//! from the `"solver: type"` parameter.
//! CG is preconditioned in the standard symmetric way,
//! GMRES and BiCGStab use right preconditioning
//! so that the residual they monitor is the true one.

use nalgebra as na;

use crate::{
    operator::{dot, norm2, OperatorError, RowMatrix},
    parameters::{ParameterError, ParameterList},
    preconditioner::{Preconditioner, PreconditionerError},
};

const PREFIX: &str = "solver: ";
const TYPE_KEY: &str = "solver: type";
const MAX_ITERS_KEY: &str = "solver: max iterations";
const TOLERANCE_KEY: &str = "solver: tolerance";
const RESTART_KEY: &str = "solver: gmres restart";
const KNOWN_KEYS: [&str; 4] = [TYPE_KEY, MAX_ITERS_KEY, TOLERANCE_KEY, RESTART_KEY];

/// Error in solving a linear system.
///
/// Running out of iterations is not an error;
/// see [`SolveStatus::converged`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The iteration cannot continue, e.g. because of a zero inner product.
    #[error("{method} broke down at iteration {iteration}: {reason}")]
    Breakdown {
        /// Name of the method.
        method: &'static str,
        /// Iteration at which the breakdown happened.
        iteration: usize,
        /// What went wrong.
        reason: &'static str,
    },
    #[allow(missing_docs)]
    #[error(transparent)]
    Parameter(#[from] ParameterError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Preconditioner(#[from] PreconditionerError),
    #[allow(missing_docs)]
    #[error(transparent)]
    Operator(#[from] OperatorError),
}

/// The Krylov method used by a [`KrylovSolver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KrylovMethod {
    /// Conjugate gradients, for symmetric positive definite systems.
    Cg,
    /// Restarted GMRES, storing `restart` basis vectors.
    Gmres {
        #[allow(missing_docs)]
        restart: usize,
    },
    /// Stabilized biconjugate gradients.
    BiCgStab,
}

impl KrylovMethod {
    /// The name of the method as used in parameter lists.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cg => "CG",
            Self::Gmres { .. } => "GMRES",
            Self::BiCgStab => "BiCGStab",
        }
    }
}

/// Outcome of a [`KrylovSolver::solve`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolveStatus {
    /// Number of iterations performed.
    pub iterations: usize,
    /// Final residual norm relative to the norm of the right-hand side.
    pub relative_residual: f64,
    /// Whether the tolerance was reached.
    pub converged: bool,
}

/// An iterative solver for `A x = b`.
///
/// ```
/// # use slabworks_core::{krylov::{KrylovSolver, KrylovMethod}, ParameterList};
/// # use nalgebra_sparse as nas;
/// # use nalgebra as na;
/// let solver = KrylovSolver::from_parameters(
///     &ParameterList::new()
///         .with("solver: type", "gmres")
///         .with("solver: tolerance", 1e-10),
/// )?;
/// assert_eq!(solver.method, KrylovMethod::Gmres { restart: 30 });
///
/// let mut coo = nas::CooMatrix::new(2, 2);
/// coo.push(0, 0, 2.0);
/// coo.push(0, 1, 1.0);
/// coo.push(1, 1, 3.0);
/// let a = nas::CsrMatrix::from(&coo);
/// let b = na::DVector::from_vec(vec![3.0, 3.0]);
/// let mut x = na::DVector::zeros(2);
/// let status = solver.solve(&a, None, &b, &mut x)?;
/// assert!(status.converged);
/// approx::assert_relative_eq!(x, na::DVector::from_vec(vec![1.0, 1.0]), epsilon = 1e-9);
/// # Ok::<(), slabworks_core::krylov::SolverError>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KrylovSolver {
    /// The method used.
    pub method: KrylovMethod,
    /// Iterations before giving up (`solver: max iterations`, default 500).
    pub max_iterations: usize,
    /// Relative residual at which the solution is accepted
    /// (`solver: tolerance`, default 1e-8).
    pub tolerance: f64,
}

impl KrylovSolver {
    /// Create a solver with default iteration limits.
    pub fn new(method: KrylovMethod) -> Self {
        Self {
            method,
            max_iterations: 500,
            tolerance: 1e-8,
        }
    }

    /// Create a solver from the `"solver: "` keys of a parameter list.
    ///
    /// `solver: type` is one of `cg` (the default), `gmres` or `bicgstab`,
    /// case-insensitive. `solver: gmres restart` (default 30)
    /// only has an effect with GMRES.
    pub fn from_parameters(params: &ParameterList) -> Result<Self, SolverError> {
        let kind: String = params.get(TYPE_KEY, "cg".to_string())?;
        let restart: usize = params.get(RESTART_KEY, 30)?;
        let method = match kind.to_ascii_lowercase().as_str() {
            "cg" => KrylovMethod::Cg,
            "gmres" => KrylovMethod::Gmres { restart },
            "bicgstab" => KrylovMethod::BiCgStab,
            _ => {
                return Err(ParameterError::InvalidValue {
                    key: TYPE_KEY.to_string(),
                    value: kind,
                    reason: "expected 'cg', 'gmres' or 'bicgstab'".to_string(),
                }
                .into())
            }
        };
        if let KrylovMethod::Gmres { restart: 0 } = method {
            return Err(ParameterError::InvalidValue {
                key: RESTART_KEY.to_string(),
                value: "0".to_string(),
                reason: "GMRES needs at least one basis vector".to_string(),
            }
            .into());
        }

        let mut solver = Self::new(method);
        solver.max_iterations = params.get(MAX_ITERS_KEY, solver.max_iterations)?;
        solver.tolerance = params.get(TOLERANCE_KEY, solver.tolerance)?;
        params.warn_unrecognized(PREFIX, &KNOWN_KEYS);
        Ok(solver)
    }

    /// Solve `A x = b`, using the initial contents of `x` as the starting guess.
    ///
    /// The preconditioner, if given, must already be computed.
    pub fn solve<M: RowMatrix + ?Sized>(
        &self,
        op: &M,
        prec: Option<&mut dyn Preconditioner>,
        b: &na::DVector<f64>,
        x: &mut na::DVector<f64>,
    ) -> Result<SolveStatus, SolverError> {
        op.check_len(b)?;
        op.check_len(x)?;

        let b_norm = norm2(op.comm(), b);
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(SolveStatus {
                iterations: 0,
                relative_residual: 0.0,
                converged: true,
            });
        }

        let mut ctx = SolveContext {
            op,
            prec,
            b,
            b_norm,
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
        };
        let status = match self.method {
            KrylovMethod::Cg => ctx.cg(x)?,
            KrylovMethod::Gmres { restart } => ctx.gmres(x, restart)?,
            KrylovMethod::BiCgStab => ctx.bicgstab(x)?,
        };

        if status.converged {
            log::debug!(
                "{} converged in {} iterations, relative residual {:e}",
                self.method.name(),
                status.iterations,
                status.relative_residual
            );
        } else {
            log::warn!(
                "{} did not converge in {} iterations, relative residual {:e}",
                self.method.name(),
                status.iterations,
                status.relative_residual
            );
        }
        Ok(status)
    }
}

/// Everything the individual methods share.
struct SolveContext<'s, 'p, M: RowMatrix + ?Sized> {
    op: &'s M,
    prec: Option<&'p mut dyn Preconditioner>,
    b: &'s na::DVector<f64>,
    b_norm: f64,
    max_iterations: usize,
    tolerance: f64,
}

impl<'s, 'p, M: RowMatrix + ?Sized> SolveContext<'s, 'p, M> {
    fn dot(&self, x: &na::DVector<f64>, y: &na::DVector<f64>) -> f64 {
        dot(self.op.comm(), x, y)
    }

    fn relative_norm(&self, r: &na::DVector<f64>) -> f64 {
        norm2(self.op.comm(), r) / self.b_norm
    }

    /// `z = M⁻¹ r`, or a copy of `r` without a preconditioner.
    fn precondition(
        &mut self,
        r: &na::DVector<f64>,
        z: &mut na::DVector<f64>,
    ) -> Result<(), SolverError> {
        match &mut self.prec {
            Some(prec) => {
                z.fill(0.0);
                prec.apply_inverse(r, z)?;
            }
            None => z.copy_from(r),
        }
        Ok(())
    }

    /// `r = b - A x`
    fn residual(
        &self,
        x: &na::DVector<f64>,
        r: &mut na::DVector<f64>,
    ) -> Result<(), SolverError> {
        self.op.apply(x, r)?;
        r.axpy(1.0, self.b, -1.0);
        Ok(())
    }

    fn status(&self, iterations: usize, relative_residual: f64) -> SolveStatus {
        SolveStatus {
            iterations,
            relative_residual,
            converged: relative_residual <= self.tolerance,
        }
    }

    fn cg(&mut self, x: &mut na::DVector<f64>) -> Result<SolveStatus, SolverError> {
        let n = x.len();
        let mut r = na::DVector::zeros(n);
        self.residual(x, &mut r)?;
        let mut res = self.relative_norm(&r);
        if res <= self.tolerance {
            return Ok(self.status(0, res));
        }

        let mut z = na::DVector::zeros(n);
        self.precondition(&r, &mut z)?;
        let mut p = z.clone();
        let mut q = na::DVector::zeros(n);
        let mut rz = self.dot(&r, &z);

        for iter in 1..=self.max_iterations {
            self.op.apply(&p, &mut q)?;
            let pq = self.dot(&p, &q);
            if !(pq > 0.0) {
                return Err(SolverError::Breakdown {
                    method: "CG",
                    iteration: iter,
                    reason: "operator is not positive definite",
                });
            }
            let alpha = rz / pq;
            x.axpy(alpha, &p, 1.0);
            r.axpy(-alpha, &q, 1.0);

            res = self.relative_norm(&r);
            if res <= self.tolerance {
                return Ok(self.status(iter, res));
            }

            self.precondition(&r, &mut z)?;
            let rz_new = self.dot(&r, &z);
            p.axpy(1.0, &z, rz_new / rz);
            rz = rz_new;
        }
        Ok(self.status(self.max_iterations, res))
    }

    /// Flexible restarted GMRES:
    /// the preconditioned basis vectors are stored,
    /// so the preconditioner is free to vary between applications.
    fn gmres(
        &mut self,
        x: &mut na::DVector<f64>,
        restart: usize,
    ) -> Result<SolveStatus, SolverError> {
        let restart = restart.max(1);
        let n = x.len();
        let mut r = na::DVector::zeros(n);
        let mut w = na::DVector::zeros(n);
        let mut total = 0;

        loop {
            self.residual(x, &mut r)?;
            let beta = norm2(self.op.comm(), &r);
            let res = beta / self.b_norm;
            if res <= self.tolerance || total >= self.max_iterations {
                return Ok(self.status(total, res));
            }

            let mut basis: Vec<na::DVector<f64>> = Vec::with_capacity(restart + 1);
            let mut precond_basis: Vec<na::DVector<f64>> = Vec::with_capacity(restart);
            basis.push(&r / beta);
            let mut hess = na::DMatrix::zeros(restart + 1, restart);
            let mut cs = vec![0.0; restart];
            let mut sn = vec![0.0; restart];
            let mut g = na::DVector::zeros(restart + 1);
            g[0] = beta;

            let mut steps = 0;
            for j in 0..restart {
                let mut z = na::DVector::zeros(n);
                self.precondition(&basis[j], &mut z)?;
                self.op.apply(&z, &mut w)?;
                precond_basis.push(z);

                // modified Gram-Schmidt
                for (i, v) in basis.iter().enumerate() {
                    let h = self.dot(&w, v);
                    hess[(i, j)] = h;
                    w.axpy(-h, v, 1.0);
                }
                let h_next = norm2(self.op.comm(), &w);
                hess[(j + 1, j)] = h_next;

                for i in 0..j {
                    let upper = cs[i] * hess[(i, j)] + sn[i] * hess[(i + 1, j)];
                    hess[(i + 1, j)] = -sn[i] * hess[(i, j)] + cs[i] * hess[(i + 1, j)];
                    hess[(i, j)] = upper;
                }
                let denom = hess[(j, j)].hypot(h_next);
                if denom == 0.0 {
                    return Err(SolverError::Breakdown {
                        method: "GMRES",
                        iteration: total + 1,
                        reason: "Hessenberg matrix is singular",
                    });
                }
                cs[j] = hess[(j, j)] / denom;
                sn[j] = h_next / denom;
                hess[(j, j)] = denom;
                hess[(j + 1, j)] = 0.0;
                g[j + 1] = -sn[j] * g[j];
                g[j] *= cs[j];

                steps = j + 1;
                total += 1;
                let converged = g[j + 1].abs() / self.b_norm <= self.tolerance;
                if converged || h_next == 0.0 || total >= self.max_iterations {
                    break;
                }
                basis.push(&w / h_next);
            }

            // back substitution for the least squares coefficients
            let mut y = vec![0.0; steps];
            for i in (0..steps).rev() {
                let tail: f64 = (i + 1..steps).map(|k| hess[(i, k)] * y[k]).sum();
                y[i] = (g[i] - tail) / hess[(i, i)];
            }
            for (coef, z) in y.iter().zip(&precond_basis) {
                x.axpy(*coef, z, 1.0);
            }
        }
    }

    fn bicgstab(&mut self, x: &mut na::DVector<f64>) -> Result<SolveStatus, SolverError> {
        let n = x.len();
        let mut r = na::DVector::zeros(n);
        self.residual(x, &mut r)?;
        let mut res = self.relative_norm(&r);
        if res <= self.tolerance {
            return Ok(self.status(0, res));
        }

        let r_hat = r.clone();
        let mut p = na::DVector::zeros(n);
        let mut v = na::DVector::zeros(n);
        let mut p_hat = na::DVector::zeros(n);
        let mut s_hat = na::DVector::zeros(n);
        let mut t = na::DVector::zeros(n);
        let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);

        let breakdown = |iteration: usize, reason: &'static str| SolverError::Breakdown {
            method: "BiCGStab",
            iteration,
            reason,
        };

        for iter in 1..=self.max_iterations {
            let rho_new = self.dot(&r_hat, &r);
            if rho_new == 0.0 {
                return Err(breakdown(iter, "residual is orthogonal to the shadow residual"));
            }
            if iter == 1 {
                p.copy_from(&r);
            } else {
                let beta = (rho_new / rho) * (alpha / omega);
                // p = r + beta * (p - omega * v)
                p.axpy(-omega, &v, 1.0);
                p.axpy(1.0, &r, beta);
            }

            self.precondition(&p, &mut p_hat)?;
            self.op.apply(&p_hat, &mut v)?;
            let r_hat_v = self.dot(&r_hat, &v);
            if r_hat_v == 0.0 {
                return Err(breakdown(iter, "search direction is orthogonal to the shadow residual"));
            }
            alpha = rho_new / r_hat_v;

            // r becomes s = r - alpha * v
            r.axpy(-alpha, &v, 1.0);
            res = self.relative_norm(&r);
            if res <= self.tolerance {
                x.axpy(alpha, &p_hat, 1.0);
                return Ok(self.status(iter, res));
            }

            self.precondition(&r, &mut s_hat)?;
            self.op.apply(&s_hat, &mut t)?;
            let tt = self.dot(&t, &t);
            omega = if tt > 0.0 { self.dot(&t, &r) / tt } else { 0.0 };

            x.axpy(alpha, &p_hat, 1.0);
            x.axpy(omega, &s_hat, 1.0);
            r.axpy(-omega, &t, 1.0);

            res = self.relative_norm(&r);
            if res <= self.tolerance {
                return Ok(self.status(iter, res));
            }
            if omega == 0.0 {
                return Err(breakdown(iter, "stabilization coefficient vanished"));
            }
            rho = rho_new;
        }
        Ok(self.status(self.max_iterations, res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chebyshev::{Chebyshev, ChebyshevParams, EigenvalueEstimation},
        relaxation::{PointRelaxation, RelaxationParams, RelaxationType},
    };
    use nalgebra_sparse as nas;

    fn tridiagonal(n: usize, lower: f64, diag: f64, upper: f64) -> nas::CsrMatrix<f64> {
        let mut coo = nas::CooMatrix::new(n, n);
        for i in 0..n {
            coo.push(i, i, diag);
            if i > 0 {
                coo.push(i, i - 1, lower);
            }
            if i + 1 < n {
                coo.push(i, i + 1, upper);
            }
        }
        nas::CsrMatrix::from(&coo)
    }

    fn true_residual(a: &nas::CsrMatrix<f64>, b: &na::DVector<f64>, x: &na::DVector<f64>) -> f64 {
        let mut ax = na::DVector::zeros(b.len());
        a.apply(x, &mut ax).unwrap();
        (b - ax).norm() / b.norm()
    }

    fn rhs(n: usize) -> na::DVector<f64> {
        na::DVector::from_fn(n, |i, _| 1.0 + (i % 4) as f64)
    }

    const METHODS: [KrylovMethod; 3] = [
        KrylovMethod::Cg,
        KrylovMethod::Gmres { restart: 30 },
        KrylovMethod::BiCgStab,
    ];

    #[test]
    fn solver_from_parameters() {
        let defaults = KrylovSolver::from_parameters(&ParameterList::new()).unwrap();
        assert_eq!(defaults, KrylovSolver::new(KrylovMethod::Cg));
        assert_eq!(defaults.max_iterations, 500);
        assert_eq!(defaults.tolerance, 1e-8);

        let solver = KrylovSolver::from_parameters(
            &ParameterList::new()
                .with(TYPE_KEY, "BiCGStab")
                .with(MAX_ITERS_KEY, 20)
                .with(TOLERANCE_KEY, 1e-6),
        )
        .unwrap();
        assert_eq!(solver.method, KrylovMethod::BiCgStab);
        assert_eq!(solver.max_iterations, 20);

        let gmres = KrylovSolver::from_parameters(
            &ParameterList::new()
                .with(TYPE_KEY, "gmres")
                .with(RESTART_KEY, 5),
        )
        .unwrap();
        assert_eq!(gmres.method, KrylovMethod::Gmres { restart: 5 });

        assert!(KrylovSolver::from_parameters(&ParameterList::new().with(TYPE_KEY, "lsqr")).is_err());
        assert!(KrylovSolver::from_parameters(
            &ParameterList::new()
                .with(TYPE_KEY, "gmres")
                .with(RESTART_KEY, 0)
        )
        .is_err());
    }

    #[test]
    fn unpreconditioned_spd_solves() {
        let n = 30;
        let a = tridiagonal(n, -1.0, 2.0, -1.0);
        let b = rhs(n);
        for method in METHODS {
            let mut x = na::DVector::zeros(n);
            let status = KrylovSolver::new(method)
                .solve(&a, None, &b, &mut x)
                .unwrap();
            assert!(status.converged, "{method:?}: {status:?}");
            assert!(true_residual(&a, &b, &x) < 1e-7, "{method:?}");
        }
    }

    #[test]
    fn nonsymmetric_solves() {
        let n = 40;
        let a = tridiagonal(n, -1.5, 3.0, -0.5);
        let b = rhs(n);
        for method in [KrylovMethod::Gmres { restart: 10 }, KrylovMethod::BiCgStab] {
            let mut x = na::DVector::zeros(n);
            let status = KrylovSolver::new(method)
                .solve(&a, None, &b, &mut x)
                .unwrap();
            assert!(status.converged, "{method:?}: {status:?}");
            assert!(true_residual(&a, &b, &x) < 1e-7, "{method:?}");
        }
    }

    #[test]
    fn chebyshev_preconditioned_solves() {
        let n = 50;
        let a = tridiagonal(n, -1.0, 2.0, -1.0);
        let b = rhs(n);
        let mut cheb = Chebyshev::with_params(
            &a,
            ChebyshevParams {
                degree: 3,
                estimation: EigenvalueEstimation::Power,
                estimation_iterations: 30,
                ..Default::default()
            },
        );
        cheb.compute().unwrap();

        for method in METHODS {
            let mut unpreconditioned_x = na::DVector::zeros(n);
            let plain = KrylovSolver::new(method)
                .solve(&a, None, &b, &mut unpreconditioned_x)
                .unwrap();

            let mut x = na::DVector::zeros(n);
            let status = KrylovSolver::new(method)
                .solve(&a, Some(&mut cheb), &b, &mut x)
                .unwrap();
            assert!(status.converged, "{method:?}: {status:?}");
            assert!(true_residual(&a, &b, &x) < 1e-7, "{method:?}");
            assert!(status.iterations <= plain.iterations, "{method:?}");
        }
    }

    #[test]
    fn relaxation_preconditioned_cg() {
        let n = 30;
        let a = tridiagonal(n, -1.0, 4.0, -1.0);
        let b = rhs(n);
        let mut sgs = PointRelaxation::with_params(
            &a,
            RelaxationParams {
                kind: RelaxationType::SymmetricGaussSeidel,
                ..Default::default()
            },
        );
        sgs.compute().unwrap();
        let mut x = na::DVector::zeros(n);
        let status = KrylovSolver::new(KrylovMethod::Cg)
            .solve(&a, Some(&mut sgs), &b, &mut x)
            .unwrap();
        assert!(status.converged);
        assert!(true_residual(&a, &b, &x) < 1e-7);
    }

    #[test]
    fn iteration_limit_is_reported() {
        let n = 30;
        let a = tridiagonal(n, -1.0, 2.0, -1.0);
        let b = rhs(n);
        let mut solver = KrylovSolver::new(KrylovMethod::Cg);
        solver.max_iterations = 2;
        let mut x = na::DVector::zeros(n);
        let status = solver.solve(&a, None, &b, &mut x).unwrap();
        assert!(!status.converged);
        assert_eq!(status.iterations, 2);
    }

    #[test]
    fn zero_rhs_gives_zero_solution() {
        let a = tridiagonal(4, -1.0, 2.0, -1.0);
        let mut x = na::DVector::repeat(4, 3.0);
        let status = KrylovSolver::new(KrylovMethod::BiCgStab)
            .solve(&a, None, &na::DVector::zeros(4), &mut x)
            .unwrap();
        assert!(status.converged);
        assert_eq!(status.iterations, 0);
        assert_eq!(x, na::DVector::zeros(4));
    }

    #[test]
    fn indefinite_operator_breaks_cg() {
        let a = tridiagonal(3, 0.0, -1.0, 0.0);
        let mut x = na::DVector::zeros(3);
        assert!(matches!(
            KrylovSolver::new(KrylovMethod::Cg).solve(&a, None, &na::DVector::repeat(3, 1.0), &mut x),
            Err(SolverError::Breakdown { method: "CG", .. })
        ));
    }
}
