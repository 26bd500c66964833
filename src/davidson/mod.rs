//! Iterative Davidson diagonalisation for the lowest eigenpairs of a large
//! symmetric operator given only its action on vectors.

use std::error::Error;
use std::fmt;

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};

use crate::solver::FciError;

#[cfg(test)]
#[path = "davidson_tests.rs"]
mod davidson_tests;

// ================
// Error definition
// ================

/// Errors arising in the iterative eigensolver.
#[derive(Debug, Clone)]
pub struct EigenSolverError(pub String);

impl fmt::Display for EigenSolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Eigensolver error: {}.", self.0)
    }
}

impl Error for EigenSolverError {}

// ======
// Result
// ======

/// Eigenpairs returned by [`davidson`], together with per-root convergence
/// flags. Failure to converge within the cycle limit is reported through the
/// flags rather than as an error, so partially converged results remain
/// usable.
#[derive(Clone, Debug)]
pub struct DavidsonResult {
    /// Convergence flag for each requested root.
    pub converged: Vec<bool>,

    /// Eigenvalue approximations, ascending.
    pub eigenvalues: Vec<f64>,

    /// Normalised eigenvector approximations matching [`Self::eigenvalues`].
    pub eigenvectors: Vec<Array1<f64>>,
}

impl DavidsonResult {
    /// `true` if every requested root has converged.
    pub fn all_converged(&self) -> bool {
        self.converged.iter().all(|&c| c)
    }
}

// ==========
// Eigensolver
// ==========

/// Orthogonalises `x` against `basis` with two classical Gram--Schmidt
/// sweeps and returns its remaining norm.
fn project_out(x: &mut Array1<f64>, basis: &[Array1<f64>]) -> f64 {
    for _ in 0..2 {
        for b in basis {
            let overlap = b.dot(x);
            x.scaled_add(-overlap, b);
        }
    }
    x.dot(x).sqrt()
}

/// Finds the lowest `nroots` eigenpairs of the symmetric operator `aop` by
/// subspace iteration with preconditioned residual expansion.
///
/// `precond` maps `(residual, eigenvalue, ritz_vector)` to a correction
/// vector; see [`make_diag_precond`] and [`make_pspace_precond`]. Guess
/// vectors that turn out linearly dependent are dropped; at least one
/// independent guess must survive. When the subspace reaches `max_space`
/// it is collapsed onto the current Ritz vectors.
#[allow(clippy::too_many_arguments)]
pub fn davidson<F, P>(
    mut aop: F,
    x0: Vec<Array1<f64>>,
    precond: P,
    nroots: usize,
    conv_tol: f64,
    lindep: f64,
    max_cycle: usize,
    max_space: usize,
) -> Result<DavidsonResult, FciError>
where
    F: FnMut(&Array1<f64>) -> Result<Array1<f64>, FciError>,
    P: Fn(&Array1<f64>, f64, &Array1<f64>) -> Array1<f64>,
{
    if nroots == 0 || x0.len() < nroots {
        return Err(FciError::EigenSolver(EigenSolverError(format!(
            "{} guess vector(s) cannot seed {nroots} root(s)",
            x0.len()
        ))));
    }
    let dim = x0[0].len();
    if nroots > dim {
        return Err(FciError::EigenSolver(EigenSolverError(format!(
            "{nroots} root(s) requested from a space of dimension {dim}"
        ))));
    }
    let toloose = conv_tol.sqrt();

    let mut xs: Vec<Array1<f64>> = Vec::with_capacity(max_space);
    let mut axs: Vec<Array1<f64>> = Vec::with_capacity(max_space);
    for mut x in x0 {
        let norm = project_out(&mut x, &xs);
        if norm * norm > lindep {
            let x = x / norm;
            axs.push(aop(&x)?);
            xs.push(x);
        }
    }
    if xs.is_empty() {
        return Err(FciError::EigenSolver(EigenSolverError(
            "all guess vectors are linearly dependent".to_string(),
        )));
    }

    let mut converged = vec![false; nroots];
    let mut e_last = vec![f64::INFINITY; nroots];
    let mut eigenvalues = vec![0.0; nroots];
    let mut eigenvectors: Vec<Array1<f64>> = vec![Array1::zeros(dim); nroots];

    for icyc in 0..max_cycle {
        let n = xs.len();
        let mut heff = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let hij = xs[i].dot(&axs[j]);
                heff[[i, j]] = hij;
                heff[[j, i]] = hij;
            }
        }
        let (w, v) = heff
            .eigh(UPLO::Lower)
            .map_err(|err| FciError::EigenSolver(EigenSolverError(err.to_string())))?;

        let nroots_eff = nroots.min(n);
        let mut ritz: Vec<Array1<f64>> = Vec::with_capacity(nroots_eff);
        let mut residuals: Vec<Array1<f64>> = Vec::with_capacity(nroots_eff);
        for k in 0..nroots_eff {
            let mut u = Array1::<f64>::zeros(dim);
            let mut au = Array1::<f64>::zeros(dim);
            for i in 0..n {
                u.scaled_add(v[[i, k]], &xs[i]);
                au.scaled_add(v[[i, k]], &axs[i]);
            }
            let mut r = au;
            r.scaled_add(-w[k], &u);
            let r_norm = r.dot(&r).sqrt();
            let de = w[k] - e_last[k];
            converged[k] = de.abs() < conv_tol && r_norm < toloose;
            log::debug!(
                "Davidson cycle {icyc}: root {k}, e = {:.12}, de = {:.3e}, |r| = {:.3e}.",
                w[k],
                de,
                r_norm
            );
            e_last[k] = w[k];
            eigenvalues[k] = w[k];
            eigenvectors[k] = u.clone();
            ritz.push(u);
            residuals.push(r);
        }

        if nroots_eff == nroots && converged.iter().all(|&c| c) {
            log::debug!("Davidson converged in {} cycle(s).", icyc + 1);
            break;
        }

        let n_unconverged = converged.iter().filter(|&&c| !c).count().max(1);
        if n + n_unconverged > max_space {
            // Collapse the subspace onto the current Ritz vectors.
            let mut new_axs = Vec::with_capacity(nroots_eff);
            for k in 0..nroots_eff {
                let mut au = Array1::<f64>::zeros(dim);
                for i in 0..n {
                    au.scaled_add(v[[i, k]], &axs[i]);
                }
                new_axs.push(au);
            }
            xs = ritz.clone();
            axs = new_axs;
        }

        let mut n_added = 0;
        for k in 0..nroots_eff {
            if converged[k] {
                continue;
            }
            let mut t = precond(&residuals[k], eigenvalues[k], &ritz[k]);
            let norm = project_out(&mut t, &xs);
            if norm * norm > lindep {
                let t = t / norm;
                axs.push(aop(&t)?);
                xs.push(t);
                n_added += 1;
            } else {
                log::warn!(
                    "Linearly dependent expansion vector for root {k} dropped (norm = {norm:.3e})."
                );
            }
        }
        if n_added == 0 {
            if !converged.iter().all(|&c| c) {
                log::warn!("Davidson subspace exhausted before full convergence.");
            }
            break;
        }
    }

    if !converged.iter().all(|&c| c) {
        log::warn!(
            "Davidson did not converge all roots: {:?}.",
            converged
        );
    }
    Ok(DavidsonResult {
        converged,
        eigenvalues,
        eigenvectors,
    })
}

// ==============
// Preconditioners
// ==============

fn clamped_inverse(denominator: f64) -> f64 {
    let inv = 1.0 / denominator;
    if inv.is_finite() && inv.abs() <= 1e8 {
        inv
    } else {
        1e8
    }
}

/// The plain Jacobi preconditioner $`t = r / (H_{II} - e + \sigma)`$ with
/// level shift $`\sigma`$ guarding near-singular denominators.
pub fn make_diag_precond(
    hdiag: Array1<f64>,
    level_shift: f64,
) -> impl Fn(&Array1<f64>, f64, &Array1<f64>) -> Array1<f64> {
    move |r, e0, _x0| {
        let shifted = e0 - level_shift;
        Array1::from_shape_fn(r.len(), |i| r[i] * clamped_inverse(hdiag[i] - shifted))
    }
}

/// The p-space-augmented preconditioner of Davidson and Thompson (CPL 169,
/// 463): the exact resolvent of the Hamiltonian subblock over `addr` is
/// combined with the Jacobi inverse elsewhere, and the correction is made
/// first-order orthogonal to the current Ritz vector.
///
/// `pw` and `pv` are the eigendecomposition of the subblock returned by
/// [`crate::hamiltonian::pspace`].
pub fn make_pspace_precond(
    hdiag: Array1<f64>,
    pw: Array1<f64>,
    pv: Array2<f64>,
    addr: Vec<usize>,
    level_shift: f64,
) -> impl Fn(&Array1<f64>, f64, &Array1<f64>) -> Array1<f64> {
    move |r, e0, x0| {
        let shifted = e0 - level_shift;
        let np = addr.len();
        let mut h0e0inv = Array2::<f64>::zeros((np, np));
        for i in 0..np {
            for j in 0..np {
                let mut v = 0.0;
                for k in 0..np {
                    v += pv[[i, k]] * pv[[j, k]] / (pw[k] - shifted);
                }
                h0e0inv[[i, j]] = v;
            }
        }
        let hdiaginv =
            Array1::from_shape_fn(hdiag.len(), |i| clamped_inverse(hdiag[i] - shifted));

        let sub = |y: &Array1<f64>| Array1::from_shape_fn(np, |i| y[addr[i]]);
        let apply_h0inv = |y: &Array1<f64>| {
            let mut out = y * &hdiaginv;
            let y_p = h0e0inv.dot(&sub(y));
            for (i, &a) in addr.iter().enumerate() {
                out[a] = y_p[i];
            }
            out
        };

        let h0x0 = apply_h0inv(x0);
        let h0r = apply_h0inv(r);
        let e1 = x0.dot(&h0r) / x0.dot(&h0x0);
        let mut x1 = r.clone();
        x1.scaled_add(-e1, x0);
        apply_h0inv(&x1)
    }
}
