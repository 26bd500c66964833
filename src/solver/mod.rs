//! Driver for the spin-adapted determinant CI problem with
//! $`M_S = 0`$ and $`S`$ even, tying together the string tables, the
//! Hamiltonian kernels and the subspace eigensolver.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;

use derive_builder::Builder;
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};

use crate::cistring::{self, num_strings, ElectronCount};
use crate::contract::contract_2e;
use crate::davidson::{self, davidson, make_pspace_precond};
use crate::hamiltonian::{self, absorb_h1e, make_hdiag, pspace, Eri};

#[cfg(test)]
#[path = "solver_tests.rs"]
mod solver_tests;

// ======
// Errors
// ======

/// Errors arising from the determinant CI machinery.
#[derive(Clone, Debug)]
pub enum FciError {
    /// An electron count incompatible with the orbital space or with a
    /// spin-specialised routine.
    ElectronCount(cistring::ElectronCountError),

    /// An integral tensor of inconsistent shape or storage form.
    Integral(hamiltonian::IntegralError),

    /// A failure inside the subspace eigensolver.
    EigenSolver(davidson::EigenSolverError),

    /// Mismatched array dimensions between a CI vector and its string space.
    Dimension(String),

    /// An operation that is deliberately not provided.
    Unimplemented(&'static str),
}

impl fmt::Display for FciError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FciError::ElectronCount(err) => err.fmt(f),
            FciError::Integral(err) => err.fmt(f),
            FciError::EigenSolver(err) => err.fmt(f),
            FciError::Dimension(msg) => write!(f, "Dimension error: {msg}."),
            FciError::Unimplemented(what) => write!(f, "Unimplemented: {what}."),
        }
    }
}

impl Error for FciError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            FciError::ElectronCount(err) => Some(err),
            FciError::Integral(err) => Some(err),
            FciError::EigenSolver(err) => Some(err),
            FciError::Dimension(_) | FciError::Unimplemented(_) => None,
        }
    }
}

impl From<cistring::ElectronCountError> for FciError {
    fn from(err: cistring::ElectronCountError) -> Self {
        FciError::ElectronCount(err)
    }
}

impl From<hamiltonian::IntegralError> for FciError {
    fn from(err: hamiltonian::IntegralError) -> Self {
        FciError::Integral(err)
    }
}

impl From<davidson::EigenSolverError> for FciError {
    fn from(err: davidson::EigenSolverError) -> Self {
        FciError::EigenSolver(err)
    }
}

// -------------
// Configuration
// -------------

/// A structure containing control parameters for the CI driver.
#[derive(Clone, Builder, Debug)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct FciConfig {
    /// Convergence threshold on the eigenvalue change per root.
    #[builder(default = "1e-8")]
    pub conv_tol: f64,

    /// Squared-norm threshold below which a candidate expansion vector is
    /// discarded as linearly dependent.
    #[builder(default = "1e-8")]
    pub lindep: f64,

    /// Denominator shift in the preconditioner.
    #[builder(default = "1e-3")]
    pub level_shift: f64,

    /// Maximum number of subspace iterations.
    #[builder(default = "50")]
    pub max_cycle: usize,

    /// Subspace dimension at which the iteration collapses onto the current
    /// Ritz vectors.
    #[builder(default = "12")]
    pub max_space: usize,

    /// Number of determinants in the explicitly diagonalised subblock.
    #[builder(default = "400")]
    pub pspace_size: usize,

    /// Number of eigenpairs to solve for.
    #[builder(default = "1")]
    pub nroots: usize,

    /// Forces the iterative path even when the explicit subblock spans the
    /// whole determinant space.
    #[builder(default = "false")]
    pub davidson_only: bool,
}

impl FciConfig {
    /// Returns a builder to construct an [`FciConfig`] structure.
    pub fn builder() -> FciConfigBuilder {
        FciConfigBuilder::default()
    }
}

impl Default for FciConfig {
    fn default() -> Self {
        FciConfig::builder()
            .build()
            .expect("The default CI configuration should be valid.")
    }
}

impl FciConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(nroots) = self.nroots {
            if nroots == 0 {
                return Err("At least one root must be requested.".to_string());
            }
        }
        if let Some(max_space) = self.max_space {
            if max_space < 2 {
                return Err("The subspace must be allowed at least two vectors.".to_string());
            }
        }
        if let Some(conv_tol) = self.conv_tol {
            if conv_tol <= 0.0 {
                return Err("The convergence threshold must be positive.".to_string());
            }
        }
        Ok(())
    }
}

// ------
// Result
// ------

/// A structure containing the eigenpairs determined by [`kernel`].
#[derive(Clone, Debug)]
pub struct FciResult {
    /// Convergence flag for each root.
    pub converged: Vec<bool>,

    /// Eigenvalues, ascending.
    pub energies: Vec<f64>,

    /// Normalised CI coefficient matrices of shape `(na, na)` matching
    /// [`Self::energies`].
    pub civecs: Vec<Array2<f64>>,
}

impl FciResult {
    /// `true` if every root has converged.
    pub fn all_converged(&self) -> bool {
        self.converged.iter().all(|&c| c)
    }

    /// The lowest eigenpair, if any root was solved for.
    pub fn ground(&self) -> Option<(f64, &Array2<f64>)> {
        self.energies
            .first()
            .map(|&e| (e, &self.civecs[0]))
    }
}

// =======
// Drivers
// =======

/// Symmetrises a flattened CI vector in-place and returns its resulting
/// Euclidean norm.
fn symmetrise(vec: &mut Array1<f64>, na: usize) -> f64 {
    for ia in 0..na {
        for ib in 0..ia {
            let upper = vec[ia * na + ib];
            let lower = vec[ib * na + ia];
            let avg = 0.5 * (upper + lower);
            vec[ia * na + ib] = avg;
            vec[ib * na + ia] = avg;
        }
    }
    vec.dot(vec).sqrt()
}

/// Euclidean deviation of a flattened CI vector from string-transpose
/// symmetry.
fn asymmetry(vec: &Array1<f64>, na: usize) -> f64 {
    let mut dev = 0.0;
    for ia in 0..na {
        for ib in 0..ia {
            let d = vec[ia * na + ib] - vec[ib * na + ia];
            dev += d * d;
        }
    }
    dev.sqrt()
}

/// Builds symmetrised unit guesses on the determinants of lowest diagonal
/// energy. Transpose-related determinant pairs contribute a single guess.
fn default_guesses(hdiag: &Array1<f64>, na: usize, nroots: usize) -> Vec<Array1<f64>> {
    let mut order: Vec<usize> = (0..hdiag.len()).collect();
    order.sort_by(|&i, &j| hdiag[i].total_cmp(&hdiag[j]));

    let mut seen = HashSet::new();
    let mut guesses = Vec::with_capacity(nroots);
    for &ij in &order {
        let (ia, ib) = (ij / na, ij % na);
        if !seen.insert((ia.min(ib), ia.max(ib))) {
            continue;
        }
        let mut guess = Array1::<f64>::zeros(na * na);
        if ia == ib {
            guess[ij] = 1.0;
        } else {
            guess[ia * na + ib] = std::f64::consts::FRAC_1_SQRT_2;
            guess[ib * na + ia] = std::f64::consts::FRAC_1_SQRT_2;
        }
        guesses.push(guess);
        if guesses.len() == nroots {
            break;
        }
    }
    guesses
}

/// Solves for the lowest eigenpairs of the CI Hamiltonian over the
/// $`M_S = 0`$ determinant space.
///
/// The explicitly diagonalised subblock doubles as an exact solver whenever
/// it spans the whole determinant space; otherwise it seeds the
/// preconditioner of the Davidson iteration. Initial guesses in `ci0` are
/// symmetrised and normalised before use; by default the iteration starts
/// from symmetrised unit vectors on the determinants of lowest diagonal
/// energy. Non-convergence is reported through [`FciResult::converged`]
/// rather than as an error.
pub fn kernel(
    h1e: &Array2<f64>,
    eri: &Eri,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    ci0: Option<Vec<Array2<f64>>>,
    config: &FciConfig,
) -> Result<FciResult, FciError> {
    let nelec = nelec.into();
    let neleca = nelec.singlet().map_err(FciError::ElectronCount)?;
    let na = num_strings(norb, neleca);
    let dim = na * na;
    if config.nroots > dim {
        return Err(FciError::EigenSolver(davidson::EigenSolverError(format!(
            "{} roots requested in a determinant space of dimension {dim}",
            config.nroots
        ))));
    }

    let hdiag = make_hdiag(h1e, eri, norb, nelec)?;
    let np = config.pspace_size.min(dim);
    let (addr, h0) = pspace(h1e, eri, norb, nelec, &hdiag, np)?;
    let (pw, pv) = h0
        .eigh(UPLO::Lower)
        .map_err(|err| FciError::EigenSolver(davidson::EigenSolverError(err.to_string())))?;

    if dim == 1 {
        let mut civec = Array2::<f64>::zeros((1, 1));
        civec[[0, 0]] = 1.0;
        return Ok(FciResult {
            converged: vec![true],
            energies: vec![pw[0]],
            civecs: vec![civec],
        });
    }

    // When the subblock is the full Hamiltonian, lift its eigenvectors
    // directly instead of iterating. A near-degenerate pair straddling the
    // requested roots, or an eigenvector with no weight in the even-spin
    // sector, makes the direct assignment ambiguous; those cases are left to
    // the iterative path, which resolves them through its symmetrised
    // guesses.
    if np == dim && !config.davidson_only && ci0.is_none() {
        if let Some(result) = exact_roots(&pw, &pv, &addr, na, config.nroots) {
            return Ok(result);
        }
        log::debug!(
            "Direct assignment of the explicit eigenvectors was ambiguous; \
             falling back onto the iterative path."
        );
    }

    let h2e = absorb_h1e(h1e, eri, norb, nelec, 0.5)?;
    let aop = |x: &Array1<f64>| -> Result<Array1<f64>, FciError> {
        let civec = Array2::from_shape_vec((na, na), x.to_vec())
            .map_err(|err| FciError::Dimension(err.to_string()))?;
        let sigma = contract_2e(&h2e, &civec, norb, nelec)?;
        Ok(Array1::from_iter(sigma.into_iter()))
    };

    // The subblock resolvent is not symmetric under the string-transpose
    // pairing, so the corrections it produces are re-symmetrised to keep the
    // search inside the even-spin sector.
    let inner_precond = make_pspace_precond(hdiag.clone(), pw, pv, addr, config.level_shift);
    let precond = |r: &Array1<f64>, e0: f64, x0: &Array1<f64>| -> Array1<f64> {
        let mut trial = inner_precond(r, e0, x0);
        symmetrise(&mut trial, na);
        trial
    };

    let x0 = match ci0 {
        Some(guesses) => {
            let mut flat = Vec::with_capacity(guesses.len());
            for civec in guesses {
                if civec.dim() != (na, na) {
                    return Err(FciError::Dimension(format!(
                        "guess vector of shape {:?} does not match the ({na}, {na}) \
                         determinant space",
                        civec.dim()
                    )));
                }
                let mut vec = Array1::from_iter(civec.into_iter());
                let norm = symmetrise(&mut vec, na);
                if norm < 1e-12 {
                    return Err(FciError::Dimension(
                        "guess vector vanishes after symmetrisation".to_string(),
                    ));
                }
                vec /= norm;
                flat.push(vec);
            }
            if flat.len() < config.nroots {
                flat.extend(
                    default_guesses(&hdiag, na, config.nroots)
                        .into_iter()
                        .skip(flat.len()),
                );
            }
            flat
        }
        None => default_guesses(&hdiag, na, config.nroots),
    };

    let result = davidson(
        aop,
        x0,
        &precond,
        config.nroots,
        config.conv_tol,
        config.lindep,
        config.max_cycle,
        config.max_space,
    )?;

    let mut civecs = Vec::with_capacity(result.eigenvectors.len());
    for (root, mut vec) in result.eigenvectors.into_iter().enumerate() {
        // The iteration is confined to the symmetric sector, so any residual
        // asymmetry beyond rounding indicates a defect in the expansion.
        let dev = asymmetry(&vec, na);
        if dev > 1e-6 {
            log::error!(
                "Eigenvector for root {root} deviates from string-transpose symmetry \
                 by {dev:.3e}."
            );
        }
        debug_assert!(dev <= 1e-6);
        let norm = symmetrise(&mut vec, na);
        if norm < 1e-12 {
            return Err(FciError::EigenSolver(davidson::EigenSolverError(
                "a converged eigenvector vanished after symmetrisation".to_string(),
            )));
        }
        vec /= norm;
        let civec = Array2::from_shape_vec((na, na), vec.to_vec())
            .map_err(|err| FciError::Dimension(err.to_string()))?;
        civecs.push(civec);
    }

    Ok(FciResult {
        converged: result.converged,
        energies: result.eigenvalues,
        civecs,
    })
}

/// Attempts to lift the first `nroots` even-spin eigenvectors of the
/// explicit full-space subblock into CI coefficient matrices. Returns `None`
/// when a degenerate cluster would be truncated or a symmetrised eigenvector
/// loses its norm.
fn exact_roots(
    pw: &Array1<f64>,
    pv: &Array2<f64>,
    addr: &[usize],
    na: usize,
    nroots: usize,
) -> Option<FciResult> {
    const GAP_TOL: f64 = 1e-12;
    const NORM_TOL: f64 = 1e-6;

    let dim = na * na;
    let mut energies = Vec::with_capacity(nroots);
    let mut civecs = Vec::with_capacity(nroots);
    for root in 0..nroots {
        if root + 1 < dim && pw[root + 1] - pw[root] < GAP_TOL {
            return None;
        }
        let mut vec = Array1::<f64>::zeros(dim);
        for (i, &ai) in addr.iter().enumerate() {
            vec[ai] = pv[[i, root]];
        }
        let norm = symmetrise(&mut vec, na);
        if (norm - 1.0).abs() > NORM_TOL {
            return None;
        }
        vec /= norm;
        energies.push(pw[root]);
        let civec = Array2::from_shape_vec((na, na), vec.to_vec()).ok()?;
        civecs.push(civec);
    }
    Some(FciResult {
        converged: vec![true; nroots],
        energies,
        civecs,
    })
}

/// Expectation value $`\langle c | \hat{H} | c \rangle`$ of the CI
/// Hamiltonian over a symmetric coefficient matrix. The coefficients are
/// taken as given, so an un-normalised input scales the result by its
/// squared norm.
pub fn energy(
    h1e: &Array2<f64>,
    eri: &Eri,
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<f64, FciError> {
    let nelec = nelec.into();
    let h2e = absorb_h1e(h1e, eri, norb, nelec, 0.5)?;
    let sigma = contract_2e(&h2e, civec, norb, nelec)?;
    Ok(civec
        .iter()
        .zip(sigma.iter())
        .map(|(&c, &s)| c * s)
        .sum::<f64>())
}
