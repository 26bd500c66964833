//! Integral tensor handling, the Hamiltonian diagonal and the p-space
//! subblock.

use std::error::Error;
use std::fmt;

use itertools::Itertools;
use ndarray::{s, Array1, Array2, Array4};

use crate::cistring::{
    self, addr2str, make_strings, num_strings, tril_index, ElectronCount, OrbString,
};
use crate::solver::FciError;


// ================
// Error definition
// ================

/// Errors arising from malformed integral tensors.
#[derive(Debug, Clone)]
pub struct IntegralError(pub String);

impl fmt::Display for IntegralError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Integral error: {}.", self.0)
    }
}

impl Error for IntegralError {}

// ===================
// Packed tensor forms
// ===================

/// A two-electron integral tensor $`(pq|rs)`$ in one of its symmetric
/// storage forms.
#[derive(Clone, Debug)]
pub enum Eri {
    /// Full storage, shape `(norb, norb, norb, norb)`.
    Full(Array4<f64>),

    /// 4-fold packed storage over triangular orbital pairs, shape
    /// `(npair, npair)` with `npair = norb * (norb + 1) / 2`.
    FourFold(Array2<f64>),

    /// 8-fold packed storage over triangular pairs of triangular orbital
    /// pairs, length `npair * (npair + 1) / 2`.
    EightFold(Array1<f64>),
}

impl From<Array4<f64>> for Eri {
    fn from(eri: Array4<f64>) -> Self {
        Eri::Full(eri)
    }
}

impl From<Array2<f64>> for Eri {
    fn from(eri: Array2<f64>) -> Self {
        Eri::FourFold(eri)
    }
}

impl From<Array1<f64>> for Eri {
    fn from(eri: Array1<f64>) -> Self {
        Eri::EightFold(eri)
    }
}

impl Eri {
    /// Restores the tensor to full `(norb, norb, norb, norb)` storage.
    pub fn to_full(&self, norb: usize) -> Result<Array4<f64>, IntegralError> {
        match self {
            Eri::Full(eri) => {
                if eri.shape() != [norb, norb, norb, norb] {
                    return Err(IntegralError(format!(
                        "Full eri of shape {:?} does not match norb = {norb}",
                        eri.shape()
                    )));
                }
                Ok(eri.clone())
            }
            Eri::FourFold(_) | Eri::EightFold(_) => {
                let tril = self.to_tril(norb)?;
                let mut full = Array4::<f64>::zeros((norb, norb, norb, norb));
                for p in 0..norb {
                    for q in 0..=p {
                        for r in 0..norb {
                            for s in 0..=r {
                                let v = tril[[tril_index(p, q), tril_index(r, s)]];
                                full[[p, q, r, s]] = v;
                                full[[q, p, r, s]] = v;
                                full[[p, q, s, r]] = v;
                                full[[q, p, s, r]] = v;
                            }
                        }
                    }
                }
                Ok(full)
            }
        }
    }

    /// Restores the tensor to 4-fold packed `(npair, npair)` storage,
    /// assuming the 4-fold permutation symmetry holds in the full form.
    pub fn to_tril(&self, norb: usize) -> Result<Array2<f64>, IntegralError> {
        let npair = norb * (norb + 1) / 2;
        match self {
            Eri::Full(eri) => {
                if eri.shape() != [norb, norb, norb, norb] {
                    return Err(IntegralError(format!(
                        "Full eri of shape {:?} does not match norb = {norb}",
                        eri.shape()
                    )));
                }
                let mut tril = Array2::<f64>::zeros((npair, npair));
                for p in 0..norb {
                    for q in 0..=p {
                        for r in 0..norb {
                            for s in 0..=r {
                                tril[[tril_index(p, q), tril_index(r, s)]] = eri[[p, q, r, s]];
                            }
                        }
                    }
                }
                Ok(tril)
            }
            Eri::FourFold(eri) => {
                if eri.shape() != [npair, npair] {
                    return Err(IntegralError(format!(
                        "4-fold packed eri of shape {:?} does not match norb = {norb}",
                        eri.shape()
                    )));
                }
                Ok(eri.clone())
            }
            Eri::EightFold(eri) => {
                if eri.len() != npair * (npair + 1) / 2 {
                    return Err(IntegralError(format!(
                        "8-fold packed eri of length {} does not match norb = {norb}",
                        eri.len()
                    )));
                }
                let mut tril = Array2::<f64>::zeros((npair, npair));
                for pq in 0..npair {
                    for rs in 0..=pq {
                        let v = eri[pq * (pq + 1) / 2 + rs];
                        tril[[pq, rs]] = v;
                        tril[[rs, pq]] = v;
                    }
                }
                Ok(tril)
            }
        }
    }
}

/// Packs the lower triangle of a symmetric matrix into a flat vector in
/// triangular pair-index order.
pub(crate) fn pack_tril(a: &Array2<f64>) -> Array1<f64> {
    let n = a.nrows();
    let mut packed = Array1::<f64>::zeros(n * (n + 1) / 2);
    for p in 0..n {
        for q in 0..=p {
            packed[tril_index(p, q)] = a[[p, q]];
        }
    }
    packed
}

/// Returns `a + a^T`.
pub(crate) fn transpose_sum(a: &Array2<f64>) -> Array2<f64> {
    a + &a.t()
}

// ===================
// Absorbed Hamiltonian
// ===================

/// Folds the one-electron integrals into the two-electron tensor so that the
/// two-electron contraction kernel applies the complete Hamiltonian:
///
/// ```math
/// \tilde{g}_{pqrs} = (pq|rs)
///     + \frac{1}{N_\mathrm{elec}}\left(\delta_{pq} f_{rs} + \delta_{rs} f_{pq}\right),
/// \qquad
/// f_{pq} = h_{pq} - \tfrac{1}{2}\sum_{j} (pj|jq),
/// ```
///
/// returned in 4-fold packed form scaled by `fac` (the contraction driver
/// passes `fac = 0.5` to absorb the double counting of the symmetric
/// $`E_{pq} E_{rs}`$ walk).
pub fn absorb_h1e(
    h1e: &Array2<f64>,
    eri: &Eri,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    fac: f64,
) -> Result<Array2<f64>, FciError> {
    let nelec = nelec.into();
    let total = nelec.total();
    if total == 0 {
        return Err(FciError::ElectronCount(
            cistring::ElectronCountError::Invalid { norb, nelec: 0 },
        ));
    }
    if h1e.shape() != [norb, norb] {
        return Err(FciError::Integral(IntegralError(format!(
            "h1e of shape {:?} does not match norb = {norb}",
            h1e.shape()
        ))));
    }
    let mut h2e = eri.to_full(norb).map_err(FciError::Integral)?;
    let mut f1e = h1e.clone();
    for j in 0..norb {
        for k in 0..norb {
            let mut jk = 0.0;
            for i in 0..norb {
                jk += h2e[[j, i, i, k]];
            }
            f1e[[j, k]] -= 0.5 * jk;
        }
    }
    f1e /= total as f64;
    for k in 0..norb {
        let mut block = h2e.slice_mut(s![k, k, .., ..]);
        block += &f1e;
        let mut block = h2e.slice_mut(s![.., .., k, k]);
        block += &f1e;
    }
    let tril = Eri::Full(h2e).to_tril(norb).map_err(FciError::Integral)?;
    Ok(tril * fac)
}

// ===================
// Hamiltonian diagonal
// ===================

fn occupied_orbitals(string: OrbString, norb: usize) -> Vec<usize> {
    (0..norb).filter(|&i| string >> i & 1 == 1).collect_vec()
}

/// Computes the Hamiltonian diagonal $`\langle I | \hat{H} | I \rangle`$
/// over all determinant pairs of the spin-0 space, as a flat vector of
/// length `na * na` indexed by `(alpha address) * na + (beta address)`.
///
/// The result is explicitly symmetrised over the alpha/beta string-address
/// transpose to suppress accumulation-order round-off.
pub fn make_hdiag(
    h1e: &Array2<f64>,
    eri: &Eri,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array1<f64>, FciError> {
    let neleca = nelec.into().singlet().map_err(FciError::ElectronCount)?;
    let eri_full = eri.to_full(norb).map_err(FciError::Integral)?;
    let strings = make_strings(norb, neleca).map_err(FciError::ElectronCount)?;
    let na = strings.len();
    let occs = strings
        .iter()
        .map(|&s| occupied_orbitals(s, norb))
        .collect_vec();

    let mut jdiag = Array2::<f64>::zeros((norb, norb));
    let mut kdiag = Array2::<f64>::zeros((norb, norb));
    for i in 0..norb {
        for j in 0..norb {
            jdiag[[i, j]] = eri_full[[i, i, j, j]];
            kdiag[[i, j]] = eri_full[[i, j, j, i]];
        }
    }

    let mut hdiag = Array2::<f64>::zeros((na, na));
    for (ia, occa) in occs.iter().enumerate() {
        for (ib, occb) in occs.iter().enumerate() {
            let mut e = 0.0;
            for &i in occa {
                e += h1e[[i, i]];
            }
            for &i in occb {
                e += h1e[[i, i]];
            }
            for &i in occa {
                for &j in occa {
                    e += 0.5 * (jdiag[[i, j]] - kdiag[[i, j]]);
                }
                for &j in occb {
                    e += jdiag[[i, j]];
                }
            }
            for &i in occb {
                for &j in occb {
                    e += 0.5 * (jdiag[[i, j]] - kdiag[[i, j]]);
                }
            }
            hdiag[[ia, ib]] = e;
        }
    }
    let hdiag = transpose_sum(&hdiag) * 0.5;
    Ok(Array1::from_iter(hdiag.into_iter()))
}

// =====================
// Slater--Condon rules
// =====================

/// Parity of the occupied orbitals of `string` strictly between orbitals
/// `p` and `q`.
fn excitation_sign(string: OrbString, p: usize, q: usize) -> f64 {
    let (lo, hi) = if p < q { (p, q) } else { (q, p) };
    if hi - lo < 2 {
        return 1.0;
    }
    let mask = ((1u64 << hi) - 1) & !((1u64 << (lo + 1)) - 1);
    if (string & mask).count_ones() % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Extracts the (occupied-in-ket, occupied-in-bra) orbital of a single
/// excitation between two strings differing in exactly two bits.
fn single_excitation(str_bra: OrbString, str_ket: OrbString) -> (usize, usize) {
    let diff = str_bra ^ str_ket;
    let i = (str_ket & diff).trailing_zeros() as usize;
    let a = (str_bra & diff).trailing_zeros() as usize;
    (i, a)
}

/// Computes the off-diagonal Hamiltonian matrix element between two
/// determinant pairs by the Slater--Condon rules. `eri` must be in full
/// storage; determinants differing by more than a double excitation yield
/// zero.
fn h_element(
    h1e: &Array2<f64>,
    eri: &Array4<f64>,
    norb: usize,
    (stra_bra, strb_bra): (OrbString, OrbString),
    (stra_ket, strb_ket): (OrbString, OrbString),
) -> f64 {
    let da = (stra_bra ^ stra_ket).count_ones() / 2;
    let db = (strb_bra ^ strb_ket).count_ones() / 2;
    match (da, db) {
        (1, 1) => {
            let (i, a) = single_excitation(stra_bra, stra_ket);
            let (j, b) = single_excitation(strb_bra, strb_ket);
            let sign = excitation_sign(stra_ket, i, a) * excitation_sign(strb_ket, j, b);
            sign * eri[[a, i, b, j]]
        }
        (2, 0) => double_same_spin(eri, stra_bra, stra_ket),
        (0, 2) => double_same_spin(eri, strb_bra, strb_ket),
        (1, 0) => single_same_spin(h1e, eri, norb, stra_bra, stra_ket, strb_ket),
        (0, 1) => single_same_spin(h1e, eri, norb, strb_bra, strb_ket, stra_ket),
        _ => 0.0,
    }
}

/// Matrix element for a double excitation within one spin channel, with the
/// two annihilation/creation orbitals paired in ascending order and the
/// parity accumulated over the two sequential single excitations.
fn double_same_spin(eri: &Array4<f64>, str_bra: OrbString, str_ket: OrbString) -> f64 {
    let diff = str_bra ^ str_ket;
    let des = str_ket & diff;
    let cre = str_bra & diff;
    let i = des.trailing_zeros() as usize;
    let j = (63 - des.leading_zeros()) as usize;
    let a = cre.trailing_zeros() as usize;
    let b = (63 - cre.leading_zeros()) as usize;
    let mut sign = excitation_sign(str_ket, i, a);
    let intermediate = str_ket & !(1 << i) | (1 << a);
    sign *= excitation_sign(intermediate, j, b);
    sign * (eri[[a, i, b, j]] - eri[[a, j, b, i]])
}

/// Matrix element for a single excitation within one spin channel, summing
/// the Coulomb/exchange field of the spectator electrons of both channels.
fn single_same_spin(
    h1e: &Array2<f64>,
    eri: &Array4<f64>,
    norb: usize,
    str_bra: OrbString,
    str_ket: OrbString,
    str_other: OrbString,
) -> f64 {
    let (i, a) = single_excitation(str_bra, str_ket);
    let sign = excitation_sign(str_ket, i, a);
    let mut v = h1e[[a, i]];
    for k in occupied_orbitals(str_ket, norb) {
        // The k == i term cancels between the Coulomb and exchange parts.
        v += eri[[a, i, k, k]] - eri[[a, k, k, i]];
    }
    for k in occupied_orbitals(str_other, norb) {
        v += eri[[a, i, k, k]];
    }
    sign * v
}

// =======
// p-space
// =======

/// Selects the `np` lowest-diagonal determinant pairs and builds the exact
/// Hamiltonian subblock over them.
///
/// Returns the selected flat determinant-pair addresses and the dense,
/// symmetric `np x np` submatrix with its diagonal taken from `hdiag`.
/// When `np` covers the whole determinant space this submatrix is the full
/// Hamiltonian and diagonalising it solves the problem exactly.
pub fn pspace(
    h1e: &Array2<f64>,
    eri: &Eri,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    hdiag: &Array1<f64>,
    np: usize,
) -> Result<(Vec<usize>, Array2<f64>), FciError> {
    let neleca = nelec.into().singlet().map_err(FciError::ElectronCount)?;
    let eri_full = eri.to_full(norb).map_err(FciError::Integral)?;
    let na = num_strings(norb, neleca);

    let mut order = (0..hdiag.len()).collect_vec();
    order.sort_by(|&i, &j| hdiag[i].total_cmp(&hdiag[j]));
    order.truncate(np);
    let addr = order;

    let dets = addr
        .iter()
        .map(|&ij| {
            (
                addr2str(norb, neleca, ij / na),
                addr2str(norb, neleca, ij % na),
            )
        })
        .collect_vec();

    let np = addr.len();
    let mut h0 = Array2::<f64>::zeros((np, np));
    for i in 0..np {
        for j in 0..i {
            let v = h_element(h1e, &eri_full, norb, dets[i], dets[j]);
            h0[[i, j]] = v;
            h0[[j, i]] = v;
        }
        h0[[i, i]] = hdiag[addr[i]];
    }
    Ok((addr, h0))
}
