//! Total and local spin expectation values.
//!
//! The spin-squared operator is evaluated as
//! $`\hat{S}^2 = (\hat{S}_+ \hat{S}_- + \hat{S}_- \hat{S}_+)/2
//! + \hat{S}_z \hat{S}_z`$ from the spin-resolved one- and two-particle
//! density matrices together with the two cross-spin matrices generated by
//! $`\hat{S}_+ \hat{S}_-`$ and $`\hat{S}_- \hat{S}_+`$, whose intermediate
//! determinants carry one electron moved between the spin channels.

use ndarray::{Array2, Array4};

use crate::cistring::{
    gen_cre_str_index, gen_des_str_index, num_strings, ElectronCount,
};
use crate::rdm::{self, into_dm2_block, reorder_rdm};
use crate::solver::FciError;

#[cfg(test)]
#[path = "spin_op_tests.rs"]
mod spin_op_tests;

fn check_vec(vec: &Array2<f64>, na: usize, nb: usize) -> Result<(), FciError> {
    if vec.shape() != [na, nb] {
        return Err(FciError::Dimension(format!(
            "CI coefficient matrix of shape {:?} does not match the string counts ({na}, {nb})",
            vec.shape()
        )));
    }
    Ok(())
}

fn trace(dm1: &Array2<f64>, ovlp: &Array2<f64>) -> f64 {
    let n = dm1.nrows();
    let mut v = 0.0;
    for i in 0..n {
        for j in 0..n {
            v += dm1[[i, j]] * ovlp[[j, i]];
        }
    }
    v
}

fn bi_trace(dm2: &Array4<f64>, ovlp1: &Array2<f64>, ovlp2: &Array2<f64>) -> f64 {
    let n = ovlp1.nrows();
    let mut v = 0.0;
    for i in 0..n {
        for j in 0..n {
            let o1 = ovlp1[[i, j]];
            if o1 == 0.0 {
                continue;
            }
            for k in 0..n {
                for l in 0..n {
                    v += dm2[[j, i, l, k]] * o1 * ovlp2[[k, l]];
                }
            }
        }
    }
    v
}

// ==========================
// Cross-spin density matrices
// ==========================

/// Raw $`\langle p^\dagger_\beta q_\alpha\, r^\dagger_\alpha s_\beta
/// \rangle`$ generated by $`\hat{S}_+ \hat{S}_-`$. The intermediate
/// determinants live in the $`(N_\alpha + 1, N_\beta - 1)`$ space.
fn make_rdm2_baab_raw(
    civec: &Array2<f64>,
    norb: usize,
    nelec: ElectronCount,
) -> Result<Array4<f64>, FciError> {
    let (neleca, nelecb) = nelec.counts();
    let na = num_strings(norb, neleca);
    let nb = num_strings(norb, nelecb);
    check_vec(civec, na, nb)?;
    if neleca == norb || nelecb == 0 {
        // No intermediate determinants.
        return Ok(Array4::zeros((norb, norb, norb, norb)));
    }
    let ades = gen_des_str_index(norb, neleca + 1).map_err(FciError::ElectronCount)?;
    let bcre = gen_cre_str_index(norb, nelecb - 1).map_err(FciError::ElectronCount)?;
    let na_int = ades.num_strings();
    let nb_int = bcre.num_strings();

    let n2 = norb * norb;
    let mut t = Array2::<f64>::zeros((na_int * nb_int, n2));
    for ja in 0..na_int {
        for la in ades.row(ja) {
            for jb in 0..nb_int {
                for lb in bcre.row(jb) {
                    t[[ja * nb_int + jb, la.orb * norb + lb.orb]] += f64::from(la.sign)
                        * f64::from(lb.sign)
                        * civec[[la.addr, lb.addr]];
                }
            }
        }
    }
    Ok(into_dm2_block(t.t().dot(&t), norb))
}

/// Raw $`\langle p^\dagger_\alpha q_\beta\, r^\dagger_\beta s_\alpha
/// \rangle`$ generated by $`\hat{S}_- \hat{S}_+`$. The intermediate
/// determinants live in the $`(N_\alpha - 1, N_\beta + 1)`$ space.
fn make_rdm2_abba_raw(
    civec: &Array2<f64>,
    norb: usize,
    nelec: ElectronCount,
) -> Result<Array4<f64>, FciError> {
    let (neleca, nelecb) = nelec.counts();
    let na = num_strings(norb, neleca);
    let nb = num_strings(norb, nelecb);
    check_vec(civec, na, nb)?;
    if nelecb == norb || neleca == 0 {
        return Ok(Array4::zeros((norb, norb, norb, norb)));
    }
    let acre = gen_cre_str_index(norb, neleca - 1).map_err(FciError::ElectronCount)?;
    let bdes = gen_des_str_index(norb, nelecb + 1).map_err(FciError::ElectronCount)?;
    let na_int = acre.num_strings();
    let nb_int = bdes.num_strings();

    let n2 = norb * norb;
    let mut t = Array2::<f64>::zeros((na_int * nb_int, n2));
    for ja in 0..na_int {
        for la in acre.row(ja) {
            for jb in 0..nb_int {
                for lb in bdes.row(jb) {
                    t[[ja * nb_int + jb, lb.orb * norb + la.orb]] += f64::from(la.sign)
                        * f64::from(lb.sign)
                        * civec[[la.addr, lb.addr]];
                }
            }
        }
    }
    Ok(into_dm2_block(t.t().dot(&t), norb))
}

/// The reordered cross-spin two-particle matrix of
/// $`\hat{S}_+ \hat{S}_-`$.
pub fn make_rdm2_baab(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array4<f64>, FciError> {
    let nelec = nelec.into();
    let dm2 = make_rdm2_baab_raw(civec, norb, nelec)?;
    let (_, dm1b) = rdm::make_rdm1s(civec, norb, nelec)?;
    Ok(reorder_rdm(&dm1b, dm2))
}

/// The reordered cross-spin two-particle matrix of
/// $`\hat{S}_- \hat{S}_+`$.
pub fn make_rdm2_abba(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array4<f64>, FciError> {
    let nelec = nelec.into();
    let dm2 = make_rdm2_abba_raw(civec, norb, nelec)?;
    let (dm1a, _) = rdm::make_rdm1s(civec, norb, nelec)?;
    Ok(reorder_rdm(&dm1a, dm2))
}

// ===========
// Expectation
// ===========

/// Evaluates $`\langle \hat{S}^2 \rangle`$ with the orbital overlap blocks
/// projected by `ovlpaa`, `ovlpbb`, `ovlpab` and `ovlpba`. With identity
/// overlaps this is the total spin of the state; partial projectors give
/// the local spin of an orbital subset.
///
/// Returns `(ss, multiplicity)` with
/// $`2S + 1 = 2\sqrt{\langle \hat{S}^2 \rangle + \tfrac{1}{4}}`$.
pub fn spin_square_general(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    ovlpaa: &Array2<f64>,
    ovlpbb: &Array2<f64>,
    ovlpab: &Array2<f64>,
    ovlpba: &Array2<f64>,
) -> Result<(f64, f64), FciError> {
    let nelec = nelec.into();
    let ((dm1a, dm1b), (dm2aa, dm2ab, dm2bb)) = rdm::make_rdm12s(civec, norb, nelec, true)?;

    let ssz = (bi_trace(&dm2aa, ovlpaa, ovlpaa) - bi_trace(&dm2ab, ovlpaa, ovlpbb)
        + bi_trace(&dm2bb, ovlpbb, ovlpbb)
        - bi_trace(&dm2ab, ovlpaa, ovlpbb))
        * 0.25
        + (trace(&dm1a, ovlpaa) + trace(&dm1b, ovlpbb)) * 0.25;

    let dm2baab = reorder_rdm(&dm1b, make_rdm2_baab_raw(civec, norb, nelec)?);
    let dm2abba = reorder_rdm(&dm1a, make_rdm2_abba_raw(civec, norb, nelec)?);
    let ssxy = (bi_trace(&dm2abba, ovlpab, ovlpba)
        + bi_trace(&dm2baab, ovlpba, ovlpab)
        + trace(&dm1a, ovlpaa)
        + trace(&dm1b, ovlpbb))
        * 0.5;

    let ss = ssxy + ssz;
    let s = (ss + 0.25).sqrt() - 0.5;
    Ok((ss, 2.0 * s + 1.0))
}

/// Evaluates $`\langle \hat{S}^2 \rangle`$ of a CI state over orthonormal
/// orbitals.
pub fn spin_square(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<(f64, f64), FciError> {
    let eye = Array2::eye(norb);
    spin_square_general(civec, norb, nelec, &eye, &eye, &eye, &eye)
}

/// Evaluates $`\langle \hat{S}^2 \rangle`$ of a CI state whose alpha and
/// beta orbitals `mo_a` and `mo_b` are expanded over a common non-orthogonal
/// basis with overlap matrix `ovlp`.
pub fn spin_square_mo(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    mo_a: &Array2<f64>,
    mo_b: &Array2<f64>,
    ovlp: &Array2<f64>,
) -> Result<(f64, f64), FciError> {
    if mo_a.ncols() != norb || mo_b.ncols() != norb {
        return Err(FciError::Dimension(format!(
            "orbital coefficient matrices of shapes {:?} and {:?} do not span {norb} \
             orbital(s)",
            mo_a.dim(),
            mo_b.dim()
        )));
    }
    if ovlp.dim() != (mo_a.nrows(), mo_a.nrows()) || mo_b.nrows() != mo_a.nrows() {
        return Err(FciError::Dimension(format!(
            "overlap matrix of shape {:?} does not match the basis dimension {}",
            ovlp.dim(),
            mo_a.nrows()
        )));
    }
    let sa = ovlp.dot(mo_a);
    let sb = ovlp.dot(mo_b);
    let ovlpaa = mo_a.t().dot(&sa);
    let ovlpbb = mo_b.t().dot(&sb);
    let ovlpab = mo_a.t().dot(&sb);
    let ovlpba = mo_b.t().dot(&sa);
    spin_square_general(civec, norb, nelec, &ovlpaa, &ovlpbb, &ovlpab, &ovlpba)
}

/// The local spin of the orbital subset `orblst`, evaluated by projecting
/// every overlap block onto the subset. An empty list selects all orbitals
/// and reduces to [`spin_square`].
pub fn local_spin(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    orblst: &[usize],
) -> Result<(f64, f64), FciError> {
    let mut proj = Array2::<f64>::zeros((norb, norb));
    if orblst.is_empty() {
        proj = Array2::eye(norb);
    } else {
        for &o in orblst {
            if o >= norb {
                return Err(FciError::Dimension(format!(
                    "orbital {o} outside the active space of {norb} orbital(s)"
                )));
            }
            proj[[o, o]] = 1.0;
        }
    }
    spin_square_general(civec, norb, nelec, &proj, &proj, &proj, &proj)
}
