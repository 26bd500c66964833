//! 1-, 2-, 3- and 4-particle (transition) density matrices over the
//! determinant basis.
//!
//! The raw builders work in the operator-product convention,
//! $`D_{pqrs\cdots} = \langle p^\dagger q\, r^\dagger s \cdots \rangle`$,
//! which is what the contraction kernels produce directly. The `reorder_*`
//! routines remove the contact terms and yield the conventional density
//! matrices with all creation operators to the left, e.g.
//! $`\Gamma_{pqrs} = \langle p^\dagger r^\dagger s q \rangle`$.

use ndarray::{s, Array2, Array3, Array4, Array6, ArrayD, Ix4, IxDyn, SliceInfoElem};
use rayon::prelude::*;

use crate::cistring::{gen_linkstr_index, ElectronCount, LinkTable};
use crate::hamiltonian::transpose_sum;
use crate::solver::FciError;


// =====================
// Spin-resolved kernels
// =====================

/// Spin blocks of the one- and two-particle transition density matrices in
/// the operator-product convention. Cross-spin blocks are ordered as the
/// operator pairs appear, e.g. `dm2ab` holds
/// $`\langle \hat{E}^\alpha_{pq} \hat{E}^\beta_{rs} \rangle`$.
struct SpinDensityMatrices {
    dm1a: Array2<f64>,
    dm1b: Array2<f64>,
    dm2aa: Array4<f64>,
    dm2ab: Array4<f64>,
    dm2ba: Array4<f64>,
    dm2bb: Array4<f64>,
}

impl SpinDensityMatrices {
    fn zeros(norb: usize) -> Self {
        Self {
            dm1a: Array2::zeros((norb, norb)),
            dm1b: Array2::zeros((norb, norb)),
            dm2aa: Array4::zeros((norb, norb, norb, norb)),
            dm2ab: Array4::zeros((norb, norb, norb, norb)),
            dm2ba: Array4::zeros((norb, norb, norb, norb)),
            dm2bb: Array4::zeros((norb, norb, norb, norb)),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.dm1a += &other.dm1a;
        self.dm1b += &other.dm1b;
        self.dm2aa += &other.dm2aa;
        self.dm2ab += &other.dm2ab;
        self.dm2ba += &other.dm2ba;
        self.dm2bb += &other.dm2bb;
        self
    }
}

fn check_vec(vec: &Array2<f64>, na: usize, nb: usize) -> Result<(), FciError> {
    if vec.shape() != [na, nb] {
        return Err(FciError::Dimension(format!(
            "CI coefficient matrix of shape {:?} does not match the string counts ({na}, {nb})",
            vec.shape()
        )));
    }
    Ok(())
}

fn link_tables(
    norb: usize,
    nelec: ElectronCount,
) -> Result<(LinkTable, LinkTable), FciError> {
    let (neleca, nelecb) = nelec.counts();
    let linka = gen_linkstr_index(norb, neleca).map_err(FciError::ElectronCount)?;
    let linkb = gen_linkstr_index(norb, nelecb).map_err(FciError::ElectronCount)?;
    Ok((linka, linkb))
}

/// Gathers, for a fixed $`\alpha`$ string `ia`, the amplitudes
/// $`t^\sigma[I_\beta; p, q] = (\hat{E}^\sigma_{pq} v)[i_a, I_\beta]`$
/// for both spin channels.
fn one_body_amplitudes(
    vec: &Array2<f64>,
    ia: usize,
    linka: &LinkTable,
    linkb: &LinkTable,
    norb: usize,
) -> (Array3<f64>, Array3<f64>) {
    let nb = vec.ncols();
    let mut t1a = Array3::<f64>::zeros((nb, norb, norb));
    let mut t1b = Array3::<f64>::zeros((nb, norb, norb));
    for l in linka.row(ia) {
        t1a.slice_mut(s![.., l.des, l.cre])
            .scaled_add(f64::from(l.sign), &vec.slice(s![l.addr, ..]));
    }
    for ib in 0..nb {
        for l in linkb.row(ib) {
            t1b[[ib, l.des, l.cre]] += f64::from(l.sign) * vec[[ia, l.addr]];
        }
    }
    (t1a, t1b)
}

/// Reshapes a flat pair matrix into the 4-index density block, exchanging
/// the bra-side orbital pair to undo the adjoint gather.
pub(crate) fn into_dm2_block(m: Array2<f64>, norb: usize) -> Array4<f64> {
    m.into_shape((norb, norb, norb, norb))
        .expect("pair matrix is contiguous")
        .permuted_axes([1, 0, 2, 3])
        .as_standard_layout()
        .into_owned()
}

fn rdm12_spin_kernel(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: ElectronCount,
) -> Result<SpinDensityMatrices, FciError> {
    let (linka, linkb) = link_tables(norb, nelec)?;
    let na = linka.num_strings();
    let nb = linkb.num_strings();
    check_vec(bra, na, nb)?;
    check_vec(ket, na, nb)?;
    let same = std::ptr::eq(bra, ket);
    let n2 = norb * norb;

    let dms = (0..na)
        .into_par_iter()
        .map(|ia| {
            let (tka, tkb) = one_body_amplitudes(ket, ia, &linka, &linkb, norb);
            let (tba, tbb) = if same {
                (tka.clone(), tkb.clone())
            } else {
                one_body_amplitudes(bra, ia, &linka, &linkb, norb)
            };
            let fka = tka.into_shape((nb, n2)).expect("amplitudes are contiguous");
            let fkb = tkb.into_shape((nb, n2)).expect("amplitudes are contiguous");
            let fba = tba.into_shape((nb, n2)).expect("amplitudes are contiguous");
            let fbb = tbb.into_shape((nb, n2)).expect("amplitudes are contiguous");
            let bra_row = bra.slice(s![ia, ..]);

            let mut acc = SpinDensityMatrices::zeros(norb);
            acc.dm1a = bra_row
                .dot(&fka)
                .into_shape((norb, norb))
                .expect("pair vector is contiguous");
            acc.dm1b = bra_row
                .dot(&fkb)
                .into_shape((norb, norb))
                .expect("pair vector is contiguous");
            acc.dm2aa = into_dm2_block(fba.t().dot(&fka), norb);
            acc.dm2ab = into_dm2_block(fba.t().dot(&fkb), norb);
            acc.dm2ba = into_dm2_block(fbb.t().dot(&fka), norb);
            acc.dm2bb = into_dm2_block(fbb.t().dot(&fkb), norb);
            acc
        })
        .reduce(|| SpinDensityMatrices::zeros(norb), SpinDensityMatrices::merge);
    Ok(dms)
}

fn rdm1_spin_kernel(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: ElectronCount,
) -> Result<(Array2<f64>, Array2<f64>), FciError> {
    let (linka, linkb) = link_tables(norb, nelec)?;
    let na = linka.num_strings();
    let nb = linkb.num_strings();
    check_vec(bra, na, nb)?;
    check_vec(ket, na, nb)?;

    let mut dm1a = Array2::<f64>::zeros((norb, norb));
    let mut dm1b = Array2::<f64>::zeros((norb, norb));
    for ia in 0..na {
        for l in linka.row(ia) {
            dm1a[[l.des, l.cre]] +=
                f64::from(l.sign) * bra.row(ia).dot(&ket.row(l.addr));
        }
    }
    for ib in 0..nb {
        for l in linkb.row(ib) {
            dm1b[[l.des, l.cre]] +=
                f64::from(l.sign) * bra.column(ib).dot(&ket.column(l.addr));
        }
    }
    Ok((dm1a, dm1b))
}

// ==========
// Public API
// ==========

/// Selects the spin channel contracted by the low-level density-matrix
/// drivers [`make_rdm1_ms0`] and [`make_rdm12_ms0`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RdmKernel {
    /// Sum of both spin channels.
    SpinFree,
    /// The $`\alpha`$ channel only.
    Alpha,
    /// The $`\beta`$ channel only.
    Beta,
}

/// Low-level one-particle transition density driver dispatching on
/// [`RdmKernel`].
pub fn make_rdm1_ms0(
    kernel: RdmKernel,
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array2<f64>, FciError> {
    let (dm1a, dm1b) = rdm1_spin_kernel(bra, ket, norb, nelec.into())?;
    Ok(match kernel {
        RdmKernel::SpinFree => dm1a + dm1b,
        RdmKernel::Alpha => dm1a,
        RdmKernel::Beta => dm1b,
    })
}

/// Low-level one- and two-particle transition density driver dispatching
/// on [`RdmKernel`]. The two-particle matrix is returned in the raw
/// operator-product convention.
pub fn make_rdm12_ms0(
    kernel: RdmKernel,
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<(Array2<f64>, Array4<f64>), FciError> {
    let dms = rdm12_spin_kernel(bra, ket, norb, nelec.into())?;
    Ok(match kernel {
        RdmKernel::SpinFree => (
            dms.dm1a + dms.dm1b,
            dms.dm2aa + dms.dm2ab + dms.dm2ba + dms.dm2bb,
        ),
        RdmKernel::Alpha => (dms.dm1a, dms.dm2aa),
        RdmKernel::Beta => (dms.dm1b, dms.dm2bb),
    })
}

/// Spin-resolved one-particle density matrices
/// $`\gamma^\sigma_{pq} = \langle \hat{E}^\sigma_{pq} \rangle`$.
pub fn make_rdm1s(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<(Array2<f64>, Array2<f64>), FciError> {
    rdm1_spin_kernel(civec, civec, norb, nelec.into())
}

/// Spin-traced one-particle density matrix.
pub fn make_rdm1(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array2<f64>, FciError> {
    make_rdm1_ms0(RdmKernel::SpinFree, civec, civec, norb, nelec)
}

/// Spin-resolved one-particle transition density matrices
/// $`\langle \mathrm{bra} | \hat{E}^\sigma_{pq} | \mathrm{ket} \rangle`$.
pub fn trans_rdm1s(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<(Array2<f64>, Array2<f64>), FciError> {
    rdm1_spin_kernel(bra, ket, norb, nelec.into())
}

/// Spin-traced one-particle transition density matrix.
pub fn trans_rdm1(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array2<f64>, FciError> {
    make_rdm1_ms0(RdmKernel::SpinFree, bra, ket, norb, nelec)
}

/// Spin-resolved one- and two-particle density matrices. With `reorder`
/// the same-spin two-particle blocks are transformed to the conventional
/// ordering; the opposite-spin block carries no contact term and is
/// returned unchanged.
#[allow(clippy::type_complexity)]
pub fn make_rdm12s(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    reorder: bool,
) -> Result<((Array2<f64>, Array2<f64>), (Array4<f64>, Array4<f64>, Array4<f64>)), FciError> {
    let dms = rdm12_spin_kernel(civec, civec, norb, nelec.into())?;
    let SpinDensityMatrices {
        dm1a,
        dm1b,
        mut dm2aa,
        dm2ab,
        mut dm2bb,
        ..
    } = dms;
    if reorder {
        dm2aa = reorder_rdm(&dm1a, dm2aa);
        dm2bb = reorder_rdm(&dm1b, dm2bb);
    }
    Ok(((dm1a, dm1b), (dm2aa, dm2ab, dm2bb)))
}

/// Spin-traced one- and two-particle density matrices. With `reorder` the
/// conventional ordering $`\Gamma_{pqrs} = \langle p^\dagger r^\dagger s q
/// \rangle`$ is returned instead of the raw operator product.
pub fn make_rdm12(
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    reorder: bool,
) -> Result<(Array2<f64>, Array4<f64>), FciError> {
    let (dm1, mut dm2) = make_rdm12_ms0(RdmKernel::SpinFree, civec, civec, norb, nelec)?;
    if reorder {
        dm2 = reorder_rdm(&dm1, dm2);
    }
    Ok((dm1, dm2))
}

/// Spin-resolved one- and two-particle transition density matrices,
/// including both cross-spin blocks.
#[allow(clippy::type_complexity)]
pub fn trans_rdm12s(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    reorder: bool,
) -> Result<
    (
        (Array2<f64>, Array2<f64>),
        (Array4<f64>, Array4<f64>, Array4<f64>, Array4<f64>),
    ),
    FciError,
> {
    let dms = rdm12_spin_kernel(bra, ket, norb, nelec.into())?;
    let SpinDensityMatrices {
        dm1a,
        dm1b,
        mut dm2aa,
        dm2ab,
        dm2ba,
        mut dm2bb,
    } = dms;
    if reorder {
        dm2aa = reorder_rdm(&dm1a, dm2aa);
        dm2bb = reorder_rdm(&dm1b, dm2bb);
    }
    Ok(((dm1a, dm1b), (dm2aa, dm2ab, dm2ba, dm2bb)))
}

/// Spin-traced one- and two-particle transition density matrices.
pub fn trans_rdm12(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
    reorder: bool,
) -> Result<(Array2<f64>, Array4<f64>), FciError> {
    let (dm1, mut dm2) = make_rdm12_ms0(RdmKernel::SpinFree, bra, ket, norb, nelec)?;
    if reorder {
        dm2 = reorder_rdm(&dm1, dm2);
    }
    Ok((dm1, dm2))
}

// ==========
// Reordering
// ==========

/// Transforms a raw two-particle matrix
/// $`\langle p^\dagger q\, r^\dagger s \rangle`$ into the conventional
/// $`\Gamma_{pqrs} = \langle p^\dagger r^\dagger s q \rangle`$ by removing
/// the contact term and symmetrising over the electron-pair exchange.
pub fn reorder_rdm(rdm1: &Array2<f64>, mut rdm2: Array4<f64>) -> Array4<f64> {
    let norb = rdm1.nrows();
    for k in 0..norb {
        let mut contact = rdm2.slice_mut(s![.., k, k, ..]);
        contact -= rdm1;
    }
    let n2 = norb * norb;
    let flat = rdm2
        .into_shape((n2, n2))
        .expect("density matrix is contiguous");
    let flat = transpose_sum(&flat) * 0.5;
    flat.into_shape((norb, norb, norb, norb))
        .expect("density matrix is contiguous")
}

// ==========================================
// 3- and 4-particle operator-product builders
// ==========================================

/// Spin-summed single-excitation scatter table: for each orbital pair
/// `(p, q)` the list of `(destination, source, sign)` string triples of
/// $`\hat{E}_{pq}`$ within one spin channel.
struct EpqTable {
    norb: usize,
    alpha: Vec<Vec<(usize, usize, f64)>>,
    beta: Vec<Vec<(usize, usize, f64)>>,
}

impl EpqTable {
    fn new(norb: usize, linka: &LinkTable, linkb: &LinkTable) -> Self {
        let bucketise = |link: &LinkTable| {
            let mut buckets = vec![Vec::new(); norb * norb];
            for src in 0..link.num_strings() {
                for l in link.row(src) {
                    buckets[l.cre * norb + l.des].push((l.addr, src, f64::from(l.sign)));
                }
            }
            buckets
        };
        Self {
            norb,
            alpha: bucketise(linka),
            beta: bucketise(linkb),
        }
    }

    /// Applies $`\hat{E}_{pq} = \hat{E}^\alpha_{pq} + \hat{E}^\beta_{pq}`$.
    fn apply(&self, p: usize, q: usize, vec: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros(vec.raw_dim());
        for &(dst, src, sign) in &self.alpha[p * self.norb + q] {
            out.slice_mut(s![dst, ..])
                .scaled_add(sign, &vec.slice(s![src, ..]));
        }
        for &(dst, src, sign) in &self.beta[p * self.norb + q] {
            out.slice_mut(s![.., dst])
                .scaled_add(sign, &vec.slice(s![.., src]));
        }
        out
    }
}

fn flat_dot(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

struct PdmWork {
    table: EpqTable,
    ket: Array2<f64>,
    /// `bra_e[p * norb + q]` holds $`\hat{E}_{qp} |\mathrm{bra}\rangle`$,
    /// the adjoint image used to close each expectation value.
    bra_e: Vec<Array2<f64>>,
    /// `ket_e[r * norb + s]` holds $`\hat{E}_{rs} |\mathrm{ket}\rangle`$.
    ket_e: Vec<Array2<f64>>,
}

fn pdm_work(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: ElectronCount,
) -> Result<PdmWork, FciError> {
    let (linka, linkb) = link_tables(norb, nelec)?;
    check_vec(bra, linka.num_strings(), linkb.num_strings())?;
    check_vec(ket, linka.num_strings(), linkb.num_strings())?;
    let table = EpqTable::new(norb, &linka, &linkb);
    let bra_e = (0..norb * norb)
        .map(|pq| table.apply(pq % norb, pq / norb, bra))
        .collect::<Vec<_>>();
    let ket_e = (0..norb * norb)
        .map(|rs| table.apply(rs / norb, rs % norb, ket))
        .collect::<Vec<_>>();
    Ok(PdmWork {
        table,
        ket: ket.clone(),
        bra_e,
        ket_e,
    })
}

/// One-, two- and three-particle transition matrices in the
/// operator-product convention,
/// $`D^{(3)}_{pqrstu} = \langle \hat{E}_{pq} \hat{E}_{rs} \hat{E}_{tu}
/// \rangle`$. The contraction fills the canonical wedge
/// $`p \geq r \geq t`$ and the remaining blocks are recovered from the
/// commutation relation
/// $`\hat{E}_{rs} \hat{E}_{pq} = \hat{E}_{pq} \hat{E}_{rs}
/// - \delta_{qr} \hat{E}_{ps} + \delta_{ps} \hat{E}_{rq}`$.
pub fn make_dm123(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<(Array2<f64>, Array4<f64>, Array6<f64>), FciError> {
    let work = pdm_work(bra, ket, norb, nelec.into())?;
    let (dm1, dm2) = pdm12_from_work(&work, norb);

    let mut dm3 = Array6::<f64>::zeros((norb, norb, norb, norb, norb, norb));
    for t in 0..norb {
        for u in 0..norb {
            let t1 = &work.ket_e[t * norb + u];
            for r in t..norb {
                for s_ in 0..norb {
                    let t2 = work.table.apply(r, s_, t1);
                    for p in r..norb {
                        for q in 0..norb {
                            dm3[[p, q, r, s_, t, u]] =
                                flat_dot(&work.bra_e[p * norb + q], &t2);
                        }
                    }
                }
            }
        }
    }
    let dm3 = complete_dm3(&dm2, dm3);
    Ok((dm1, dm2, dm3))
}

/// As [`make_dm123`] but extended to the four-particle matrix
/// $`D^{(4)}_{pqrstuvw} = \langle \hat{E}_{pq} \hat{E}_{rs} \hat{E}_{tu}
/// \hat{E}_{vw} \rangle`$, contracted on the canonical wedge
/// $`p \geq t \geq r \geq v`$.
#[allow(clippy::type_complexity)]
pub fn make_dm1234(
    bra: &Array2<f64>,
    ket: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<(Array2<f64>, Array4<f64>, Array6<f64>, ArrayD<f64>), FciError> {
    let work = pdm_work(bra, ket, norb, nelec.into())?;
    let (dm1, dm2) = pdm12_from_work(&work, norb);

    let mut dm3 = Array6::<f64>::zeros((norb, norb, norb, norb, norb, norb));
    let mut dm4 = ArrayD::<f64>::zeros(IxDyn(&[norb; 8]));
    for v in 0..norb {
        for w in 0..norb {
            let t1 = &work.ket_e[v * norb + w];
            for t in v..norb {
                for u in 0..norb {
                    let t2 = work.table.apply(t, u, t1);
                    for r in v..=t {
                        for s_ in 0..norb {
                            let t3 = work.table.apply(r, s_, &t2);
                            for p in t..norb {
                                for q in 0..norb {
                                    dm4[IxDyn(&[p, q, r, s_, t, u, v, w])] =
                                        flat_dot(&work.bra_e[p * norb + q], &t3);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    for t in 0..norb {
        for u in 0..norb {
            let t1 = &work.ket_e[t * norb + u];
            for r in t..norb {
                for s_ in 0..norb {
                    let t2 = work.table.apply(r, s_, t1);
                    for p in r..norb {
                        for q in 0..norb {
                            dm3[[p, q, r, s_, t, u]] =
                                flat_dot(&work.bra_e[p * norb + q], &t2);
                        }
                    }
                }
            }
        }
    }
    let dm3 = complete_dm3(&dm2, dm3);
    let dm4 = complete_dm4(&dm3, dm4);
    Ok((dm1, dm2, dm3, dm4))
}

fn pdm12_from_work(work: &PdmWork, norb: usize) -> (Array2<f64>, Array4<f64>) {
    let mut dm1 = Array2::<f64>::zeros((norb, norb));
    let mut dm2 = Array4::<f64>::zeros((norb, norb, norb, norb));
    for p in 0..norb {
        for q in 0..norb {
            let bra_pq = &work.bra_e[p * norb + q];
            dm1[[p, q]] = flat_dot(bra_pq, &work.ket);
            for r in 0..norb {
                for s_ in 0..norb {
                    dm2[[p, q, r, s_]] = flat_dot(bra_pq, &work.ket_e[r * norb + s_]);
                }
            }
        }
    }
    (dm1, dm2)
}

// ===================
// Wedge completion
// ===================

fn dm3_transpose01(
    dm2: &Array4<f64>,
    dm3: &mut Array6<f64>,
    block: &Array3<f64>,
    i: usize,
    j: usize,
    k: usize,
) -> Array3<f64> {
    let mut jik = block.clone().permuted_axes([1, 0, 2]);
    {
        let mut sl = jik.slice_mut(s![.., j, ..]);
        sl -= &dm2.slice(s![i, .., k, ..]);
    }
    {
        let mut sl = jik.slice_mut(s![i, .., ..]);
        sl += &dm2.slice(s![j, .., k, ..]);
    }
    dm3.slice_mut(s![j, .., i, .., k, ..]).assign(&jik);
    jik
}

fn dm3_transpose12(
    dm2: &Array4<f64>,
    dm3: &mut Array6<f64>,
    block: &Array3<f64>,
    i: usize,
    j: usize,
    k: usize,
) -> Array3<f64> {
    let mut ikj = block.clone().permuted_axes([0, 2, 1]);
    {
        let mut sl = ikj.slice_mut(s![.., .., k]);
        sl -= &dm2.slice(s![i, .., j, ..]);
    }
    {
        let mut sl = ikj.slice_mut(s![.., j, ..]);
        sl += &dm2.slice(s![i, .., k, ..]);
    }
    dm3.slice_mut(s![i, .., k, .., j, ..]).assign(&ikj);
    ikj
}

/// Completes the three-particle matrix from its canonical wedge
/// $`p \geq r \geq t`$ by chaining pair transpositions:
/// `ijk -> jik -> jki -> kji -> kij -> ikj`.
fn complete_dm3(dm2: &Array4<f64>, mut dm3: Array6<f64>) -> Array6<f64> {
    let norb = dm2.shape()[0];
    for i in 0..norb {
        for j in 0..=i {
            for k in 0..=j {
                let block = dm3.slice(s![i, .., j, .., k, ..]).to_owned();
                let t = dm3_transpose01(dm2, &mut dm3, &block, i, j, k);
                let t = dm3_transpose12(dm2, &mut dm3, &t, j, i, k);
                let t = dm3_transpose01(dm2, &mut dm3, &t, j, k, i);
                let t = dm3_transpose12(dm2, &mut dm3, &t, k, j, i);
                let _ = dm3_transpose01(dm2, &mut dm3, &t, k, i, j);
            }
        }
    }
    dm3
}

fn dm4_pair_slice(i: usize, j: usize, k: usize, l: usize) -> [SliceInfoElem; 8] {
    let full = SliceInfoElem::Slice {
        start: 0,
        end: None,
        step: 1,
    };
    [
        SliceInfoElem::Index(i as isize),
        full,
        SliceInfoElem::Index(j as isize),
        full,
        SliceInfoElem::Index(k as isize),
        full,
        SliceInfoElem::Index(l as isize),
        full,
    ]
}

fn dm4_block(dm4: &ArrayD<f64>, i: usize, j: usize, k: usize, l: usize) -> Array4<f64> {
    dm4.slice(&dm4_pair_slice(i, j, k, l)[..])
        .into_dimensionality::<Ix4>()
        .expect("pair slice has four free axes")
        .to_owned()
}

fn dm4_assign(
    dm4: &mut ArrayD<f64>,
    i: usize,
    j: usize,
    k: usize,
    l: usize,
    block: &Array4<f64>,
) {
    dm4.slice_mut(&dm4_pair_slice(i, j, k, l)[..])
        .assign(block);
}

fn dm4_transpose01(
    dm3: &Array6<f64>,
    dm4: &mut ArrayD<f64>,
    block: &Array4<f64>,
    i: usize,
    j: usize,
    k: usize,
    l: usize,
) -> Array4<f64> {
    let mut jikl = block.clone().permuted_axes([1, 0, 2, 3]);
    {
        let mut sl = jikl.slice_mut(s![.., j, .., ..]);
        sl -= &dm3.slice(s![i, .., k, .., l, ..]);
    }
    {
        let mut sl = jikl.slice_mut(s![i, .., .., ..]);
        sl += &dm3.slice(s![j, .., k, .., l, ..]);
    }
    dm4_assign(dm4, j, i, k, l, &jikl);
    jikl
}

fn dm4_transpose12(
    dm3: &Array6<f64>,
    dm4: &mut ArrayD<f64>,
    block: &Array4<f64>,
    i: usize,
    j: usize,
    k: usize,
    l: usize,
) -> Array4<f64> {
    let mut ikjl = block.clone().permuted_axes([0, 2, 1, 3]);
    {
        let mut sl = ikjl.slice_mut(s![.., .., k, ..]);
        sl -= &dm3.slice(s![i, .., j, .., l, ..]);
    }
    {
        let mut sl = ikjl.slice_mut(s![.., j, .., ..]);
        sl += &dm3.slice(s![i, .., k, .., l, ..]);
    }
    dm4_assign(dm4, i, k, j, l, &ikjl);
    ikjl
}

fn dm4_transpose23(
    dm3: &Array6<f64>,
    dm4: &mut ArrayD<f64>,
    block: &Array4<f64>,
    i: usize,
    j: usize,
    k: usize,
    l: usize,
) -> Array4<f64> {
    let mut ijlk = block.clone().permuted_axes([0, 1, 3, 2]);
    {
        let mut sl = ijlk.slice_mut(s![.., .., .., l]);
        sl -= &dm3.slice(s![i, .., j, .., k, ..]);
    }
    {
        let mut sl = ijlk.slice_mut(s![.., .., k, ..]);
        sl += &dm3.slice(s![i, .., j, .., l, ..]);
    }
    dm4_assign(dm4, i, j, l, k, &ijlk);
    ijlk
}

fn dm4_chain(
    dm3: &Array6<f64>,
    dm4: &mut ArrayD<f64>,
    block: &Array4<f64>,
    i: usize,
    j: usize,
    k: usize,
    l: usize,
) -> Array4<f64> {
    let t = dm4_transpose23(dm3, dm4, block, i, j, k, l);
    let t = dm4_transpose12(dm3, dm4, &t, i, j, l, k);
    let t = dm4_transpose23(dm3, dm4, &t, i, l, j, k);
    let t = dm4_transpose12(dm3, dm4, &t, i, l, k, j);
    dm4_transpose23(dm3, dm4, &t, i, k, l, j)
}

/// Completes the four-particle matrix from its canonical wedge
/// $`p \geq t \geq r \geq v`$. Within each index quadruple the pair
/// transpositions are sequenced so that every block read has already been
/// filled, either canonically or earlier in the same pass.
fn complete_dm4(dm3: &Array6<f64>, mut dm4: ArrayD<f64>) -> ArrayD<f64> {
    let norb = dm3.shape()[0];
    for i in 0..norb {
        for k in 0..=i {
            for j in 0..=k {
                for l in 0..=j {
                    let block = dm4_block(&dm4, i, j, k, l);
                    let t = dm4_chain(dm3, &mut dm4, &block, i, j, k, l);
                    let t = dm4_transpose01(dm3, &mut dm4, &t, i, k, j, l);
                    let _ = dm4_chain(dm3, &mut dm4, &t, k, i, j, l);
                    let t = dm4_transpose01(dm3, &mut dm4, &block, i, j, k, l);
                    let _ = dm4_chain(dm3, &mut dm4, &t, j, i, k, l);
                    let block_iljk = dm4_block(&dm4, i, l, j, k);
                    let t = dm4_transpose01(dm3, &mut dm4, &block_iljk, i, l, j, k);
                    let _ = dm4_chain(dm3, &mut dm4, &t, l, i, j, k);
                }
            }
        }
    }
    dm4
}

// =============================
// Higher-order reordering
// =============================

/// Transforms a raw three-particle matrix into the conventional ordering
/// $`\langle p^\dagger r^\dagger t^\dagger u s q \rangle`$. `rdm1` and
/// `rdm2` must already be in conventional order.
pub fn reorder_rdm3(
    rdm1: &Array2<f64>,
    rdm2: &Array4<f64>,
    mut rdm3: Array6<f64>,
) -> Array6<f64> {
    let norb = rdm1.nrows();
    for p in 0..norb {
        for q in 0..norb {
            for s_ in 0..norb {
                let mut sl = rdm3.slice_mut(s![p, q, q, s_, .., ..]);
                sl -= &rdm2.slice(s![p, s_, .., ..]);
            }
            for u in 0..norb {
                let mut sl = rdm3.slice_mut(s![p, q, .., .., q, u]);
                sl -= &rdm2.slice(s![p, u, .., ..]);
            }
            for s_ in 0..norb {
                let mut sl = rdm3.slice_mut(s![p, q, .., s_, s_, ..]);
                sl -= &rdm2.slice(s![p, q, .., ..]);
            }
        }
    }
    for q in 0..norb {
        for s_ in 0..norb {
            let mut sl = rdm3.slice_mut(s![.., q, q, s_, s_, ..]);
            sl -= rdm1;
        }
    }
    rdm3
}

/// Reordering of the four-particle matrix to the conventional operator
/// order is not provided.
pub fn reorder_rdm4(
    _rdm1: &Array2<f64>,
    _rdm2: &Array4<f64>,
    _rdm3: &Array6<f64>,
    _rdm4: &ArrayD<f64>,
) -> Result<ArrayD<f64>, FciError> {
    Err(FciError::Unimplemented(
        "reordering of the 4-particle density matrix",
    ))
}
