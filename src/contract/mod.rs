//! Hamiltonian--vector contraction kernels over the determinant basis.
//!
//! Both kernels exploit the $`M_S = 0`$ symmetry of the coefficient matrix,
//! $`C_{I_\alpha I_\beta} = C_{I_\beta I_\alpha}`$: only the $`\alpha`$-spin
//! half of the operator walk is scattered explicitly and the full result is
//! recovered as $`X + X^\mathsf{T}`$.

use ndarray::{s, Array2, Array3};
use rayon::prelude::*;

use crate::cistring::{gen_linkstr_index_trilidx, ElectronCount};
use crate::hamiltonian::{pack_tril, transpose_sum};
use crate::solver::FciError;


/// Coefficient blocks are sized so that each worker's intermediate stays
/// within this many bytes.
const BLOCK_BYTES: usize = 1 << 23;

fn check_civec(civec: &Array2<f64>, na: usize) -> Result<(), FciError> {
    if civec.shape() != [na, na] {
        return Err(FciError::Dimension(format!(
            "CI coefficient matrix of shape {:?} does not match the string count {na}",
            civec.shape()
        )));
    }
    Ok(())
}

/// Applies a spin-summed one-electron operator $`\sum_{pq} f_{pq} \hat{E}_{pq}`$
/// to a symmetric CI coefficient matrix. `f1e` must be symmetric.
pub fn contract_1e(
    f1e: &Array2<f64>,
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array2<f64>, FciError> {
    let neleca = nelec.into().singlet().map_err(FciError::ElectronCount)?;
    let link = gen_linkstr_index_trilidx(norb, neleca).map_err(FciError::ElectronCount)?;
    let na = link.num_strings();
    check_civec(civec, na)?;

    let f1p = pack_tril(f1e);
    let mut x = Array2::<f64>::zeros((na, na));
    for ia in 0..na {
        for l in link.row(ia) {
            let fac = f64::from(l.sign) * f1p[l.pq];
            x.slice_mut(s![ia, ..])
                .scaled_add(fac, &civec.slice(s![l.addr, ..]));
        }
    }
    Ok(transpose_sum(&x))
}

/// Applies the absorbed two-electron Hamiltonian to a symmetric CI
/// coefficient matrix.
///
/// `h2e_tril` is the 4-fold packed tensor produced by
/// [`crate::hamiltonian::absorb_h1e`] with `fac = 0.5`; the contraction then
/// yields the complete $`\hat{H} C`$ including the one-electron part.
///
/// The work is distributed over blocks of $`\beta`$-string columns. Within a
/// block, the excitation amplitude
/// $`T_{pq, I_\alpha I_\beta} = \sum_{J} \langle I | \hat{E}^\alpha_{pq}
/// + \hat{E}^\beta_{pq} | J \rangle C_J`$
/// is gathered, transformed by the packed tensor with a single matrix
/// product, and scattered back along the $`\alpha`$ strings only.
pub fn contract_2e(
    h2e_tril: &Array2<f64>,
    civec: &Array2<f64>,
    norb: usize,
    nelec: impl Into<ElectronCount>,
) -> Result<Array2<f64>, FciError> {
    let neleca = nelec.into().singlet().map_err(FciError::ElectronCount)?;
    let link = gen_linkstr_index_trilidx(norb, neleca).map_err(FciError::ElectronCount)?;
    let na = link.num_strings();
    let npair = norb * (norb + 1) / 2;
    check_civec(civec, na)?;
    if h2e_tril.shape() != [npair, npair] {
        return Err(FciError::Dimension(format!(
            "packed two-electron tensor of shape {:?} does not match norb = {norb}",
            h2e_tril.shape()
        )));
    }

    let width = (BLOCK_BYTES / (npair * na * 8).max(1)).clamp(1, na);
    let nblocks = (na + width - 1) / width;

    let blocks = (0..nblocks)
        .into_par_iter()
        .map(|b| {
            let j0 = b * width;
            let w = width.min(na - j0);
            let mut t1 = Array3::<f64>::zeros((npair, na, w));
            for ia in 0..na {
                for l in link.row(ia) {
                    t1.slice_mut(s![l.pq, ia, ..])
                        .scaled_add(f64::from(l.sign), &civec.slice(s![l.addr, j0..j0 + w]));
                }
            }
            for jl in 0..w {
                for l in link.row(j0 + jl) {
                    t1.slice_mut(s![l.pq, .., jl])
                        .scaled_add(f64::from(l.sign), &civec.slice(s![.., l.addr]));
                }
            }

            let g = h2e_tril.dot(
                &t1.into_shape((npair, na * w))
                    .expect("contiguous intermediate is reshapeable"),
            );
            let g = g
                .into_shape((npair, na, w))
                .expect("contiguous intermediate is reshapeable");

            let mut x = Array2::<f64>::zeros((na, w));
            for ia in 0..na {
                for l in link.row(ia) {
                    x.slice_mut(s![ia, ..])
                        .scaled_add(f64::from(l.sign), &g.slice(s![l.pq, l.addr, ..]));
                }
            }
            x
        })
        .collect::<Vec<_>>();

    let mut hc = Array2::<f64>::zeros((na, na));
    for (b, x) in blocks.into_iter().enumerate() {
        let j0 = b * width;
        hc.slice_mut(s![.., j0..j0 + x.ncols()]).assign(&x);
    }
    Ok(transpose_sum(&hc))
}
