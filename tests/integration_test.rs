use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array4};

use detci::rdm::{make_rdm1, make_rdm12};
use detci::solver::{energy, kernel, FciConfig};
use detci::spin_op::spin_square;
use detci::Eri;

/// Open Hubbard chain with hopping `-1` and on-site repulsion `u`.
fn hubbard_chain(nsite: usize, u: f64) -> (Array2<f64>, Eri) {
    let mut h1e = Array2::<f64>::zeros((nsite, nsite));
    for i in 0..nsite - 1 {
        h1e[[i, i + 1]] = -1.0;
        h1e[[i + 1, i]] = -1.0;
    }
    let mut eri = Array4::<f64>::zeros((nsite, nsite, nsite, nsite));
    for i in 0..nsite {
        eri[[i, i, i, i]] = u;
    }
    (h1e, Eri::Full(eri))
}

#[test]
fn test_huckel_chain_ground_energy() {
    // Without on-site repulsion the chain is a Hueckel model whose ground
    // energy is twice the sum of the three lowest orbital energies
    // -2 cos(k pi / 7).
    let nsite = 6;
    let (h1e, eri) = hubbard_chain(nsite, 0.0);
    let e_ref: f64 = -(1..=3)
        .map(|k| 4.0 * (k as f64 * std::f64::consts::PI / 7.0).cos())
        .sum::<f64>();

    let res = kernel(&h1e, &eri, nsite, nsite, None, &FciConfig::default()).unwrap();
    assert!(res.all_converged());
    assert_abs_diff_eq!(res.energies[0], e_ref, epsilon = 1e-10);

    let config = FciConfig::builder().davidson_only(true).build().unwrap();
    let res_iter = kernel(&h1e, &eri, nsite, nsite, None, &config).unwrap();
    assert_abs_diff_eq!(res_iter.energies[0], e_ref, epsilon = 1e-7);
}

#[test]
fn test_hubbard_chain_correlated_observables() {
    let nsite = 4;
    let u = 2.0;
    let (h1e, eri) = hubbard_chain(nsite, u);

    let res = kernel(&h1e, &eri, nsite, nsite, None, &FciConfig::default()).unwrap();
    assert!(res.all_converged());
    let (e0, ci) = res.ground().unwrap();
    assert_abs_diff_eq!(
        energy(&h1e, &eri, ci, nsite, nsite).unwrap(),
        e0,
        epsilon = 1e-10
    );

    // Contracting the density matrices with the integrals recovers the
    // eigenvalue.
    let eri_full = eri.to_full(nsite).unwrap();
    let (dm1, dm2) = make_rdm12(ci, nsite, nsite, true).unwrap();
    let mut e_rdm = 0.0;
    for p in 0..nsite {
        for q in 0..nsite {
            e_rdm += h1e[[p, q]] * dm1[[p, q]];
            for r in 0..nsite {
                for s in 0..nsite {
                    e_rdm += 0.5 * eri_full[[p, q, r, s]] * dm2[[p, q, r, s]];
                }
            }
        }
    }
    assert_abs_diff_eq!(e_rdm, e0, epsilon = 1e-9);

    // Particle-number traces.
    let n = nsite as f64;
    let dm1_direct = make_rdm1(ci, nsite, nsite).unwrap();
    assert_abs_diff_eq!(dm1_direct.diag().sum(), n, epsilon = 1e-10);
    let mut pair_trace = 0.0;
    for p in 0..nsite {
        for r in 0..nsite {
            pair_trace += dm2[[p, p, r, r]];
        }
    }
    assert_abs_diff_eq!(pair_trace, n * (n - 1.0), epsilon = 1e-9);

    // The half-filled bipartite chain has a singlet ground state.
    let (ss, multip) = spin_square(ci, nsite, nsite).unwrap();
    assert_abs_diff_eq!(ss, 0.0, epsilon = 1e-8);
    assert_abs_diff_eq!(multip, 1.0, epsilon = 1e-8);
}

#[test]
fn test_excited_roots_are_orthonormal_eigenstates() {
    let nsite = 4;
    let (h1e, eri) = hubbard_chain(nsite, 2.0);
    let config = FciConfig::builder().nroots(2).build().unwrap();

    let res = kernel(&h1e, &eri, nsite, nsite, None, &config).unwrap();
    assert!(res.energies[0] < res.energies[1]);
    for (e, ci) in res.energies.iter().zip(&res.civecs) {
        assert_abs_diff_eq!(
            energy(&h1e, &eri, ci, nsite, nsite).unwrap(),
            *e,
            epsilon = 1e-7
        );
        assert_abs_diff_eq!(ci.iter().map(|&c| c * c).sum::<f64>(), 1.0, epsilon = 1e-10);
    }
    let overlap: f64 = res.civecs[0]
        .iter()
        .zip(res.civecs[1].iter())
        .map(|(&a, &b)| a * b)
        .sum();
    assert_abs_diff_eq!(overlap, 0.0, epsilon = 1e-7);
}
