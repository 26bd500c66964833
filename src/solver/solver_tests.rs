use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2, Array4};
use ndarray_linalg::assert::close_l2;

use crate::hamiltonian::{make_hdiag, Eri};
use crate::solver::{energy, kernel, FciConfig, FciError};

/// Two-site Hubbard model with hopping `-1` and on-site repulsion `u`. The
/// lowest even-spin eigenvalue is `(u - sqrt(u^2 + 16)) / 2`.
fn hubbard_dimer(u: f64) -> (Array2<f64>, Eri) {
    let mut h1e = Array2::<f64>::zeros((2, 2));
    h1e[[0, 1]] = -1.0;
    h1e[[1, 0]] = -1.0;
    let mut eri = Array4::<f64>::zeros((2, 2, 2, 2));
    eri[[0, 0, 0, 0]] = u;
    eri[[1, 1, 1, 1]] = u;
    (h1e, Eri::Full(eri))
}

fn sample_h1e(norb: usize) -> Array2<f64> {
    Array2::from_shape_fn((norb, norb), |(p, q)| {
        ((p + q) as f64 * 0.21).cos() - if p == q { 1.0 } else { 0.0 }
    })
}

fn sample_eri(norb: usize) -> Array4<f64> {
    let npair = norb * (norb + 1) / 2;
    Array4::from_shape_fn((norb, norb, norb, norb), |(p, q, r, s)| {
        let pq = p.max(q) * (p.max(q) + 1) / 2 + p.min(q);
        let rs = r.max(s) * (r.max(s) + 1) / 2 + r.min(s);
        let (hi, lo) = if pq >= rs { (pq, rs) } else { (rs, pq) };
        0.1 * ((hi * npair + lo) as f64 * 0.53).sin()
    })
}

#[test]
fn test_solver_exact_path_hubbard_dimer() {
    let u = 4.0;
    let (h1e, eri) = hubbard_dimer(u);
    let config = FciConfig::default();

    let res = kernel(&h1e, &eri, 2, 2, None, &config).unwrap();
    assert!(res.all_converged());
    let e_ref = 0.5 * (u - (u * u + 16.0).sqrt());
    assert_abs_diff_eq!(res.energies[0], e_ref, epsilon = 1e-12);

    let (e0, civec) = res.ground().unwrap();
    assert_abs_diff_eq!(e0, e_ref, epsilon = 1e-12);
    // The coefficient matrix is normalised and symmetric under the
    // string-transpose pairing.
    assert_abs_diff_eq!(civec.iter().map(|&c| c * c).sum::<f64>(), 1.0, epsilon = 1e-12);
    close_l2(&civec.t().to_owned(), civec, 1e-12);

    assert_abs_diff_eq!(
        energy(&h1e, &eri, civec, 2, 2).unwrap(),
        e_ref,
        epsilon = 1e-12
    );
}

#[test]
fn test_solver_energy_bare_expectation() {
    // The expectation value is taken over the coefficients as given: scaling
    // the CI matrix by a factor scales the energy by its square.
    let u = 4.0;
    let (h1e, eri) = hubbard_dimer(u);
    let res = kernel(&h1e, &eri, 2, 2, None, &FciConfig::default()).unwrap();
    let (e0, civec) = res.ground().unwrap();

    let scaled = civec * 2.0;
    assert_abs_diff_eq!(
        energy(&h1e, &eri, &scaled, 2, 2).unwrap(),
        4.0 * e0,
        epsilon = 1e-11
    );
    assert_abs_diff_eq!(
        energy(&h1e, &eri, &Array2::zeros((2, 2)), 2, 2).unwrap(),
        0.0,
        epsilon = 1e-14
    );
}

#[test]
fn test_solver_iterative_path_matches_exact() {
    let u = 4.0;
    let (h1e, _) = hubbard_dimer(u);
    // Eight-fold packed storage of the on-site repulsion: the composite
    // pair indices of (00|00) and (11|11) are 0 and 5.
    let mut eri_packed = Array1::<f64>::zeros(6);
    eri_packed[0] = u;
    eri_packed[5] = u;
    let eri = Eri::EightFold(eri_packed);

    let config = FciConfig::builder()
        .davidson_only(true)
        .build()
        .unwrap();
    let res = kernel(&h1e, &eri, 2, 2, None, &config).unwrap();
    let e_ref = 0.5 * (u - (u * u + 16.0).sqrt());
    assert_abs_diff_eq!(res.energies[0], e_ref, epsilon = 1e-8);

    let (_, civec) = res.ground().unwrap();
    assert_abs_diff_eq!(
        energy(&h1e, &eri, civec, 2, 2).unwrap(),
        e_ref,
        epsilon = 1e-8
    );
}

#[test]
fn test_solver_truncated_pspace() {
    let norb = 4;
    let nelec = 4;
    let h1e = sample_h1e(norb);
    let eri = Eri::Full(sample_eri(norb));

    let exact = kernel(&h1e, &eri, norb, nelec, None, &FciConfig::default()).unwrap();

    let config = FciConfig::builder()
        .pspace_size(8)
        .davidson_only(true)
        .build()
        .unwrap();
    let iterative = kernel(&h1e, &eri, norb, nelec, None, &config).unwrap();
    assert!(iterative.all_converged());
    assert_abs_diff_eq!(iterative.energies[0], exact.energies[0], epsilon = 1e-7);
    assert_abs_diff_eq!(
        iterative.civecs[0].dot(&exact.civecs[0].t()).diag().sum().abs(),
        1.0,
        epsilon = 1e-5
    );
}

#[test]
fn test_solver_multiple_roots() {
    // In the two-site Hubbard spectrum the first excited state is the
    // antisymmetric one at zero energy; the requested roots therefore come
    // out of the iterative fallback restricted to the symmetric sector.
    let u = 4.0;
    let (h1e, eri) = hubbard_dimer(u);
    let config = FciConfig::builder().nroots(3).build().unwrap();

    let res = kernel(&h1e, &eri, 2, 2, None, &config).unwrap();
    assert_eq!(res.energies.len(), 3);
    let s = (u * u + 16.0).sqrt();
    assert_abs_diff_eq!(res.energies[0], 0.5 * (u - s), epsilon = 1e-8);
    assert_abs_diff_eq!(res.energies[1], u, epsilon = 1e-8);
    assert_abs_diff_eq!(res.energies[2], 0.5 * (u + s), epsilon = 1e-8);
    for civec in &res.civecs {
        close_l2(&civec.t().to_owned(), civec, 1e-6);
    }
}

#[test]
fn test_solver_initial_guess_handling() {
    let u = 4.0;
    let (h1e, eri) = hubbard_dimer(u);
    let config = FciConfig::default();
    let e_ref = 0.5 * (u - (u * u + 16.0).sqrt());

    // A skewed but symmetrisable guess still converges to the ground state.
    let mut guess = Array2::<f64>::zeros((2, 2));
    guess[[0, 1]] = 1.0;
    guess[[0, 0]] = 0.3;
    let res = kernel(&h1e, &eri, 2, 2, Some(vec![guess]), &config).unwrap();
    assert_abs_diff_eq!(res.energies[0], e_ref, epsilon = 1e-8);

    // A guess of the wrong shape is rejected.
    let bad_shape = Array2::<f64>::zeros((3, 3));
    assert!(matches!(
        kernel(&h1e, &eri, 2, 2, Some(vec![bad_shape]), &config),
        Err(FciError::Dimension(_))
    ));

    // An antisymmetric guess has no weight in the even-spin sector.
    let mut antisym = Array2::<f64>::zeros((2, 2));
    antisym[[0, 1]] = 1.0;
    antisym[[1, 0]] = -1.0;
    assert!(matches!(
        kernel(&h1e, &eri, 2, 2, Some(vec![antisym]), &config),
        Err(FciError::Dimension(_))
    ));
}

#[test]
fn test_solver_config_validation() {
    let config = FciConfig::default();
    assert_abs_diff_eq!(config.conv_tol, 1e-8);
    assert_eq!(config.max_cycle, 50);
    assert_eq!(config.pspace_size, 400);
    assert_eq!(config.nroots, 1);
    assert!(!config.davidson_only);

    assert!(FciConfig::builder().nroots(0).build().is_err());
    assert!(FciConfig::builder().max_space(1).build().is_err());
    assert!(FciConfig::builder().conv_tol(-1e-8).build().is_err());
}

#[test]
fn test_solver_degenerate_input_errors() {
    let (h1e, eri) = hubbard_dimer(4.0);

    // Unequal spin populations cannot be handled by the paired-string
    // driver.
    assert!(matches!(
        kernel(&h1e, &eri, 2, (2, 1), None, &FciConfig::default()),
        Err(FciError::ElectronCount(_))
    ));

    // More roots than determinants.
    let config = FciConfig::builder().nroots(5).build().unwrap();
    assert!(matches!(
        kernel(&h1e, &eri, 2, 2, None, &config),
        Err(FciError::EigenSolver(_))
    ));
}

#[test]
fn test_solver_single_determinant_space() {
    // Two orbitals holding four electrons leave a single determinant.
    let norb = 2;
    let h1e = sample_h1e(norb);
    let eri = Eri::Full(sample_eri(norb));

    let res = kernel(&h1e, &eri, norb, 4, None, &FciConfig::default()).unwrap();
    assert!(res.all_converged());
    assert_eq!(res.civecs[0].dim(), (1, 1));
    let hdiag = make_hdiag(&h1e, &eri, norb, 4).unwrap();
    assert_abs_diff_eq!(res.energies[0], hdiag[0], epsilon = 1e-12);
}
