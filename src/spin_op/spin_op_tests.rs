use approx::assert_abs_diff_eq;
use ndarray::Array2;

use crate::solver::FciError;
use crate::spin_op::{local_spin, make_rdm2_abba, make_rdm2_baab, spin_square, spin_square_mo};

#[test]
fn test_spin_op_high_spin_determinant() {
    // Three alpha and one beta electron in four orbitals, with the beta
    // electron paired: a pure triplet with m_s = 1.
    let mut ci = Array2::<f64>::zeros((4, 4));
    ci[[0, 0]] = 1.0;
    let (ss, multip) = spin_square(&ci, 4, (3, 1)).unwrap();
    assert_abs_diff_eq!(ss, 2.0, epsilon = 1e-10);
    assert_abs_diff_eq!(multip, 3.0, epsilon = 1e-10);
}

#[test]
fn test_spin_op_open_shell_combinations() {
    let inv_sqrt2 = std::f64::consts::FRAC_1_SQRT_2;

    // A single open-shell determinant is an equal mixture of singlet and
    // triplet.
    let mut ci = Array2::<f64>::zeros((2, 2));
    ci[[0, 1]] = 1.0;
    let (ss, _) = spin_square(&ci, 2, (1, 1)).unwrap();
    assert_abs_diff_eq!(ss, 1.0, epsilon = 1e-10);

    // The antisymmetric combination is the m_s = 0 triplet.
    let mut ci = Array2::<f64>::zeros((2, 2));
    ci[[0, 1]] = inv_sqrt2;
    ci[[1, 0]] = -inv_sqrt2;
    let (ss, multip) = spin_square(&ci, 2, (1, 1)).unwrap();
    assert_abs_diff_eq!(ss, 2.0, epsilon = 1e-10);
    assert_abs_diff_eq!(multip, 3.0, epsilon = 1e-10);

    // The symmetric combination is the open-shell singlet.
    let mut ci = Array2::<f64>::zeros((2, 2));
    ci[[0, 1]] = inv_sqrt2;
    ci[[1, 0]] = inv_sqrt2;
    let (ss, multip) = spin_square(&ci, 2, (1, 1)).unwrap();
    assert_abs_diff_eq!(ss, 0.0, epsilon = 1e-10);
    assert_abs_diff_eq!(multip, 1.0, epsilon = 1e-10);
}

#[test]
fn test_spin_op_correlated_singlet() {
    // Closed-form singlet ground state of the half-filled Hubbard dimer.
    let u: f64 = 4.0;
    let e0 = (u - (u * u + 16.0).sqrt()) / 2.0;
    let y = (u - e0) / 2.0;
    let norm = (2.0 + 2.0 * y * y).sqrt();
    let (x, y) = (1.0 / norm, y / norm);
    let ci = ndarray::array![[x, y], [y, x]];

    let (ss, multip) = spin_square(&ci, 2, 2).unwrap();
    assert_abs_diff_eq!(ss, 0.0, epsilon = 1e-10);
    assert_abs_diff_eq!(multip, 1.0, epsilon = 1e-10);
}

#[test]
fn test_spin_op_local_spin() {
    // Two unpaired electrons on separate orbitals: each site carries a
    // spin-half, s(s+1) = 3/4, while the total state mixes S = 0 and 1.
    let mut ci = Array2::<f64>::zeros((2, 2));
    ci[[0, 1]] = 1.0;
    let (ss, _) = local_spin(&ci, 2, (1, 1), &[0]).unwrap();
    assert_abs_diff_eq!(ss, 0.75, epsilon = 1e-10);
    let (ss, _) = local_spin(&ci, 2, (1, 1), &[1]).unwrap();
    assert_abs_diff_eq!(ss, 0.75, epsilon = 1e-10);

    // The empty list selects all orbitals.
    let (ss_all, _) = local_spin(&ci, 2, (1, 1), &[]).unwrap();
    let (ss_ref, _) = spin_square(&ci, 2, (1, 1)).unwrap();
    assert_abs_diff_eq!(ss_all, ss_ref, epsilon = 1e-12);

    assert!(local_spin(&ci, 2, (1, 1), &[5]).is_err());
}

#[test]
fn test_spin_op_cross_spin_matrices() {
    // For a paired determinant both reordered cross-spin matrices vanish
    // entry by entry.
    let mut ci = Array2::<f64>::zeros((2, 2));
    ci[[0, 0]] = 1.0;
    let baab = make_rdm2_baab(&ci, 2, 2).unwrap();
    let abba = make_rdm2_abba(&ci, 2, 2).unwrap();
    for v in baab.iter().chain(abba.iter()) {
        assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
    }

    // With no beta electrons the S+S- intermediates are empty.
    let mut ci = Array2::<f64>::zeros((2, 1));
    ci[[0, 0]] = 1.0;
    let baab = make_rdm2_baab(&ci, 2, (1, 0)).unwrap();
    for v in baab.iter() {
        assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_spin_op_spin_square_mo_projection() {
    let mut ci = Array2::<f64>::zeros((4, 4));
    ci[[0, 0]] = 1.0;
    let (ss_ref, multip_ref) = spin_square(&ci, 4, (3, 1)).unwrap();

    // Loewdin orbitals of an overlapping basis: with C = S^(-1/2) the
    // projected blocks are identities and the total spin is unchanged.
    let mut ovlp = Array2::<f64>::eye(4);
    ovlp[[0, 1]] = 0.5;
    ovlp[[1, 0]] = 0.5;
    let a = 1.0 / 1.5f64.sqrt();
    let b = 1.0 / 0.5f64.sqrt();
    let mut mo = Array2::<f64>::eye(4);
    mo[[0, 0]] = 0.5 * (a + b);
    mo[[1, 1]] = 0.5 * (a + b);
    mo[[0, 1]] = 0.5 * (a - b);
    mo[[1, 0]] = 0.5 * (a - b);

    let (ss, multip) = spin_square_mo(&ci, 4, (3, 1), &mo, &mo, &ovlp).unwrap();
    assert_abs_diff_eq!(ss, ss_ref, epsilon = 1e-10);
    assert_abs_diff_eq!(multip, multip_ref, epsilon = 1e-10);

    let wide = Array2::<f64>::zeros((4, 3));
    assert!(matches!(
        spin_square_mo(&ci, 4, (3, 1), &wide, &mo, &ovlp),
        Err(FciError::Dimension(_))
    ));
}
