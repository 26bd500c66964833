use approx::assert_abs_diff_eq;
use ndarray::{s, Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};

use crate::davidson::{davidson, make_diag_precond, make_pspace_precond};

/// A dense symmetric test matrix with well-separated low eigenvalues.
fn sample_matrix(dim: usize) -> Array2<f64> {
    Array2::from_shape_fn((dim, dim), |(i, j)| {
        if i == j {
            i as f64
        } else {
            0.01 * ((i * j + i + j) as f64 * 0.37).sin()
        }
    })
}

fn unit_vector(dim: usize, i: usize) -> Array1<f64> {
    let mut x = Array1::zeros(dim);
    x[i] = 1.0;
    x
}

#[test]
fn test_davidson_against_dense_eigensolver() {
    let dim = 40;
    let a = sample_matrix(dim);
    let (w_ref, _) = a.eigh(UPLO::Lower).unwrap();

    let hdiag = a.diag().to_owned();
    let precond = make_diag_precond(hdiag, 1e-3);
    let aop = |x: &Array1<f64>| Ok(a.dot(x));
    let x0 = vec![unit_vector(dim, 0), unit_vector(dim, 1)];

    let res = davidson(aop, x0, precond, 2, 1e-10, 1e-12, 50, 12).unwrap();
    assert!(res.all_converged());
    for k in 0..2 {
        assert_abs_diff_eq!(res.eigenvalues[k], w_ref[k], epsilon = 1e-8);
        // The Ritz vector satisfies the eigenvalue equation.
        let r = a.dot(&res.eigenvectors[k]) - &res.eigenvectors[k] * res.eigenvalues[k];
        assert!(r.dot(&r).sqrt() < 1e-4);
    }
}

#[test]
fn test_davidson_pspace_preconditioner() {
    let dim = 40;
    let np = 5;
    let a = sample_matrix(dim);
    let (w_ref, _) = a.eigh(UPLO::Lower).unwrap();

    // The diagonal is ascending, so the p-space covers the first np rows.
    let addr = (0..np).collect::<Vec<_>>();
    let h0 = a.slice(s![0..np, 0..np]).to_owned();
    let (pw, pv) = h0.eigh(UPLO::Lower).unwrap();
    let precond = make_pspace_precond(a.diag().to_owned(), pw, pv, addr, 1e-3);

    let aop = |x: &Array1<f64>| Ok(a.dot(x));
    let res = davidson(aop, vec![unit_vector(dim, 0)], precond, 1, 1e-10, 1e-12, 50, 12).unwrap();
    assert!(res.all_converged());
    assert_abs_diff_eq!(res.eigenvalues[0], w_ref[0], epsilon = 1e-8);
}

#[test]
fn test_davidson_guess_validation() {
    let dim = 10;
    let a = sample_matrix(dim);
    let aop = |x: &Array1<f64>| Ok(a.dot(x));
    let precond = make_diag_precond(a.diag().to_owned(), 1e-3);

    // More roots than guesses.
    assert!(davidson(aop, vec![unit_vector(dim, 0)], &precond, 2, 1e-10, 1e-12, 50, 12).is_err());
    // A vanishing guess leaves no usable subspace.
    assert!(davidson(aop, vec![Array1::zeros(dim)], &precond, 1, 1e-10, 1e-12, 50, 12).is_err());
}

#[test]
fn test_davidson_reports_nonconvergence() {
    let dim = 40;
    let a = sample_matrix(dim);
    let aop = |x: &Array1<f64>| Ok(a.dot(x));
    let precond = make_diag_precond(a.diag().to_owned(), 1e-3);

    // A single cycle cannot converge from a poor guess; this is reported
    // through the flags, not as an error.
    let res = davidson(aop, vec![unit_vector(dim, dim - 1)], precond, 1, 1e-10, 1e-12, 1, 12)
        .unwrap();
    assert!(!res.all_converged());
}
