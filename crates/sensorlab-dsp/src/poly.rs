//! Polynomials, characteristic polynomials and root finding.
//!
//! Coefficients are stored highest degree first throughout.

use num_complex::Complex64;

use crate::matrix::Matrix;

/// Durand-Kerner iteration cap.
pub const MAX_ROOT_ITERATIONS: usize = 100;
/// Per-root correction below which a root counts as settled (relative to max(1, |z|)).
pub const ROOT_TOLERANCE: f64 = 1e-12;
/// Leading coefficients smaller than this fraction of the largest are dropped.
const TRIM_EPS: f64 = 1e-12;

/// Roots plus how the iteration went.
#[derive(Debug, Clone, PartialEq)]
pub struct RootSolution {
    pub roots: Vec<Complex64>,
    pub iterations: usize,
    pub converged: bool,
}

impl RootSolution {
    fn exact(roots: Vec<Complex64>) -> Self {
        Self {
            roots,
            iterations: 0,
            converged: true,
        }
    }
}

/// Drop leading near-zero coefficients. An all-zero input gives an empty vec.
pub fn trim_leading(coeffs: &[f64]) -> Vec<f64> {
    let scale = coeffs.iter().fold(0.0f64, |m, c| m.max(c.abs()));
    if !(scale > 0.0) {
        return Vec::new();
    }
    let first = coeffs.iter().position(|c| c.abs() > TRIM_EPS * scale).unwrap_or(coeffs.len());
    coeffs[first..].to_vec()
}

/// Horner evaluation at a complex point.
pub fn eval_complex(coeffs: &[f64], z: Complex64) -> Complex64 {
    coeffs.iter().fold(Complex64::new(0.0, 0.0), |acc, &c| acc * z + c)
}

fn eval_monic(monic: &[Complex64], z: Complex64) -> Complex64 {
    monic.iter().fold(Complex64::new(0.0, 0.0), |acc, &c| acc * z + c)
}

/// Polynomial product.
pub fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Characteristic polynomial det(sI − A) by the Faddeev-LeVerrier recursion.
///
/// Returns `[1, c1, .., cn]`. Each round forms `A·M`, reads `c_k = −tr(A·M)/k`
/// and deflates `M = A·M + c_k·I` for the next round.
pub fn characteristic_polynomial(a: &Matrix) -> Vec<f64> {
    let n = a.rows();
    let mut coeffs = Vec::with_capacity(n + 1);
    coeffs.push(1.0);
    let mut m = Matrix::identity(n);
    for k in 1..=n {
        let mut am = a.mul(&m);
        let ck = -am.trace() / k as f64;
        coeffs.push(ck);
        am.add_diagonal(ck);
        m = am;
    }
    coeffs
}

/// All complex roots of `coeffs`.
///
/// Degree 0 and 1 are closed form. Higher degrees run simultaneous
/// Durand-Kerner updates from seeds spread evenly on a circle sized to the
/// coefficient bound. Hitting the iteration cap is not an error: the best
/// estimate is returned with `converged = false`.
pub fn find_roots(coeffs: &[f64]) -> RootSolution {
    let trimmed = trim_leading(coeffs);
    if trimmed.len() <= 1 {
        return RootSolution::exact(Vec::new());
    }
    let lead = trimmed[0];
    let monic: Vec<Complex64> = trimmed.iter().map(|&c| Complex64::new(c / lead, 0.0)).collect();
    let n = monic.len() - 1;
    if n == 1 {
        return RootSolution::exact(vec![-monic[1]]);
    }

    // max |a_i|^(1/i) is within a factor of two of the largest root modulus
    let radius = monic
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| c.norm().powf(1.0 / i as f64))
        .fold(1.0f64, f64::max);
    let mut z: Vec<Complex64> = (0..n)
        .map(|k| Complex64::from_polar(radius, std::f64::consts::TAU * k as f64 / n as f64 + 0.4))
        .collect();

    let mut iterations = 0;
    let mut converged = false;
    while iterations < MAX_ROOT_ITERATIONS {
        iterations += 1;
        let mut settled = true;
        for i in 0..n {
            let zi = z[i];
            let mut denom = Complex64::new(1.0, 0.0);
            for (j, &zj) in z.iter().enumerate() {
                if j != i {
                    denom *= zi - zj;
                }
            }
            if denom.norm() < 1e-300 {
                // Coincident estimates: nudge this one off-axis and go again
                z[i] = zi + Complex64::from_polar(1e-6 * radius, 0.7 + i as f64);
                settled = false;
                continue;
            }
            let delta = eval_monic(&monic, zi) / denom;
            if !delta.is_finite() {
                z[i] = zi * Complex64::from_polar(1.0, 1e-3);
                settled = false;
                continue;
            }
            z[i] = zi - delta;
            if delta.norm() > ROOT_TOLERANCE * zi.norm().max(1.0) {
                settled = false;
            }
        }
        if settled {
            converged = true;
            break;
        }
    }

    if !converged {
        tracing::warn!(
            degree = n,
            iterations,
            "root finding hit the iteration cap; using best estimate"
        );
    }
    RootSolution {
        roots: z,
        iterations,
        converged,
    }
}

/// Eigenvalues of a square matrix as roots of its characteristic polynomial.
pub fn eigenvalues(a: &Matrix) -> RootSolution {
    find_roots(&characteristic_polynomial(a))
}

/// Order roots by real part then imaginary part, and snap imaginary parts
/// below `1e-9·max(1, |z|)` to zero. For display and comparison only.
pub fn tidy_roots(roots: &[Complex64]) -> Vec<Complex64> {
    let mut out: Vec<Complex64> = roots
        .iter()
        .map(|r| {
            if r.im.abs() < 1e-9 * r.norm().max(1.0) {
                Complex64::new(r.re, 0.0)
            } else {
                *r
            }
        })
        .collect();
    out.sort_by(|a, b| a.re.total_cmp(&b.re).then(a.im.total_cmp(&b.im)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn contains_root(roots: &[Complex64], target: Complex64, tol: f64) -> bool {
        roots.iter().any(|r| (*r - target).norm() < tol)
    }

    #[test]
    fn test_characteristic_polynomial_diagonal() {
        let a = Matrix::from_rows(&[&[2.0, 0.0], &[0.0, 3.0]]).unwrap();
        assert_eq!(characteristic_polynomial(&a), vec![1.0, -5.0, 6.0]);
    }

    #[test]
    fn test_characteristic_polynomial_companion() {
        // Companion of s³ + 2s² − s + 7
        let a = Matrix::from_rows(&[&[-2.0, 1.0, -7.0], &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]])
            .unwrap();
        let p = characteristic_polynomial(&a);
        for (got, want) in p.iter().zip([1.0, 2.0, -1.0, 7.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_empty_matrix_polynomial() {
        assert_eq!(characteristic_polynomial(&Matrix::zeros(0, 0)), vec![1.0]);
    }

    #[test]
    fn test_closed_form_low_degree() {
        assert!(find_roots(&[5.0]).roots.is_empty());
        assert!(find_roots(&[]).roots.is_empty());
        let r = find_roots(&[2.0, -3.0]);
        assert_eq!(r.roots, vec![Complex64::new(1.5, 0.0)]);
        assert!(r.converged);
        // Leading zeros make this degree 1
        assert_eq!(find_roots(&[0.0, 0.0, 1.0, 4.0]).roots.len(), 1);
    }

    #[test]
    fn test_complex_pair() {
        // s² + 2s + 5 -> −1 ± 2j
        let r = find_roots(&[1.0, 2.0, 5.0]);
        assert!(r.converged);
        assert!(contains_root(&r.roots, Complex64::new(-1.0, 2.0), 1e-10));
        assert!(contains_root(&r.roots, Complex64::new(-1.0, -2.0), 1e-10));
    }

    #[test]
    fn test_quartic_real_roots() {
        // (s−1)(s+2)(s−3)(s+4)
        let p = convolve(
            &convolve(&[1.0, -1.0], &[1.0, 2.0]),
            &convolve(&[1.0, -3.0], &[1.0, 4.0]),
        );
        let r = find_roots(&p);
        assert!(r.converged, "iterations {}", r.iterations);
        let tidy = tidy_roots(&r.roots);
        for (got, want) in tidy.iter().zip([-4.0, -2.0, 1.0, 3.0]) {
            assert_abs_diff_eq!(got.re, want, epsilon = 1e-9);
            assert_eq!(got.im, 0.0);
        }
    }

    #[test]
    fn test_large_roots_converge() {
        // Poles of a 10 Hz second-order section, ζ = 0.3
        let wn = 2.0 * std::f64::consts::PI * 10.0;
        let r = find_roots(&[1.0, 2.0 * 0.3 * wn, wn * wn]);
        assert!(r.converged);
        for root in &r.roots {
            assert_abs_diff_eq!(root.norm(), wn, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_repeated_root_best_effort() {
        // (s + 1)³ converges slowly; the estimate must still be close
        let r = find_roots(&[1.0, 3.0, 3.0, 1.0]);
        assert_eq!(r.roots.len(), 3);
        for root in &r.roots {
            assert!((*root + 1.0).norm() < 1e-4, "{root}");
        }
    }

    #[test]
    fn test_zero_roots() {
        // s²(s − 2)
        let r = find_roots(&[1.0, -2.0, 0.0, 0.0]);
        assert!(contains_root(&r.roots, Complex64::new(2.0, 0.0), 1e-9));
        assert_eq!(r.roots.iter().filter(|z| z.norm() < 1e-5).count(), 2);
    }

    #[test]
    fn test_eigenvalues_rotation() {
        // Rotation by 90° scaled by 0.5 -> ±0.5j
        let a = Matrix::from_rows(&[&[0.0, -0.5], &[0.5, 0.0]]).unwrap();
        let r = eigenvalues(&a);
        assert!(contains_root(&r.roots, Complex64::new(0.0, 0.5), 1e-10));
        assert!(contains_root(&r.roots, Complex64::new(0.0, -0.5), 1e-10));
    }

    #[test]
    fn test_trim_and_convolve() {
        assert_eq!(trim_leading(&[0.0, 1e-20, 3.0, 0.0]), vec![3.0, 0.0]);
        assert!(trim_leading(&[0.0, 0.0]).is_empty());
        assert_eq!(convolve(&[1.0, 1.0], &[1.0, -1.0]), vec![1.0, 0.0, -1.0]);
    }
}
