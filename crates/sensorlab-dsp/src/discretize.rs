//! Continuous → discrete conversion of state-space systems.
//!
//! Zero-order hold reads Ad and Bd off the exponential of the augmented
//! matrix `[[A, B], [0, 0]]·T`. The bilinear transform solves
//! `(I − A·T/2)·Ad = I + A·T/2` and `(I − A·T/2)·Bd = B·T`. C and D pass
//! through unchanged in both cases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DspResult;
use crate::matrix::Matrix;
use crate::state_space::StateSpace;

/// Taylor terms stop once the newest term's ∞-norm drops below this.
pub const EXPM_TOLERANCE: f64 = 1e-12;
pub const EXPM_MAX_TERMS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Discretization {
    #[default]
    #[serde(rename = "zoh")]
    ZeroOrderHold,
    #[serde(rename = "tustin")]
    Tustin,
}

impl fmt::Display for Discretization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discretization::ZeroOrderHold => f.write_str("zoh"),
            Discretization::Tustin => f.write_str("tustin"),
        }
    }
}

impl FromStr for Discretization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zoh" | "zero-order-hold" => Ok(Discretization::ZeroOrderHold),
            "tustin" | "bilinear" => Ok(Discretization::Tustin),
            other => Err(format!("unknown discretization '{other}' (expected zoh or tustin)")),
        }
    }
}

/// Matrix exponential by truncated Taylor series.
///
/// The argument is first scaled by 2^-s so its ∞-norm is at most 0.5, the
/// series is summed, and the result is squared s times.
pub fn expm(m: &Matrix) -> Matrix {
    let n = m.rows();
    let norm = m.inf_norm();
    let squarings = if norm > 0.5 && norm.is_finite() {
        (norm / 0.5).log2().ceil() as i32
    } else {
        0
    };
    let scaled = m.scale(0.5f64.powi(squarings));

    let mut sum = Matrix::identity(n);
    let mut term = Matrix::identity(n);
    for k in 1..=EXPM_MAX_TERMS {
        term = term.mul(&scaled).scale(1.0 / k as f64);
        sum = sum.add(&term);
        if term.inf_norm() < EXPM_TOLERANCE {
            break;
        }
    }

    for _ in 0..squarings {
        sum = sum.mul(&sum);
    }
    sum
}

/// Zero-order-hold discretization with sample period `dt`.
pub fn zero_order_hold(sys: &StateSpace, dt: f64) -> DspResult<StateSpace> {
    let n = sys.order();
    let mut aug = Matrix::zeros(n + 1, n + 1);
    aug.set_block(0, 0, &sys.a().scale(dt));
    aug.set_block(0, n, &sys.b().scale(dt));
    let e = expm(&aug);
    sys.with_dynamics(e.block(0, 0, n, n), e.block(0, n, n, 1))
}

/// Bilinear (Tustin) discretization with sample period `dt`.
pub fn tustin(sys: &StateSpace, dt: f64) -> DspResult<StateSpace> {
    let n = sys.order();
    let half = sys.a().scale(dt / 2.0);
    let inv = Matrix::identity(n).sub(&half).inverse()?;
    let ad = inv.mul(&Matrix::identity(n).add(&half));
    let bd = inv.mul(&sys.b().scale(dt));
    sys.with_dynamics(ad, bd)
}

pub fn discretize(
    sys: &StateSpace,
    sample_rate: f64,
    method: Discretization,
) -> DspResult<StateSpace> {
    let dt = 1.0 / sample_rate;
    match method {
        Discretization::ZeroOrderHold => zero_order_hold(sys, dt),
        Discretization::Tustin => tustin(sys, dt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DspError;
    use approx::assert_relative_eq;

    fn first_order(pole: f64, gain: f64) -> StateSpace {
        // gain·(−pole) / (s − pole): DC gain = gain
        StateSpace::from_transfer_function(&[-gain * pole], &[1.0, -pole]).unwrap()
    }

    fn dc_gain_discrete(sys: &StateSpace) -> f64 {
        // C·(I − Ad)⁻¹·Bd + D
        let n = sys.order();
        let inv = Matrix::identity(n).sub(sys.a()).inverse().unwrap();
        sys.c().mul(&inv).mul(sys.b())[(0, 0)] + sys.d()
    }

    #[test]
    fn test_expm_scalar() {
        for x in [-3.0, -0.1, 0.0, 0.7, 5.0] {
            let e = expm(&Matrix::scalar(x));
            assert_relative_eq!(e[(0, 0)], f64::exp(x), max_relative = 1e-10);
        }
    }

    #[test]
    fn test_expm_rotation() {
        let t = 2.5;
        let m = Matrix::from_rows(&[&[0.0, -t], &[t, 0.0]]).unwrap();
        let e = expm(&m);
        assert_relative_eq!(e[(0, 0)], t.cos(), epsilon = 1e-11);
        assert_relative_eq!(e[(1, 0)], t.sin(), epsilon = 1e-11);
    }

    #[test]
    fn test_expm_large_norm_stays_accurate() {
        let e = expm(&Matrix::scalar(-40.0));
        assert_relative_eq!(e[(0, 0)], f64::exp(-40.0), max_relative = 1e-9);
    }

    #[test]
    fn test_zoh_first_order_exact() {
        let p = -3.0;
        let dt = 0.01;
        let d = zero_order_hold(&first_order(p, 2.0), dt).unwrap();
        assert_relative_eq!(d.a()[(0, 0)], (p * dt).exp(), max_relative = 1e-11);
    }

    #[test]
    fn test_zoh_preserves_dc_gain() {
        for &(p, g) in &[(-1.0, 1.0), (-20.0, 3.0), (-0.2, 0.5)] {
            let d = discretize(&first_order(p, g), 100.0, Discretization::ZeroOrderHold).unwrap();
            let dc = dc_gain_discrete(&d);
            assert!(((dc - g) / g).abs() < 1e-3, "pole {p}: dc {dc}, want {g}");
        }
    }

    #[test]
    fn test_tustin_preserves_dc_gain() {
        let d = discretize(&first_order(-5.0, 4.0), 100.0, Discretization::Tustin).unwrap();
        assert_relative_eq!(dc_gain_discrete(&d), 4.0, max_relative = 1e-9);
        // Pole maps to (1 + pT/2) / (1 − pT/2)
        assert_relative_eq!(d.a()[(0, 0)], (1.0 - 0.025) / (1.0 + 0.025), max_relative = 1e-12);
    }

    #[test]
    fn test_tustin_singular() {
        // Pole at s = 2/T makes I − A·T/2 singular
        let dt = 0.01;
        let sys = first_order(2.0 / dt, 1.0);
        match tustin(&sys, dt) {
            Err(DspError::SingularMatrix { .. }) => {}
            other => panic!("expected singular, got {other:?}"),
        }
    }

    #[test]
    fn test_output_equation_unchanged() {
        let sys = StateSpace::from_transfer_function(&[1.0, 2.0], &[1.0, 3.0, 2.0]).unwrap();
        for method in [Discretization::ZeroOrderHold, Discretization::Tustin] {
            let d = discretize(&sys, 50.0, method).unwrap();
            assert_eq!(d.c(), sys.c());
            assert_eq!(d.d(), sys.d());
        }
    }

    #[test]
    fn test_gain_only_system() {
        let d = discretize(&StateSpace::gain(2.0), 100.0, Discretization::ZeroOrderHold).unwrap();
        assert_eq!(d.order(), 0);
        assert_eq!(d.d(), 2.0);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("ZOH".parse::<Discretization>().unwrap(), Discretization::ZeroOrderHold);
        assert_eq!("bilinear".parse::<Discretization>().unwrap(), Discretization::Tustin);
        assert!("euler".parse::<Discretization>().is_err());
        assert_eq!(Discretization::Tustin.to_string(), "tustin");
    }
}
