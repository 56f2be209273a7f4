//! Stability classification, frequency response and state-space → transfer
//! function conversion for discrete systems.

use std::f64::consts::PI;

use num_complex::Complex64;
use serde::Serialize;

use crate::error::DspResult;
use crate::matrix::solve_complex;
use crate::poly::{self, RootSolution};
use crate::state_space::StateSpace;

/// Poles must sit strictly inside this radius.
pub const STABILITY_MARGIN: f64 = 1e-6;
/// Magnitudes below this are reported at the dB floor.
pub const MAG_FLOOR: f64 = 1e-12;

/// Outcome of one stability check. Built fresh each time.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedStability {
    pub stable: bool,
    pub max_magnitude: f64,
    pub poles: Vec<Complex64>,
    pub reason: String,
}

/// Classify a set of discrete poles.
pub fn check_stability(poles: &[Complex64]) -> CombinedStability {
    let limit = 1.0 - STABILITY_MARGIN;
    let mut max_magnitude = 0.0f64;
    let mut invalid = 0usize;
    for p in poles {
        let m = p.norm();
        if m.is_finite() {
            max_magnitude = max_magnitude.max(m);
        } else {
            invalid += 1;
            max_magnitude = f64::INFINITY;
        }
    }

    let (stable, reason) = if invalid > 0 {
        (false, format!("{invalid} pole(s) with non-finite magnitude"))
    } else if poles.is_empty() {
        (true, "no dynamic states".to_string())
    } else if max_magnitude < limit {
        (true, format!("all {} poles inside |z| < {limit}", poles.len()))
    } else {
        (false, format!("max pole magnitude {max_magnitude:.9} >= {limit}"))
    };

    CombinedStability {
        stable,
        max_magnitude,
        poles: poles.to_vec(),
        reason,
    }
}

/// One point of a frequency sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrequencyPoint {
    pub freq_hz: f64,
    pub re: f64,
    pub im: f64,
    pub magnitude_db: f64,
    pub phase_deg: f64,
}

impl FrequencyPoint {
    fn new(freq_hz: f64, y: Complex64) -> Self {
        Self {
            freq_hz,
            re: y.re,
            im: y.im,
            magnitude_db: magnitude_db(y),
            phase_deg: y.arg().to_degrees(),
        }
    }

    pub fn response(&self) -> Complex64 {
        Complex64::new(self.re, self.im)
    }
}

/// 20·log10(max(|y|, 1e-12)).
pub fn magnitude_db(y: Complex64) -> f64 {
    20.0 * y.norm().max(MAG_FLOOR).log10()
}

/// H(z) at one point: Cd·(zI − Ad)⁻¹·Bd + Dd.
pub fn response_at(sys: &StateSpace, z: Complex64) -> DspResult<Complex64> {
    let n = sys.order();
    if n == 0 {
        return Ok(Complex64::new(sys.d(), 0.0));
    }
    let mut m = vec![Complex64::new(0.0, 0.0); n * n];
    for i in 0..n {
        for j in 0..n {
            m[i * n + j] = Complex64::new(-sys.a()[(i, j)], 0.0);
        }
        m[i * n + i] += z;
    }
    let rhs: Vec<Complex64> = (0..n).map(|i| Complex64::new(sys.b()[(i, 0)], 0.0)).collect();
    let x = solve_complex(&m, &rhs)?;
    let y = x
        .iter()
        .enumerate()
        .fold(Complex64::new(sys.d(), 0.0), |acc, (i, xi)| acc + *xi * sys.c()[(0, i)]);
    Ok(y)
}

/// Discrete frequency response at `freqs_hz` for a system sampled at `sample_rate`.
pub fn frequency_response(
    sys: &StateSpace,
    freqs_hz: &[f64],
    sample_rate: f64,
) -> DspResult<Vec<FrequencyPoint>> {
    freqs_hz
        .iter()
        .map(|&f| {
            let w = 2.0 * PI * f / sample_rate;
            response_at(sys, Complex64::from_polar(1.0, w)).map(|y| FrequencyPoint::new(f, y))
        })
        .collect()
}

/// Numerator and denominator (highest power first, monic denominator).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rational {
    pub num: Vec<f64>,
    pub den: Vec<f64>,
}

impl Rational {
    pub fn eval(&self, z: Complex64) -> Complex64 {
        poly::eval_complex(&self.num, z) / poly::eval_complex(&self.den, z)
    }
}

/// State space → transfer function via Markov parameters.
///
/// den = det(zI − A) = [1, a1, .., an]; with h[0] = D and h[k] = C·A^(k-1)·B,
/// the numerator is the first n+1 terms of den ∗ h.
pub fn to_transfer_function(sys: &StateSpace) -> Rational {
    let den = poly::characteristic_polynomial(sys.a());
    let n = den.len() - 1;
    let h = sys.markov_parameters(n + 1);
    let num = (0..=n)
        .map(|i| (0..=i).map(|j| den[j] * h[i - j]).sum::<f64>())
        .collect();
    Rational { num, den }
}

/// Zeros of the system: roots of its trimmed numerator.
pub fn zeros(sys: &StateSpace) -> RootSolution {
    poly::find_roots(&to_transfer_function(sys).num)
}
