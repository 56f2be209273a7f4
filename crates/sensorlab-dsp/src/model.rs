//! Continuous-time channel models and the weighted combined system.
//!
//! Each channel is a closed-form transfer function:
//!
//! - orientation: ωn² / (s² + 2ζωn·s + ωn²)
//! - force, strain: 1 / (τs + 1), τ = the sensor time constant
//! - EMG: ωh·s / ((s + ωl)(s + ωh)), or unity when the band-pass is off
//!
//! [`combine`] stacks the realizations block-diagonally behind a shared input
//! and sums the weighted outputs into one row.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::discretize::{Discretization, discretize};
use crate::error::DspResult;
use crate::matrix::Matrix;
use crate::params::{ChannelId, Clamped, EmgParams, ForceParams, OrientationParams, StrainParams};
use crate::poly;
use crate::snapshot::ParameterSnapshot;
use crate::stability::{Rational, to_transfer_function};
use crate::state_space::StateSpace;

/// Weights and output coefficients at or below this count as zero.
pub const WEIGHT_EPS: f64 = 1e-12;

pub fn orientation_tf(p: &OrientationParams) -> Rational {
    let p = p.clamped();
    let wn = (2.0 * PI * p.natural_freq_hz).max(1e-9);
    let zeta = p.damping_ratio.max(0.0);
    Rational {
        num: vec![wn * wn],
        den: vec![1.0, 2.0 * zeta * wn, wn * wn],
    }
}

fn low_pass(time_constant: f64) -> Rational {
    Rational {
        num: vec![1.0],
        den: vec![time_constant, 1.0],
    }
}

pub fn force_tf(p: &ForceParams) -> Rational {
    low_pass(p.clamped().time_constant_s)
}

pub fn strain_tf(p: &StrainParams) -> Rational {
    low_pass(p.clamped().time_constant_s)
}

/// First-order high-pass at `band_low_hz` cascaded with a first-order
/// low-pass at `band_high_hz`. Unity gain when disabled or the band is empty.
pub fn emg_tf(p: &EmgParams) -> Rational {
    let p = p.clamped();
    if !p.bandpass || p.band_low_hz >= p.band_high_hz {
        return Rational {
            num: vec![1.0],
            den: vec![1.0],
        };
    }
    let wl = 2.0 * PI * p.band_low_hz;
    let wh = 2.0 * PI * p.band_high_hz;
    Rational {
        num: vec![wh, 0.0],
        den: vec![1.0, wl + wh, wl * wh],
    }
}

pub fn channel_tf(channel: ChannelId, snapshot: &ParameterSnapshot) -> Rational {
    match channel {
        ChannelId::Orientation => orientation_tf(&snapshot.orientation),
        ChannelId::Force => force_tf(&snapshot.force),
        ChannelId::Strain => strain_tf(&snapshot.strain),
        ChannelId::Emg => emg_tf(&snapshot.emg),
    }
}

pub fn channel_system(channel: ChannelId, snapshot: &ParameterSnapshot) -> DspResult<StateSpace> {
    let tf = channel_tf(channel, snapshot);
    StateSpace::from_transfer_function(&tf.num, &tf.den)
}

/// A channel's analog transfer function with derived poles and zeros, plus
/// the digital counterpart once [`TransferFunction::populate_digital`] has run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    channel: ChannelId,
    analog: Rational,
    analog_poles: Vec<Complex64>,
    analog_zeros: Vec<Complex64>,
    digital: Rational,
    digital_poles: Vec<Complex64>,
    digital_zeros: Vec<Complex64>,
}

impl TransferFunction {
    pub fn new(channel: ChannelId, analog: Rational) -> Self {
        let analog_poles = poly::find_roots(&analog.den).roots;
        let analog_zeros = poly::find_roots(&analog.num).roots;
        Self {
            channel,
            analog,
            analog_poles,
            analog_zeros,
            digital: Rational::default(),
            digital_poles: Vec::new(),
            digital_zeros: Vec::new(),
        }
    }

    pub fn for_channel(channel: ChannelId, snapshot: &ParameterSnapshot) -> Self {
        Self::new(channel, channel_tf(channel, snapshot))
    }

    /// Discretize and fill every digital field in one step.
    pub fn populate_digital(&mut self, sample_rate: f64, method: Discretization) -> DspResult<()> {
        let ss = StateSpace::from_transfer_function(&self.analog.num, &self.analog.den)?;
        let digital = to_transfer_function(&discretize(&ss, sample_rate, method)?);
        let poles = poly::find_roots(&digital.den).roots;
        let zeros = poly::find_roots(&digital.num).roots;
        self.digital = digital;
        self.digital_poles = poles;
        self.digital_zeros = zeros;
        Ok(())
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn analog(&self) -> &Rational {
        &self.analog
    }

    pub fn analog_poles(&self) -> &[Complex64] {
        &self.analog_poles
    }

    pub fn analog_zeros(&self) -> &[Complex64] {
        &self.analog_zeros
    }

    pub fn digital(&self) -> &Rational {
        &self.digital
    }

    pub fn digital_poles(&self) -> &[Complex64] {
        &self.digital_poles
    }

    pub fn digital_zeros(&self) -> &[Complex64] {
        &self.digital_zeros
    }

    pub fn is_digital_populated(&self) -> bool {
        !self.digital.den.is_empty()
    }
}

/// Weighted block-diagonal combination of SISO systems.
///
/// Every channel contributes its states; a (near-)zero weight only zeroes
/// that channel's block of the output row. Returns `Ok(None)` when every
/// weight is zero or the combined output row and feedthrough vanish.
pub fn combine(channels: &[(StateSpace, f64)]) -> DspResult<Option<StateSpace>> {
    if channels.iter().all(|(_, w)| w.abs() <= WEIGHT_EPS) {
        return Ok(None);
    }

    let mut offsets = Vec::with_capacity(channels.len());
    let mut total = 0;
    for (sys, _) in channels {
        offsets.push(total);
        total += sys.order();
    }

    let mut a = Matrix::zeros(total, total);
    let mut b = Matrix::zeros(total, 1);
    let mut c = Matrix::zeros(1, total);
    let mut d = 0.0;
    for ((sys, w), &off) in channels.iter().zip(&offsets) {
        a.set_block(off, off, sys.a());
        b.set_block(off, 0, sys.b());
        if w.abs() > WEIGHT_EPS {
            c.set_block(0, off, &sys.c().scale(*w));
            d += w * sys.d();
        }
    }

    if c.max_abs() <= WEIGHT_EPS && d.abs() <= WEIGHT_EPS {
        return Ok(None);
    }
    StateSpace::new(a, b, c, Matrix::scalar(d)).map(Some)
}

/// Build every channel model from `snapshot` and combine with `weights`.
pub fn combined_system(
    snapshot: &ParameterSnapshot,
    weights: &[f64],
) -> DspResult<Option<StateSpace>> {
    let mut parts = Vec::with_capacity(ChannelId::ALL.len());
    for channel in ChannelId::ALL {
        let w = weights.get(channel.index()).copied().unwrap_or(0.0);
        parts.push((channel_system(channel, snapshot)?, w));
    }
    combine(&parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stability::response_at;

    fn dc_gain(sys: &StateSpace) -> f64 {
        // −C·A⁻¹·B + D
        if sys.order() == 0 {
            return sys.d();
        }
        let inv = sys.a().inverse().unwrap();
        -sys.c().mul(&inv).mul(sys.b())[(0, 0)] + sys.d()
    }

    #[test]
    fn test_channel_orders() {
        let snap = ParameterSnapshot::default();
        let orders: Vec<usize> = ChannelId::ALL
            .iter()
            .map(|&c| channel_system(c, &snap).unwrap().order())
            .collect();
        assert_eq!(orders, vec![2, 1, 1, 2]);
    }

    #[test]
    fn test_emg_unity_when_disabled() {
        let mut snap = ParameterSnapshot::default();
        snap.emg.bandpass = false;
        let sys = channel_system(ChannelId::Emg, &snap).unwrap();
        assert_eq!(sys, StateSpace::gain(1.0));

        snap.emg.bandpass = true;
        snap.emg.band_low_hz = 40.0;
        snap.emg.band_high_hz = 30.0;
        assert_eq!(channel_system(ChannelId::Emg, &snap).unwrap().order(), 0);
    }

    #[test]
    fn test_unit_dc_gains() {
        let snap = ParameterSnapshot::default();
        for c in [ChannelId::Orientation, ChannelId::Force, ChannelId::Strain] {
            let g = dc_gain(&channel_system(c, &snap).unwrap());
            assert!((g - 1.0).abs() < 1e-12, "{c}: {g}");
        }
    }

    #[test]
    fn test_combine_block_diagonal() {
        let s1 = StateSpace::from_transfer_function(&[2.0], &[1.0, 3.0]).unwrap();
        let s2 = StateSpace::from_transfer_function(&[1.0], &[1.0, 1.0, 4.0]).unwrap();
        let g = StateSpace::gain(5.0);
        let sys = combine(&[(s1.clone(), 0.5), (g, 2.0), (s2.clone(), -1.0)]).unwrap().unwrap();
        assert_eq!(sys.order(), 3);
        assert_eq!(sys.d(), 10.0);
        // No cross-coupling between blocks
        assert_eq!(sys.a()[(0, 1)], 0.0);
        assert_eq!(sys.a()[(1, 0)], 0.0);
        assert_eq!(sys.a().block(1, 1, 2, 2), *s2.a());
        assert_eq!(sys.c()[(0, 0)], 0.5 * s1.c()[(0, 0)]);

        // Response is the weighted sum of the parts
        let s = Complex64::new(0.3, 1.7);
        let want = response_at(&s1, s).unwrap() * 0.5 + 10.0 - response_at(&s2, s).unwrap();
        assert!((response_at(&sys, s).unwrap() - want).norm() < 1e-12);
    }

    #[test]
    fn test_combine_all_zero_weights_is_none() {
        let s1 = StateSpace::from_transfer_function(&[1.0], &[1.0, 1.0]).unwrap();
        assert!(combine(&[(s1.clone(), 0.0), (s1, 1e-15)]).unwrap().is_none());
        assert!(combine(&[]).unwrap().is_none());
    }

    #[test]
    fn test_combine_vanishing_output_is_none() {
        let silent = StateSpace::from_transfer_function(&[0.0], &[1.0, 2.0]).unwrap();
        assert!(combine(&[(silent, 1.0)]).unwrap().is_none());
    }

    #[test]
    fn test_zero_weight_channel_keeps_its_states() {
        let first = StateSpace::from_transfer_function(&[1.0], &[1.0, 2.0]).unwrap();
        let second = StateSpace::from_transfer_function(&[1.0], &[1.0, 0.5, 9.0]).unwrap();
        let sys = combine(&[(first.clone(), 1.0), (second.clone(), 0.0)]).unwrap().unwrap();
        assert_eq!(sys.order(), 3);
        assert_eq!(sys.a().block(1, 1, 2, 2), *second.a());
        assert_eq!(sys.b().block(1, 0, 2, 1), *second.b());
        // Unobservable: the muted block contributes nothing to the output
        assert_eq!(sys.c()[(0, 1)], 0.0);
        assert_eq!(sys.c()[(0, 2)], 0.0);
        assert_eq!(sys.c()[(0, 0)], first.c()[(0, 0)]);

        let s = Complex64::new(0.2, 0.9);
        let want = response_at(&first, s).unwrap();
        assert!((response_at(&sys, s).unwrap() - want).norm() < 1e-12);
    }

    #[test]
    fn test_combined_system_respects_weights() {
        let snap = ParameterSnapshot::default();
        let sys = combined_system(&snap, &[0.0, 1.0, 1.0, 0.0]).unwrap().unwrap();
        // orientation 2 + force 1 + strain 1 + EMG 2, muted channels included
        assert_eq!(sys.order(), 6);
        let c = sys.c();
        assert_eq!((c[(0, 0)], c[(0, 1)]), (0.0, 0.0));
        assert_ne!(c[(0, 2)], 0.0);
        assert_ne!(c[(0, 3)], 0.0);
        assert_eq!((c[(0, 4)], c[(0, 5)]), (0.0, 0.0));
        assert!(combined_system(&snap, &[0.0; 4]).unwrap().is_none());
    }

    #[test]
    fn test_transfer_function_digital_population() {
        let snap = ParameterSnapshot::default();
        let mut tf = TransferFunction::for_channel(ChannelId::Orientation, &snap);
        assert!(!tf.is_digital_populated());
        assert!(tf.digital_poles().is_empty());
        assert_eq!(tf.analog_poles().len(), 2);
        assert!(tf.analog_zeros().is_empty());

        tf.populate_digital(100.0, Discretization::ZeroOrderHold).unwrap();
        assert!(tf.is_digital_populated());
        assert_eq!(tf.digital_poles().len(), 2);
        // ZOH maps s-plane poles to e^(sT)
        for p in tf.analog_poles() {
            let mapped = (*p * 0.01).exp();
            assert!(tf.digital_poles().iter().any(|z| (*z - mapped).norm() < 1e-9));
        }
    }
}
