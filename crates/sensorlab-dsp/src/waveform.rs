/// Waveform generators: one pure function per channel kind.
///
/// Every generator maps `(time axis, parameters) -> samples` with no shared
/// state and no randomness, so identical inputs give bit-identical output.
/// Parameters are clamped again here even though `ParamCell` clamps on write:
/// a record built by hand never reaches the math out of range.
///
/// Non-finite results are replaced with 0.

use std::f64::consts::PI;

use crate::params::{Clamped, EmgParams, ForceMode, ForceParams, OrientationParams, StrainParams};

/// Damping ratios within this distance of 1 use the critically damped form.
const CRITICAL_BAND: f64 = 1e-6;
/// Force floor (N) so that F^b never reaches zero in the FSR law.
const FORCE_FLOOR: f64 = 1e-6;

/// Uniform time axis: `len` samples at `sample_rate` Hz starting at t = 0.
pub fn time_axis(len: usize, sample_rate: f64) -> Vec<f64> {
    let dt = 1.0 / sample_rate;
    (0..len).map(|i| i as f64 * dt).collect()
}

#[inline]
fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

// ── Orientation ─────────────────────────────────────────────────────────────

/// Unit step response of ωn² / (s² + 2ζωn·s + ωn²) at `tau` seconds after the step.
pub fn second_order_step(zeta: f64, wn: f64, tau: f64) -> f64 {
    if !(tau > 0.0) {
        return 0.0;
    }
    let zeta = zeta.max(0.0);
    let wn = wn.max(1e-9);

    if (zeta - 1.0).abs() < CRITICAL_BAND {
        // Critically damped
        let x = wn * tau;
        1.0 - (-x).exp() * (1.0 + x)
    } else if zeta < 1.0 {
        // Underdamped: oscillatory decay at ωd
        let root = (1.0 - zeta * zeta).sqrt();
        let wd = wn * root;
        let env = (-zeta * wn * tau).exp();
        1.0 - env * ((wd * tau).cos() + zeta / root * (wd * tau).sin())
    } else {
        // Overdamped. The cosh/sinh solution is evaluated as two decaying
        // exponentials so large ωn·τ cannot overflow.
        let root = (zeta * zeta - 1.0).sqrt();
        let r1 = -wn * (zeta - root);
        let r2 = -wn * (zeta + root);
        1.0 - (r2 * (r1 * tau).exp() - r1 * (r2 * tau).exp()) / (r2 - r1)
    }
}

/// Tilt angle (degrees).
///
/// The target alternates between `offset + amplitude` and `offset - amplitude`
/// every `switch_interval_s`, starting at `step_time_s`. Before the first step
/// the output holds the initial value (`offset`). The response is the exact
/// superposition of one second-order step response per target change.
pub fn orientation(time: &[f64], params: &OrientationParams) -> Vec<f64> {
    let p = params.clamped();
    let zeta = p.damping_ratio.max(0.0);
    let wn = (2.0 * PI * p.natural_freq_hz).max(1e-9);
    let initial = p.offset_deg;
    let interval = p.switch_interval_s;
    let target = |k: u64| {
        if k % 2 == 0 {
            p.offset_deg + p.amplitude_deg
        } else {
            p.offset_deg - p.amplitude_deg
        }
    };

    time.iter()
        .map(|&t| {
            if !(t >= p.step_time_s) {
                return initial;
            }
            let elapsed = t - p.step_time_s;
            let last_step = (elapsed / interval).floor() as u64;
            let mut y = initial;
            let mut prev = initial;
            for k in 0..=last_step {
                let next = target(k);
                let tau = elapsed - k as f64 * interval;
                y += (next - prev) * second_order_step(zeta, wn, tau);
                prev = next;
            }
            finite_or_zero(y)
        })
        .collect()
}

// ── Force ───────────────────────────────────────────────────────────────────

/// FSR resistance (Ω) at `force` newtons: 1 / (a·F^b) + R_min.
pub fn fsr_resistance(force: f64, a: f64, b: f64, r_min: f64) -> f64 {
    let f = force.max(FORCE_FLOOR);
    1.0 / (a * f.powf(b)) + r_min
}

/// Divider output (V) for a given applied force. Parameters are used as given.
pub fn divider_voltage(force: f64, p: &ForceParams) -> f64 {
    let r = fsr_resistance(force, p.a, p.b, p.r_min_ohm);
    p.vcc * p.r_fixed_ohm / (p.r_fixed_ohm + r)
}

/// Applied force (N) at time `t`.
pub fn applied_force(t: f64, p: &ForceParams) -> f64 {
    match p.mode {
        ForceMode::Static => p.offset_n + p.amplitude_n,
        ForceMode::Oscillating => {
            let w = 2.0 * PI * p.frequency_hz;
            p.offset_n + p.amplitude_n * (w * t).sin().abs()
        }
    }
}

/// FSR voltage-divider output (V).
pub fn force(time: &[f64], params: &ForceParams) -> Vec<f64> {
    let p = params.clamped();
    time.iter()
        .map(|&t| finite_or_zero(divider_voltage(applied_force(t, &p), &p)))
        .collect()
}

// ── Strain ──────────────────────────────────────────────────────────────────

/// Quarter-bridge output (V) for the configured strain.
pub fn strain_voltage(p: &StrainParams) -> f64 {
    0.25 * p.excitation_v * p.gauge_factor * (p.offset_microstrain + p.amplitude_microstrain) * 1e-6
}

/// Constant bridge output, one value per time point.
pub fn strain(time: &[f64], params: &StrainParams) -> Vec<f64> {
    let v = finite_or_zero(strain_voltage(&params.clamped()));
    vec![v; time.len()]
}

// ── EMG ─────────────────────────────────────────────────────────────────────

/// Constant envelope amplitude·activation (mV).
pub fn emg(time: &[f64], params: &EmgParams) -> Vec<f64> {
    let p = params.clamped();
    let v = finite_or_zero(p.amplitude_mv * p.activation);
    vec![v; time.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> Vec<f64> {
        time_axis(500, 100.0)
    }

    #[test]
    fn test_generators_bit_identical() {
        let t = axis();
        let o = OrientationParams { damping_ratio: 0.2, ..Default::default() };
        let f = ForceParams::default();
        let s = StrainParams::default();
        let e = EmgParams::default();

        let pairs = [
            (orientation(&t, &o), orientation(&t, &o)),
            (force(&t, &f), force(&t, &f)),
            (strain(&t, &s), strain(&t, &s)),
            (emg(&t, &e), emg(&t, &e)),
        ];
        for (a, b) in &pairs {
            assert_eq!(a.len(), 500);
            let bits_a: Vec<u64> = a.iter().map(|x| x.to_bits()).collect();
            let bits_b: Vec<u64> = b.iter().map(|x| x.to_bits()).collect();
            assert_eq!(bits_a, bits_b);
        }
    }

    #[test]
    fn test_step_response_regimes() {
        let wn = 2.0 * PI;
        for &zeta in &[0.0, 0.3, 1.0, 1.0 + 5e-7, 2.5] {
            assert_eq!(second_order_step(zeta, wn, 0.0), 0.0);
            assert_eq!(second_order_step(zeta, wn, -1.0), 0.0);
        }
        // Damped regimes settle to 1
        for &zeta in &[0.3, 1.0, 2.5] {
            let y = second_order_step(zeta, wn, 30.0);
            assert!((y - 1.0).abs() < 1e-3, "zeta={zeta}: {y}");
        }
        // Underdamped overshoots, overdamped does not
        let peak_under = (1..400)
            .map(|i| second_order_step(0.2, wn, i as f64 * 0.005))
            .fold(0.0, f64::max);
        let peak_over = (1..4000)
            .map(|i| second_order_step(2.0, wn, i as f64 * 0.005))
            .fold(0.0, f64::max);
        assert!(peak_under > 1.3, "underdamped peak {peak_under}");
        assert!(peak_over <= 1.0 + 1e-12, "overdamped peak {peak_over}");
    }

    #[test]
    fn test_critical_band_is_continuous() {
        let wn = 4.0;
        let a = second_order_step(1.0, wn, 0.7);
        let b = second_order_step(1.0 - 2e-6, wn, 0.7);
        let c = second_order_step(1.0 + 2e-6, wn, 0.7);
        assert!((a - b).abs() < 1e-5 && (a - c).abs() < 1e-5, "{a} {b} {c}");
    }

    #[test]
    fn test_overdamped_large_wn_finite() {
        let y = second_order_step(5.0, 2.0 * PI * 10.0, 5.0);
        assert!(y.is_finite());
    }

    #[test]
    fn test_orientation_holds_before_step() {
        let p = OrientationParams {
            offset_deg: 12.0,
            step_time_s: 1.0,
            ..Default::default()
        };
        let y = orientation(&axis(), &p);
        assert!(y[..100].iter().all(|&v| v == 12.0));
        assert!(y[150] != 12.0);
    }

    #[test]
    fn test_orientation_alternates_targets() {
        let p = OrientationParams {
            amplitude_deg: 20.0,
            offset_deg: 5.0,
            damping_ratio: 1.0,
            natural_freq_hz: 5.0,
            switch_interval_s: 2.0,
            step_time_s: 0.0,
        };
        let t = [1.99, 3.99];
        let y = orientation(&t, &p);
        assert!((y[0] - 25.0).abs() < 0.01, "first target: {}", y[0]);
        assert!((y[1] + 15.0).abs() < 0.01, "second target: {}", y[1]);
    }

    #[test]
    fn test_orientation_clamps_at_point_of_use() {
        let wild = OrientationParams {
            amplitude_deg: 1e9,
            damping_ratio: -4.0,
            natural_freq_hz: 1e6,
            ..Default::default()
        };
        let y = orientation(&axis(), &wild);
        assert_eq!(y, orientation(&axis(), &wild.clamped()));
        assert!(y.iter().all(|v| v.abs() <= 90.0 * 2.0 + 90.0));
    }

    #[test]
    fn test_force_banner_example() {
        let p = ForceParams {
            offset_n: 5.0,
            amplitude_n: 10.0,
            frequency_hz: 1.0,
            mode: ForceMode::Oscillating,
            a: 0.4,
            b: 0.8,
            r_min_ohm: 400.0,
            vcc: 3.3,
            r_fixed_ohm: 10_000.0,
            time_constant_s: 0.05,
        };
        // |sin(2π·0.25)| = 1 -> 15 N
        let r = fsr_resistance(15.0, 0.4, 0.8, 400.0);
        let expected_r = 1.0 / (0.4 * 15.0f64.powf(0.8)) + 400.0;
        assert!((r - expected_r).abs() < 1e-12);
        assert!(r > 400.0 && r < 402.0, "resistance {r}");

        let v = force(&[0.25], &p)[0];
        assert!((v - 3.3 * 10_000.0 / (10_000.0 + r)).abs() < 1e-9);
        assert!((v - 3.17).abs() < 0.01, "Vout {v}");

        let static_v = force(&[0.0], &ForceParams { mode: ForceMode::Static, ..p })[0];
        assert!((static_v - v).abs() < 1e-12);
    }

    #[test]
    fn test_force_clamps_at_point_of_use() {
        let wild = ForceParams {
            offset_n: 500.0,
            amplitude_n: -20.0,
            a: 0.0,
            b: -3.0,
            vcc: 100.0,
            r_fixed_ohm: 1.0,
            r_min_ohm: f64::NAN,
            ..Default::default()
        };
        let t = axis();
        let y = force(&t, &wild);
        assert_eq!(y, force(&t, &wild.clamped()));
        // 12 V supply ceiling holds even though the raw record asks for 100 V
        assert!(y.iter().all(|&v| v.is_finite() && (0.0..=12.0).contains(&v)));
        let raw = divider_voltage(applied_force(0.0, &wild), &wild);
        assert_ne!(raw, y[0]);
    }

    #[test]
    fn test_strain_clamps_at_point_of_use() {
        let wild = StrainParams {
            excitation_v: 40.0,
            gauge_factor: 0.0,
            offset_microstrain: -9000.0,
            amplitude_microstrain: 1e6,
            time_constant_s: 0.02,
        };
        let t = axis();
        let y = strain(&t, &wild);
        assert_eq!(y, strain(&t, &wild.clamped()));
        // ¼ · 10 V · 0.5 · (−5000 + 5000) µε
        assert!(y.iter().all(|&v| v == 0.0));

        let hot = StrainParams {
            excitation_v: 40.0,
            gauge_factor: 9.0,
            ..Default::default()
        };
        let y = strain(&t, &hot);
        assert_eq!(y, strain(&t, &hot.clamped()));
        assert!((y[0] - 0.25 * 10.0 * 5.0 * 750.0 * 1e-6).abs() < 1e-15);
    }

    #[test]
    fn test_emg_amplitude_clamps_at_point_of_use() {
        let wild = EmgParams {
            amplitude_mv: 250.0,
            activation: f64::NAN,
            ..Default::default()
        };
        let y = emg(&axis(), &wild);
        assert_eq!(y, emg(&axis(), &wild.clamped()));
        assert!(y.iter().all(|&v| v <= 10.0));
    }

    #[test]
    fn test_force_floor_avoids_blowup() {
        let p = ForceParams {
            offset_n: 0.0,
            amplitude_n: 0.0,
            ..Default::default()
        };
        let y = force(&axis(), &p);
        assert!(y.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_strain_and_emg_constants() {
        let s = StrainParams {
            excitation_v: 5.0,
            gauge_factor: 2.0,
            offset_microstrain: 1000.0,
            amplitude_microstrain: 0.0,
            time_constant_s: 0.02,
        };
        let y = strain(&axis(), &s);
        assert!(y.iter().all(|&v| (v - 0.0025).abs() < 1e-15));

        let e = EmgParams {
            amplitude_mv: 2.0,
            activation: 4.0,
            ..Default::default()
        };
        let y = emg(&[0.0, 1.0], &e);
        assert_eq!(y, vec![2.0, 2.0]);
    }
}
