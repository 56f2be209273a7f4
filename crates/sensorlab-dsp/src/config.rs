//! Engine, analysis and spectrum configuration.
//!
//! All three structs deserialize with `#[serde(default)]`, so a partial JSON
//! document only overrides the fields it names.

use serde::{Deserialize, Serialize};

use crate::discretize::Discretization;
use crate::params::NUM_CHANNELS;

/// Default channel sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: f64 = 100.0;
/// Default buffer window (seconds). 5 s at 100 Hz = 500 samples.
pub const DEFAULT_BUFFER_SECONDS: f64 = 5.0;
/// Universal hard clip applied after each channel's physical limit.
pub const DEFAULT_HARD_CLIP: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate_hz: f64,
    pub buffer_seconds: f64,
    /// Method used when populating digital transfer functions.
    pub discretization: Discretization,
    pub hard_clip: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            discretization: Discretization::ZeroOrderHold,
            hard_clip: DEFAULT_HARD_CLIP,
        }
    }
}

impl EngineConfig {
    /// Number of samples held per channel.
    pub fn buffer_len(&self) -> usize {
        (self.sample_rate_hz * self.buffer_seconds).round().max(0.0) as usize
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(format!("sample_rate_hz must be positive, got {}", self.sample_rate_hz));
        }
        if self.buffer_len() == 0 {
            return Err("buffer must hold at least one sample".to_string());
        }
        if !self.hard_clip.is_finite() || self.hard_clip <= 0.0 {
            return Err(format!("hard_clip must be positive, got {}", self.hard_clip));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Output weight per channel, indexed by `ChannelId::index()`.
    pub weights: [f64; NUM_CHANNELS],
    pub sample_rate_hz: f64,
    pub discretization: Discretization,
    /// Quiet interval before a burst of parameter changes is analysed.
    pub settle_ms: u64,
    pub response_points: usize,
    /// Frequency band for the response sweep, as fractions of the sample rate.
    pub band: [f64; 2],
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            weights: [1.0; NUM_CHANNELS],
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            discretization: Discretization::ZeroOrderHold,
            settle_ms: 250,
            response_points: 128,
            band: [0.01, 0.5],
        }
    }
}

impl AnalysisConfig {
    /// Sweep frequencies in Hz, log-spaced across `band`.
    pub fn response_frequencies(&self) -> Vec<f64> {
        let lo = (self.band[0] * self.sample_rate_hz).max(1e-6);
        let hi = (self.band[1] * self.sample_rate_hz).max(lo);
        log_space(lo, hi, self.response_points)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Maximum recompute rate per channel (Hz). 0 disables rate limiting.
    pub max_hz: f64,
    pub peak_count: usize,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            max_hz: 10.0,
            peak_count: 5,
        }
    }
}

/// `points` log-spaced values from `start` to `end` inclusive.
pub fn log_space(start: f64, end: f64, points: usize) -> Vec<f64> {
    let log_start = start.ln();
    let log_end = end.ln();
    (0..points)
        .map(|i| {
            let frac = i as f64 / (points - 1).max(1) as f64;
            (log_start + frac * (log_end - log_start)).exp()
        })
        .collect()
}
