//! SensorLab DSP library: four-channel sensor synthesis and linear-systems analysis.
//!
//! Pure math plus a best-effort parameter snapshot file. No UI, no audio I/O.

// Parameters and synthesis
pub mod config;
pub mod params;
pub mod ring_buffer;
pub mod snapshot;
pub mod waveform;

// Linear models
pub mod discretize;
pub mod matrix;
pub mod model;
pub mod poly;
pub mod stability;
pub mod state_space;

// Engines
pub mod analysis;
pub mod engine;
pub mod spectrum;

pub mod error;

pub use error::{DspError, DspResult};
pub use params::ChannelId;
