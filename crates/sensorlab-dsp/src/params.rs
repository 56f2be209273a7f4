//! Per-channel parameter sets and change notification.
//!
//! Each channel owns one flat record of doubles. Every field has a fixed
//! physical range; values are clamped whenever a record is written through
//! a [`ParamCell`], and the waveform generators clamp again at point of use.
//!
//! Change notification is explicit registration: a cell hands out a
//! [`SubscriptionId`] per handler and handlers run synchronously on the
//! writer's thread once the write lock has been released.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub const NUM_CHANNELS: usize = 4;

/// One of the four independent sensor sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelId {
    Orientation,
    Force,
    Strain,
    Emg,
}

impl ChannelId {
    pub const ALL: [ChannelId; NUM_CHANNELS] = [
        ChannelId::Orientation,
        ChannelId::Force,
        ChannelId::Strain,
        ChannelId::Emg,
    ];

    pub fn index(self) -> usize {
        match self {
            ChannelId::Orientation => 0,
            ChannelId::Force => 1,
            ChannelId::Strain => 2,
            ChannelId::Emg => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChannelId::Orientation => "orientation",
            ChannelId::Force => "force",
            ChannelId::Strain => "strain",
            ChannelId::Emg => "emg",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name().eq_ignore_ascii_case(name))
    }

    /// Physical output limit for this channel's samples (degrees or volts).
    pub fn physical_limit(self) -> f64 {
        match self {
            ChannelId::Orientation => 180.0,
            ChannelId::Force => 15.0,
            ChannelId::Strain => 1.0,
            ChannelId::Emg => 10.0,
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Records that know their own physical ranges.
pub trait Clamped: Clone {
    fn clamped(&self) -> Self;
}

/// Clamp to `[lo, hi]`; NaN falls back to `fallback`.
#[inline]
pub(crate) fn clamp_field(value: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if value.is_nan() { fallback } else { value.clamp(lo, hi) }
}

// ── Orientation ─────────────────────────────────────────────────────────────

/// Tilt angle driven as a second-order step response between two targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrientationParams {
    /// Half the swing between the two targets (degrees), [0, 90]
    pub amplitude_deg: f64,
    /// Centre angle and initial value (degrees), [-90, 90]
    pub offset_deg: f64,
    /// ζ, [0, 5]
    pub damping_ratio: f64,
    /// fn = ωn / 2π (Hz), [0.05, 10]
    pub natural_freq_hz: f64,
    /// Time between target sign flips (s), [0.1, 10]
    pub switch_interval_s: f64,
    /// First step instant (s), [0, 5]
    pub step_time_s: f64,
}

impl Default for OrientationParams {
    fn default() -> Self {
        Self {
            amplitude_deg: 30.0,
            offset_deg: 0.0,
            damping_ratio: 0.4,
            natural_freq_hz: 1.0,
            switch_interval_s: 1.0,
            step_time_s: 0.5,
        }
    }
}

impl Clamped for OrientationParams {
    fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            amplitude_deg: clamp_field(self.amplitude_deg, 0.0, 90.0, d.amplitude_deg),
            offset_deg: clamp_field(self.offset_deg, -90.0, 90.0, d.offset_deg),
            damping_ratio: clamp_field(self.damping_ratio, 0.0, 5.0, d.damping_ratio),
            natural_freq_hz: clamp_field(self.natural_freq_hz, 0.05, 10.0, d.natural_freq_hz),
            switch_interval_s: clamp_field(self.switch_interval_s, 0.1, 10.0, d.switch_interval_s),
            step_time_s: clamp_field(self.step_time_s, 0.0, 5.0, d.step_time_s),
        }
    }
}

// ── Force ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceMode {
    /// Constant force = offset + amplitude
    Static,
    /// force = offset + amplitude·|sin(ωt)|
    Oscillating,
}

/// Force-sensitive resistor in a voltage divider.
///
/// R_fsr = 1 / (a·F^b) + R_min, Vout = Vcc·R_fixed / (R_fixed + R_fsr)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceParams {
    /// [0, 100] N
    pub offset_n: f64,
    /// [0, 100] N
    pub amplitude_n: f64,
    /// Oscillation frequency (Hz), [0, 20]
    pub frequency_hz: f64,
    pub mode: ForceMode,
    /// Conductance coefficient, [0.01, 10]
    pub a: f64,
    /// Power-law exponent, [0.1, 2]
    pub b: f64,
    /// [0, 10 000] Ω
    pub r_min_ohm: f64,
    /// Supply (V), [0.5, 12]
    pub vcc: f64,
    /// Divider resistor (Ω), [100, 1e6]
    pub r_fixed_ohm: f64,
    /// Sensor response time constant (s), [0.001, 5]
    pub time_constant_s: f64,
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
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
        }
    }
}

impl Clamped for ForceParams {
    fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            offset_n: clamp_field(self.offset_n, 0.0, 100.0, d.offset_n),
            amplitude_n: clamp_field(self.amplitude_n, 0.0, 100.0, d.amplitude_n),
            frequency_hz: clamp_field(self.frequency_hz, 0.0, 20.0, d.frequency_hz),
            mode: self.mode,
            a: clamp_field(self.a, 0.01, 10.0, d.a),
            b: clamp_field(self.b, 0.1, 2.0, d.b),
            r_min_ohm: clamp_field(self.r_min_ohm, 0.0, 10_000.0, d.r_min_ohm),
            vcc: clamp_field(self.vcc, 0.5, 12.0, d.vcc),
            r_fixed_ohm: clamp_field(self.r_fixed_ohm, 100.0, 1.0e6, d.r_fixed_ohm),
            time_constant_s: clamp_field(self.time_constant_s, 0.001, 5.0, d.time_constant_s),
        }
    }
}

// ── Strain ──────────────────────────────────────────────────────────────────

/// Quarter-bridge strain gauge: Vout = ¼·Vex·GF·ε.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrainParams {
    /// Bridge excitation (V), [0.5, 10]
    pub excitation_v: f64,
    /// [0.5, 5]
    pub gauge_factor: f64,
    /// [-5000, 5000] µε
    pub offset_microstrain: f64,
    /// [0, 5000] µε
    pub amplitude_microstrain: f64,
    /// [0.001, 5] s
    pub time_constant_s: f64,
}

impl Default for StrainParams {
    fn default() -> Self {
        Self {
            excitation_v: 5.0,
            gauge_factor: 2.0,
            offset_microstrain: 500.0,
            amplitude_microstrain: 250.0,
            time_constant_s: 0.02,
        }
    }
}

impl Clamped for StrainParams {
    fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            excitation_v: clamp_field(self.excitation_v, 0.5, 10.0, d.excitation_v),
            gauge_factor: clamp_field(self.gauge_factor, 0.5, 5.0, d.gauge_factor),
            offset_microstrain: clamp_field(
                self.offset_microstrain,
                -5000.0,
                5000.0,
                d.offset_microstrain,
            ),
            amplitude_microstrain: clamp_field(
                self.amplitude_microstrain,
                0.0,
                5000.0,
                d.amplitude_microstrain,
            ),
            time_constant_s: clamp_field(self.time_constant_s, 0.001, 5.0, d.time_constant_s),
        }
    }
}

// ── EMG ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmgParams {
    /// Peak envelope (mV), [0, 10]
    pub amplitude_mv: f64,
    /// Muscle activation, [0, 1]
    pub activation: f64,
    /// Model the acquisition band-pass; unity gain when false
    pub bandpass: bool,
    /// [0.1, 45] Hz
    pub band_low_hz: f64,
    /// [1, 49] Hz
    pub band_high_hz: f64,
}

impl Default for EmgParams {
    fn default() -> Self {
        Self {
            amplitude_mv: 1.0,
            activation: 0.5,
            bandpass: true,
            band_low_hz: 20.0,
            band_high_hz: 45.0,
        }
    }
}

impl Clamped for EmgParams {
    fn clamped(&self) -> Self {
        let d = Self::default();
        Self {
            amplitude_mv: clamp_field(self.amplitude_mv, 0.0, 10.0, d.amplitude_mv),
            activation: clamp_field(self.activation, 0.0, 1.0, d.activation),
            bandpass: self.bandpass,
            band_low_hz: clamp_field(self.band_low_hz, 0.1, 45.0, d.band_low_hz),
            band_high_hz: clamp_field(self.band_high_hz, 1.0, 49.0, d.band_high_hz),
        }
    }
}

// ── Shared cells ────────────────────────────────────────────────────────────

/// Handle returned by [`ParamCell::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type ChangeHandler = Arc<dyn Fn(ChannelId) + Send + Sync>;

/// A clamped-on-write parameter record with change subscribers.
pub struct ParamCell<P> {
    channel: ChannelId,
    value: RwLock<P>,
    subscribers: Mutex<Vec<(SubscriptionId, ChangeHandler)>>,
    next_id: AtomicU64,
}

impl<P: Clamped> ParamCell<P> {
    pub fn new(channel: ChannelId, value: P) -> Self {
        Self {
            channel,
            value: RwLock::new(value.clamped()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn get(&self) -> P {
        self.value.read().clone()
    }

    pub fn set(&self, value: P) {
        *self.value.write() = value.clamped();
        self.notify();
    }

    /// Mutate in place; the result is clamped before it becomes visible.
    pub fn update(&self, f: impl FnOnce(&mut P)) {
        {
            let mut guard = self.value.write();
            let mut next = guard.clone();
            f(&mut next);
            *guard = next.clamped();
        }
        self.notify();
    }

    pub fn subscribe(&self, handler: ChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, handler));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify(&self) {
        // Handlers may read this cell or subscribe; call them unlocked.
        let handlers: Vec<ChangeHandler> =
            self.subscribers.lock().iter().map(|(_, h)| h.clone()).collect();
        for handler in handlers {
            handler(self.channel);
        }
    }
}

/// The four channel cells, cheaply cloneable.
#[derive(Clone)]
pub struct ParameterBank {
    pub orientation: Arc<ParamCell<OrientationParams>>,
    pub force: Arc<ParamCell<ForceParams>>,
    pub strain: Arc<ParamCell<StrainParams>>,
    pub emg: Arc<ParamCell<EmgParams>>,
}

impl Default for ParameterBank {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterBank {
    pub fn new() -> Self {
        Self {
            orientation: Arc::new(ParamCell::new(
                ChannelId::Orientation,
                OrientationParams::default(),
            )),
            force: Arc::new(ParamCell::new(ChannelId::Force, ForceParams::default())),
            strain: Arc::new(ParamCell::new(ChannelId::Strain, StrainParams::default())),
            emg: Arc::new(ParamCell::new(ChannelId::Emg, EmgParams::default())),
        }
    }

    pub fn subscribe(&self, channel: ChannelId, handler: ChangeHandler) -> SubscriptionId {
        match channel {
            ChannelId::Orientation => self.orientation.subscribe(handler),
            ChannelId::Force => self.force.subscribe(handler),
            ChannelId::Strain => self.strain.subscribe(handler),
            ChannelId::Emg => self.emg.subscribe(handler),
        }
    }

    pub fn unsubscribe(&self, channel: ChannelId, id: SubscriptionId) -> bool {
        match channel {
            ChannelId::Orientation => self.orientation.unsubscribe(id),
            ChannelId::Force => self.force.unsubscribe(id),
            ChannelId::Strain => self.strain.unsubscribe(id),
            ChannelId::Emg => self.emg.unsubscribe(id),
        }
    }

    /// Register one handler on every channel.
    pub fn subscribe_all(
        &self,
        handler: ChangeHandler,
    ) -> [(ChannelId, SubscriptionId); NUM_CHANNELS] {
        ChannelId::ALL.map(|c| (c, self.subscribe(c, handler.clone())))
    }

    pub fn unsubscribe_all(&self, subscriptions: &[(ChannelId, SubscriptionId)]) {
        for &(channel, id) in subscriptions {
            self.unsubscribe(channel, id);
        }
    }
}
