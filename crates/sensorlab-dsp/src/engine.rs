//! Signal engine: four channel buffers kept in sync with their parameters.
//!
//! While running, the engine is subscribed to every [`ParamCell`](crate::params::ParamCell)
//! in its bank. A change notification regenerates that channel's whole buffer
//! on the notifying thread:
//!
//! ```text
//! Idle ──(param change)──► Regenerating ──(buffer rewritten)──► Idle
//! ```
//!
//! Regeneration and [`SignalEngine::transfer_functions`] share one state lock,
//! so a snapshot never mixes parameter generations. Each ring buffer has its
//! own lock; readers of one channel never wait on another's regeneration.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::model::TransferFunction;
use crate::params::{ChannelId, ChangeHandler, NUM_CHANNELS, ParameterBank, SubscriptionId};
use crate::ring_buffer::RingBuffer;
use crate::waveform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Regenerating,
}

struct EngineState {
    channel_state: [ChannelState; NUM_CHANNELS],
    /// Regeneration count per channel
    generation: [u64; NUM_CHANNELS],
    subscriptions: Option<[(ChannelId, SubscriptionId); NUM_CHANNELS]>,
}

struct Inner {
    config: EngineConfig,
    bank: ParameterBank,
    time: Vec<f64>,
    buffers: [RingBuffer<f64>; NUM_CHANNELS],
    state: Mutex<EngineState>,
}

/// Clamp to the channel limit, then the hard clip; non-finite → 0.
pub fn sanitize(value: f64, channel_limit: f64, hard_clip: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(-channel_limit, channel_limit).clamp(-hard_clip, hard_clip)
}

impl Inner {
    fn regenerate(&self, channel: ChannelId) {
        let idx = channel.index();
        let mut state = self.state.lock();
        state.channel_state[idx] = ChannelState::Regenerating;

        let raw = match channel {
            ChannelId::Orientation => {
                waveform::orientation(&self.time, &self.bank.orientation.get())
            }
            ChannelId::Force => waveform::force(&self.time, &self.bank.force.get()),
            ChannelId::Strain => waveform::strain(&self.time, &self.bank.strain.get()),
            ChannelId::Emg => waveform::emg(&self.time, &self.bank.emg.get()),
        };
        let limit = channel.physical_limit();
        let samples: Vec<f64> = raw
            .into_iter()
            .map(|v| sanitize(v, limit, self.config.hard_clip))
            .collect();

        self.buffers[idx].rewrite(&samples);
        state.generation[idx] += 1;
        state.channel_state[idx] = ChannelState::Idle;
        tracing::debug!(
            %channel,
            samples = samples.len(),
            generation = state.generation[idx],
            "channel regenerated"
        );
    }
}

pub struct SignalEngine {
    inner: Arc<Inner>,
}

impl SignalEngine {
    /// An invalid config is replaced by the defaults.
    pub fn new(bank: ParameterBank, config: EngineConfig) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(reason) => {
                tracing::warn!(%reason, "invalid engine config, using defaults");
                EngineConfig::default()
            }
        };
        let len = config.buffer_len();
        let inner = Inner {
            time: waveform::time_axis(len, config.sample_rate_hz),
            buffers: std::array::from_fn(|_| RingBuffer::new(len)),
            state: Mutex::new(EngineState {
                channel_state: [ChannelState::Idle; NUM_CHANNELS],
                generation: [0; NUM_CHANNELS],
                subscriptions: None,
            }),
            config,
            bank,
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn bank(&self) -> &ParameterBank {
        &self.inner.bank
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().subscriptions.is_some()
    }

    /// Subscribe to parameter changes and fill every buffer. No-op if running.
    pub fn start(&self) {
        if self.is_running() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handler: ChangeHandler = Arc::new(move |channel| {
            if let Some(inner) = weak.upgrade() {
                inner.regenerate(channel);
            }
        });
        let subs = self.inner.bank.subscribe_all(handler);
        self.inner.state.lock().subscriptions = Some(subs);
        for channel in ChannelId::ALL {
            self.inner.regenerate(channel);
        }
        tracing::info!(
            sample_rate = self.inner.config.sample_rate_hz,
            buffer_len = self.inner.time.len(),
            "signal engine started"
        );
    }

    /// Unsubscribe. Buffers keep their last contents.
    pub fn stop(&self) {
        let subs = self.inner.state.lock().subscriptions.take();
        if let Some(subs) = subs {
            self.inner.bank.unsubscribe_all(&subs);
            tracing::info!("signal engine stopped");
        }
    }

    /// Empty every buffer; a running engine refills them from the current
    /// parameters straight away.
    pub fn reset(&self) {
        {
            let _state = self.inner.state.lock();
            for buf in &self.inner.buffers {
                buf.clear();
            }
        }
        if self.is_running() {
            for channel in ChannelId::ALL {
                self.inner.regenerate(channel);
            }
        }
        tracing::info!("signal engine reset");
    }

    /// Force a regeneration outside the notification path.
    pub fn regenerate(&self, channel: ChannelId) {
        self.inner.regenerate(channel);
    }

    /// Newest samples of `channel`, tail-aligned into `dest`. Returns the
    /// number of real samples copied.
    pub fn copy_latest(&self, channel: ChannelId, dest: &mut [f64]) -> usize {
        self.inner.buffers[channel.index()].snapshot(dest)
    }

    pub fn samples(&self, channel: ChannelId) -> Vec<f64> {
        self.inner.buffers[channel.index()].to_vec()
    }

    /// Newest sample of `channel`, 0 when its buffer is empty. Reads only
    /// that channel's buffer lock.
    pub fn latest(&self, channel: ChannelId) -> f64 {
        self.inner.buffers[channel.index()].latest().unwrap_or(0.0)
    }

    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        self.inner.state.lock().channel_state[channel.index()]
    }

    pub fn generation(&self, channel: ChannelId) -> u64 {
        self.inner.state.lock().generation[channel.index()]
    }

    /// Mean fill ratio across the four buffers.
    pub fn buffer_fill(&self) -> f64 {
        self.inner.buffers.iter().map(|b| b.fill_ratio()).sum::<f64>() / NUM_CHANNELS as f64
    }

    /// All four channel transfer functions, built under the state lock with
    /// analog and digital poles/zeros populated. The caller owns the copies.
    ///
    /// A channel whose digital form cannot be computed is returned with only
    /// its analog fields filled.
    pub fn transfer_functions(&self) -> [TransferFunction; NUM_CHANNELS] {
        let _state = self.inner.state.lock();
        let snapshot = self.inner.bank.snapshot();
        let cfg = &self.inner.config;
        ChannelId::ALL.map(|channel| {
            let mut tf = TransferFunction::for_channel(channel, &snapshot);
            if let Err(e) = tf.populate_digital(cfg.sample_rate_hz, cfg.discretization) {
                tracing::warn!(%channel, error = %e, "digital transfer function unavailable");
            }
            tf
        })
    }
}

impl Drop for SignalEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
