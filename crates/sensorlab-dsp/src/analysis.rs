//! Analytical view of the combined system, and a debounced background worker
//! that recomputes it once parameter changes settle.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use num_complex::Complex64;
use parking_lot::{Condvar, Mutex};

use crate::config::AnalysisConfig;
use crate::discretize::discretize;
use crate::error::{DspError, DspResult};
use crate::model::combined_system;
use crate::params::{ChannelId, NUM_CHANNELS, ParameterBank, SubscriptionId};
use crate::poly::{self, RootSolution};
use crate::snapshot::ParameterSnapshot;
use crate::stability::{self, CombinedStability, FrequencyPoint, Rational};
use crate::state_space::StateSpace;

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub system: StateSpace,
    pub stability: CombinedStability,
    pub pole_solution: RootSolution,
    pub response: Vec<FrequencyPoint>,
    pub transfer_function: Rational,
    pub zero_solution: RootSolution,
    /// Largest |dB| gap between the state-space response and the rational
    /// transfer function over the sweep.
    pub cross_validation_db: f64,
}

impl AnalysisReport {
    pub fn state_count(&self) -> usize {
        self.system.order()
    }

    pub fn poles(&self) -> &[Complex64] {
        &self.stability.poles
    }

    pub fn zeros(&self) -> &[Complex64] {
        &self.zero_solution.roots
    }

    pub fn roots_converged(&self) -> bool {
        self.pole_solution.converged && self.zero_solution.converged
    }
}

#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    /// Every weight (or the whole output) is zero.
    NoSystem,
    Ready(Box<AnalysisReport>),
}

fn checkpoint(is_cancelled: &dyn Fn() -> bool) -> DspResult<()> {
    if is_cancelled() { Err(DspError::Cancelled) } else { Ok(()) }
}

/// Run the full pipeline: models → combine → discretize → poles → stability
/// → frequency response → transfer function, zeros and cross-check.
///
/// `is_cancelled` is polled between steps; a cancelled run returns
/// [`DspError::Cancelled`] and nothing else.
pub fn analyze(
    snapshot: &ParameterSnapshot,
    config: &AnalysisConfig,
    is_cancelled: &dyn Fn() -> bool,
) -> DspResult<AnalysisOutcome> {
    checkpoint(is_cancelled)?;
    let Some(continuous) = combined_system(snapshot, &config.weights)? else {
        return Ok(AnalysisOutcome::NoSystem);
    };

    checkpoint(is_cancelled)?;
    let system = discretize(&continuous, config.sample_rate_hz, config.discretization)?;

    checkpoint(is_cancelled)?;
    let pole_solution = poly::eigenvalues(system.a());
    let stability = stability::check_stability(&pole_solution.roots);

    checkpoint(is_cancelled)?;
    let freqs = config.response_frequencies();
    let response = stability::frequency_response(&system, &freqs, config.sample_rate_hz)?;

    checkpoint(is_cancelled)?;
    let transfer_function = stability::to_transfer_function(&system);
    let zero_solution = poly::find_roots(&transfer_function.num);
    let cross_validation_db = response
        .iter()
        .map(|pt| {
            let z = Complex64::from_polar(
                1.0,
                2.0 * std::f64::consts::PI * pt.freq_hz / config.sample_rate_hz,
            );
            (stability::magnitude_db(transfer_function.eval(z)) - pt.magnitude_db).abs()
        })
        .fold(0.0, f64::max);

    tracing::debug!(
        states = system.order(),
        stable = stability.stable,
        max_pole = stability.max_magnitude,
        cross_validation_db,
        "analysis complete"
    );
    Ok(AnalysisOutcome::Ready(Box::new(AnalysisReport {
        system,
        stability,
        pole_solution,
        response,
        transfer_function,
        zero_solution,
        cross_validation_db,
    })))
}

// ─── Debounced worker ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum AnalysisStatus {
    Idle,
    /// A request is waiting to settle or running.
    Pending,
    Ready(Arc<AnalysisReport>),
    NoSystem,
    /// Analysis unavailable for these parameters.
    Degraded(String),
}

impl AnalysisStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, AnalysisStatus::Pending)
    }
}

enum Message {
    Request { generation: u64, snapshot: ParameterSnapshot },
    Shutdown,
}

struct Shared {
    /// Bumped by every request; a run whose number is no longer current is stale.
    generation: AtomicU64,
    status: Mutex<AnalysisStatus>,
    changed: Condvar,
    bank: Mutex<Option<(ParameterBank, [(ChannelId, SubscriptionId); NUM_CHANNELS])>>,
}

impl Shared {
    fn publish(&self, generation: u64, status: AnalysisStatus) -> bool {
        let mut guard = self.status.lock();
        // Checked under the status lock so a newer request cannot slip between
        // the check and the write.
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        *guard = status;
        self.changed.notify_all();
        true
    }
}

/// Background analysis with debounce and cancellation.
///
/// Requests arriving within `settle_ms` of each other coalesce into one run
/// of the newest snapshot. A new request cancels any run in progress; only
/// the newest run ever publishes.
pub struct AnalysisWorker {
    shared: Arc<Shared>,
    tx: Sender<Message>,
    handle: Option<JoinHandle<()>>,
}

impl AnalysisWorker {
    pub fn spawn(config: AnalysisConfig) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            status: Mutex::new(AnalysisStatus::Idle),
            changed: Condvar::new(),
            bank: Mutex::new(None),
        });
        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("sensorlab-analysis".into())
            .spawn(move || run_worker(rx, worker_shared, config))
            .map_err(|e| tracing::warn!(error = %e, "analysis thread not started"))
            .ok();
        Self { shared, tx, handle }
    }

    /// Queue an analysis of `snapshot`, superseding anything earlier.
    pub fn request(&self, snapshot: ParameterSnapshot) {
        request(&self.shared, &self.tx, snapshot);
    }

    pub fn status(&self) -> AnalysisStatus {
        self.shared.status.lock().clone()
    }

    /// Block until the status leaves `Pending` or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> AnalysisStatus {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.status.lock();
        while guard.is_pending() {
            if self.shared.changed.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        guard.clone()
    }

    /// Re-analyse whenever any parameter in `bank` changes. Replaces an
    /// earlier attachment.
    pub fn attach(&self, bank: &ParameterBank) {
        self.detach();
        let weak = Arc::downgrade(&self.shared);
        let tx = self.tx.clone();
        let subs = bank.subscribe_all(Arc::new(move |_channel| {
            let Some(shared) = weak.upgrade() else { return };
            let snapshot = match shared.bank.lock().as_ref() {
                Some((bank, _)) => bank.snapshot(),
                None => return,
            };
            request(&shared, &tx, snapshot);
        }));
        *self.shared.bank.lock() = Some((bank.clone(), subs));
        self.request(bank.snapshot());
    }

    pub fn detach(&self) {
        let attached = self.shared.bank.lock().take();
        if let Some((bank, subs)) = attached {
            bank.unsubscribe_all(&subs);
        }
    }
}

impl Drop for AnalysisWorker {
    fn drop(&mut self) {
        self.detach();
        // Cancel anything in flight
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn request(shared: &Shared, tx: &Sender<Message>, snapshot: ParameterSnapshot) {
    let generation = {
        let mut status = shared.status.lock();
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *status = AnalysisStatus::Pending;
        generation
    };
    if tx.send(Message::Request { generation, snapshot }).is_err() {
        tracing::warn!("analysis worker gone; request dropped");
    }
}

fn run_worker(rx: Receiver<Message>, shared: Arc<Shared>, config: AnalysisConfig) {
    let settle = Duration::from_millis(config.settle_ms);
    while let Ok(first) = rx.recv() {
        let Message::Request { mut generation, mut snapshot } = first else { return };

        // Debounce: keep taking newer requests until the line goes quiet
        loop {
            match rx.recv_timeout(settle) {
                Ok(Message::Request { generation: g, snapshot: s }) => {
                    generation = g;
                    snapshot = s;
                }
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }

        let is_cancelled = || shared.generation.load(Ordering::SeqCst) != generation;
        let status = match analyze(&snapshot, &config, &is_cancelled) {
            Ok(AnalysisOutcome::Ready(report)) => {
                if !report.stability.stable {
                    tracing::warn!(reason = %report.stability.reason, "combined system unstable");
                }
                AnalysisStatus::Ready(Arc::from(report))
            }
            Ok(AnalysisOutcome::NoSystem) => AnalysisStatus::NoSystem,
            Err(DspError::Cancelled) => {
                tracing::debug!(generation, "analysis superseded");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "analysis degraded");
                AnalysisStatus::Degraded(e.to_string())
            }
        };
        if !shared.publish(generation, status) {
            tracing::debug!(generation, "stale analysis result discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretize::Discretization;
    use std::cell::Cell;

    fn never() -> bool {
        false
    }

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            settle_ms: 20,
            response_points: 32,
            ..AnalysisConfig::default()
        }
    }

    fn expect_ready(outcome: AnalysisOutcome) -> AnalysisReport {
        match outcome {
            AnalysisOutcome::Ready(r) => *r,
            AnalysisOutcome::NoSystem => panic!("expected a system"),
        }
    }

    #[test]
    fn test_default_parameters_are_stable() {
        let report = expect_ready(
            analyze(&ParameterSnapshot::default(), &AnalysisConfig::default(), &never).unwrap(),
        );
        // orientation 2 + force 1 + strain 1 + EMG band-pass 2
        assert_eq!(report.state_count(), 6);
        assert!(report.stability.stable, "{}", report.stability.reason);
        assert_eq!(report.poles().len(), 6);
        assert_eq!(report.response.len(), 128);
        assert!(report.cross_validation_db < 1e-6, "{}", report.cross_validation_db);
    }

    #[test]
    fn test_zero_weights_give_no_system() {
        let cfg = AnalysisConfig {
            weights: [0.0; NUM_CHANNELS],
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            analyze(&ParameterSnapshot::default(), &cfg, &never).unwrap(),
            AnalysisOutcome::NoSystem
        ));
    }

    #[test]
    fn test_undamped_orientation_is_not_stable() {
        let mut snap = ParameterSnapshot::default();
        snap.orientation.damping_ratio = 0.0;
        // Off the sweep grid, so no evaluation point lands on a pole
        snap.orientation.natural_freq_hz = 1.3;
        let cfg = AnalysisConfig {
            weights: [1.0, 0.0, 0.0, 0.0],
            ..fast_config()
        };
        let report = expect_ready(analyze(&snap, &cfg, &never).unwrap());
        assert!(!report.stability.stable);
        assert!((report.stability.max_magnitude - 1.0).abs() < 1e-6);
        // Muted channels still report their poles
        assert_eq!(report.poles().len(), 6);
    }

    #[test]
    fn test_tustin_pipeline() {
        let cfg = AnalysisConfig {
            discretization: Discretization::Tustin,
            ..fast_config()
        };
        let report = expect_ready(analyze(&ParameterSnapshot::default(), &cfg, &never).unwrap());
        assert!(report.stability.stable);
    }

    #[test]
    fn test_cancellation_between_steps() {
        let calls = Cell::new(0);
        let cancel_third = || {
            calls.set(calls.get() + 1);
            calls.get() >= 3
        };
        let r = analyze(&ParameterSnapshot::default(), &fast_config(), &cancel_third);
        assert_eq!(r.unwrap_err(), DspError::Cancelled);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_worker_publishes_result() {
        let worker = AnalysisWorker::spawn(fast_config());
        assert!(matches!(worker.status(), AnalysisStatus::Idle));
        worker.request(ParameterSnapshot::default());
        match worker.wait(Duration::from_secs(10)) {
            AnalysisStatus::Ready(r) => assert!(r.stability.stable),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_worker_keeps_newest_request() {
        let cfg = AnalysisConfig {
            weights: [1.0, 0.0, 0.0, 0.0],
            ..fast_config()
        };
        let worker = AnalysisWorker::spawn(cfg);
        for i in 0..10 {
            let mut snap = ParameterSnapshot::default();
            snap.orientation.damping_ratio = 0.1 * (i + 1) as f64;
            worker.request(snap);
        }
        let mut snap = ParameterSnapshot::default();
        snap.orientation.damping_ratio = 0.0;
        snap.orientation.natural_freq_hz = 1.3;
        worker.request(snap);
        match worker.wait(Duration::from_secs(10)) {
            AnalysisStatus::Ready(r) => assert!(!r.stability.stable, "newest request was undamped"),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn test_attach_follows_bank() {
        let bank = ParameterBank::new();
        let worker = AnalysisWorker::spawn(AnalysisConfig {
            weights: [0.0, 0.0, 0.0, 1.0],
            ..fast_config()
        });
        worker.attach(&bank);
        assert!(matches!(worker.wait(Duration::from_secs(10)), AnalysisStatus::Ready(_)));

        bank.emg.update(|p| p.bandpass = false);
        match worker.wait(Duration::from_secs(10)) {
            AnalysisStatus::Ready(r) => {
                // Muted channels keep their states; EMG is now a pure gain
                assert_eq!(r.state_count(), 4);
                assert_eq!(r.system.d(), 1.0);
                assert!(r.system.c().as_slice().iter().all(|&v| v == 0.0));
            }
            other => panic!("unexpected status {other:?}"),
        }

        drop(worker);
        assert_eq!(bank.emg.subscriber_count(), 0);
    }
}
