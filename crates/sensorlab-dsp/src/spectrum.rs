//! Windowed magnitude spectra with per-channel caching and rate limiting.
//!
//! Processing per recompute: newest samples right-aligned into a zero-padded
//! power-of-two frame → mean removal → periodic Hann window → radix-2 DIT
//! FFT → `|X|/N` and dB for bins `0..=N/2`.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::{Duration, Instant};

use num_complex::Complex64;

use crate::params::ChannelId;
use crate::stability::MAG_FLOOR;

pub const MIN_FFT_LEN: usize = 32;
pub const MAX_FFT_LEN: usize = 4096;
pub const DEFAULT_PEAK_COUNT: usize = 5;

/// One computed spectrum. Replaced wholesale on each recompute.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpectrumBlock {
    pub freqs: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub magnitude_db: Vec<f64>,
    pub sample_rate: f64,
    pub peak_index: usize,
    pub peak_freq: f64,
    pub peak_magnitude: f64,
}

impl SpectrumBlock {
    /// Returned for empty samples or an unusable sample rate.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn fft_len(&self) -> usize {
        if self.freqs.is_empty() { 0 } else { (self.freqs.len() - 1) * 2 }
    }

    pub fn bin_width(&self) -> f64 {
        match self.fft_len() {
            0 => 0.0,
            n => self.sample_rate / n as f64,
        }
    }
}

/// Closest power of two to `count`, ties going up, clamped to [32, 4096].
pub fn choose_fft_len(count: usize) -> usize {
    if count <= MIN_FFT_LEN {
        return MIN_FFT_LEN;
    }
    if count >= MAX_FFT_LEN {
        return MAX_FFT_LEN;
    }
    let upper = count.next_power_of_two();
    let lower = upper / 2;
    if upper == count || count - lower >= upper - count { upper } else { lower }
}

/// In-place iterative radix-2 decimation-in-time FFT. `buf.len()` must be a
/// power of two.
pub fn fft_in_place(buf: &mut [Complex64]) {
    let n = buf.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    let bits = n.trailing_zeros();
    for i in 0..n {
        let j = i.reverse_bits() >> (usize::BITS - bits);
        if j > i {
            buf.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let step = Complex64::from_polar(1.0, -2.0 * PI / len as f64);
        for start in (0..n).step_by(len) {
            let mut w = Complex64::new(1.0, 0.0);
            for k in 0..len / 2 {
                let even = buf[start + k];
                let odd = buf[start + k + len / 2] * w;
                buf[start + k] = even + odd;
                buf[start + k + len / 2] = even - odd;
                w *= step;
            }
        }
        len <<= 1;
    }
}

/// Periodic Hann window of length `n` (coherent gain 0.5).
pub fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

/// Compute a spectrum directly, with no cache.
pub fn compute_spectrum(samples: &[f64], sample_rate: f64) -> SpectrumBlock {
    if samples.is_empty() || !(sample_rate > 0.0) || !sample_rate.is_finite() {
        return SpectrumBlock::empty();
    }
    let n = choose_fft_len(samples.len());
    let window = hann(n);
    let mut work = vec![Complex64::new(0.0, 0.0); n];
    spectrum_into(samples, sample_rate, &window, &mut work)
}

fn spectrum_into(
    samples: &[f64],
    sample_rate: f64,
    window: &[f64],
    work: &mut [Complex64],
) -> SpectrumBlock {
    let n = work.len();
    let take = samples.len().min(n);
    let newest = &samples[samples.len() - take..];
    let pad = n - take;

    // Non-finite samples are zeroed below, so they stay out of the mean too
    let (sum, finite) = newest
        .iter()
        .filter(|x| x.is_finite())
        .fold((0.0, 0usize), |(sum, count), &x| (sum + x, count + 1));
    let mean = if finite > 0 { sum / finite as f64 } else { 0.0 };
    for slot in work[..pad].iter_mut() {
        *slot = Complex64::new(0.0, 0.0);
    }
    for (i, &x) in newest.iter().enumerate() {
        let v = if x.is_finite() { x - mean } else { 0.0 };
        work[pad + i] = Complex64::new(v * window[pad + i], 0.0);
    }

    fft_in_place(work);

    let bins = n / 2 + 1;
    let scale = 1.0 / n as f64;
    let mut block = SpectrumBlock {
        freqs: (0..bins).map(|k| k as f64 * sample_rate / n as f64).collect(),
        magnitude: Vec::with_capacity(bins),
        magnitude_db: Vec::with_capacity(bins),
        sample_rate,
        ..SpectrumBlock::default()
    };
    for x in &work[..bins] {
        let m = x.norm() * scale;
        block.magnitude.push(m);
        block.magnitude_db.push(20.0 * m.max(MAG_FLOOR).log10());
    }
    let (peak_index, peak_magnitude) = block
        .magnitude
        .iter()
        .copied()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, m)| if m > best.1 { (i, m) } else { best });
    block.peak_index = peak_index;
    block.peak_freq = block.freqs[peak_index];
    block.peak_magnitude = peak_magnitude;
    block
}

struct CacheEntry {
    window: Vec<f64>,
    work: Vec<Complex64>,
    last: Option<(Instant, Arc<SpectrumBlock>)>,
}

/// Per-channel spectra with a recompute budget.
///
/// The cache is keyed by channel and transform length. A call that arrives
/// sooner than `1 / max_hz` after the last recompute for its key returns the
/// cached block unchanged.
#[derive(Default)]
pub struct SpectralEngine {
    cache: HashMap<(ChannelId, usize), CacheEntry>,
}

impl SpectralEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(
        &mut self,
        samples: &[f64],
        sample_rate: f64,
        channel: ChannelId,
        max_hz: f64,
    ) -> Arc<SpectrumBlock> {
        self.compute_at(samples, sample_rate, channel, max_hz, Instant::now())
    }

    /// [`compute`](Self::compute) with an explicit clock reading.
    pub fn compute_at(
        &mut self,
        samples: &[f64],
        sample_rate: f64,
        channel: ChannelId,
        max_hz: f64,
        now: Instant,
    ) -> Arc<SpectrumBlock> {
        if samples.is_empty() || !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Arc::new(SpectrumBlock::empty());
        }
        let n = choose_fft_len(samples.len());
        let entry = self.cache.entry((channel, n)).or_insert_with(|| CacheEntry {
            window: hann(n),
            work: vec![Complex64::new(0.0, 0.0); n],
            last: None,
        });

        let min_interval = if max_hz > 0.0 && max_hz.is_finite() {
            Duration::try_from_secs_f64(1.0 / max_hz).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        if let Some((at, block)) = &entry.last {
            if now.saturating_duration_since(*at) < min_interval {
                return block.clone();
            }
        }

        let block = Arc::new(spectrum_into(samples, sample_rate, &entry.window, &mut entry.work));
        tracing::debug!(
            channel = %channel,
            fft_len = n,
            peak_hz = block.peak_freq,
            "spectrum refreshed"
        );
        entry.last = Some((now, block.clone()));
        block
    }

    /// Latest block computed for `channel`, across transform lengths.
    pub fn latest(&self, channel: ChannelId) -> Option<Arc<SpectrumBlock>> {
        self.cache
            .iter()
            .filter(|((c, _), _)| *c == channel)
            .filter_map(|(_, e)| e.last.as_ref())
            .max_by_key(|(at, _)| *at)
            .map(|(_, b)| b.clone())
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// The most prominent spectral peaks, sorted by ascending frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Peaks {
    pub freqs: Vec<f64>,
    pub magnitudes: Vec<f64>,
}

impl Peaks {
    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }
}

/// Up to `k` largest local maxima, skipping the DC bin and anything at the
/// dB floor. `None` when there are none.
pub fn extract_peaks(block: &SpectrumBlock, k: usize) -> Option<Peaks> {
    let mag = &block.magnitude;
    if k == 0 || mag.len() < 2 {
        return None;
    }
    // (magnitude, bin), largest first
    let mut top: Vec<(f64, usize)> = Vec::with_capacity(k + 1);
    for i in 1..mag.len() {
        let m = mag[i];
        let rises = m > mag[i - 1];
        let holds = i + 1 == mag.len() || m >= mag[i + 1];
        if !(rises && holds) || m <= MAG_FLOOR {
            continue;
        }
        let pos = top.iter().position(|&(tm, _)| m > tm).unwrap_or(top.len());
        if pos < k {
            top.insert(pos, (m, i));
            top.truncate(k);
        }
    }
    if top.is_empty() {
        return None;
    }
    top.sort_by_key(|&(_, bin)| bin);
    Some(Peaks {
        freqs: top.iter().map(|&(_, bin)| block.freqs[bin]).collect(),
        magnitudes: top.iter().map(|&(m, _)| m).collect(),
    })
}
