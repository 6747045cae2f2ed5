//! Per-frame signal analysis: volume level and voice-band energy ratio.
//!
//! [`SignalAnalyzer`] is a pure function of one analysis tick's buffers — it
//! holds configuration only and retains nothing between frames.
//! [`SpectrumAnalyzer`] wraps it with a `realfft` forward plan so the live
//! capture path can produce the magnitude buffer from raw time-domain
//! samples.
//!
//! Two scalars come out of every frame:
//!
//! * **volume level** — RMS of the `[-1, 1]` samples, ×2 amplification,
//!   clamped to `[0, 1]`;
//! * **voice-band ratio** — fraction of total spectral magnitude that falls
//!   inside the telephone speech band (default 300–3400 Hz).

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::config::DetectorConfig;

// ---------------------------------------------------------------------------
// VoiceSignal
// ---------------------------------------------------------------------------

/// The two per-frame features the boundary detector consumes.
///
/// Produced once per analysis tick and consumed immediately; never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSignal {
    /// Normalised loudness in `[0, 1]`.
    pub volume_level: f32,
    /// Fraction of spectral energy inside the voice band, in `[0, 1]`.
    pub voice_band_ratio: f32,
    /// Capture timestamp of this frame in milliseconds.
    pub timestamp_ms: u64,
}

impl VoiceSignal {
    /// The all-zero signal, returned for empty or absent buffers.  A
    /// sustained zero signal reads as silence downstream.
    pub fn silent(timestamp_ms: u64) -> Self {
        Self {
            volume_level: 0.0,
            voice_band_ratio: 0.0,
            timestamp_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// SignalAnalyzer
// ---------------------------------------------------------------------------

/// Stateless per-frame feature extraction.
///
/// # Example
///
/// ```rust
/// use phonebooth::audio::SignalAnalyzer;
/// use phonebooth::config::DetectorConfig;
///
/// let analyzer = SignalAnalyzer::new(&DetectorConfig::default());
///
/// // A frame of constant 0.5 amplitude has RMS 0.5 → volume 1.0 after the
/// // ×2 amplification and clamp.
/// let samples = vec![0.5_f32; 2048];
/// let spectrum = vec![0.0_f32; 1025];
/// let signal = analyzer.analyze(&samples, &spectrum, 0);
/// assert_eq!(signal.volume_level, 1.0);
/// assert_eq!(signal.voice_band_ratio, 0.0); // no spectral energy at all
/// ```
#[derive(Debug, Clone)]
pub struct SignalAnalyzer {
    sample_rate: u32,
    voice_freq_min_hz: f32,
    voice_freq_max_hz: f32,
}

impl SignalAnalyzer {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            voice_freq_min_hz: config.voice_freq_min_hz,
            voice_freq_max_hz: config.voice_freq_max_hz,
        }
    }

    /// Convert one tick's buffers into a [`VoiceSignal`].
    ///
    /// `samples` are time-domain PCM in `[-1, 1]`; `spectrum` is the
    /// magnitude per frequency bin covering DC..Nyquist.  Either buffer being
    /// empty yields [`VoiceSignal::silent`] rather than an error.
    pub fn analyze(&self, samples: &[f32], spectrum: &[f32], timestamp_ms: u64) -> VoiceSignal {
        if samples.is_empty() {
            return VoiceSignal::silent(timestamp_ms);
        }

        VoiceSignal {
            volume_level: Self::volume_level(samples),
            voice_band_ratio: self.voice_band_ratio(spectrum),
            timestamp_ms,
        }
    }

    /// RMS of the frame, ×2, clamped to `[0, 1]`.
    ///
    /// The amplification compensates for handset microphones sitting well
    /// below full scale during normal speech.
    fn volume_level(samples: &[f32]) -> f32 {
        let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        (mean_sq.sqrt() * 2.0).clamp(0.0, 1.0)
    }

    /// Sum of in-band bin magnitudes over the total magnitude sum.
    ///
    /// Bin→frequency mapping: `bin_freq = bin * (sample_rate / 2) / bins`.
    /// Zero total energy yields 0 — never a division by zero.
    fn voice_band_ratio(&self, spectrum: &[f32]) -> f32 {
        if spectrum.is_empty() {
            return 0.0;
        }

        let nyquist = self.sample_rate as f32 / 2.0;
        let bin_hz = nyquist / spectrum.len() as f32;

        let mut band = 0.0_f32;
        let mut total = 0.0_f32;
        for (bin, magnitude) in spectrum.iter().enumerate() {
            let freq = bin as f32 * bin_hz;
            total += magnitude;
            if freq >= self.voice_freq_min_hz && freq <= self.voice_freq_max_hz {
                band += magnitude;
            }
        }

        if total > 0.0 {
            band / total
        } else {
            0.0
        }
    }
}

// ---------------------------------------------------------------------------
// SpectrumAnalyzer
// ---------------------------------------------------------------------------

/// [`SignalAnalyzer`] plus an owned FFT plan for the live capture path.
///
/// Holds the `realfft` forward plan and scratch buffers sized to
/// `fft_size`; no analysis state survives across ticks.
pub struct SpectrumAnalyzer {
    analyzer: SignalAnalyzer,
    fft: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    output: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(config: &DetectorConfig) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let input = fft.make_input_vec();
        let output = fft.make_output_vec();
        let magnitudes = vec![0.0; output.len()];

        Self {
            analyzer: SignalAnalyzer::new(config),
            fft,
            input,
            output,
            magnitudes,
        }
    }

    /// Analysis frame length in samples (= configured FFT size).
    pub fn frame_len(&self) -> usize {
        self.input.len()
    }

    /// Run one analysis tick over a time-domain frame.
    ///
    /// Frames shorter than the FFT size are zero-padded; longer frames are
    /// truncated.  An empty frame yields [`VoiceSignal::silent`].
    pub fn analyze_frame(&mut self, samples: &[f32], timestamp_ms: u64) -> VoiceSignal {
        if samples.is_empty() {
            return VoiceSignal::silent(timestamp_ms);
        }

        let n = samples.len().min(self.input.len());
        self.input[..n].copy_from_slice(&samples[..n]);
        self.input[n..].fill(0.0);

        // realfft reports an error only on mismatched buffer lengths, which
        // the scratch buffers rule out; treat it as a silent frame anyway.
        if self
            .fft
            .process(&mut self.input, &mut self.output)
            .is_err()
        {
            log::warn!("analyzer: FFT failed on a {n}-sample frame");
            return VoiceSignal::silent(timestamp_ms);
        }

        for (mag, c) in self.magnitudes.iter_mut().zip(self.output.iter()) {
            *mag = c.norm();
        }

        self.analyzer.analyze(samples, &self.magnitudes, timestamp_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
