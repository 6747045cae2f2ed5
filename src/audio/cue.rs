//! Ambient cue — the synthesized dial tone played while the kiosk waits.
//!
//! Two layers:
//!
//! * [`DialToneGenerator`] — pure sample synthesis: a dual sine pair
//!   (350 Hz + 440 Hz by default, the standard dial-tone voicing) behind a
//!   linear gain ramp so starts and stops never click.  Fully testable
//!   without an audio device.
//! * [`DialTone`] — drives the generator through a cpal output stream on a
//!   dedicated audio thread, exposed through the [`AmbientCue`] trait the
//!   session controller consumes.
//!
//! `start()` while running and `stop()` while stopped are no-ops.  An output
//! device refusing to start is surfaced as the retryable
//! [`CueError::PlaybackBlocked`], distinct from hardware faults — callers
//! retry `start()` later rather than giving up on the device.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::config::CueConfig;

// ---------------------------------------------------------------------------
// CueError
// ---------------------------------------------------------------------------

/// Errors from the ambient cue playback path.
#[derive(Debug, Error)]
pub enum CueError {
    #[error("no output device found on the default audio host")]
    NoOutputDevice,

    /// The platform refused to start playback right now (device claimed,
    /// or output policy pending a user gesture).  Retry `start()` later.
    #[error("playback blocked by platform policy: {0}")]
    PlaybackBlocked(String),

    #[error("output stream failed: {0}")]
    Stream(String),

    #[error("cue audio thread is not responding")]
    Unresponsive,
}

// ---------------------------------------------------------------------------
// AmbientCue trait
// ---------------------------------------------------------------------------

/// Contract the session controller drives the cue through.
pub trait AmbientCue: Send + Sync {
    /// Begin (or resume) the ambient tone with a fade-in.  No-op if already
    /// playing.
    fn start(&self) -> Result<(), CueError>;

    /// Fade the tone out.  No-op if already stopped.
    fn stop(&self);

    /// Adjust the playback volume (`[0, 1]`), effective immediately.
    fn set_volume(&self, level: f32);
}

// ---------------------------------------------------------------------------
// DialToneGenerator
// ---------------------------------------------------------------------------

/// Pure dual-tone synthesis with a linear gain ramp.
///
/// # Example
///
/// ```rust
/// use phonebooth::audio::DialToneGenerator;
/// use phonebooth::config::CueConfig;
///
/// let mut gen = DialToneGenerator::new(&CueConfig::default(), 48_000);
/// gen.set_target_gain(1.0);
///
/// let mut buf = vec![0.0_f32; 4_800]; // 100 ms
/// gen.fill(&mut buf);
/// assert!(buf.iter().any(|s| s.abs() > 0.01)); // tone is audible
/// ```
pub struct DialToneGenerator {
    phase_low: f32,
    phase_high: f32,
    step_low: f32,
    step_high: f32,
    /// Per-tone amplitude; the summed pair peaks at `volume`.
    amplitude: f32,
    gain: f32,
    target_gain: f32,
    /// Gain change per sample during a fade.
    gain_step: f32,
}

impl DialToneGenerator {
    pub fn new(config: &CueConfig, sample_rate: u32) -> Self {
        let tau = 2.0 * std::f32::consts::PI;
        let fade_samples = (config.fade_ms as f32 / 1_000.0 * sample_rate as f32).max(1.0);

        Self {
            phase_low: 0.0,
            phase_high: 0.0,
            step_low: tau * config.tone_low_hz / sample_rate as f32,
            step_high: tau * config.tone_high_hz / sample_rate as f32,
            amplitude: config.volume.clamp(0.0, 1.0) / 2.0,
            gain: 0.0,
            target_gain: 0.0,
            gain_step: 1.0 / fade_samples,
        }
    }

    /// Set where the gain ramp is heading: 1.0 = fade in, 0.0 = fade out.
    pub fn set_target_gain(&mut self, target: f32) {
        self.target_gain = target.clamp(0.0, 1.0);
    }

    /// Update the tone volume without touching the fade state.
    pub fn set_amplitude(&mut self, volume: f32) {
        self.amplitude = volume.clamp(0.0, 1.0) / 2.0;
    }

    /// Current ramp gain (1.0 = fully faded in).
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Synthesize the next sample, advancing phases and the gain ramp.
    pub fn next_sample(&mut self) -> f32 {
        if self.gain < self.target_gain {
            self.gain = (self.gain + self.gain_step).min(self.target_gain);
        } else if self.gain > self.target_gain {
            self.gain = (self.gain - self.gain_step).max(self.target_gain);
        }

        let tau = 2.0 * std::f32::consts::PI;
        let sample = (self.phase_low.sin() + self.phase_high.sin()) * self.amplitude * self.gain;

        self.phase_low = (self.phase_low + self.step_low) % tau;
        self.phase_high = (self.phase_high + self.step_high) % tau;

        sample
    }

    /// Fill a mono buffer with the next samples.
    pub fn fill(&mut self, buf: &mut [f32]) {
        for slot in buf.iter_mut() {
            *slot = self.next_sample();
        }
    }
}

// ---------------------------------------------------------------------------
// DialTone — cpal-backed AmbientCue
// ---------------------------------------------------------------------------

/// Bit-packed f32 shared between the control side and the audio callback.
struct SharedLevel(AtomicU32);

impl SharedLevel {
    fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }
    fn set(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

enum CueCommand {
    Start { reply: Sender<Result<(), CueError>> },
    Stop,
    SetVolume(f32),
}

/// Dial-tone playback over the default cpal output device.
///
/// The `cpal::Stream` lives on a dedicated thread (it is not `Send` on every
/// platform); this handle is a thin command channel and is freely shareable.
/// Dropping the last handle shuts the audio thread down.
pub struct DialTone {
    commands: Sender<CueCommand>,
}

impl DialTone {
    /// How long `start()` waits for the audio thread to acknowledge.
    const START_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

    /// Spawn the cue audio thread.  The output stream itself is built
    /// lazily on the first `start()` so a missing output device only fails
    /// when the cue is actually needed.
    pub fn spawn(config: CueConfig) -> Self {
        let (tx, rx) = mpsc::channel::<CueCommand>();

        std::thread::Builder::new()
            .name("cue-audio".into())
            .spawn(move || cue_thread(config, rx))
            .expect("failed to spawn cue-audio thread");

        Self { commands: tx }
    }
}

impl AmbientCue for DialTone {
    fn start(&self) -> Result<(), CueError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(CueCommand::Start { reply: reply_tx })
            .map_err(|_| CueError::Unresponsive)?;

        match reply_rx.recv_timeout(Self::START_REPLY_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err(CueError::Unresponsive),
        }
    }

    fn stop(&self) {
        let _ = self.commands.send(CueCommand::Stop);
    }

    fn set_volume(&self, level: f32) {
        let _ = self.commands.send(CueCommand::SetVolume(level));
    }
}

/// Audio-thread body: owns the cpal stream and the playing flag.
fn cue_thread(config: CueConfig, rx: mpsc::Receiver<CueCommand>) {
    let target = Arc::new(SharedLevel::new(0.0));
    let volume = Arc::new(SharedLevel::new(config.volume));
    let mut stream: Option<cpal::Stream> = None;
    let mut playing = false;

    while let Ok(command) = rx.recv() {
        match command {
            CueCommand::Start { reply } => {
                if playing {
                    let _ = reply.send(Ok(()));
                    continue;
                }

                if stream.is_none() {
                    match build_output_stream(&config, &target, &volume) {
                        Ok(s) => stream = Some(s),
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    }
                }

                // play() rejection is the platform saying "not yet", not a
                // broken device — report it retryable.
                let result = match stream.as_ref() {
                    Some(s) => s
                        .play()
                        .map_err(|e| CueError::PlaybackBlocked(e.to_string())),
                    None => Err(CueError::NoOutputDevice),
                };

                if result.is_ok() {
                    target.set(1.0);
                    playing = true;
                    log::debug!("cue: fading in");
                }
                let _ = reply.send(result);
            }

            CueCommand::Stop => {
                if playing {
                    // Fade out; the stream keeps running at zero gain so the
                    // next start() is click-free and cannot be blocked again.
                    target.set(0.0);
                    playing = false;
                    log::debug!("cue: fading out");
                }
            }

            CueCommand::SetVolume(level) => {
                volume.set(level.clamp(0.0, 1.0));
            }
        }
    }
}

fn build_output_stream(
    config: &CueConfig,
    target: &Arc<SharedLevel>,
    volume: &Arc<SharedLevel>,
) -> Result<cpal::Stream, CueError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(CueError::NoOutputDevice)?;

    let supported = device
        .default_output_config()
        .map_err(|e| CueError::Stream(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let stream_config: cpal::StreamConfig = supported.into();

    let mut generator = DialToneGenerator::new(config, sample_rate);
    let target = Arc::clone(target);
    let volume = Arc::clone(volume);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                generator.set_target_gain(target.get());
                generator.set_amplitude(volume.get());
                for frame in data.chunks_mut(channels) {
                    let sample = generator.next_sample();
                    for slot in frame.iter_mut() {
                        *slot = sample;
                    }
                }
            },
            |err: cpal::StreamError| {
                log::error!("cue stream error: {err}");
            },
            None, // no timeout
        )
        .map_err(|e| CueError::Stream(e.to_string()))?;

    log::info!("cue: output stream ready ({sample_rate} Hz, {channels} ch)");
    Ok(stream)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> DialToneGenerator {
        DialToneGenerator::new(&CueConfig::default(), 48_000)
    }

    #[test]
    fn silent_until_faded_in() {
        let mut gen = generator();
        // target gain stays 0 — output must be all zeros.
        let mut buf = vec![1.0_f32; 1_024];
        gen.fill(&mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn fade_in_reaches_full_gain_after_fade_duration() {
        let cfg = CueConfig::default(); // fade_ms = 400
        let mut gen = DialToneGenerator::new(&cfg, 48_000);
        gen.set_target_gain(1.0);

        let fade_samples = (0.4 * 48_000.0) as usize;
        let mut buf = vec![0.0_f32; fade_samples + 100];
        gen.fill(&mut buf);

        assert!((gen.gain() - 1.0).abs() < 1e-6);
    }

    /// The gain ramp bounds per-sample steps, so consecutive samples can
    /// never jump — the audible-click failure mode.
    #[test]
    fn fade_produces_no_sample_discontinuity() {
        let mut gen = generator();
        gen.set_target_gain(1.0);

        let mut buf = vec![0.0_f32; 48_000];
        gen.fill(&mut buf);
        gen.set_target_gain(0.0); // fade out mid-stream
        let mut tail = vec![0.0_f32; 48_000];
        gen.fill(&mut tail);
        buf.extend(tail);

        let max_jump = buf
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f32, f32::max);
        // 350+440 Hz at 0.3 volume changes by well under 0.05 per sample at
        // 48 kHz; a click would be an order of magnitude larger.
        assert!(max_jump < 0.05, "max jump {max_jump}");
    }

    #[test]
    fn output_respects_volume_ceiling() {
        let cfg = CueConfig {
            volume: 0.3,
            ..CueConfig::default()
        };
        let mut gen = DialToneGenerator::new(&cfg, 48_000);
        gen.set_target_gain(1.0);

        let mut buf = vec![0.0_f32; 96_000];
        gen.fill(&mut buf);

        let peak = buf.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.3 + 1e-4, "peak {peak}");
        assert!(peak > 0.1); // and the tone is actually there
    }

    #[test]
    fn fade_out_returns_to_silence() {
        let mut gen = generator();
        gen.set_target_gain(1.0);
        let mut buf = vec![0.0_f32; 48_000];
        gen.fill(&mut buf);

        gen.set_target_gain(0.0);
        let mut tail = vec![0.0_f32; 48_000];
        gen.fill(&mut tail);

        assert_eq!(gen.gain(), 0.0);
        // Last samples are fully silent.
        assert!(tail[tail.len() - 100..].iter().all(|s| *s == 0.0));
    }

    /// Crude spectral check: correlate the output against both expected
    /// tone frequencies and against an absent one.
    #[test]
    fn output_contains_both_tones() {
        let mut gen = generator();
        gen.set_target_gain(1.0);
        // Skip past the fade so the signal is steady.
        let mut warmup = vec![0.0_f32; 48_000];
        gen.fill(&mut warmup);

        let mut buf = vec![0.0_f32; 48_000];
        gen.fill(&mut buf);

        let power_at = |freq: f32| -> f32 {
            let tau = 2.0 * std::f32::consts::PI;
            let (mut re, mut im) = (0.0_f32, 0.0_f32);
            for (i, s) in buf.iter().enumerate() {
                let phase = tau * freq * i as f32 / 48_000.0;
                re += s * phase.cos();
                im += s * phase.sin();
            }
            (re * re + im * im).sqrt() / buf.len() as f32
        };

        let low = power_at(350.0);
        let high = power_at(440.0);
        let absent = power_at(1_000.0);
        assert!(low > absent * 10.0, "350 Hz power {low} vs {absent}");
        assert!(high > absent * 10.0, "440 Hz power {high} vs {absent}");
    }
}
