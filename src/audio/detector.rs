//! Voice boundary detection — a hysteresis state machine over per-frame
//! [`VoiceSignal`]s.
//!
//! [`VoiceBoundaryDetector`] turns the continuous, noisy feature stream into
//! three discrete events:
//!
//! * [`VoiceEvent::VoiceStart`] — someone has been speaking into the handset
//!   for at least `min_voice_duration_ms`;
//! * [`VoiceEvent::VoiceEnd`] — the utterance ended;
//! * [`VoiceEvent::SilenceTimeout`] — emitted immediately after `VoiceEnd`
//!   once `silence_timeout_ms` of silence has elapsed.
//!
//! # State machine
//!
//! ```text
//! Idle ──voice frame──▶ Rising ──sustained ≥ min_voice_duration──▶ Active
//!   ▲                     │                                          │
//!   └──gap > rise_forget──┘        silence ≥ silence_timeout ────────┘
//!                                  (emit VoiceEnd + SilenceTimeout)
//! ```
//!
//! A frame is voice only when it clears **both** the volume gate and the
//! band-ratio gate; sub-threshold dips shorter than the silence timeout do
//! not split an utterance, and onsets that never reach the duration gate are
//! forgotten rather than banked.
//!
//! [`run_listener`] is the single logical tick loop: it frames the cpal
//! chunk stream, runs the analyzer and the state machine, and forwards
//! [`ListenerEvent`]s to the session controller.  No other thread mutates
//! detector state.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;

use crate::audio::analyzer::{SpectrumAnalyzer, VoiceSignal};
use crate::audio::capture::AudioChunk;
use crate::config::DetectorConfig;

// ---------------------------------------------------------------------------
// VoiceEvent / BoundaryPhase
// ---------------------------------------------------------------------------

/// Discrete events emitted by the boundary detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEvent {
    /// A genuine utterance began (debounced past `min_voice_duration_ms`).
    VoiceStart,
    /// The utterance ended.
    VoiceEnd,
    /// Silence persisted for `silence_timeout_ms` after the utterance.
    SilenceTimeout,
}

/// Phases of the hysteresis state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryPhase {
    /// No voice and no candidate onset.
    #[default]
    Idle,
    /// A candidate onset is accumulating toward the duration gate.
    Rising,
    /// A confirmed utterance is in progress.
    Active,
}

// ---------------------------------------------------------------------------
// DetectorError
// ---------------------------------------------------------------------------

/// Fatal faults of a detector instance.
///
/// Surfaced once to the caller; the detector never retries on its own.  The
/// session controller decides whether to tear down and re-initialise.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("microphone permission denied or revoked")]
    PermissionDenied,

    #[error("audio device failed: {0}")]
    Device(String),
}

impl DetectorError {
    /// Classify a cpal stream-error message into the kiosk error taxonomy.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("permission") || lower.contains("denied") {
            Self::PermissionDenied
        } else {
            Self::Device(message.to_owned())
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceBoundaryDetector
// ---------------------------------------------------------------------------

/// Hysteresis state machine, ticked once per analysis frame.
///
/// Created at listener start, mutated only by [`tick`](Self::tick), destroyed
/// with the listener.  `rising_since_ms == 0` encodes "no candidate onset".
pub struct VoiceBoundaryDetector {
    config: DetectorConfig,
    phase: BoundaryPhase,
    rising_since_ms: u64,
    last_voice_ms: u64,
    activity: f32,
}

impl VoiceBoundaryDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            phase: BoundaryPhase::Idle,
            rising_since_ms: 0,
            last_voice_ms: 0,
            activity: 0.0,
        }
    }

    /// Current phase (for diagnostics and tests).
    pub fn phase(&self) -> BoundaryPhase {
        self.phase
    }

    /// Continuous activity level `max(volume, band_ratio)` of the last tick.
    ///
    /// UI feedback only — it never influences transitions.
    pub fn activity_level(&self) -> f32 {
        self.activity
    }

    /// Advance the machine by one frame; returns the events it produced.
    ///
    /// The frame's own capture timestamp is the clock — the detector never
    /// reads wall time, which keeps it deterministic under test.
    pub fn tick(&mut self, signal: &VoiceSignal) -> Vec<VoiceEvent> {
        let now = signal.timestamp_ms;
        let is_voice = signal.volume_level > self.config.threshold
            && signal.voice_band_ratio > self.config.secondary_band_gate;

        self.activity = signal.volume_level.max(signal.voice_band_ratio);

        let mut events = Vec::new();

        if is_voice {
            // Begin a candidate onset; no event yet.
            if self.rising_since_ms == 0 {
                self.rising_since_ms = now;
                if self.phase == BoundaryPhase::Idle {
                    self.phase = BoundaryPhase::Rising;
                }
            }

            // Promote once the onset has sustained past the duration gate.
            // This debounce keeps transient spikes from registering as speech.
            if self.phase != BoundaryPhase::Active
                && self.rising_since_ms != 0
                && now.saturating_sub(self.rising_since_ms) >= self.config.min_voice_duration_ms
            {
                self.phase = BoundaryPhase::Active;
                events.push(VoiceEvent::VoiceStart);
                log::debug!("detector: VoiceStart at {now}ms");
            }

            // Any voice frame cancels a pending silence countdown.
            self.last_voice_ms = now;
        } else {
            match self.phase {
                BoundaryPhase::Active => {
                    if now.saturating_sub(self.last_voice_ms) >= self.config.silence_timeout_ms {
                        self.phase = BoundaryPhase::Idle;
                        self.rising_since_ms = 0;
                        events.push(VoiceEvent::VoiceEnd);
                        events.push(VoiceEvent::SilenceTimeout);
                        log::debug!("detector: VoiceEnd + SilenceTimeout at {now}ms");
                    }
                }
                _ => {
                    // A short burst that never reached the duration gate is
                    // forgotten; partial progress never banks indefinitely.
                    if self.rising_since_ms != 0
                        && now.saturating_sub(self.last_voice_ms) > self.config.rise_forget_ms
                    {
                        self.rising_since_ms = 0;
                        self.phase = BoundaryPhase::Idle;
                    }
                }
            }
        }

        events
    }
}

// ---------------------------------------------------------------------------
// ListenerEvent
// ---------------------------------------------------------------------------

/// Events forwarded from the listener loop to the session controller.
#[derive(Debug)]
pub enum ListenerEvent {
    /// A boundary event with the frame timestamp it occurred at.
    Boundary { event: VoiceEvent, at_ms: u64 },
    /// Continuous activity level for UI feedback.
    Level(f32),
    /// Fatal detector fault; the loop terminates after sending this.
    Fault(DetectorError),
}

// ---------------------------------------------------------------------------
// Listener loop
// ---------------------------------------------------------------------------

/// How long the loop waits for a chunk before polling the fault channel.
const CHUNK_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Drive analyzer and detector over the live capture stream.
///
/// Runs on a dedicated std thread (cpal chunks arrive over a std mpsc
/// channel).  Chunks are downmixed to mono and framed into `fft_size`
/// windows; each full window becomes exactly one analysis tick.  Events are
/// pushed into the tokio channel consumed by the session controller.
///
/// Returns when the capture channel disconnects or a fatal device fault is
/// forwarded — the caller owns re-initialisation.
pub fn run_listener(
    chunk_rx: Receiver<AudioChunk>,
    fault_rx: Receiver<String>,
    config: DetectorConfig,
    event_tx: tokio_mpsc::Sender<ListenerEvent>,
) {
    let mut analyzer = SpectrumAnalyzer::new(&config);
    let mut detector = VoiceBoundaryDetector::new(config);
    let frame_len = analyzer.frame_len();
    let mut pending: Vec<f32> = Vec::with_capacity(frame_len * 2);
    let epoch = Instant::now();

    loop {
        // Device faults preempt audio processing: surface once, then stop.
        if let Ok(message) = fault_rx.try_recv() {
            let fault = DetectorError::classify(&message);
            log::error!("detector: fatal device fault: {fault}");
            let _ = event_tx.blocking_send(ListenerEvent::Fault(fault));
            return;
        }

        let chunk = match chunk_rx.recv_timeout(CHUNK_RECV_TIMEOUT) {
            Ok(chunk) => chunk,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("detector: capture channel closed, listener stopping");
                return;
            }
        };

        pending.extend(downmix_mono(&chunk.samples, chunk.channels));

        while pending.len() >= frame_len {
            let frame: Vec<f32> = pending.drain(..frame_len).collect();
            let now_ms = epoch.elapsed().as_millis() as u64;

            let signal = analyzer.analyze_frame(&frame, now_ms);
            for event in detector.tick(&signal) {
                if event_tx
                    .blocking_send(ListenerEvent::Boundary { event, at_ms: now_ms })
                    .is_err()
                {
                    return; // controller gone
                }
            }
            let _ = event_tx.blocking_send(ListenerEvent::Level(detector.activity_level()));
        }
    }
}

/// Average interleaved channels down to mono.
fn downmix_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> DetectorConfig {
        DetectorConfig {
            threshold: 0.1,
            secondary_band_gate: 0.2,
            min_voice_duration_ms: 200,
            silence_timeout_ms: 1_500,
            rise_forget_ms: 200,
            ..DetectorConfig::default()
        }
    }

    fn voice(at_ms: u64) -> VoiceSignal {
        VoiceSignal {
            volume_level: 0.5,
            voice_band_ratio: 0.4,
            timestamp_ms: at_ms,
        }
    }

    fn silence(at_ms: u64) -> VoiceSignal {
        VoiceSignal::silent(at_ms)
    }

    /// Tick voiced frames every 10 ms over `[from, to)`; collect events.
    fn tick_range(
        detector: &mut VoiceBoundaryDetector,
        from: u64,
        to: u64,
        voiced: bool,
    ) -> Vec<(VoiceEvent, u64)> {
        let mut out = Vec::new();
        let mut t = from;
        while t < to {
            let signal = if voiced { voice(t) } else { silence(t) };
            for e in detector.tick(&signal) {
                out.push((e, t));
            }
            t += 10;
        }
        out
    }

    // ---- predicate: both gates required ---

    #[test]
    fn loud_frame_without_band_content_is_not_voice() {
        // A door slam: plenty of volume, no speech-band concentration.
        let mut det = VoiceBoundaryDetector::new(test_config());
        for t in (1_000..2_000).step_by(10) {
            let slam = VoiceSignal {
                volume_level: 0.9,
                voice_band_ratio: 0.05,
                timestamp_ms: t,
            };
            assert!(det.tick(&slam).is_empty());
        }
        assert_eq!(det.phase(), BoundaryPhase::Idle);
    }

    #[test]
    fn tonal_hum_without_volume_is_not_voice() {
        // A faint hum: high band ratio, negligible energy.
        let mut det = VoiceBoundaryDetector::new(test_config());
        for t in (1_000..2_000).step_by(10) {
            let hum = VoiceSignal {
                volume_level: 0.05,
                voice_band_ratio: 0.8,
                timestamp_ms: t,
            };
            assert!(det.tick(&hum).is_empty());
        }
        assert_eq!(det.phase(), BoundaryPhase::Idle);
    }

    // ---- onset debounce ---

    #[test]
    fn sustained_voice_yields_exactly_one_voice_start() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        let events = tick_range(&mut det, 1_000, 2_000, true);

        let starts: Vec<_> = events
            .iter()
            .filter(|(e, _)| *e == VoiceEvent::VoiceStart)
            .collect();
        assert_eq!(starts.len(), 1);
        // Fires once the onset has sustained min_voice_duration_ms (200 ms).
        assert_eq!(starts[0].1, 1_200);
        assert_eq!(det.phase(), BoundaryPhase::Active);
    }

    #[test]
    fn short_burst_yields_no_voice_start() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        // 150 ms of voice — under the 200 ms duration gate.
        let events = tick_range(&mut det, 1_000, 1_150, true);
        assert!(events.is_empty());
        // Followed by silence: still nothing.
        let events = tick_range(&mut det, 1_150, 3_000, false);
        assert!(events.is_empty());
        assert_eq!(det.phase(), BoundaryPhase::Idle);
    }

    #[test]
    fn partial_onsets_do_not_bank_across_forget_window() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        // Two 150 ms bursts separated by 300 ms of silence (> 200 ms forget
        // window).  Neither alone satisfies the duration gate, and the gap
        // must prevent them from accumulating.
        assert!(tick_range(&mut det, 1_000, 1_150, true).is_empty());
        assert!(tick_range(&mut det, 1_150, 1_450, false).is_empty());
        assert!(tick_range(&mut det, 1_450, 1_600, true).is_empty());
        assert_ne!(det.phase(), BoundaryPhase::Active);
    }

    #[test]
    fn brief_gap_within_forget_window_still_promotes() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        // 100 ms voice, 100 ms gap (≤ forget window), then more voice: the
        // onset clock keeps running from the first burst.
        assert!(tick_range(&mut det, 1_000, 1_100, true).is_empty());
        assert!(tick_range(&mut det, 1_100, 1_200, false).is_empty());
        let events = tick_range(&mut det, 1_200, 1_400, true);
        assert_eq!(
            events
                .iter()
                .filter(|(e, _)| *e == VoiceEvent::VoiceStart)
                .count(),
            1
        );
    }

    // ---- utterance end ---

    #[test]
    fn dip_shorter_than_silence_timeout_does_not_end_utterance() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        tick_range(&mut det, 1_000, 1_500, true); // VoiceStart at 1200

        // 800 ms dip — under the 1500 ms silence timeout.
        let dip_events = tick_range(&mut det, 1_500, 2_300, false);
        assert!(dip_events.is_empty());

        // Voice resumes; the same utterance continues with no new start.
        let resume_events = tick_range(&mut det, 2_300, 2_600, true);
        assert!(resume_events.is_empty());
        assert_eq!(det.phase(), BoundaryPhase::Active);
    }

    #[test]
    fn sustained_silence_emits_end_then_timeout_exactly_once() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        tick_range(&mut det, 1_000, 1_500, true);

        let events = tick_range(&mut det, 1_500, 5_000, false);
        assert_eq!(
            events.iter().map(|(e, _)| *e).collect::<Vec<_>>(),
            vec![VoiceEvent::VoiceEnd, VoiceEvent::SilenceTimeout]
        );
        // Both fire on the same tick, silence_timeout_ms after the last
        // voiced frame (1490 + 1500 → first tick ≥ 2990).
        assert_eq!(events[0].1, events[1].1);
        assert_eq!(events[0].1, 2_990);
        assert_eq!(det.phase(), BoundaryPhase::Idle);
    }

    #[test]
    fn full_cycle_produces_one_start_one_end_pair() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        let mut all = Vec::new();
        all.extend(tick_range(&mut det, 1_000, 2_000, true));
        all.extend(tick_range(&mut det, 2_000, 2_500, false)); // dip
        all.extend(tick_range(&mut det, 2_500, 3_000, true));
        all.extend(tick_range(&mut det, 3_000, 6_000, false)); // real end

        let kinds: Vec<_> = all.iter().map(|(e, _)| *e).collect();
        assert_eq!(
            kinds,
            vec![
                VoiceEvent::VoiceStart,
                VoiceEvent::VoiceEnd,
                VoiceEvent::SilenceTimeout
            ]
        );

        // A second utterance starts a fresh cycle.
        let again = tick_range(&mut det, 6_000, 7_000, true);
        assert_eq!(
            again
                .iter()
                .filter(|(e, _)| *e == VoiceEvent::VoiceStart)
                .count(),
            1
        );
    }

    // ---- activity level ---

    #[test]
    fn activity_level_is_max_of_features() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        det.tick(&VoiceSignal {
            volume_level: 0.3,
            voice_band_ratio: 0.7,
            timestamp_ms: 1_000,
        });
        assert_eq!(det.activity_level(), 0.7);

        det.tick(&VoiceSignal {
            volume_level: 0.9,
            voice_band_ratio: 0.2,
            timestamp_ms: 1_010,
        });
        assert_eq!(det.activity_level(), 0.9);
    }

    // ---- end-to-end timing property ---

    /// 300 ms of speech at 0.5 volume / 0.4 band ratio with the reference
    /// tuning must produce exactly one VoiceStart ~200 ms into the run.
    #[test]
    fn reference_timing_scenario() {
        let mut det = VoiceBoundaryDetector::new(test_config());
        let events = tick_range(&mut det, 0, 300, true);

        let starts: Vec<_> = events
            .iter()
            .filter(|(e, _)| *e == VoiceEvent::VoiceStart)
            .collect();
        assert_eq!(starts.len(), 1);
        let at = starts[0].1;
        assert!((200..=220).contains(&at), "VoiceStart at {at}ms");
    }

    // ---- error classification ---

    #[test]
    fn classify_maps_permission_messages() {
        assert!(matches!(
            DetectorError::classify("Access denied by the OS"),
            DetectorError::PermissionDenied
        ));
        assert!(matches!(
            DetectorError::classify("microphone permission revoked"),
            DetectorError::PermissionDenied
        ));
        assert!(matches!(
            DetectorError::classify("device disconnected"),
            DetectorError::Device(_)
        ));
    }

    // ---- downmix ---

    #[test]
    fn downmix_averages_stereo_pairs() {
        let stereo = vec![0.2, 0.4, -0.2, -0.4];
        let mono = downmix_mono(&stereo, 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] + 0.3).abs() < 1e-6);
    }

    #[test]
    fn downmix_mono_passthrough() {
        let mono = vec![0.1, 0.2];
        assert_eq!(downmix_mono(&mono, 1), mono);
    }
}
