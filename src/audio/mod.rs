//! Audio pipeline — microphone capture → framing → analysis → boundary events,
//! plus the synthesized ambient cue.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → downmix + frame
//!           → SpectrumAnalyzer → VoiceSignal → VoiceBoundaryDetector
//!           → ListenerEvent → SessionController
//! ```
//!
//! The ambient cue runs the other direction: [`DialTone`] synthesizes the
//! waiting-state dial tone on the output device, driven by the session
//! controller through the [`AmbientCue`] trait.

pub mod analyzer;
pub mod capture;
pub mod cue;
pub mod detector;

pub use analyzer::{SignalAnalyzer, SpectrumAnalyzer, VoiceSignal};
pub use capture::{AudioCapture, AudioChunk, CaptureError, StreamHandle};
pub use cue::{AmbientCue, CueError, DialTone, DialToneGenerator};
pub use detector::{
    run_listener, BoundaryPhase, DetectorError, ListenerEvent, VoiceBoundaryDetector, VoiceEvent,
};
