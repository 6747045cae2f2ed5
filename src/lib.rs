//! phonebooth — the core of a voice-activated kiosk installation.
//!
//! A visitor approaches a handset while a synthesized dial tone plays;
//! speaking into it starts a remote conversational session, and going quiet
//! (or a goodbye from the agent) ends it and returns the kiosk to its
//! waiting state.  The crate owns the hard part: turning a noisy microphone
//! stream into reliable discrete events and driving a session lifecycle that
//! always recovers to a clean waiting state.
//!
//! # Architecture
//!
//! ```text
//! microphone ─▶ SpectrumAnalyzer ─▶ VoiceBoundaryDetector ─▶ events
//!                                                              │
//!           AmbientCue (dial tone) ◀── SessionController ◀─────┘
//!                                          │
//!                                          ├─▶ CallSession (external)
//!                                          └─▶ TranscriptStore (external)
//! ```
//!
//! The remote call and transcript persistence are opaque collaborators
//! behind async traits; any UI layer subscribes to the controller's
//! activity watch rather than reaching into detector state.

pub mod audio;
pub mod call;
pub mod config;
pub mod session;
