//! Session lifecycle — the kiosk-level state machine.
//!
//! [`SessionController`] consumes detector and call events and cycles the
//! kiosk through `WaitingForVoice → CallActive → Ending → WaitingForVoice`
//! forever.  [`SessionState`] holds the companion fields with their single
//! documented reset point.

pub mod controller;
pub mod state;

pub use controller::{EndReason, SessionController};
pub use state::{next_session_id, SessionPhase, SessionState};
