//! Session state machine data model.
//!
//! [`SessionPhase`] is the kiosk-level state; [`SessionState`] carries the
//! companion fields with documented reset points.  The state is created once
//! per kiosk process and cycles forever — there is no terminal phase.

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Phases of the kiosk session lifecycle.
///
/// The state machine transitions are:
///
/// ```text
/// WaitingForVoice ──VoiceStart──▶ CallActive
///                                  ──goodbye / session timeout /
///                                    true silence──▶ Ending
/// Ending ──teardown + reset──▶ WaitingForVoice   (cycle repeats)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Ambient cue playing; detector listening for a visitor.
    #[default]
    WaitingForVoice,

    /// A remote conversational session is live.
    CallActive,

    /// Teardown in progress; guarded so it runs exactly once.
    Ending,
}

impl SessionPhase {
    /// A short human-readable label for logs and any UI shell.
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::WaitingForVoice => "Waiting",
            SessionPhase::CallActive => "In call",
            SessionPhase::Ending => "Ending",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Companion fields of the session state machine.
///
/// Written only by the session controller; all fields are last-writer-wins
/// scalars, so no synchronisation beyond single ownership is needed.
///
/// Invariant: `has_user_responded` is `false` whenever
/// `phase == WaitingForVoice`, and is reset exactly when the transition back
/// to waiting completes.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// When the current call was activated (ms).  0 while waiting.
    pub session_start_ms: u64,
    /// Last time either the visitor or the agent produced speech content.
    pub last_any_speech_ms: u64,
    /// Set on the first genuine visitor utterance of the current session.
    pub has_user_responded: bool,
    /// Guards idempotent teardown under coincident triggers.
    pub ending_in_progress: bool,
    /// Single-activation latch: set when a call starts, cleared on reset.
    /// While set, further `VoiceStart` events do not activate.
    pub activation_latched: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::WaitingForVoice,
            session_start_ms: 0,
            last_any_speech_ms: 0,
            has_user_responded: false,
            ending_in_progress: false,
            activation_latched: false,
        }
    }

    /// Enter `CallActive` at `now_ms`, latching further activations out.
    pub fn activate(&mut self, now_ms: u64) {
        self.phase = SessionPhase::CallActive;
        self.session_start_ms = now_ms;
        self.last_any_speech_ms = now_ms;
        self.activation_latched = true;
    }

    /// The single reset point back to `WaitingForVoice`.
    ///
    /// Clears every per-session field unconditionally — a stuck session is a
    /// worse failure than a lost transcript, so this must never be skipped.
    pub fn reset_to_waiting(&mut self) {
        self.phase = SessionPhase::WaitingForVoice;
        self.session_start_ms = 0;
        self.last_any_speech_ms = 0;
        self.has_user_responded = false;
        self.ending_in_progress = false;
        self.activation_latched = false;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Session identifiers
// ---------------------------------------------------------------------------

/// Generate a process-unique session id: unix millis plus a counter.
pub fn next_session_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("session-{millis}-{n}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
