//! Session controller — the kiosk-level state machine.
//!
//! [`SessionController`] consumes boundary events from the listener loop and
//! push events from the call collaborator, and drives the ambient cue and
//! the call lifecycle:
//!
//! ```text
//! ListenerEvent::VoiceStart ──▶ start call, CallActive (cue keeps playing)
//! CallEvent::Content(agent)  ──▶ stop cue on first agent content
//! goodbye / session timeout /
//! true silence               ──▶ Ending: stop call, persist transcript,
//!                                reset, restart cue, WaitingForVoice
//! ```
//!
//! All transition methods take an explicit `now_ms` so the machine is
//! deterministic under test; [`run`](SessionController::run) supplies wall
//! time and the timers.  The controller is the sole writer of its state —
//! the listener loop only ever sends events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};

use crate::audio::{AmbientCue, CueError, DetectorError, ListenerEvent, VoiceEvent};
use crate::call::{CallEvent, CallHandle, CallSession, Speaker, TranscriptLine, TranscriptStore};
use crate::config::SessionConfig;

use super::state::{next_session_id, SessionPhase, SessionState};

// ---------------------------------------------------------------------------
// EndReason
// ---------------------------------------------------------------------------

/// Why a session is being torn down.  Logged, never branched on beyond that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The agent said a configured goodbye marker.
    Goodbye,
    /// The overall session ceiling elapsed.
    SessionTimeout,
    /// Neither speaker produced content for `user_silence_timeout_ms`.
    TrueSilence,
    /// The remote side ended the call on its own.
    RemoteEnded,
    /// The detector hit a fatal device fault mid-call.
    DetectorFault,
}

impl EndReason {
    fn label(&self) -> &'static str {
        match self {
            EndReason::Goodbye => "goodbye marker",
            EndReason::SessionTimeout => "session timeout",
            EndReason::TrueSilence => "true silence",
            EndReason::RemoteEnded => "remote ended",
            EndReason::DetectorFault => "detector fault",
        }
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Upper bound between timeout polls; keeps the silence check responsive
/// without spinning.
const MAX_POLL_DELAY_MS: u64 = 1_000;

/// Top-level kiosk state machine.  Create with
/// [`new`](SessionController::new), then drive it either through the
/// transition methods (tests) or [`run`](SessionController::run) (live).
pub struct SessionController {
    config: SessionConfig,
    state: SessionState,
    call: Arc<dyn CallSession>,
    store: Arc<dyn TranscriptStore>,
    cue: Arc<dyn AmbientCue>,

    session_id: String,
    handle: Option<CallHandle>,
    transcript: Vec<TranscriptLine>,
    /// The cue keeps playing through call setup; cleared once the agent's
    /// first content arrives.
    cue_carrying_over: bool,
    /// Set when a cue restart was rejected as retryable; the poll tick
    /// retries while waiting.
    cue_retry_pending: bool,

    activity_tx: watch::Sender<f32>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        call: Arc<dyn CallSession>,
        store: Arc<dyn TranscriptStore>,
        cue: Arc<dyn AmbientCue>,
    ) -> Self {
        let (activity_tx, _) = watch::channel(0.0);
        Self {
            config,
            state: SessionState::new(),
            call,
            store,
            cue,
            session_id: String::new(),
            handle: None,
            transcript: Vec::new(),
            cue_carrying_over: false,
            cue_retry_pending: false,
            activity_tx,
        }
    }

    /// Current phase (diagnostics and tests).
    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    #[cfg(test)]
    fn state(&self) -> &SessionState {
        &self.state
    }

    /// Subscribe to the continuous activity level for UI feedback.
    pub fn activity_watch(&self) -> watch::Receiver<f32> {
        self.activity_tx.subscribe()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Handle a debounced `VoiceStart` from the detector.
    ///
    /// Activation is single-shot per cycle: once latched, further starts are
    /// ignored until the session resets.  The ambient cue is deliberately
    /// left playing — the visitor hears continuity until the agent speaks.
    pub async fn on_voice_start(&mut self, now_ms: u64) {
        if self.state.activation_latched || self.state.phase != SessionPhase::WaitingForVoice {
            log::debug!("session: VoiceStart ignored (latched or not waiting)");
            return;
        }

        self.state.activate(now_ms);
        self.session_id = next_session_id();
        self.cue_carrying_over = true;
        log::info!("session {}: activating call", self.session_id);

        match self.call.start(&self.session_id).await {
            Ok(handle) => {
                self.handle = Some(handle);
            }
            Err(e) => {
                // A call that never started leaves nothing to tear down;
                // go straight back to waiting so the kiosk cannot stick.
                log::error!("session {}: call start failed: {e}", self.session_id);
                self.state.reset_to_waiting();
                self.cue_carrying_over = false;
            }
        }
    }

    /// Handle a push event from the call collaborator.
    ///
    /// Returns the end reason when the event should terminate the session.
    pub fn on_call_event(&mut self, event: CallEvent, now_ms: u64) -> Option<EndReason> {
        if self.state.phase != SessionPhase::CallActive {
            return None;
        }

        match event {
            CallEvent::Content {
                speaker,
                content,
                timestamp_ms,
            } => {
                self.state.last_any_speech_ms = now_ms;

                if speaker == Speaker::User && !self.state.has_user_responded {
                    self.state.has_user_responded = true;
                    log::debug!("session {}: first visitor utterance", self.session_id);
                }

                // First agent content ends the cue carry-over.
                if speaker == Speaker::Agent && self.cue_carrying_over {
                    self.cue_carrying_over = false;
                    self.cue.stop();
                }

                let goodbye = speaker == Speaker::Agent && self.is_goodbye(&content);

                self.transcript.push(TranscriptLine {
                    speaker,
                    content,
                    timestamp_ms,
                });

                goodbye.then_some(EndReason::Goodbye)
            }

            CallEvent::Ended => Some(EndReason::RemoteEnded),
        }
    }

    /// Periodic timeout check (the true-silence poll plus the session
    /// ceiling).
    ///
    /// The true-silence countdown is armed only once the visitor has spoken:
    /// agent-only speech must never end a session, nor may one end before
    /// the visitor has said anything at all.
    pub fn check_timeouts(&mut self, now_ms: u64) -> Option<EndReason> {
        if self.state.phase != SessionPhase::CallActive {
            return None;
        }

        if now_ms.saturating_sub(self.state.session_start_ms) >= self.config.session_timeout_ms {
            return Some(EndReason::SessionTimeout);
        }

        if self.state.has_user_responded
            && now_ms.saturating_sub(self.state.last_any_speech_ms)
                >= self.config.user_silence_timeout_ms
        {
            return Some(EndReason::TrueSilence);
        }

        None
    }

    /// Delay until the next timeout poll: `min(remaining, 1000 ms)`.
    pub fn next_poll_delay_ms(&self, now_ms: u64) -> u64 {
        if self.state.phase != SessionPhase::CallActive {
            return MAX_POLL_DELAY_MS;
        }

        let session_remaining = self
            .config
            .session_timeout_ms
            .saturating_sub(now_ms.saturating_sub(self.state.session_start_ms));

        let silence_remaining = if self.state.has_user_responded {
            self.config
                .user_silence_timeout_ms
                .saturating_sub(now_ms.saturating_sub(self.state.last_any_speech_ms))
        } else {
            u64::MAX
        };

        session_remaining
            .min(silence_remaining)
            .clamp(1, MAX_POLL_DELAY_MS)
    }

    /// Tear the session down and return to waiting.
    ///
    /// Idempotent: the `ending_in_progress` latch plus the phase check make
    /// coincident triggers (goodbye and timeout on the same tick) perform
    /// the side effects exactly once.  The state reset and cue restart are
    /// unconditional — they run no matter what the collaborators do.
    pub async fn end_session(&mut self, reason: EndReason) {
        if self.state.ending_in_progress || self.state.phase != SessionPhase::CallActive {
            return;
        }
        self.state.ending_in_progress = true;
        self.state.phase = SessionPhase::Ending;
        log::info!("session {}: ending ({})", self.session_id, reason.label());

        // 1. Stop the call.  Failures are logged and absorbed; they must not
        //    block the reset below.
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.call.stop(&handle).await {
                log::warn!("session {}: call stop failed: {e}", self.session_id);
            }
        }

        // 2. Fire-and-forget transcript persistence.  Retry/recovery is the
        //    store's responsibility.
        if !self.transcript.is_empty() {
            let store = Arc::clone(&self.store);
            let session_id = std::mem::take(&mut self.session_id);
            let transcript = std::mem::take(&mut self.transcript);
            tokio::spawn(async move {
                if let Err(e) = store.persist(&session_id, &transcript).await {
                    log::warn!("session {session_id}: transcript persist failed: {e}");
                }
            });
        } else {
            self.session_id.clear();
        }

        // 3. Unconditional reset and cue restart.
        self.state.reset_to_waiting();
        self.transcript.clear();
        self.cue_carrying_over = false;
        self.restart_cue();
    }

    /// Handle a fatal detector fault.
    ///
    /// Ends any active session so the kiosk resolves to waiting; the caller
    /// (the run loop / `main`) owns re-initialising the microphone, and a
    /// permission fault means "prompt again", not "loop silently".
    pub async fn on_detector_fault(&mut self, fault: DetectorError) {
        log::error!("session: detector fault: {fault}");
        if self.state.phase == SessionPhase::CallActive {
            self.end_session(EndReason::DetectorFault).await;
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn is_goodbye(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.config
            .goodbye_markers
            .iter()
            .any(|marker| lower.contains(&marker.to_lowercase()))
    }

    fn restart_cue(&mut self) {
        match self.cue.start() {
            Ok(()) => self.cue_retry_pending = false,
            Err(CueError::PlaybackBlocked(reason)) => {
                // Retryable by contract; the poll tick tries again.
                log::warn!("session: cue restart blocked ({reason}), will retry");
                self.cue_retry_pending = true;
            }
            Err(e) => {
                log::error!("session: cue restart failed: {e}");
                self.cue_retry_pending = false;
            }
        }
    }

    fn retry_cue_if_pending(&mut self) {
        if self.cue_retry_pending && self.state.phase == SessionPhase::WaitingForVoice {
            self.restart_cue();
        }
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    /// Drive the controller until both event channels close.
    ///
    /// One `select!` over the listener events, the call events and the
    /// timeout poll; every transition happens on this single task, so the
    /// boolean ending latch needs no lock.
    pub async fn run(
        mut self,
        mut listener_rx: mpsc::Receiver<ListenerEvent>,
        mut call_rx: mpsc::Receiver<CallEvent>,
    ) {
        let epoch = Instant::now();
        let now = |epoch: &Instant| epoch.elapsed().as_millis() as u64;
        let mut call_open = true;

        log::info!("session controller: waiting for voice");
        self.restart_cue();

        loop {
            let delay = Duration::from_millis(self.next_poll_delay_ms(now(&epoch)));

            tokio::select! {
                event = listener_rx.recv() => match event {
                    Some(ListenerEvent::Boundary { event: VoiceEvent::VoiceStart, at_ms }) => {
                        log::debug!("session: VoiceStart (detector t={at_ms}ms)");
                        self.on_voice_start(now(&epoch)).await;
                    }
                    Some(ListenerEvent::Boundary { .. }) => {
                        // VoiceEnd / SilenceTimeout carry no session-level
                        // meaning: true silence is judged on call content.
                    }
                    Some(ListenerEvent::Level(level)) => {
                        let _ = self.activity_tx.send(level);
                    }
                    Some(ListenerEvent::Fault(fault)) => {
                        self.on_detector_fault(fault).await;
                    }
                    None => {
                        // Listener gone; resolve to waiting and hand control
                        // back to the caller for re-initialisation.
                        if self.state.phase == SessionPhase::CallActive {
                            self.end_session(EndReason::DetectorFault).await;
                        }
                        log::info!("session controller: listener closed, stopping");
                        return;
                    }
                },

                event = call_rx.recv(), if call_open => match event {
                    Some(event) => {
                        let t = now(&epoch);
                        if let Some(reason) = self.on_call_event(event, t) {
                            self.end_session(reason).await;
                        }
                    }
                    None => {
                        call_open = false;
                        if self.state.phase == SessionPhase::CallActive {
                            self.end_session(EndReason::RemoteEnded).await;
                        }
                    }
                },

                _ = tokio::time::sleep(delay) => {
                    let t = now(&epoch);
                    if let Some(reason) = self.check_timeouts(t) {
                        self.end_session(reason).await;
                    }
                    self.retry_cue_if_pending();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
