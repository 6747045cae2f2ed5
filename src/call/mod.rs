//! External collaborator contracts: the remote conversational call and
//! transcript persistence.
//!
//! The kiosk core treats the remote call as an opaque session: it can be
//! started and stopped, and it pushes [`CallEvent`]s while running.  The
//! session controller interprets nothing about the conversation beyond the
//! speaker tag and a configured goodbye marker.
//!
//! * [`CallSession`] — async trait implemented by call backends.
//! * [`TranscriptStore`] — async trait for fire-and-forget persistence.
//! * [`JsonFileStore`] — local JSON-file store (one file per session).
//! * [`NullCall`] — logging stand-in used until a real backend is wired.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Speaker / CallEvent
// ---------------------------------------------------------------------------

/// Who produced a piece of conversational content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The visitor speaking into the handset.
    User,
    /// The remote conversational agent.
    Agent,
}

/// An event pushed by the call collaborator while a session is live.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// A piece of transcript content from either speaker.
    Content {
        speaker: Speaker,
        content: String,
        timestamp_ms: u64,
    },
    /// The remote side terminated the call.
    Ended,
}

/// One persisted transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub content: String,
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a call backend.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("call backend refused to start: {0}")]
    StartFailed(String),

    #[error("call backend failed to stop cleanly: {0}")]
    StopFailed(String),
}

/// Errors surfaced by a transcript store.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write transcript: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialise transcript: {0}")]
    Serialise(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// CallSession
// ---------------------------------------------------------------------------

/// Opaque handle to a started call, returned by [`CallSession::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHandle {
    /// Kiosk-assigned session identifier, echoed back on stop and persist.
    pub session_id: String,
}

/// Async contract for the remote conversational call.
///
/// Implementations push [`CallEvent`]s over the channel supplied at wiring
/// time (see `main.rs`); this trait only covers lifecycle.  `stop` must be
/// safe to call on an already-ended session.
#[async_trait]
pub trait CallSession: Send + Sync {
    /// Start a remote session.  Network-bound; must not be called from the
    /// audio tick loop.
    async fn start(&self, session_id: &str) -> Result<CallHandle, CallError>;

    /// Stop a running session.  Idempotent at the backend's discretion.
    async fn stop(&self, handle: &CallHandle) -> Result<(), CallError>;
}

// ---------------------------------------------------------------------------
// TranscriptStore
// ---------------------------------------------------------------------------

/// Fire-and-forget transcript persistence.
///
/// The session controller spawns `persist` and never awaits the outcome as
/// part of its teardown — retry and recovery belong to the store, not the
/// controller.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn persist(
        &self,
        session_id: &str,
        transcript: &[TranscriptLine],
    ) -> Result<(), PersistError>;
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Writes each session transcript as `<session_id>.json` under a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl TranscriptStore for JsonFileStore {
    async fn persist(
        &self,
        session_id: &str,
        transcript: &[TranscriptLine],
    ) -> Result<(), PersistError> {
        let path = self.dir.join(format!("{session_id}.json"));
        let payload = serde_json::to_vec_pretty(transcript)?;

        let dir = self.dir.clone();
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&path, payload).await?;

        log::debug!(
            "persisted {} transcript lines to {}",
            transcript.len(),
            path.display()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NullCall — stand-in backend
// ---------------------------------------------------------------------------

/// Call backend that starts nothing and logs every lifecycle call.
///
/// Lets the kiosk binary run end-to-end (cue, detector, session cycling)
/// before a real conversational backend is wired in.
pub struct NullCall;

#[async_trait]
impl CallSession for NullCall {
    async fn start(&self, session_id: &str) -> Result<CallHandle, CallError> {
        log::info!("call: start requested (session {session_id}) — null backend");
        Ok(CallHandle {
            session_id: session_id.to_owned(),
        })
    }

    async fn stop(&self, handle: &CallHandle) -> Result<(), CallError> {
        log::info!(
            "call: stop requested (session {}) — null backend",
            handle.session_id
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

#[cfg(test)]
pub use test_doubles::{FailingCall, FailingStore, MockCall, MockStore};

#[cfg(test)]
mod test_doubles {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts starts and stops; always succeeds.
    pub struct MockCall {
        pub starts: Arc<AtomicUsize>,
        pub stops: Arc<AtomicUsize>,
    }

    impl MockCall {
        pub fn new() -> Self {
            Self {
                starts: Arc::new(AtomicUsize::new(0)),
                stops: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl CallSession for MockCall {
        async fn start(&self, session_id: &str) -> Result<CallHandle, CallError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(CallHandle {
                session_id: session_id.to_owned(),
            })
        }

        async fn stop(&self, _handle: &CallHandle) -> Result<(), CallError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails on stop (start succeeds) — exercises teardown error absorption.
    pub struct FailingCall {
        pub stops_attempted: Arc<AtomicUsize>,
    }

    impl FailingCall {
        pub fn new() -> Self {
            Self {
                stops_attempted: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl CallSession for FailingCall {
        async fn start(&self, session_id: &str) -> Result<CallHandle, CallError> {
            Ok(CallHandle {
                session_id: session_id.to_owned(),
            })
        }

        async fn stop(&self, _handle: &CallHandle) -> Result<(), CallError> {
            self.stops_attempted.fetch_add(1, Ordering::SeqCst);
            Err(CallError::StopFailed("simulated network drop".into()))
        }
    }

    /// Counts persist calls; always succeeds.
    pub struct MockStore {
        pub persists: Arc<AtomicUsize>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self {
                persists: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl TranscriptStore for MockStore {
        async fn persist(
            &self,
            _session_id: &str,
            _transcript: &[TranscriptLine],
        ) -> Result<(), PersistError> {
            self.persists.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Always fails — exercises the "reset must still happen" path.
    pub struct FailingStore;

    #[async_trait]
    impl TranscriptStore for FailingStore {
        async fn persist(
            &self,
            _session_id: &str,
            _transcript: &[TranscriptLine],
        ) -> Result<(), PersistError> {
            Err(PersistError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated disk full",
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
