//! Kiosk entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`KioskConfig`] from disk (returns default on first run).
//! 3. Create the tokio runtime.
//! 4. Build the collaborators: call backend, transcript store, ambient cue.
//! 5. Start cpal microphone capture and the listener thread (analysis tick
//!    loop feeding boundary events into the controller).
//! 6. Run the session controller until the listener stops; on a fatal
//!    microphone fault, re-initialise and keep the kiosk alive.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use phonebooth::{
    audio::{run_listener, AmbientCue, AudioCapture, AudioChunk, DialTone, ListenerEvent},
    call::{CallEvent, CallSession, JsonFileStore, NullCall, TranscriptStore},
    config::{KioskConfig, KioskPaths},
    session::SessionController,
};

/// Pause before re-initialising the microphone after a fatal fault, so a
/// flapping device does not spin the kiosk.
const REINIT_BACKOFF: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("phonebooth kiosk starting up");

    // 2. Configuration
    let config = KioskConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        KioskConfig::default()
    });
    log::info!("profile: {:?}", config.profile);

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    // 4. Collaborators.  The call backend is the integration point for the
    //    remote conversational service; NullCall lets the kiosk cycle
    //    end-to-end until one is wired in.
    let call: Arc<dyn CallSession> = Arc::new(NullCall);
    let store: Arc<dyn TranscriptStore> =
        Arc::new(JsonFileStore::new(KioskPaths::new().transcripts_dir));
    let cue: Arc<dyn AmbientCue> = Arc::new(DialTone::spawn(config.cue.clone()));

    // 5 + 6. Run kiosk cycles.  Each cycle owns one microphone stream, one
    // listener thread and one controller run; a fatal detector fault ends
    // the cycle and we re-initialise after a short backoff.
    loop {
        let (event_tx, event_rx) = mpsc::channel::<ListenerEvent>(256);

        // The call backend pushes its events here; NullCall never sends, but
        // the channel keeps the wiring identical for a real backend, which
        // would hold a clone of `call_tx`.
        let (call_tx, call_rx) = mpsc::channel::<CallEvent>(64);
        let _call_backend_tx = call_tx;

        let listener = match start_listening(&config, event_tx) {
            Ok(handles) => handles,
            Err(e) => {
                log::error!("microphone unavailable: {e:#}; retrying in {REINIT_BACKOFF:?}");
                std::thread::sleep(REINIT_BACKOFF);
                continue;
            }
        };

        let controller = SessionController::new(
            config.session.clone(),
            Arc::clone(&call),
            Arc::clone(&store),
            Arc::clone(&cue),
        );

        // Blocks until the listener thread stops (device fault or shutdown).
        rt.block_on(controller.run(event_rx, call_rx));

        drop(listener); // release the microphone before re-initialising
        log::warn!("listener stopped; re-initialising in {REINIT_BACKOFF:?}");
        std::thread::sleep(REINIT_BACKOFF);
    }
}

/// Handles that keep one capture cycle alive.
struct ListenerHandles {
    /// RAII guard for the cpal stream; dropping releases the microphone.
    _stream: phonebooth::audio::StreamHandle,
}

/// Start microphone capture and the listener thread for one kiosk cycle.
fn start_listening(
    config: &KioskConfig,
    event_tx: mpsc::Sender<ListenerEvent>,
) -> Result<ListenerHandles> {
    let capture = AudioCapture::new().context("opening default input device")?;
    log::info!(
        "audio capture ready ({} Hz, {} ch)",
        capture.sample_rate(),
        capture.channels()
    );

    // Keep the configured bin mapping honest: analysis uses the device rate.
    let mut detector_config = config.detector.clone();
    detector_config.sample_rate = capture.sample_rate();

    let (chunk_tx, chunk_rx) = std_mpsc::channel::<AudioChunk>();
    let (fault_tx, fault_rx) = std_mpsc::channel::<String>();

    let stream = capture
        .start(chunk_tx, fault_tx)
        .context("starting capture stream")?;

    std::thread::Builder::new()
        .name("voice-listener".into())
        .spawn(move || run_listener(chunk_rx, fault_rx, detector_config, event_tx))
        .context("spawning voice-listener thread")?;

    Ok(ListenerHandles { _stream: stream })
}
