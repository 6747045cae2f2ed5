//! Kiosk settings structs, defaults, tuning profiles and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::KioskPaths;

// ---------------------------------------------------------------------------
// TuningProfile
// ---------------------------------------------------------------------------

/// Selects a detector tuning preset for the installation environment.
///
/// | Variant      | Threshold | Min voice | Typical venue                |
/// |--------------|-----------|-----------|------------------------------|
/// | QuietGallery | 0.1       | 200 ms    | museum room, low foot noise  |
/// | NoisyPublic  | 0.18      | 350 ms    | lobby, street-facing install |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TuningProfile {
    /// Low ambient noise — sensitive thresholds, short debounce.
    QuietGallery,
    /// High ambient noise — raised thresholds, longer debounce.
    NoisyPublic,
}

impl Default for TuningProfile {
    fn default() -> Self {
        Self::QuietGallery
    }
}

// ---------------------------------------------------------------------------
// DetectorConfig
// ---------------------------------------------------------------------------

/// Thresholds and durations for the voice boundary detector.
///
/// Immutable per detector instance — retuning requires tearing the detector
/// down and constructing a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Volume gate in `[0, 1]`; frames at or below this are never voice.
    pub threshold: f32,
    /// Voice-band ratio gate in `[0, 1]`.  A frame counts as voice only when
    /// it clears **both** this and `threshold` — volume alone cannot reject
    /// impulsive noise, band ratio alone cannot reject faint tonal hum.
    pub secondary_band_gate: f32,
    /// A candidate onset must sustain voice for this long before
    /// `VoiceStart` fires.
    pub min_voice_duration_ms: u64,
    /// Silence after an active utterance before `VoiceEnd`/`SilenceTimeout`.
    pub silence_timeout_ms: u64,
    /// A candidate onset that never reached `min_voice_duration_ms` is
    /// forgotten after this much silence.  Undocumented tuning constant from
    /// field calibration; kept configurable rather than hard-coded.
    pub rise_forget_ms: u64,
    /// Lower edge of the speech band in Hz.
    pub voice_freq_min_hz: f32,
    /// Upper edge of the speech band in Hz (300–3400 Hz = telephone band).
    pub voice_freq_max_hz: f32,
    /// FFT window size in samples; also the analysis frame length.
    pub fft_size: usize,
    /// Capture sample rate in Hz used for the bin→frequency mapping.
    pub sample_rate: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            secondary_band_gate: 0.2,
            min_voice_duration_ms: 200,
            silence_timeout_ms: 1_500,
            rise_forget_ms: 200,
            voice_freq_min_hz: 300.0,
            voice_freq_max_hz: 3_400.0,
            fft_size: 2_048,
            sample_rate: 48_000,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Session lifecycle timeouts and goodbye detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Hard ceiling on a single call, measured from activation.
    pub session_timeout_ms: u64,
    /// True-silence window: neither speaker has produced content for this
    /// long.  Only armed after the visitor has spoken at least once.
    pub user_silence_timeout_ms: u64,
    /// Case-insensitive substrings in agent content that end the session.
    pub goodbye_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 300_000,
            user_silence_timeout_ms: 30_000,
            goodbye_markers: vec!["goodbye".into(), "bye for now".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// CueConfig
// ---------------------------------------------------------------------------

/// Ambient dial-tone settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CueConfig {
    /// Lower tone of the dial-tone pair in Hz.
    pub tone_low_hz: f32,
    /// Upper tone of the dial-tone pair in Hz.
    pub tone_high_hz: f32,
    /// Playback volume in `[0, 1]`.
    pub volume: f32,
    /// Fade-in / fade-out duration in milliseconds.
    pub fade_ms: u64,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            tone_low_hz: 350.0,
            tone_high_hz: 440.0,
            volume: 0.3,
            fade_ms: 400,
        }
    }
}

// ---------------------------------------------------------------------------
// KioskConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level kiosk configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use phonebooth::config::KioskConfig;
///
/// // Load (returns Default when file is missing)
/// let config = KioskConfig::load().unwrap();
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskConfig {
    /// Named tuning preset applied on top of the detector defaults.
    pub profile: TuningProfile,
    /// Voice boundary detector settings.
    pub detector: DetectorConfig,
    /// Session lifecycle settings.
    pub session: SessionConfig,
    /// Ambient cue settings.
    pub cue: CueConfig,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            profile: TuningProfile::default(),
            detector: DetectorConfig::default(),
            session: SessionConfig::default(),
            cue: CueConfig::default(),
        }
    }
}

impl KioskConfig {
    /// Preset for a low-noise venue.  Identical to the defaults.
    pub fn quiet_gallery() -> Self {
        Self::default()
    }

    /// Preset for a noisy public venue: raised volume gate and a longer
    /// debounce so crowd noise does not trip activation.
    pub fn noisy_public() -> Self {
        let mut cfg = Self::default();
        cfg.profile = TuningProfile::NoisyPublic;
        cfg.detector.threshold = 0.18;
        cfg.detector.min_voice_duration_ms = 350;
        cfg.detector.silence_timeout_ms = 2_000;
        cfg
    }

    /// Build the preset named by `profile`.
    pub fn for_profile(profile: TuningProfile) -> Self {
        match profile {
            TuningProfile::QuietGallery => Self::quiet_gallery(),
            TuningProfile::NoisyPublic => Self::noisy_public(),
        }
    }

    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(KioskConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&KioskPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&KioskPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
