//! Cross-platform application paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\phonebooth\
//!   macOS:   ~/Library/Application Support/phonebooth/
//!   Linux:   ~/.config/phonebooth/
//!
//! Data dir (session transcripts written by the persistence collaborator):
//!   Windows: %LOCALAPPDATA%\phonebooth\
//!   macOS:   ~/Library/Application Support/phonebooth/
//!   Linux:   ~/.local/share/phonebooth/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct KioskPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Directory where the local transcript store writes session files.
    pub transcripts_dir: PathBuf,
}

impl KioskPaths {
    const APP_NAME: &'static str = "phonebooth";

    /// Resolves all paths using the `dirs` crate.
    ///
    /// Falls back to the current directory if the platform cannot provide a
    /// standard path (should be extremely rare in practice).
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let settings_file = config_dir.join("settings.toml");
        let transcripts_dir = data_dir.join("transcripts");

        Self {
            config_dir,
            settings_file,
            transcripts_dir,
        }
    }
}

impl Default for KioskPaths {
    fn default() -> Self {
        Self::new()
    }
}
