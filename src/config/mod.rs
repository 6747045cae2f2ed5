//! Configuration module for the phonebooth kiosk.
//!
//! Provides `KioskConfig` (top-level settings), sub-configs for each
//! subsystem, `KioskPaths` for cross-platform data directories, and TOML
//! persistence via `KioskConfig::load` / `KioskConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::KioskPaths;
pub use settings::{CueConfig, DetectorConfig, KioskConfig, SessionConfig, TuningProfile};
