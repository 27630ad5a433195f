//! Spoken output for a voice assistant: embedded neural voices with the
//! system speech engine as fallback.

pub mod adaptation;
pub mod backends;
pub mod config_loader;
pub mod diagnostics;
pub mod error;
pub mod locale;
pub mod models;
pub mod orchestrator;
pub mod playback;
pub mod service;
pub mod synthesis;

pub use locale::Locale;
pub use orchestrator::{SpeechOrchestrator, SpeechOutcome};
