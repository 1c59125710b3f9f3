// Picture Sorter - keep-or-discard triage sessions over a folder of pictures
//
// This is the library crate containing the session subsystem: the bounded
// image cache, the folder lock, the progress sidecar and the controller that
// drives them. The binary crate (main.rs) is a thin headless front end.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod session;
pub mod state;

// Re-export commonly used types for convenience
pub use config::SettingsManager;
pub use metrics::SessionMetrics;
pub use models::{AppSettings, ImageRecord, RecordMap};
pub use session::{SessionController, SessionError};
pub use state::{EventBus, SessionEvent, SessionPhase};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
