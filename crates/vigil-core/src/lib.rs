pub mod config;
pub mod error;
pub mod fsutil;
pub mod heartbeat;
pub mod sanitize;
pub mod types;

pub use config::VigilConfig;
pub use error::{Result, VigilError};
pub use sanitize::{SanitizeReport, Sanitizer, REDACTION_PLACEHOLDER};
pub use types::*;
