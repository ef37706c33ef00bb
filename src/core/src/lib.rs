//! Diskferry Core - Foundational Types and Abstractions
//!
//! This module provides the foundational types used across the diskferry
//! image transporter: errors, configuration, progress and cancellation.

pub mod cancel;
pub mod config;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{TransportConfig, DEFAULT_CHUNK_SIZE, DEFAULT_WORKERS_COUNT};
pub use error::{FerryError, Result};
pub use progress::{ProgressSink, ProgressUpdate};

/// Diskferry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
