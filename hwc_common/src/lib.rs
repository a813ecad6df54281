//! Common types and utilities for the HuaweiCloud provider crates.

pub mod api_error;
pub mod config;
pub mod error;
pub mod path_search;

// Re-export common dependencies so that all crates use the same versions.
pub use ::anyhow;
pub use ::serde;
pub use ::serde_json;
pub use ::tokio;
pub use ::tokio_util;
pub use ::tracing;
pub use ::tracing_subscriber;
