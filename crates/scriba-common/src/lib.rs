//! Shared building blocks for the Scriba harvester: error kinds,
//! configuration, HTTP client construction, MIME sniffing and the
//! identifier/path helpers used across the workspace.

pub mod config;
pub mod error;
pub mod http;
pub mod paths;
pub mod sniff;

pub use config::Config;
pub use error::{HarvestError, Result};
