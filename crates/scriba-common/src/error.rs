use thiserror::Error;

/// Error kinds surfaced across the harvester.
///
/// Only `Config` is fatal at startup. `Network` and `Validation` are
/// per-call soft failures: the workflow logs them and leaves the relevant
/// state flag unset so a later reprocess can resume. `Dependency` is
/// reported once at startup and the affected step degrades.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("validation error: {path} is not a valid {expected}")]
    Validation { path: String, expected: &'static str },

    #[error("external dependency unavailable: {0}")]
    Dependency(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
