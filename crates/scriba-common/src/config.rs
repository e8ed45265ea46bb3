//! Configuration loading for Scriba.
//! Reads a JSON config file, `./config.json` by default.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{HarvestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Scratch area and local storage root. The `entries` and `uuid` maps
    /// live under it, alongside the sharded artifact tree.
    #[serde(default = "default_data_path")]
    pub data_path: String,

    /// Stable resource files (PMC OA file list, Elsevier OA map).
    #[serde(default = "default_resource_path")]
    pub resource_path: String,

    /// When non-empty, artifacts are uploaded to this bucket instead of the
    /// local sharded tree.
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub aws_access_key_id: String,
    #[serde(default)]
    pub aws_secret_access_key: String,

    #[serde(default = "default_grobid_base")]
    pub grobid_base: String,
    #[serde(default)]
    pub grobid_port: String,
    /// Backoff in seconds after a 503 from the structuring service.
    #[serde(default = "default_sleep_time")]
    pub sleep_time: u64,

    #[serde(default)]
    pub biblio_glutton_base: String,

    #[serde(default = "default_unpaywall_base")]
    pub unpaywall_base: String,
    #[serde(default)]
    pub unpaywall_email: String,

    #[serde(default = "default_crossref_base")]
    pub crossref_base: String,
    #[serde(default)]
    pub crossref_email: String,

    #[serde(default = "default_pmc_base_web")]
    pub pmc_base_web: String,
    #[serde(default = "default_pmc_base_ftp")]
    pub pmc_base_ftp: String,

    /// Local mirror of the Elsevier OA PDF set, when available.
    #[serde(default)]
    pub cord19_elsevier_pdf_path: String,
    #[serde(default)]
    pub cord19_elsevier_map_path: String,

    /// Previous harvest tree to reuse PDFs/NLM files from.
    #[serde(default)]
    pub legacy_data_path: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_data_path() -> String {
    "./data".to_string()
}
fn default_resource_path() -> String {
    "./resources".to_string()
}
fn default_grobid_base() -> String {
    "localhost".to_string()
}
fn default_sleep_time() -> u64 {
    5
}
fn default_unpaywall_base() -> String {
    "https://api.unpaywall.org/v2/".to_string()
}
fn default_crossref_base() -> String {
    "https://api.crossref.org".to_string()
}
fn default_pmc_base_web() -> String {
    "https://www.ncbi.nlm.nih.gov/pmc/articles".to_string()
}
fn default_pmc_base_ftp() -> String {
    "ftp://ftp.ncbi.nlm.nih.gov/pub/pmc".to_string()
}
fn default_batch_size() -> usize {
    10
}

impl Config {
    /// Load configuration from a JSON file. A missing or malformed file is
    /// fatal: the caller is expected to surface the error and exit.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&content).map_err(|e| {
            HarvestError::Config(format!("invalid config file {}: {e}", path.display()))
        })?;
        Ok(config)
    }

    /// True when an object store bucket is configured as the target.
    pub fn uses_object_store(&self) -> bool {
        !self.bucket_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"data_path": "/tmp/scriba", "batch_size": 4, "unpaywall_email": "me@example.com"}}"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.data_path, "/tmp/scriba");
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.sleep_time, default_sleep_time());
        assert!(!config.uses_object_store());
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let err = Config::load("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
    }
}
