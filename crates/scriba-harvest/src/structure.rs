//! Client for the GROBID structuring service.
//!
//! Two multipart endpoints are used: `processFulltextDocument` (TEI XML
//! with coordinates) and `referenceAnnotations` (JSON reference
//! annotations). A 503 means every GROBID worker is busy; the contract is a
//! single sleep-and-retry, nothing deeper.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::{debug, error, info, instrument, warn};

use scriba_common::Config;

pub struct GrobidClient {
    client: reqwest::Client,
    base_url: String,
    sleep_time: u64,
}

impl GrobidClient {
    pub fn new(config: &Config) -> scriba_common::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(scriba_common::HarvestError::Network)?;
        Ok(Self {
            client,
            base_url: api_url(&config.grobid_base, &config.grobid_port),
            sleep_time: config.sleep_time,
        })
    }

    /// Startup probe; a dead GROBID degrades structuring, it does not stop
    /// the harvest.
    pub async fn is_alive(&self) -> bool {
        let url = format!("{}isalive", self.base_url);
        match self.client.get(&url).send().await {
            Ok(r) if r.status() == reqwest::StatusCode::OK => {
                info!("GROBID server is up and running");
                true
            }
            Ok(r) => {
                warn!(status = %r.status(), "GROBID server does not appear up and running");
                false
            }
            Err(e) => {
                error!(error = %e, "GROBID server is not available");
                false
            }
        }
    }

    /// Convert a PDF into a TEI XML full-text document written at `output`.
    #[instrument(skip(self))]
    pub async fn process_fulltext(&self, pdf_file: &Path, output: &Path) -> anyhow::Result<()> {
        let url = format!("{}processFulltextDocument", self.base_url);
        let pdf = tokio::fs::read(pdf_file).await?;
        let file_name = pdf_file.display().to_string();

        let build_form = |pdf: Vec<u8>, file_name: String| -> anyhow::Result<Form> {
            let part = Part::bytes(pdf)
                .file_name(file_name)
                .mime_str("application/pdf")?;
            let mut form = Form::new()
                .part("input", part)
                .text("generateIDs", "1")
                .text("consolidateHeader", "1")
                .text("consolidateCitations", "0")
                .text("includeRawCitations", "1")
                .text("includeRawAffiliations", "1");
            for coordinate in ["ref", "biblStruct", "persName", "figure", "formula", "s"] {
                form = form.text("teiCoordinates", coordinate);
            }
            Ok(form)
        };

        let mut retried = false;
        loop {
            let form = build_form(pdf.clone(), file_name.clone())?;
            let response = self
                .client
                .post(&url)
                .header(reqwest::header::ACCEPT, "application/xml")
                .multipart(form)
                .send()
                .await?;

            match response.status() {
                reqwest::StatusCode::SERVICE_UNAVAILABLE if !retried => {
                    debug!("GROBID busy, backing off before the single retry");
                    tokio::time::sleep(Duration::from_secs(self.sleep_time)).await;
                    retried = true;
                }
                reqwest::StatusCode::OK => {
                    let body = response.text().await?;
                    tokio::fs::write(output, body).await?;
                    return Ok(());
                }
                status => {
                    error!(%status, "fulltext processing failed");
                    anyhow::bail!("GROBID fulltext processing failed with {status}");
                }
            }
        }
    }

    /// Produce the JSON reference annotations (with PDF coordinates) for a
    /// PDF, written at `output`.
    #[instrument(skip(self))]
    pub async fn reference_annotations(&self, pdf_file: &Path, output: &Path) -> anyhow::Result<()> {
        let url = format!("{}referenceAnnotations", self.base_url);
        let pdf = tokio::fs::read(pdf_file).await?;
        let file_name = pdf_file.display().to_string();

        let mut retried = false;
        loop {
            let part = Part::bytes(pdf.clone())
                .file_name(file_name.clone())
                .mime_str("application/pdf")?;
            let form = Form::new()
                .part("input", part)
                .text("consolidateCitations", "1");

            let response = self
                .client
                .post(&url)
                .header(reqwest::header::ACCEPT, "application/json")
                .multipart(form)
                .send()
                .await?;

            match response.status() {
                reqwest::StatusCode::SERVICE_UNAVAILABLE if !retried => {
                    debug!("GROBID busy, backing off before the single retry");
                    tokio::time::sleep(Duration::from_secs(self.sleep_time)).await;
                    retried = true;
                }
                reqwest::StatusCode::OK => {
                    let body = response.text().await?;
                    tokio::fs::write(output, body).await?;
                    return Ok(());
                }
                status => {
                    error!(%status, "reference annotation failed");
                    anyhow::bail!("GROBID reference annotation failed with {status}");
                }
            }
        }
    }
}

/// `http://<base>[:<port>]/api/`
fn api_url(base: &str, port: &str) -> String {
    if port.is_empty() {
        format!("http://{base}/api/")
    } else {
        format!("http://{base}:{port}/api/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_with_and_without_port() {
        assert_eq!(api_url("localhost", "8070"), "http://localhost:8070/api/");
        assert_eq!(api_url("grobid.local", ""), "http://grobid.local/api/");
    }
}
