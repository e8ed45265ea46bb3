//! Open Access URL resolution.
//!
//! Given an entry's identifiers, pick the best PDF location to attempt, in
//! a fixed short-circuiting order: local Elsevier OA mirror, legacy harvest
//! tree, PMC OA FTP archive, Unpaywall, and finally whatever `oaLink` the
//! lookup service already attached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use scriba_common::http;
use scriba_common::paths::storage_path;
use scriba_common::sniff::{is_valid_file, ExpectedMime};
use scriba_common::Config;
use scriba_store::{Entry, PmcOaMap};

pub struct OaResolver {
    client: reqwest::Client,
    unpaywall_base: String,
    unpaywall_email: String,
    pmc_base_web: String,
    pmc_base_ftp: String,
    elsevier_pdf_path: String,
    legacy_data_path: String,
    elsevier_oa: Option<HashMap<String, String>>,
    pmc_oa: Option<Arc<PmcOaMap>>,
}

impl OaResolver {
    pub fn new(
        config: &Config,
        elsevier_oa: Option<HashMap<String, String>>,
        pmc_oa: Option<Arc<PmcOaMap>>,
    ) -> scriba_common::Result<Self> {
        Ok(Self {
            client: http::api_client(10)?,
            unpaywall_base: config.unpaywall_base.clone(),
            unpaywall_email: config.unpaywall_email.clone(),
            pmc_base_web: config.pmc_base_web.clone(),
            pmc_base_ftp: config.pmc_base_ftp.clone(),
            elsevier_pdf_path: config.cord19_elsevier_pdf_path.clone(),
            legacy_data_path: config.legacy_data_path.clone(),
            elsevier_oa,
            pmc_oa,
        })
    }

    /// Resolve the best PDF URL for an entry, or `None` when every source
    /// comes up empty. Archive URLs (PMC `.tar.gz`) count as PDF locations,
    /// as do `file://` URLs into local mirrors.
    #[instrument(skip(self, entry), fields(id = %entry.id))]
    pub async fn resolve(&self, entry: &Entry) -> Option<String> {
        if let Some(local) = self.elsevier_check(entry.doi.as_deref(), entry.pii.as_deref()) {
            debug!(path = %local.display(), "PDF found in Elsevier OA mirror");
            return Some(format!("file://{}", local.display()));
        }

        if let Some(legacy) = self.legacy_check(&entry.id) {
            debug!(path = %legacy.display(), "PDF found in legacy tree");
            return Some(format!("file://{}", legacy.display()));
        }

        if let Some(pmcid) = entry.pmcid.as_deref() {
            if let Some(url) = self.pmc_oa_check(pmcid) {
                return Some(url);
            }
            debug!(pmcid, "no PMC OA archive for this PMCID");
        }

        if let Some(doi) = entry.doi.as_deref() {
            if let Some(url) = self.unpaywall(doi).await {
                return Some(url);
            }
        }

        // last resort: the lookup service's own OA link
        entry.oa_link.clone().filter(|link| !link.is_empty())
    }

    /// Local Elsevier COVID-19 OA set, keyed by lowercased DOI and by PII.
    fn elsevier_check(&self, doi: Option<&str>, pii: Option<&str>) -> Option<PathBuf> {
        let map = self.elsevier_oa.as_ref()?;
        if self.elsevier_pdf_path.is_empty() {
            return None;
        }
        let pdf = doi
            .and_then(|d| map.get(&d.to_lowercase()))
            .or_else(|| pii.and_then(|p| map.get(p)))?;
        let path = Path::new(&self.elsevier_pdf_path).join(pdf);
        path.is_file().then_some(path)
    }

    /// A PDF already archived under the same identifier in a previous
    /// harvest tree.
    fn legacy_check(&self, id: &str) -> Option<PathBuf> {
        if self.legacy_data_path.trim().is_empty() {
            return None;
        }
        let path = Path::new(&self.legacy_data_path)
            .join(storage_path(id))
            .join(format!("{id}.pdf"));
        is_valid_file(&path, ExpectedMime::Pdf).then_some(path)
    }

    /// PMC OA archive URL (`.tar.gz` holding PDF and NLM XML).
    fn pmc_oa_check(&self, pmcid: &str) -> Option<String> {
        let map = self.pmc_oa.as_ref()?;
        let record = match map.get(pmcid) {
            Ok(r) => r?,
            Err(e) => {
                debug!(pmcid, error = %e, "pmc_oa lookup failed");
                return None;
            }
        };
        Some(format!(
            "{}/{}",
            self.pmc_base_ftp.trim_end_matches('/'),
            record.subpath
        ))
    }

    /// Fresh Open Access location from Unpaywall (biblio-glutton's dump of
    /// it lags by months).
    async fn unpaywall(&self, doi: &str) -> Option<String> {
        let url = format!("{}{}", self.unpaywall_base, doi);
        let response = match self
            .client
            .get(&url)
            .query(&[("email", self.unpaywall_email.as_str())])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(doi, error = %e, "Unpaywall call failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        select_oa_url(&body, &self.pmc_base_web)
    }
}

/// Pick a download URL out of an Unpaywall response.
///
/// Preference order: `best_oa_location.url_for_pdf`; the best location's
/// `url` with `/pdf/` appended when it points into PMC; any other location
/// whose `url_for_pdf` points into Europe PMC or NCBI PMC (again with
/// `/pdf/` appended to its `url`); finally any location with a
/// `url_for_pdf` at all.
pub fn select_oa_url(response: &Value, pmc_base_web: &str) -> Option<String> {
    let best = &response["best_oa_location"];
    if let Some(url) = best["url_for_pdf"].as_str().filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }
    if let Some(url) = best["url"].as_str() {
        if url.starts_with(pmc_base_web) {
            return Some(format!("{url}/pdf/"));
        }
    }

    let locations = response["oa_locations"].as_array()?;
    for location in locations {
        if let Some(pdf_url) = location["url_for_pdf"].as_str() {
            if pdf_url.contains("europepmc.org/articles/pmc")
                || pdf_url.contains("ncbi.nlm.nih.gov/pmc/articles")
            {
                if let Some(url) = location["url"].as_str() {
                    return Some(format!("{url}/pdf/"));
                }
            }
        }
    }
    for location in locations {
        if let Some(pdf_url) = location["url_for_pdf"].as_str() {
            return Some(pdf_url.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PMC_BASE: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";

    #[test]
    fn test_best_location_pdf_url_wins() {
        let response = json!({
            "best_oa_location": {"url_for_pdf": "https://example.org/x.pdf", "url": "https://example.org/x"},
            "oa_locations": []
        });
        assert_eq!(
            select_oa_url(&response, PMC_BASE).as_deref(),
            Some("https://example.org/x.pdf")
        );
    }

    #[test]
    fn test_pmc_best_location_gets_pdf_suffix() {
        let response = json!({
            "best_oa_location": {"url": format!("{PMC_BASE}/PMC123")},
            "oa_locations": []
        });
        assert_eq!(
            select_oa_url(&response, PMC_BASE).as_deref(),
            Some("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC123/pdf/")
        );
    }

    #[test]
    fn test_europepmc_location_gets_pdf_suffix() {
        let response = json!({
            "best_oa_location": {"url": "https://publisher.example/closed"},
            "oa_locations": [
                {"url": "https://europepmc.org/articles/pmc7029158",
                 "url_for_pdf": "https://europepmc.org/articles/pmc7029158?pdf=render"}
            ]
        });
        assert_eq!(
            select_oa_url(&response, PMC_BASE).as_deref(),
            Some("https://europepmc.org/articles/pmc7029158/pdf/")
        );
    }

    #[test]
    fn test_plain_location_pdf_url_as_last_resort() {
        let response = json!({
            "best_oa_location": {"url": "https://publisher.example/closed"},
            "oa_locations": [
                {"url": "https://repo.example/item/1", "url_for_pdf": "https://repo.example/item/1.pdf"}
            ]
        });
        assert_eq!(
            select_oa_url(&response, PMC_BASE).as_deref(),
            Some("https://repo.example/item/1.pdf")
        );
    }

    #[test]
    fn test_no_location_yields_none() {
        let response = json!({"best_oa_location": null, "oa_locations": []});
        assert_eq!(select_oa_url(&response, PMC_BASE), None);
    }
}
