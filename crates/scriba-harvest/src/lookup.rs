//! Metadata lookup via biblio-glutton, with a CrossRef fallback.
//!
//! biblio-glutton aggregates CrossRef, PubMed and Unpaywall records behind
//! `/service/lookup`. Its dataset lags the registries by a few months, so
//! when every lookup fails and a DOI is at hand we go straight to the
//! CrossRef REST API (polite pool: User-Agent embeds a contact mailto).

use serde_json::Value;
use tracing::{debug, instrument};

use scriba_common::http;
use scriba_common::Config;

pub struct MetadataLookup {
    client: reqwest::Client,
    glutton_base: String,
    crossref_base: String,
    crossref_email: String,
}

impl MetadataLookup {
    pub fn new(config: &Config) -> scriba_common::Result<Self> {
        Ok(Self {
            client: http::api_client(5)?,
            glutton_base: config.biblio_glutton_base.clone(),
            crossref_base: config.crossref_base.clone(),
            crossref_email: config.crossref_email.clone(),
        })
    }

    /// Look up the aggregated record for any subset of strong identifiers.
    /// Identifier kinds are tried in a fixed order and the first 200 wins;
    /// no per-call retries, the workflow resumes through state flags.
    #[instrument(skip(self))]
    pub async fn lookup(
        &self,
        doi: Option<&str>,
        pmid: Option<&str>,
        pmcid: Option<&str>,
        istex_id: Option<&str>,
    ) -> Option<Value> {
        if !self.glutton_base.is_empty() {
            let params: [(&str, Option<&str>); 4] = [
                ("doi", doi),
                ("pmid", pmid),
                ("pmc", pmcid),
                ("istexid", istex_id),
            ];
            for (kind, value) in params {
                let Some(value) = value.filter(|v| !v.is_empty()) else {
                    continue;
                };
                if let Some(record) = self.glutton_call(kind, value).await {
                    return Some(record);
                }
            }
        }

        // the X-months gap fallback
        if let Some(doi) = doi.filter(|d| !d.is_empty()) {
            return self.crossref_fallback(doi).await;
        }
        None
    }

    async fn glutton_call(&self, kind: &str, value: &str) -> Option<Value> {
        let url = service_lookup_url(&self.glutton_base);
        let response = match self.client.get(&url).query(&[(kind, value)]).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(kind, value, error = %e, "biblio-glutton call failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        response.json::<Value>().await.ok()
    }

    async fn crossref_fallback(&self, doi: &str) -> Option<Value> {
        let url = format!("{}/works/{}", self.crossref_base.trim_end_matches('/'), doi);
        let user_agent = format!(
            "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:81.0) Gecko/20100101 Firefox/81.0 (mailto:{})",
            self.crossref_email
        );
        let response = match self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(doi, error = %e, "CrossRef fallback failed");
                return None;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        let mut record = body.get("message")?.clone();
        // the reference list is bulky and unused downstream
        if let Some(obj) = record.as_object_mut() {
            obj.remove("reference");
        }
        Some(record)
    }
}

/// Build the glutton lookup URL from a configured base, tolerating a
/// trailing slash.
fn service_lookup_url(base: &str) -> String {
    format!("{}/service/lookup", base.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_lookup_url_trailing_slash() {
        assert_eq!(
            service_lookup_url("http://localhost:8080/"),
            "http://localhost:8080/service/lookup"
        );
        assert_eq!(
            service_lookup_url("http://localhost:8080"),
            "http://localhost:8080/service/lookup"
        );
    }

    #[tokio::test]
    #[ignore = "Hits the public CrossRef API"]
    async fn test_crossref_fallback_strips_references() {
        let config = Config::load("./config.json").unwrap_or_else(|_| {
            serde_json::from_str(r#"{"crossref_email": "test@example.com"}"#).unwrap()
        });
        let lookup = MetadataLookup::new(&config).unwrap();
        let record = lookup
            .lookup(Some("10.1038/nature14539"), None, None, None)
            .await
            .expect("lookup failed");
        assert!(record.get("reference").is_none());
        assert_eq!(record["DOI"].as_str(), Some("10.1038/nature14539"));
    }
}
