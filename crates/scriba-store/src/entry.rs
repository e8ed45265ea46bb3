//! The entry record: one persisted record per article.
//!
//! The metadata lookup services return open-ended aggregated records; the
//! known fields are typed below and everything else is carried opaquely in
//! `extra` so it survives the round trip into the dump unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entry {
    /// Unique identifier: a UUID string, except for the CORD-19 ingest where
    /// the externally supplied `cord_uid` is adopted. Immutable once written.
    #[serde(default)]
    pub id: String,

    // Strong identifiers
    #[serde(rename = "DOI", default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmcid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cord_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cord_uid: Option<String>,

    // Bibliographic passthrough from the lookup service / input rows. The
    // lookup service encodes `title` as an array, CORD-19 rows as a plain
    // string, hence the untyped values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<Value>,
    #[serde(rename = "abstract", default, skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
    #[serde(
        rename = "license-simplified",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub license_simplified: Option<String>,
    #[serde(rename = "MAG_ID", default, skip_serializing_if = "Option::is_none")]
    pub mag_id: Option<String>,
    #[serde(
        rename = "WHO_Covidence",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub who_covidence: Option<String>,
    #[serde(rename = "oaLink", default, skip_serializing_if = "Option::is_none")]
    pub oa_link: Option<String>,

    // Processing state. Flags only ever go false -> true during normal
    // processing; `reset` is the sole way back.
    #[serde(default)]
    pub has_valid_oa_url: bool,
    #[serde(default)]
    pub has_valid_pdf: bool,
    #[serde(default)]
    pub has_valid_tei: bool,
    #[serde(default)]
    pub has_valid_ref_annotation: bool,
    #[serde(default)]
    pub has_valid_thumbnail: bool,

    /// Sharded relative directory holding the artifacts for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,

    /// Opaque lookup-service fields (authors, journal, references to other
    /// registries...), passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Entry {
    /// Build an entry from an aggregated lookup-service record. Unknown
    /// fields land in `extra`; state flags start false.
    pub fn from_lookup(record: Value) -> Result<Self, StoreError> {
        let entry: Entry = serde_json::from_value(record)?;
        Ok(entry)
    }

    /// Stable byte encoding used in the entries map.
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// One-line JSON rendering with keys sorted at every nesting level,
    /// used for the metadata dump.
    pub fn to_sorted_json(&self) -> Result<String, StoreError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string(&sort_keys(value))?)
    }

    /// The strong identifiers present on this entry, in map-key form.
    pub fn strong_identifiers(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        if let Some(doi) = self.doi.as_deref() {
            keys.push(doi);
        }
        if let Some(pmcid) = self.pmcid.as_deref() {
            keys.push(pmcid);
        }
        if let Some(pmid) = self.pmid.as_deref() {
            keys.push(pmid);
        }
        if let Some(cord_uid) = self.cord_uid.as_deref() {
            keys.push(cord_uid);
        }
        keys
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(String, Value)> = map.into_iter().collect();
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = serde_json::Map::new();
            for (key, val) in fields {
                sorted.insert(key, sort_keys(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_lookup_captures_known_and_extra_fields() {
        let record = json!({
            "DOI": "10.1/abc",
            "pmid": "123",
            "title": ["A study"],
            "author": [{"family": "Doe", "given": "Jane"}],
            "journal": "Nature"
        });
        let entry = Entry::from_lookup(record).unwrap();
        assert_eq!(entry.doi.as_deref(), Some("10.1/abc"));
        assert_eq!(entry.pmid.as_deref(), Some("123"));
        assert!(!entry.has_valid_oa_url);
        assert!(!entry.has_valid_pdf);
        assert!(entry.extra.contains_key("author"));
        assert_eq!(entry.extra["journal"], json!("Nature"));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut entry = Entry {
            id: "abcdef0123456789abcdef0123456789".to_string(),
            doi: Some("10.1/abc".to_string()),
            has_valid_oa_url: true,
            has_valid_pdf: true,
            ..Default::default()
        };
        entry
            .extra
            .insert("journal".to_string(), json!("The Journal"));

        let bytes = entry.encode().unwrap();
        let decoded = Entry::decode(&bytes).unwrap();
        assert_eq!(decoded.id, entry.id);
        assert_eq!(decoded.doi, entry.doi);
        assert!(decoded.has_valid_pdf);
        assert!(!decoded.has_valid_tei);
        assert_eq!(decoded.extra["journal"], json!("The Journal"));
    }

    #[test]
    fn test_sorted_json_orders_keys() {
        let entry = Entry {
            id: "zzz".to_string(),
            doi: Some("10.1/abc".to_string()),
            ..Default::default()
        };
        let line = entry.to_sorted_json().unwrap();
        let doi_pos = line.find("\"DOI\"").unwrap();
        let id_pos = line.find("\"id\"").unwrap();
        let pdf_pos = line.find("\"has_valid_pdf\"").unwrap();
        assert!(doi_pos < pdf_pos);
        assert!(pdf_pos < id_pos);
    }

    #[test]
    fn test_strong_identifiers() {
        let entry = Entry {
            id: "x".to_string(),
            doi: Some("10.1/abc".to_string()),
            pmcid: Some("PMC42".to_string()),
            ..Default::default()
        };
        assert_eq!(entry.strong_identifiers(), vec!["10.1/abc", "PMC42"]);
    }
}
