//! The harvester's persistent maps.
//!
//! `HarvestStore` owns the two writable maps of a workspace:
//!   - `entries`: id -> Entry (authoritative record store)
//!   - `uuid`: strong identifier (DOI, PMID, PMCID, cord_uid, or the id
//!     itself) -> id
//!
//! `PmcOaMap` is the read-only resource map giving, for a PMCID, the archive
//! subpath on the PMC FTP mirror together with its PMID and license.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::Entry;
use crate::error::StoreError;
use crate::kv::KvStore;

pub const ENTRIES_MAP: &str = "entries";
pub const UUID_MAP: &str = "uuid";
pub const PMC_OA_MAP: &str = "pmc_oa";

pub struct HarvestStore {
    entries: KvStore,
    uuid: KvStore,
}

impl HarvestStore {
    /// Open both maps under the workspace data path, creating them if
    /// missing.
    pub fn open(data_path: &Path) -> Result<Self, StoreError> {
        let entries = KvStore::open(&data_path.join(ENTRIES_MAP))?;
        let uuid = KvStore::open(&data_path.join(UUID_MAP))?;
        Ok(Self { entries, uuid })
    }

    pub fn get_entry(&self, id: &str) -> Result<Option<Entry>, StoreError> {
        match self.entries.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Entry::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_entry(&self, entry: &Entry) -> Result<(), StoreError> {
        self.entries.put(entry.id.as_bytes(), &entry.encode()?)
    }

    /// Resolve a strong identifier to the entry id it maps to.
    pub fn uuid_for(&self, strong_identifier: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .uuid
            .get(strong_identifier.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn map_identifier(&self, strong_identifier: &str, id: &str) -> Result<(), StoreError> {
        self.uuid.put(strong_identifier.as_bytes(), id.as_bytes())
    }

    /// Index every strong identifier of the entry, plus the id itself so
    /// already-seen ids are recognized on later runs.
    pub fn index_identifiers(&self, entry: &Entry) -> Result<(), StoreError> {
        for key in entry.strong_identifiers() {
            self.map_identifier(key, &entry.id)?;
        }
        self.map_identifier(&entry.id, &entry.id)?;
        debug!(id = %entry.id, "identifiers indexed");
        Ok(())
    }

    pub fn entry_count(&self) -> Result<u64, StoreError> {
        self.entries.count()
    }

    pub fn identifier_count(&self) -> Result<u64, StoreError> {
        self.uuid.count()
    }

    /// Traverse all entries in stable order. Records that fail to decode are
    /// skipped (they would indicate a foreign writer in the map).
    pub fn for_each_entry<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(Entry),
    {
        self.entries.for_each(|_key, value| {
            if let Ok(entry) = Entry::decode(value) {
                f(entry);
            }
        })
    }

    /// Traverse the identifier map as (strong identifier, id) pairs.
    pub fn for_each_identifier<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &str),
    {
        self.uuid.for_each(|key, value| {
            f(
                &String::from_utf8_lossy(key),
                &String::from_utf8_lossy(value),
            );
        })
    }
}

/// One row of the PMC OA file list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PmcOaRecord {
    pub subpath: String,
    pub pmid: String,
    pub license: String,
}

pub struct PmcOaMap {
    kv: KvStore,
}

impl PmcOaMap {
    /// True when the map has been built under `resource_path` already; the
    /// build is one-shot and the directory's presence short-circuits it.
    pub fn is_built(resource_path: &Path) -> bool {
        resource_path.join(PMC_OA_MAP).is_dir()
    }

    pub fn open(resource_path: &Path) -> Result<Self, StoreError> {
        let kv = KvStore::open(&resource_path.join(PMC_OA_MAP))?;
        Ok(Self { kv })
    }

    pub fn insert(&self, pmcid: &str, record: &PmcOaRecord) -> Result<(), StoreError> {
        self.kv
            .put(pmcid.as_bytes(), &serde_json::to_vec(record)?)
    }

    /// Bulk-load a chunk of file-list rows in one transaction.
    pub fn insert_all(&self, records: Vec<(String, PmcOaRecord)>) -> Result<(), StoreError> {
        let mut items = Vec::with_capacity(records.len());
        for (pmcid, record) in records {
            items.push((pmcid.into_bytes(), serde_json::to_vec(&record)?));
        }
        self.kv.put_all(items)
    }

    pub fn get(&self, pmcid: &str) -> Result<Option<PmcOaRecord>, StoreError> {
        match self.kv.get(pmcid.as_bytes())? {
            Some(bytes) => {
                let mut record: PmcOaRecord = serde_json::from_slice(&bytes)?;
                // the file list carries the license in the line tail
                record.license = record.license.replace('\n', "");
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.kv.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = HarvestStore::open(dir.path()).unwrap();

        let entry = Entry {
            id: "abcdef0123456789abcdef0123456789".to_string(),
            doi: Some("10.1/abc".to_string()),
            pmcid: Some("PMC42".to_string()),
            ..Default::default()
        };
        store.put_entry(&entry).unwrap();
        store.index_identifiers(&entry).unwrap();

        let loaded = store.get_entry(&entry.id).unwrap().unwrap();
        assert_eq!(loaded.doi.as_deref(), Some("10.1/abc"));

        // every strong identifier resolves to the same id
        assert_eq!(store.uuid_for("10.1/abc").unwrap().as_deref(), Some(entry.id.as_str()));
        assert_eq!(store.uuid_for("PMC42").unwrap().as_deref(), Some(entry.id.as_str()));
        assert_eq!(store.uuid_for(&entry.id).unwrap().as_deref(), Some(entry.id.as_str()));
        assert_eq!(store.uuid_for("unknown").unwrap(), None);

        assert_eq!(store.entry_count().unwrap(), 1);
        assert_eq!(store.identifier_count().unwrap(), 3);
    }

    #[test]
    fn test_pmc_oa_map_build_marker_and_license_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!PmcOaMap::is_built(dir.path()));

        let map = PmcOaMap::open(dir.path()).unwrap();
        assert!(PmcOaMap::is_built(dir.path()));

        map.insert(
            "PMC42",
            &PmcOaRecord {
                subpath: "oa_package/00/01/PMC42.tar.gz".to_string(),
                pmid: "99".to_string(),
                license: "CC BY\n".to_string(),
            },
        )
        .unwrap();

        let record = map.get("PMC42").unwrap().unwrap();
        assert_eq!(record.subpath, "oa_package/00/01/PMC42.tar.gz");
        assert_eq!(record.license, "CC BY");
        assert_eq!(map.get("PMC7").unwrap().map(|r| r.pmid), None);
    }
}
