//! Reporting over the harvested corpus: full metadata dump, catalogue of
//! produced artifacts, diagnostics, and the CORD-19 coverage check.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use serde_json::json;
use tracing::info;

use scriba_common::paths::storage_path;
use scriba_store::{HarvestStore, StoreError};

use crate::cord19;
use crate::workflow::Harvester;

pub const DUMP_FILE_NAME: &str = "consolidated_metadata.json";
pub const CATALOGUE_FILE_NAME: &str = "map.json";
pub const COLLECTION_FILE_NAME: &str = "collection.json";

// ── Diagnostic counts ─────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticCounts {
    pub total: u64,
    pub fully_valid: u64,
    pub invalid_oa_url: u64,
    pub invalid_pdf: u64,
    pub invalid_tei: u64,
}

/// Flag-based failure counts. A missing OA URL implies a missing PDF and
/// TEI; a missing PDF implies a missing TEI.
pub fn diagnostic_counts(store: &HarvestStore) -> Result<DiagnosticCounts, StoreError> {
    let mut counts = DiagnosticCounts::default();
    store.for_each_entry(|entry| {
        counts.total += 1;
        if !entry.has_valid_oa_url {
            counts.invalid_oa_url += 1;
            counts.invalid_pdf += 1;
            counts.invalid_tei += 1;
        } else if !entry.has_valid_pdf {
            counts.invalid_pdf += 1;
            counts.invalid_tei += 1;
        } else if !entry.has_valid_tei {
            counts.invalid_tei += 1;
        } else {
            counts.fully_valid += 1;
        }
    })?;
    Ok(counts)
}

// ── Sharded-tree TEI census ───────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeiCensus {
    pub grobid: u64,
    pub pub2tei: u64,
    pub any: u64,
}

/// Walk the sharded tree and, for every metadata sidecar, check which
/// structured XML variants sit next to it.
pub fn tei_census(data_path: &Path) -> TeiCensus {
    let mut census = TeiCensus::default();
    let mut stack = vec![data_path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(dir_entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for dir_entry in dir_entries.flatten() {
            let path = dir_entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !name.ends_with(".json") || name.ends_with("-ref-annotations.json") {
                continue;
            }
            let stem = name.trim_end_matches(".json");
            let grobid_tei = dir.join(format!("{stem}.grobid.tei.xml"));
            let pub2tei_tei = dir.join(format!("{stem}.pub2tei.tei.xml"));
            let has_grobid = grobid_tei.is_file();
            let has_pub2tei = pub2tei_tei.is_file();
            if has_grobid {
                census.grobid += 1;
            }
            if has_pub2tei {
                census.pub2tei += 1;
            }
            if has_grobid || has_pub2tei {
                census.any += 1;
            }
        }
    }
    census
}

// ── Harvester-level reports ───────────────────────────────────────────────

impl Harvester {
    /// Write every entry as one sorted-keys JSON object per line, then
    /// upload the dump when an object store is configured.
    pub async fn dump_metadata(&self) -> anyhow::Result<()> {
        let total = self.store().entry_count()?;
        println!("\ntotal number of harvested entries: {total}");

        let mut out = std::fs::File::create(DUMP_FILE_NAME)?;
        let mut write_error = None;
        self.store().for_each_entry(|entry| {
            if write_error.is_some() {
                return;
            }
            match entry.to_sorted_json() {
                Ok(line) => {
                    if let Err(e) = writeln!(out, "{line}") {
                        write_error = Some(e);
                    }
                }
                Err(e) => info!(id = %entry.id, error = %e, "entry not dumpable"),
            }
        })?;
        if let Some(e) = write_error {
            return Err(e.into());
        }
        info!(file = DUMP_FILE_NAME, "full metadata dump written");
        println!("\n-> full metadata dump written in {DUMP_FILE_NAME}");

        if let Some(object_store) = self.object_store() {
            object_store.upload_file(Path::new(DUMP_FILE_NAME), ".").await?;
        }
        Ok(())
    }

    /// Write the catalogue: one line per entry with its identifiers, OA
    /// link and the artifact paths that actually exist for it.
    pub async fn write_catalogue(&self) -> anyhow::Result<()> {
        let catalogue_path = Path::new(&self.config().data_path).join(CATALOGUE_FILE_NAME);
        let mut out = std::fs::File::create(&catalogue_path)?;
        let mut write_error = None;
        self.store().for_each_entry(|entry| {
            if write_error.is_some() {
                return;
            }
            let mut record = serde_json::Map::new();
            record.insert("id".to_string(), json!(entry.id));
            if let Some(doi) = &entry.doi {
                record.insert("DOI".to_string(), json!(doi));
            }
            if let Some(pmid) = &entry.pmid {
                record.insert("pmid".to_string(), json!(pmid));
            }
            if let Some(pmcid) = &entry.pmcid {
                record.insert("pmcid".to_string(), json!(pmcid));
            }
            if let Some(oa_link) = &entry.oa_link {
                record.insert("oaLink".to_string(), json!(oa_link));
            }
            let data_path = entry.data_path.clone().unwrap_or_default();
            if entry.has_valid_pdf && !data_path.is_empty() {
                record.insert(
                    "pdf_file_path".to_string(),
                    json!(format!("{data_path}{}.pdf", entry.id)),
                );
            }
            if entry.has_valid_tei && !data_path.is_empty() {
                record.insert(
                    "tei_file_path".to_string(),
                    json!(format!("{data_path}{}.grobid.tei.xml", entry.id)),
                );
            }
            record.insert(
                "json_metadata_file_path".to_string(),
                json!(format!("{data_path}{}.json", entry.id)),
            );
            match serde_json::to_string(&serde_json::Value::Object(record)) {
                Ok(line) => {
                    if let Err(e) = writeln!(out, "{line}") {
                        write_error = Some(e);
                    }
                }
                Err(e) => info!(id = %entry.id, error = %e, "entry not serializable"),
            }
        })?;
        if let Some(e) = write_error {
            return Err(e.into());
        }
        info!(file = %catalogue_path.display(), "catalogue of harvested resources written");
        println!(
            "\n-> catalogue of harvested resources written in {}",
            catalogue_path.display()
        );

        if let Some(object_store) = self.object_store() {
            object_store.upload_file(&catalogue_path, ".").await?;
        }
        Ok(())
    }

    /// Print the failure report. With `full`, additionally cross-check the
    /// identifier map against the entry map and census the structured XML
    /// files in the sharded tree; with a CORD-19 metadata file, also emit
    /// the collection statistics.
    pub fn diagnostic(&self, full: bool, cord19_csv: Option<&Path>) -> anyhow::Result<DiagnosticCounts> {
        let counts = diagnostic_counts(self.store())?;
        println!("---");
        println!("total entries: {}", counts.total);
        println!("---");
        println!(
            "total fully successful entries: {} entries with valid OA URL and PDF and TEI XML",
            counts.fully_valid
        );
        println!("---");
        println!("total invalid OA URL: {}", counts.invalid_oa_url);
        println!(
            "total entries with valid OA URL: {}",
            counts.total - counts.invalid_oa_url
        );
        println!("---");
        println!("total invalid PDF: {}", counts.invalid_pdf);
        println!(
            "total entries with successfully downloaded PDF: {}",
            counts.total - counts.invalid_pdf
        );
        println!("---");
        println!("total invalid TEI: {}", counts.invalid_tei);
        println!(
            "total entries with successfully converted TEI XML: {}",
            counts.total - counts.invalid_tei
        );
        println!("---");

        if full {
            // identifier keys whose entry record went missing would mean a
            // silent failure during processing
            let mut distinct_ids: HashSet<String> = HashSet::new();
            let mut missing_entries = 0u64;
            let mut missing_checked: HashMap<String, bool> = HashMap::new();
            self.store().for_each_identifier(|_key, id| {
                distinct_ids.insert(id.to_string());
                let missing = *missing_checked
                    .entry(id.to_string())
                    .or_insert_with(|| match self.store().get_entry(id) {
                        Ok(found) => found.is_none(),
                        Err(_) => true,
                    });
                if missing {
                    missing_entries += 1;
                }
            })?;
            println!("total identifiers: {}", distinct_ids.len());
            println!("total missing entries in metadata map: {missing_entries}");
            println!("---");

            let census = tei_census(Path::new(&self.config().data_path));
            println!("total entries with GROBID TEI file: {}", census.grobid);
            println!("total entries with Pub2TEI TEI file: {}", census.pub2tei);
            println!("total entries with at least one TEI file: {}", census.any);
            println!("---");

            if let Some(metadata_csv) = cord19_csv {
                self.cord19_collection_stats(metadata_csv)?;
            }
        }

        Ok(counts)
    }

    /// Per-year distribution of CORD-19 entries and of the subset we
    /// actually harvested a full text for; written to `collection.json`.
    fn cord19_collection_stats(&self, metadata_csv: &Path) -> anyhow::Result<()> {
        println!("generating collection description/statistics on CORD-19 entries...");
        let data_path = Path::new(&self.config().data_path);

        let mut total_entries = 0u64;
        let mut seen: HashSet<String> = HashSet::new();
        let mut total_harvested = 0u64;
        let mut per_year: HashMap<String, u64> = HashMap::new();
        let mut per_year_harvested: HashMap<String, u64> = HashMap::new();

        for result in cord19::row_iter(metadata_csv)? {
            let Ok(row) = result else { continue };
            total_entries += 1;
            if row.cord_uid.is_empty() || !seen.insert(row.cord_uid.clone()) {
                continue;
            }

            let resource_dir = data_path.join(storage_path(&row.cord_uid));
            let harvested = resource_dir.join(format!("{}.pdf", row.cord_uid)).is_file()
                || resource_dir.join(format!("{}.nxml", row.cord_uid)).is_file()
                || resource_dir
                    .join(format!("{}.grobid.tei.xml", row.cord_uid))
                    .is_file();
            if harvested {
                total_harvested += 1;
            }

            // publishing date has ISO 8601 style format: 2000-08-15
            if !row.publish_time.is_empty() {
                let year = row
                    .publish_time
                    .split('-')
                    .next()
                    .unwrap_or(&row.publish_time)
                    .to_string();
                *per_year.entry(year.clone()).or_insert(0) += 1;
                if harvested {
                    *per_year_harvested.entry(year).or_insert(0) += 1;
                }
            }
        }

        let collection = json!({
            "name": "CORD-19",
            "description": "Collection of Open Access research publications on COVID-19",
            "version": "version of the collection - to be edited",
            "harvester": "scriba",
            "documents": {
                "total_entries": total_entries,
                "total_distinct_entries": seen.len(),
                "total_harvested_entries": total_harvested,
                "distribution_entries_per_year": per_year,
                "distribution_harvested_per_year": per_year_harvested,
            }
        });
        std::fs::write(
            COLLECTION_FILE_NAME,
            serde_json::to_string_pretty(&collection)?,
        )?;
        println!("collection description and statistics generated in file: ./{COLLECTION_FILE_NAME}");
        Ok(())
    }

    /// Compare the harvested tree against the official CORD-19 document
    /// parses. Emits `missed_entries.csv` (official full text we failed to
    /// harvest) and `extra_entries.csv` (full text we got that the official
    /// set lacks) under the data path.
    pub fn check_coverage(&self, metadata_csv: &Path, documents_dir: &Path) -> anyhow::Result<()> {
        let data_path = Path::new(&self.config().data_path);
        let path_missed = data_path.join("missed_entries.csv");
        let path_extra = data_path.join("extra_entries.csv");
        let mut file_missed = std::fs::File::create(&path_missed)?;
        let mut file_extra = std::fs::File::create(&path_extra)?;
        writeln!(file_missed, "cord_uid,url")?;
        writeln!(file_extra, "cord_uid,doi,pmc,pmid,path_grobid,path_pub2tei")?;

        let mut line_count = 0u64;
        let mut seen: HashSet<String> = HashSet::new();
        let mut json_pdf = 0u64;
        let mut json_pmc = 0u64;
        let mut at_least_one = 0u64;
        let mut at_least_one_tei = 0u64;
        let mut harvested = 0u64;
        let mut harvested_grobid = 0u64;
        let mut harvested_pmc = 0u64;
        let mut extra_harvested = 0u64;
        let mut extra_harvested_grobid = 0u64;
        let mut extra_harvested_pmc = 0u64;

        for result in cord19::row_iter(metadata_csv)? {
            let Ok(row) = result else { continue };
            line_count += 1;
            // there are duplicated cord ids, count each once
            if row.cord_uid.is_empty() || !seen.insert(row.cord_uid.clone()) {
                continue;
            }

            let pmc_json = documents_dir
                .join("document_parses")
                .join("pmc_json")
                .join(format!("{}.xml.json", row.pmcid));
            let pdf_json = documents_dir
                .join("document_parses")
                .join("pdf_json")
                .join(format!("{}.json", row.sha));
            let has_pmc_json = !row.pmcid.is_empty() && pmc_json.is_file();
            let has_pdf_json = !row.sha.is_empty() && pdf_json.is_file();
            if has_pmc_json {
                json_pmc += 1;
            }
            if has_pdf_json {
                json_pdf += 1;
            }
            let json_present = has_pmc_json || has_pdf_json;
            if json_present {
                at_least_one += 1;
            }

            let local_dir = data_path.join(storage_path(&row.cord_uid));
            let local_grobid = local_dir.join(format!("{}.grobid.tei.xml", row.cord_uid));
            let local_pub2tei = local_dir.join(format!("{}.pub2tei.tei.xml", row.cord_uid));
            let has_grobid = local_grobid.is_file();
            let has_pub2tei = local_pub2tei.is_file();

            if has_grobid || has_pub2tei {
                at_least_one_tei += 1;
                if json_present {
                    harvested += 1;
                } else {
                    extra_harvested += 1;
                }
            } else if json_present {
                writeln!(file_missed, "{},{}", row.cord_uid, row.url)?;
            }

            let mut extra = false;
            if has_grobid {
                if json_present {
                    harvested_grobid += 1;
                } else {
                    extra_harvested_grobid += 1;
                    extra = true;
                }
            }
            if has_pub2tei {
                if json_present {
                    harvested_pmc += 1;
                } else {
                    extra_harvested_pmc += 1;
                    extra = true;
                }
            }
            if extra {
                writeln!(
                    file_extra,
                    "{},{},{},{},{},{}",
                    row.cord_uid,
                    row.doi,
                    row.pmcid,
                    row.pubmed_id,
                    if has_grobid {
                        local_grobid.display().to_string()
                    } else {
                        String::new()
                    },
                    if has_pub2tei {
                        local_pub2tei.display().to_string()
                    } else {
                        String::new()
                    },
                )?;
            }
        }

        println!("\nprocessed {line_count} article entries from CORD-19 metadata file");
        println!(
            "total distinct cord id: {} ({} duplicated cord ids)",
            seen.len(),
            line_count - seen.len() as u64
        );
        println!("total CORD-19 official PMC-derived JSON: {json_pmc}");
        println!("total CORD-19 official PDF-derived JSON: {json_pdf}");
        println!("total entry with at least one JSON (official CORD-19): {at_least_one}");
        println!("\ntotal CORD-19 JSON we harvested too: {harvested}");
        println!("\tvia Unpaywall PDF and GROBID: {harvested_grobid}");
        println!("\tvia PMC/NLM and Pub2TEI: {harvested_pmc}");
        println!(
            "\t -> we missed {} entries, see file {} for the list of missed entries",
            at_least_one - harvested,
            path_missed.display()
        );
        println!("\ntotal extra fulltext we harvested in addition: {extra_harvested}");
        println!("\tvia Unpaywall PDF and GROBID: {extra_harvested_grobid}");
        println!("\tvia PMC/NLM and Pub2TEI: {extra_harvested_pmc}");
        println!(
            "\t -> see file {} for the list of extra entries",
            path_extra.display()
        );
        println!(
            "\ntotal distinct cord id with TEI XML full text (our harvesting): {at_least_one_tei}"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriba_store::Entry;

    fn entry_with_flags(id: &str, oa: bool, pdf: bool, tei: bool) -> Entry {
        Entry {
            id: id.to_string(),
            has_valid_oa_url: oa,
            has_valid_pdf: pdf,
            has_valid_tei: tei,
            ..Default::default()
        }
    }

    #[test]
    fn test_diagnostic_counts_per_flag_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = HarvestStore::open(dir.path()).unwrap();
        store
            .put_entry(&entry_with_flags("aaaaaaaa-1", true, true, true))
            .unwrap();
        store
            .put_entry(&entry_with_flags("bbbbbbbb-2", true, true, false))
            .unwrap();
        store
            .put_entry(&entry_with_flags("cccccccc-3", false, false, false))
            .unwrap();

        let counts = diagnostic_counts(&store).unwrap();
        assert_eq!(
            counts,
            DiagnosticCounts {
                total: 3,
                fully_valid: 1,
                invalid_oa_url: 1,
                invalid_pdf: 2,
                invalid_tei: 2,
            }
        );
    }

    #[test]
    fn test_tei_census_walks_sharded_tree() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("ab/cd/ef/01/abcdef01x");
        let b = dir.path().join("ba/dc/fe/10/badcfe10y");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        std::fs::write(a.join("abcdef01x.json"), b"{}").unwrap();
        std::fs::write(a.join("abcdef01x.grobid.tei.xml"), b"<TEI/>").unwrap();
        std::fs::write(b.join("badcfe10y.json"), b"{}").unwrap();
        std::fs::write(b.join("badcfe10y.pub2tei.tei.xml"), b"<TEI/>").unwrap();
        std::fs::write(b.join("badcfe10y-ref-annotations.json"), b"{}").unwrap();

        let census = tei_census(dir.path());
        assert_eq!(
            census,
            TeiCensus {
                grobid: 1,
                pub2tei: 1,
                any: 2
            }
        );
    }
}
