//! Per-entry harvesting workflow.
//!
//! One `process_task` call drives a single entry through at most one
//! traversal of: OA resolution, PDF acquisition (plain download, archive
//! extraction, or local copy), structuring, thumbnailing, persistence and
//! publication. Every step is best-effort: a failure leaves the earlier
//! state flags intact and the entry persisted, so a later reprocess resumes
//! from the first missing artifact. Flags only ever move false -> true.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use scriba_common::paths::storage_path;
use scriba_common::sniff::{is_valid_file, ExpectedMime};
use scriba_common::Config;
use scriba_store::{Entry, HarvestStore};

use crate::cord19::Cord19Row;
use crate::download::{self, Downloader};
use crate::lookup::MetadataLookup;
use crate::objectstore::ObjectStore;
use crate::resolve::OaResolver;
use crate::resources;
use crate::structure::GrobidClient;
use crate::thumbnail;

/// Which optional derivation steps are enabled for this run.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarvestOptions {
    /// Convert PDFs into TEI XML with the structuring service.
    pub structure: bool,
    /// Generate front-page thumbnails.
    pub thumbnail: bool,
    /// Generate reference annotations with coordinates.
    pub annotation: bool,
}

pub struct Harvester {
    config: Config,
    options: HarvestOptions,
    store: HarvestStore,
    lookup: MetadataLookup,
    resolver: OaResolver,
    downloader: Downloader,
    grobid: GrobidClient,
    object_store: Option<ObjectStore>,
}

impl Harvester {
    /// Construct every process-wide service up front: KV maps, resource
    /// maps, HTTP clients, and the optional object-store target.
    pub async fn new(config: Config, options: HarvestOptions) -> anyhow::Result<Self> {
        let data_path = Path::new(&config.data_path);
        std::fs::create_dir_all(data_path)?;

        let store = HarvestStore::open(data_path)?;
        let downloader = Downloader::new()?;
        let pmc_oa = resources::build_pmc_oa_map(&config, &downloader).await?;
        let elsevier_oa = resources::load_elsevier_oa_map(&config);
        let resolver = OaResolver::new(&config, elsevier_oa, pmc_oa)?;
        let lookup = MetadataLookup::new(&config)?;
        let grobid = GrobidClient::new(&config)?;
        if options.structure && !grobid.is_alive().await {
            warn!("structuring requested but GROBID is unreachable, TEI steps will not advance");
        }
        let object_store = if config.uses_object_store() {
            Some(ObjectStore::new(&config).await?)
        } else {
            None
        };

        Ok(Self {
            config,
            options,
            store,
            lookup,
            resolver,
            downloader,
            grobid,
            object_store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> HarvestOptions {
        self.options
    }

    pub fn store(&self) -> &HarvestStore {
        &self.store
    }

    pub(crate) fn object_store(&self) -> Option<&ObjectStore> {
        self.object_store.as_ref()
    }

    fn scratch_path(&self, file_name: &str) -> PathBuf {
        Path::new(&self.config.data_path).join(file_name)
    }

    /// Load the entry stored under `identifier`, or synthesize one from the
    /// metadata lookup services.
    async fn load_or_lookup(
        &self,
        identifier: &str,
        doi: Option<&str>,
        pmid: Option<&str>,
        pmcid: Option<&str>,
    ) -> Entry {
        match self.store.get_entry(identifier) {
            Ok(Some(entry)) => return entry,
            Ok(None) => {}
            Err(e) => error!(identifier, error = %e, "entry load failed"),
        }
        match self.lookup.lookup(doi, pmid, pmcid, None).await {
            Some(record) => Entry::from_lookup(record).unwrap_or_else(|e| {
                warn!(identifier, error = %e, "lookup record not usable, starting empty");
                Entry::default()
            }),
            None => Entry::default(),
        }
    }

    pub async fn process_entry_doi(&self, identifier: String, doi: String) {
        let mut entry = self.load_or_lookup(&identifier, Some(&doi), None, None).await;
        entry.doi = Some(doi);
        entry.id = identifier;
        debug!(doi = ?entry.doi, id = %entry.id, "processing");
        self.index_and_run(entry).await;
    }

    pub async fn process_entry_pmid(&self, identifier: String, pmid: String) {
        let mut entry = self.load_or_lookup(&identifier, None, Some(&pmid), None).await;
        entry.pmid = Some(pmid);
        entry.id = identifier;
        debug!(pmid = ?entry.pmid, id = %entry.id, "processing");
        self.index_and_run(entry).await;
    }

    pub async fn process_entry_pmcid(&self, identifier: String, pmcid: String) {
        let mut entry = self.load_or_lookup(&identifier, None, None, Some(&pmcid)).await;
        entry.pmcid = Some(pmcid);
        entry.id = identifier;
        debug!(pmcid = ?entry.pmcid, id = %entry.id, "processing");
        self.index_and_run(entry).await;
    }

    /// CORD-19 rows refresh the metadata on every visit, so that weekly
    /// releases can update already-harvested entries; the structural steps
    /// still short-circuit through the state flags.
    pub async fn process_entry_cord19(&self, identifier: String, row: Cord19Row) {
        let cleaned_doi = scriba_common::paths::clean_doi(&row.doi);
        let doi = (!cleaned_doi.is_empty()).then_some(cleaned_doi.as_str());
        let pmid = (!row.pubmed_id.is_empty()).then_some(row.pubmed_id.as_str());
        let pmcid = (!row.pmcid.is_empty()).then_some(row.pmcid.as_str());
        let mut entry = self.load_or_lookup(&identifier, doi, pmid, pmcid).await;
        if entry.title.is_none() && !row.title.is_empty() {
            entry.title = Some(json!(row.title));
        }
        if entry.year.is_none() && !row.publish_time.is_empty() {
            entry.year = Some(json!(row.publish_time));
        }
        entry.id = identifier;
        entry.cord_uid = Some(row.cord_uid.clone());
        if !row.sha.is_empty() {
            entry.cord_sha = Some(row.sha.clone());
        }
        if !row.license.is_empty() {
            entry.license_simplified = Some(row.license.clone());
        }
        if !row.abstract_text.is_empty() {
            entry.abstract_text = Some(row.abstract_text.clone());
        }
        if !row.mag_id.is_empty() {
            entry.mag_id = Some(row.mag_id.clone());
        }
        if !row.who_covidence_id.is_empty() {
            entry.who_covidence = Some(row.who_covidence_id.clone());
        }
        if entry.doi.is_none() && !row.doi.is_empty() {
            entry.doi = Some(row.doi.clone());
        }
        if entry.pmcid.is_none() && !row.pmcid.is_empty() {
            entry.pmcid = Some(row.pmcid.clone());
        }
        if entry.pmid.is_none() && !row.pubmed_id.is_empty() {
            entry.pmid = Some(row.pubmed_id.clone());
        }
        if entry.arxiv_id.is_none() && !row.arxiv_id.is_empty() {
            entry.arxiv_id = Some(row.arxiv_id.clone());
        }
        self.index_and_run(entry).await;
    }

    async fn index_and_run(&self, entry: Entry) {
        if let Err(e) = self.store.index_identifiers(&entry) {
            error!(id = %entry.id, error = %e, "identifier indexing failed");
        }
        self.process_task(entry).await;
    }

    /// One traversal of the workflow state machine for a single entry.
    #[instrument(skip(self, entry), fields(id = %entry.id))]
    pub async fn process_task(&self, mut entry: Entry) {
        let identifier = entry.id.clone();
        let pdf_filename = self.scratch_path(&format!("{identifier}.pdf"));

        // 1. resolve an Open Access URL
        if !entry.has_valid_oa_url || !entry.has_valid_pdf {
            if let Some(url) = self.resolver.resolve(&entry).await {
                entry.oa_link = Some(url);
            }
            if entry
                .oa_link
                .as_deref()
                .map(|link| !link.is_empty())
                .unwrap_or(false)
            {
                entry.has_valid_oa_url = true;
            }
        }
        if let Some(link) = entry.oa_link.as_deref() {
            debug!(link, "OA link");
        }

        // 2. acquire the PDF
        if !entry.has_valid_pdf {
            if let Some(link) = entry.oa_link.clone().filter(|l| !l.is_empty()) {
                self.acquire_pdf(&identifier, &link, &pdf_filename).await;
                if is_valid_file(&pdf_filename, ExpectedMime::Pdf) {
                    entry.has_valid_pdf = true;
                }
            }
        }

        // 3. structuring
        if self.options.structure && !entry.has_valid_tei && entry.has_valid_pdf {
            let pdf_path = self.locate_pdf(&identifier, &pdf_filename);
            let tei_filename = self.scratch_path(&format!("{identifier}.grobid.tei.xml"));
            if let Err(e) = self.grobid.process_fulltext(&pdf_path, &tei_filename).await {
                debug!(error = %e, "structuring call failed");
            }
            if is_valid_file(&tei_filename, ExpectedMime::Xml) {
                entry.has_valid_tei = true;
            }

            if self.options.annotation && !entry.has_valid_ref_annotation {
                let annotation_filename =
                    self.scratch_path(&format!("{identifier}-ref-annotations.json"));
                if let Err(e) = self
                    .grobid
                    .reference_annotations(&pdf_path, &annotation_filename)
                    .await
                {
                    debug!(error = %e, "annotation call failed");
                }
                if is_valid_file(&annotation_filename, ExpectedMime::Json) {
                    entry.has_valid_ref_annotation = true;
                }
            }
        }

        // 4. thumbnails
        if self.options.thumbnail && !entry.has_valid_thumbnail && entry.has_valid_pdf {
            let pdf_path = self.locate_pdf(&identifier, &pdf_filename);
            thumbnail::generate_thumbnails(&pdf_path).await;
            if is_valid_file(
                &thumbnail::thumbnail_path(&pdf_path, "small"),
                ExpectedMime::Png,
            ) {
                entry.has_valid_thumbnail = true;
            }
        }

        // 5. persist: JSON sidecar in scratch, record in the entries map
        entry.data_path = Some(storage_path(&identifier));
        match entry.to_sorted_json() {
            Ok(line) => {
                let sidecar = self.scratch_path(&format!("{identifier}.json"));
                if let Err(e) = std::fs::write(&sidecar, line) {
                    error!(error = %e, "writing metadata sidecar failed");
                }
            }
            Err(e) => error!(error = %e, "metadata serialization failed"),
        }
        if let Err(e) = self.store.put_entry(&entry) {
            error!(error = %e, "storing entry failed");
        }

        // 6. publish produced files
        self.publish(&entry).await;
    }

    /// Fetch the PDF behind `link` into `pdf_filename`: local copy for
    /// `file://`, download-and-extract for PMC archives, plain download
    /// otherwise.
    async fn acquire_pdf(&self, identifier: &str, link: &str, pdf_filename: &Path) {
        if let Some(local) = link.strip_prefix("file://") {
            let source = Path::new(local);
            if source.is_file() {
                if let Err(e) = std::fs::copy(source, pdf_filename) {
                    warn!(source = %source.display(), error = %e, "local PDF copy failed");
                }
            }
            // a legacy tree may also hold the NLM file for this identifier
            self.reuse_legacy_nlm(identifier);
            return;
        }

        if link.ends_with(".tar.gz") {
            let archive = self.scratch_path(&format!("{identifier}.tar.gz"));
            if self.downloader.download(link, &archive).await.is_success() {
                let result =
                    tokio::task::spawn_blocking(move || download::extract_pmc_archive(&archive))
                        .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "archive extraction failed"),
                    Err(e) => warn!(error = %e, "archive extraction task failed"),
                }
            }
            return;
        }

        let _ = self.downloader.download(link, pdf_filename).await;
    }

    fn reuse_legacy_nlm(&self, identifier: &str) {
        if self.config.legacy_data_path.trim().is_empty() {
            return;
        }
        let legacy_nlm = Path::new(&self.config.legacy_data_path)
            .join(storage_path(identifier))
            .join(format!("{identifier}.nxml"));
        if legacy_nlm.is_file() {
            let dest = self.scratch_path(&format!("{identifier}.nxml"));
            if let Err(e) = std::fs::copy(&legacy_nlm, &dest) {
                warn!(error = %e, "legacy NLM copy failed");
            }
        }
    }

    /// The PDF may still be in scratch, or already moved under the sharded
    /// tree by an earlier run.
    fn locate_pdf(&self, identifier: &str, scratch_pdf: &Path) -> PathBuf {
        if scratch_pdf.exists() {
            return scratch_pdf.to_path_buf();
        }
        Path::new(&self.config.data_path)
            .join(storage_path(identifier))
            .join(format!("{identifier}.pdf"))
    }
}

/// Destroy all processing state: scratch files, the sharded data tree, and
/// both writable maps. Runs before the harvester is constructed, so the
/// maps are re-created empty on the next open.
pub fn reset_workspace(config: &Config, remove_dump: bool) -> anyhow::Result<()> {
    let data_path = Path::new(&config.data_path);
    if data_path.is_dir() {
        for dir_entry in std::fs::read_dir(data_path)? {
            let path = dir_entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
                continue;
            }
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            let Some(name) = name else { continue };
            let scratch_leftover = [".pdf", ".png", ".nxml", ".xml", ".tar.gz", ".json"]
                .iter()
                .any(|suffix| name.ends_with(suffix));
            if scratch_leftover {
                std::fs::remove_file(&path)?;
            }
        }
    }
    if remove_dump {
        let dump = Path::new(crate::report::DUMP_FILE_NAME);
        if dump.is_file() {
            std::fs::remove_file(dump)?;
        }
    }
    info!("workspace reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_workspace_clears_files_and_trees() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data");
        std::fs::create_dir_all(data_path.join("entries")).unwrap();
        std::fs::create_dir_all(data_path.join("ab/cd/ef/01/x")).unwrap();
        std::fs::write(data_path.join("left.pdf"), b"%PDF-").unwrap();
        std::fs::write(data_path.join("left.tar.gz"), b"x").unwrap();
        std::fs::write(data_path.join("notes.txt"), b"keep me").unwrap();

        let config: Config = serde_json::from_str(&format!(
            r#"{{"data_path": "{}"}}"#,
            data_path.display()
        ))
        .unwrap();
        reset_workspace(&config, false).unwrap();

        assert!(!data_path.join("entries").exists());
        assert!(!data_path.join("ab").exists());
        assert!(!data_path.join("left.pdf").exists());
        assert!(!data_path.join("left.tar.gz").exists());
        // unrelated files are left alone
        assert!(data_path.join("notes.txt").exists());
    }
}
