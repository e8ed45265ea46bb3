//! Batched bounded-parallel dispatch over identifier lists.
//!
//! Inputs are read in stable order and grouped into batches of
//! `batch_size`; each batch runs as a set of concurrent per-entry tasks
//! with a 50 s deadline, and is fully drained before the next batch
//! starts, so at most `batch_size` entries are ever in flight. Strong
//! identifiers that already resolve in the uuid map are skipped — except
//! for CORD-19, where every row is re-dispatched so its metadata stays
//! fresh across releases.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scriba_common::paths::clean_doi;
use scriba_store::Entry;

use crate::cord19;
use crate::workflow::Harvester;

/// Per-entry deadline within a batch.
const TASK_TIMEOUT: Duration = Duration::from_secs(50);

/// Number of batches needed for `total` inputs.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return total;
    }
    total.div_ceil(batch_size)
}

impl Harvester {
    /// Run one batch of tasks to completion, each under the 50 s deadline.
    async fn drain_batch<F>(&self, tasks: Vec<(String, F)>)
    where
        F: Future<Output = ()>,
    {
        let guarded = tasks.into_iter().map(|(identifier, task)| async move {
            if tokio::time::timeout(TASK_TIMEOUT, task).await.is_err() {
                warn!(identifier = %identifier, "entry processing timed out");
            }
        });
        futures::future::join_all(guarded).await;
    }

    /// Assign an id for a strong identifier: `None` when it is already
    /// known (resumability), a fresh UUID otherwise.
    fn assign_id(&self, strong_identifier: &str) -> Option<String> {
        match self.store().uuid_for(strong_identifier) {
            Ok(Some(_)) => {
                debug!(strong_identifier, "already harvested, skipping");
                None
            }
            Ok(None) => Some(Uuid::new_v4().to_string()),
            Err(e) => {
                error!(strong_identifier, error = %e, "uuid map lookup failed");
                None
            }
        }
    }

    pub async fn harvest_dois(&self, dois_file: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(dois_file)?;
        let identifiers: Vec<(String, String)> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(clean_doi)
            .filter_map(|doi| self.assign_id(&doi).map(|id| (id, doi)))
            .collect();
        info!(
            count = identifiers.len(),
            batches = batch_count(identifiers.len(), self.config().batch_size),
            "number of articles to harvest"
        );

        for batch in identifiers.chunks(self.config().batch_size.max(1)) {
            let tasks = batch
                .iter()
                .map(|(id, doi)| {
                    (
                        id.clone(),
                        self.process_entry_doi(id.clone(), doi.clone()),
                    )
                })
                .collect();
            self.drain_batch(tasks).await;
        }
        Ok(())
    }

    pub async fn harvest_pmids(&self, pmids_file: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(pmids_file)?;
        let identifiers: Vec<(String, String)> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|pmid| self.assign_id(pmid).map(|id| (id, pmid.to_string())))
            .collect();
        info!(count = identifiers.len(), "number of articles to harvest");

        for batch in identifiers.chunks(self.config().batch_size.max(1)) {
            let tasks = batch
                .iter()
                .map(|(id, pmid)| {
                    (
                        id.clone(),
                        self.process_entry_pmid(id.clone(), pmid.clone()),
                    )
                })
                .collect();
            self.drain_batch(tasks).await;
        }
        Ok(())
    }

    pub async fn harvest_pmcids(&self, pmcids_file: &Path) -> anyhow::Result<()> {
        let content = std::fs::read_to_string(pmcids_file)?;
        let identifiers: Vec<(String, String)> = content
            .lines()
            .map(str::trim)
            // a stray header line from the PMC export
            .filter(|line| !line.is_empty() && *line != "pmc")
            .filter_map(|pmcid| self.assign_id(pmcid).map(|id| (id, pmcid.to_string())))
            .collect();
        info!(count = identifiers.len(), "number of articles to harvest");

        for batch in identifiers.chunks(self.config().batch_size.max(1)) {
            let tasks = batch
                .iter()
                .map(|(id, pmcid)| {
                    (
                        id.clone(),
                        self.process_entry_pmcid(id.clone(), pmcid.clone()),
                    )
                })
                .collect();
            self.drain_batch(tasks).await;
        }
        Ok(())
    }

    /// CORD-19 ingest. The `cord_uid` is adopted as the entry id; rows
    /// whose identifier is already known are still dispatched so the
    /// metadata refresh applies, the state flags keep the structural work
    /// from repeating.
    pub async fn harvest_cord19(&self, metadata_csv: &Path) -> anyhow::Result<()> {
        let mut batch: Vec<cord19::Cord19Row> = Vec::new();
        let mut total = 0usize;
        for result in cord19::row_iter(metadata_csv)? {
            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, "skipping malformed CORD-19 row");
                    continue;
                }
            };
            if row.cord_uid.is_empty() {
                continue;
            }
            total += 1;
            batch.push(row);
            if batch.len() == self.config().batch_size.max(1) {
                self.drain_cord19_batch(std::mem::take(&mut batch)).await;
            }
        }
        if !batch.is_empty() {
            self.drain_cord19_batch(batch).await;
        }
        info!(total, "processed articles from CORD-19");
        Ok(())
    }

    async fn drain_cord19_batch(&self, rows: Vec<cord19::Cord19Row>) {
        let tasks = rows
            .into_iter()
            .map(|row| {
                let identifier = row.cord_uid.clone();
                (
                    identifier.clone(),
                    self.process_entry_cord19(identifier, row),
                )
            })
            .collect();
        self.drain_batch(tasks).await;
    }

    /// Re-drive every entry whose flag set is incomplete for the enabled
    /// feature set.
    pub async fn reprocess_failed(&self) -> anyhow::Result<()> {
        let options = self.options();
        let mut pending: Vec<Entry> = Vec::new();
        self.store().for_each_entry(|entry| {
            let incomplete = !entry.has_valid_oa_url
                || !entry.has_valid_pdf
                || (options.structure && !entry.has_valid_tei)
                || (options.thumbnail && !entry.has_valid_thumbnail)
                || (options.annotation && !entry.has_valid_ref_annotation);
            if incomplete {
                debug!(id = %entry.id, "re-processing");
                pending.push(entry);
            }
        })?;
        info!(count = pending.len(), "re-processing incomplete entries");

        for batch in pending.chunks(self.config().batch_size.max(1)) {
            let tasks = batch
                .iter()
                .map(|entry| (entry.id.clone(), self.process_task(entry.clone())))
                .collect();
            self.drain_batch(tasks).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_count_is_ceiling_division() {
        assert_eq!(batch_count(0, 10), 0);
        assert_eq!(batch_count(9, 10), 1);
        assert_eq!(batch_count(10, 10), 1);
        assert_eq!(batch_count(11, 10), 2);
        assert_eq!(batch_count(25, 10), 3);
        // degenerate configuration
        assert_eq!(batch_count(3, 0), 3);
    }
}
