//! Final placement of produced artifacts.
//!
//! Once an entry has been processed, its scratch files move either into the
//! sharded local tree or to the object store, and the scratch area is
//! cleaned behind. The PDF is only published when it passes MIME
//! validation; everything else is published when present.

use std::path::{Path, PathBuf};

use tracing::{error, warn};

use scriba_common::paths::storage_path;
use scriba_common::sniff::{is_valid_file, ExpectedMime};
use scriba_store::Entry;

use crate::workflow::Harvester;

const THUMB_SIZES: [&str; 3] = ["small", "medium", "large"];

impl Harvester {
    pub(crate) async fn publish(&self, entry: &Entry) {
        let id = &entry.id;
        let scratch = Path::new(&self.config().data_path);
        let dest_rel = storage_path(id);

        let pdf = scratch.join(format!("{id}.pdf"));
        let mut files: Vec<PathBuf> = Vec::new();
        if is_valid_file(&pdf, ExpectedMime::Pdf) {
            files.push(pdf.clone());
        }
        for suffix in [".nxml", ".grobid.tei.xml", ".json", "-ref-annotations.json"] {
            let file = scratch.join(format!("{id}{suffix}"));
            if file.is_file() {
                files.push(file);
            }
        }
        if self.options().thumbnail {
            for size in THUMB_SIZES {
                let thumb = scratch.join(format!("{id}-thumb-{size}.png"));
                if thumb.is_file() {
                    files.push(thumb);
                }
            }
        }

        if let Some(object_store) = self.object_store() {
            // uploads already parallelize internally per file part
            let prefix = dest_rel.trim_end_matches('/');
            for file in &files {
                if let Err(e) = object_store.upload_file(file, prefix).await {
                    error!(file = %file.display(), error = %e, "upload failed");
                }
            }
        } else {
            let dest_dir = scratch.join(&dest_rel);
            if let Err(e) = std::fs::create_dir_all(&dest_dir) {
                error!(dest = %dest_dir.display(), error = %e, "cannot create storage directory");
                return;
            }
            for file in &files {
                if let Some(name) = file.file_name() {
                    if let Err(e) = std::fs::copy(file, dest_dir.join(name)) {
                        error!(file = %file.display(), error = %e, "copy to storage failed");
                    }
                }
            }
        }

        // clean the scratch area for this id
        let mut leftovers = files;
        leftovers.push(pdf);
        for size in THUMB_SIZES {
            leftovers.push(scratch.join(format!("{id}-thumb-{size}.png")));
        }
        for file in leftovers {
            if file.is_file() {
                if let Err(e) = std::fs::remove_file(&file) {
                    warn!(file = %file.display(), error = %e, "scratch cleaning failed");
                }
            }
        }
    }
}
