//! Stable resource maps built once per workspace.
//!
//! - The PMC OA map comes from the NCBI file list (one tab-separated row
//!   per archive, first line is a timestamp). It tells, for a PMCID, which
//!   `.tar.gz` on the FTP mirror holds its PDF and NLM XML.
//! - The Elsevier OA map comes from a gzip-compressed CSV and maps DOI/PII
//!   to a PDF inside the locally mirrored Elsevier COVID-19 set.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::{info, warn};

use scriba_common::Config;
use scriba_store::{PmcOaMap, PmcOaRecord};

use crate::download::Downloader;

const PMC_FILE_LIST: &str = "oa_file_list.txt";
const INSERT_CHUNK: usize = 100_000;

/// Build (once) and open the PMC OA map. Returns `None` when the file list
/// is unavailable; PMC resolution is then simply disabled.
pub async fn build_pmc_oa_map(
    config: &Config,
    downloader: &Downloader,
) -> anyhow::Result<Option<Arc<PmcOaMap>>> {
    let resource_path = Path::new(&config.resource_path);
    std::fs::create_dir_all(resource_path)?;

    if PmcOaMap::is_built(resource_path) {
        return Ok(Some(Arc::new(PmcOaMap::open(resource_path)?)));
    }

    let list_file = resource_path.join(PMC_FILE_LIST);
    if !list_file.is_file() {
        let url = format!(
            "{}/{}",
            config.pmc_base_ftp.trim_end_matches('/'),
            PMC_FILE_LIST
        );
        info!(%url, "downloading PMC resource file");
        if !downloader.download(&url, &list_file).await.is_success() {
            warn!("PMC file list could not be downloaded, PMC OA resolution disabled");
            return Ok(None);
        }
    }

    info!("building PMC resource map - done only one time");
    let map = PmcOaMap::open(resource_path)?;
    let reader = BufReader::new(std::fs::File::open(&list_file)?);
    let mut chunk: Vec<(String, PmcOaRecord)> = Vec::with_capacity(INSERT_CHUNK);
    let mut total = 0u64;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if index == 0 {
            // first line is just a timestamp
            continue;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 5 {
            continue;
        }
        chunk.push((
            columns[2].to_string(),
            PmcOaRecord {
                subpath: columns[0].to_string(),
                // pmid is optional in the file list
                pmid: columns[3].to_string(),
                license: columns[4].to_string(),
            },
        ));
        total += 1;
        if chunk.len() == INSERT_CHUNK {
            map.insert_all(std::mem::take(&mut chunk))?;
        }
    }
    if !chunk.is_empty() {
        map.insert_all(chunk)?;
    }
    info!(total, "PMC resource map built");
    Ok(Some(Arc::new(map)))
}

#[derive(Debug, Deserialize)]
struct ElsevierRow {
    #[serde(default)]
    doi: String,
    #[serde(default)]
    pii: String,
    #[serde(default)]
    pdf: String,
}

/// Load the Elsevier OA map into memory. Both the lowercased DOI and the
/// PII point at the same PDF file name. Returns `None` when no local
/// Elsevier mirror is configured at all.
pub fn load_elsevier_oa_map(config: &Config) -> Option<HashMap<String, String>> {
    if config.cord19_elsevier_pdf_path.is_empty() {
        return None;
    }
    let mut map = HashMap::new();
    if config.cord19_elsevier_map_path.is_empty() {
        return Some(map);
    }
    let path = Path::new(&config.resource_path).join(&config.cord19_elsevier_map_path);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(_) => return Some(map),
    };

    let mut reader = csv::Reader::from_reader(GzDecoder::new(file));
    for result in reader.deserialize::<ElsevierRow>() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "skipping malformed Elsevier OA map row");
                continue;
            }
        };
        if row.pdf.is_empty() {
            continue;
        }
        if !row.doi.is_empty() {
            map.insert(row.doi.to_lowercase(), row.pdf.clone());
        }
        if !row.pii.is_empty() {
            map.insert(row.pii.clone(), row.pdf.clone());
        }
    }
    info!(entries = map.len(), "Elsevier OA map loaded");
    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn config_with(resource_path: &Path, pdf_path: &str, map_name: &str) -> Config {
        let json = format!(
            r#"{{"resource_path": "{}", "cord19_elsevier_pdf_path": "{}", "cord19_elsevier_map_path": "{}"}}"#,
            resource_path.display(),
            pdf_path,
            map_name
        );
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_elsevier_map_indexes_doi_and_pii() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = dir.path().join("elsevier_map.csv.gz");
        let file = std::fs::File::create(&map_path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder
            .write_all(b"doi,pii,other,pdf\n10.1016/J.CELL.2020.01.001,S0092867420300015,x,paper1.pdf\n,S009999,y,paper2.pdf\n")
            .unwrap();
        encoder.finish().unwrap();

        let config = config_with(dir.path(), "/mirror/pdfs", "elsevier_map.csv.gz");
        let map = load_elsevier_oa_map(&config).unwrap();
        assert_eq!(
            map.get("10.1016/j.cell.2020.01.001").map(String::as_str),
            Some("paper1.pdf")
        );
        assert_eq!(
            map.get("S0092867420300015").map(String::as_str),
            Some("paper1.pdf")
        );
        assert_eq!(map.get("S009999").map(String::as_str), Some("paper2.pdf"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_elsevier_map_disabled_without_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "", "whatever.csv.gz");
        assert!(load_elsevier_oa_map(&config).is_none());
    }

    #[tokio::test]
    async fn test_pmc_map_built_from_file_list() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join(PMC_FILE_LIST);
        std::fs::write(
            &list,
            "2024-01-01 00:00:00\n\
             oa_package/00/01/PMC42.tar.gz\tSome Citation\tPMC42\t99\tCC BY\n\
             oa_package/00/02/PMC43.tar.gz\tOther Citation\tPMC43\t\tNO-CC CODE\n",
        )
        .unwrap();

        let config: Config = serde_json::from_str(&format!(
            r#"{{"resource_path": "{}"}}"#,
            dir.path().display()
        ))
        .unwrap();
        let downloader = Downloader::new().unwrap();
        let map = build_pmc_oa_map(&config, &downloader)
            .await
            .unwrap()
            .expect("map should build from the local file list");

        let record = map.get("PMC42").unwrap().unwrap();
        assert_eq!(record.subpath, "oa_package/00/01/PMC42.tar.gz");
        assert_eq!(record.pmid, "99");
        assert_eq!(record.license, "CC BY");
        assert_eq!(map.count().unwrap(), 2);
        drop(map);

        // the build is idempotent: a second call short-circuits on the map dir
        let again = build_pmc_oa_map(&config, &downloader).await.unwrap().unwrap();
        assert_eq!(again.count().unwrap(), 2);
    }
}
