//! CORD-19 metadata CSV input.
//!
//! The metadata file changed column names over the releases; the older
//! `Microsoft Academic Paper ID` / `WHO #Covidence` headers are accepted as
//! aliases of the current snake_case ones. Rows are keyed by `cord_uid`.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cord19Row {
    #[serde(default)]
    pub cord_uid: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub doi: String,
    #[serde(default)]
    pub pmcid: String,
    #[serde(default)]
    pub pubmed_id: String,
    #[serde(default)]
    pub license: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub publish_time: String,
    #[serde(default, alias = "Microsoft Academic Paper ID")]
    pub mag_id: String,
    #[serde(default, alias = "WHO #Covidence")]
    pub who_covidence_id: String,
    #[serde(default)]
    pub arxiv_id: String,
    #[serde(default)]
    pub url: String,
}

/// Streaming iterator over the metadata rows.
pub fn row_iter(
    path: &Path,
) -> anyhow::Result<impl Iterator<Item = csv::Result<Cord19Row>>> {
    let file = std::fs::File::open(path)?;
    let reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    Ok(reader.into_deserialize::<Cord19Row>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rows_from(csv_text: &str) -> Vec<Cord19Row> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(csv_text.as_bytes()).unwrap();
        row_iter(&path).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_current_column_names() {
        let rows = rows_from(
            "cord_uid,sha,title,doi,pmcid,pubmed_id,license,abstract,publish_time,mag_id,who_covidence_id,arxiv_id,url\n\
             ug7v899j,abc123,Some title,10.1/ABC,PMC42,99,cc-by,An abstract,2020-03-01,31415,#42,2003.0001,https://x\n",
        );
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.cord_uid, "ug7v899j");
        assert_eq!(row.doi, "10.1/ABC");
        assert_eq!(row.pmcid, "PMC42");
        assert_eq!(row.pubmed_id, "99");
        assert_eq!(row.mag_id, "31415");
        assert_eq!(row.who_covidence_id, "#42");
        assert_eq!(row.arxiv_id, "2003.0001");
    }

    #[test]
    fn test_historical_column_aliases() {
        let rows = rows_from(
            "cord_uid,sha,title,doi,pmcid,pubmed_id,license,abstract,publish_time,Microsoft Academic Paper ID,WHO #Covidence,url\n\
             x1y2z3w4,,T,,,,,,2019-11-30,271828,#7,https://y\n",
        );
        assert_eq!(rows[0].mag_id, "271828");
        assert_eq!(rows[0].who_covidence_id, "#7");
        // columns absent in old releases default to empty
        assert_eq!(rows[0].arxiv_id, "");
    }
}
