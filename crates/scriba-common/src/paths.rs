//! Identifier and storage-path helpers.

/// Convert an identifier into the sharded storage path used for all
/// persisted artifacts: `123456789abc` → `12/34/56/78/123456789abc/`.
///
/// Every consumer of the data tree relies on this exact layout, so the
/// function must stay byte-stable.
pub fn storage_path(identifier: &str) -> String {
    if identifier.len() < 8 || !identifier.is_ascii() {
        // cord_uid and UUID identifiers are always ASCII and longer than
        // eight characters; anything shorter gets a flat directory
        return format!("{identifier}/");
    }
    format!(
        "{}/{}/{}/{}/{}/",
        &identifier[0..2],
        &identifier[2..4],
        &identifier[4..6],
        &identifier[6..8],
        identifier
    )
}

/// Normalize a DOI: trim surrounding whitespace, lowercase, and strip a
/// leading resolver prefix.
pub fn clean_doi(doi: &str) -> String {
    let doi = doi.trim().to_lowercase();
    if let Some(rest) = doi.strip_prefix("https://doi.org/") {
        return rest.to_string();
    }
    if let Some(rest) = doi.strip_prefix("http://dx.doi.org/") {
        return rest.to_string();
    }
    doi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_path_sharding() {
        assert_eq!(
            storage_path("abcdef0123456789abcdef0123456789"),
            "ab/cd/ef/01/abcdef0123456789abcdef0123456789/"
        );
    }

    #[test]
    fn test_storage_path_cord_uid() {
        assert_eq!(storage_path("ug7v899j"), "ug/7v/89/9j/ug7v899j/");
    }

    #[test]
    fn test_clean_doi_strips_resolver_prefix() {
        assert_eq!(clean_doi("  HTTPS://doi.org/10.1/ABC  "), "10.1/abc");
        assert_eq!(clean_doi("http://dx.doi.org/10.1000/xyz"), "10.1000/xyz");
        assert_eq!(clean_doi("10.1000/xyz"), "10.1000/xyz");
    }
}
