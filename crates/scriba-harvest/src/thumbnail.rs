//! First-page thumbnail generation via ImageMagick.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

const SIZES: [(&str, u32); 3] = [("small", 150), ("medium", 300), ("large", 500)];

/// Path of one thumbnail variant next to its PDF.
pub fn thumbnail_path(pdf_file: &Path, size: &str) -> PathBuf {
    let stem = pdf_file.to_string_lossy();
    PathBuf::from(stem.trim_end_matches(".pdf").to_string() + &format!("-thumb-{size}.png"))
}

/// Rasterize page one of a PDF into three PNG thumbnails (150/300/500 px
/// height, 200 DPI, flattened). Failures are logged and non-fatal; the
/// caller checks the small variant to decide whether the step succeeded.
pub async fn generate_thumbnails(pdf_file: &Path) {
    for (size, height) in SIZES {
        let output = thumbnail_path(pdf_file, size);
        let first_page = format!("{}[0]", pdf_file.display());
        let status = tokio::process::Command::new("convert")
            .arg("-quiet")
            .arg("-density")
            .arg("200")
            .arg("-thumbnail")
            .arg(format!("x{height}"))
            .arg("-flatten")
            .arg(&first_page)
            .arg(&output)
            .status()
            .await;
        match status {
            Ok(s) if s.success() => {
                debug!(size, output = %output.display(), "thumbnail generated");
            }
            Ok(s) => {
                warn!(size, code = ?s.code(), "convert exited with failure");
            }
            Err(e) => {
                warn!(size, error = %e, "convert could not be spawned");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_path_variants() {
        let pdf = Path::new("/tmp/work/abc.pdf");
        assert_eq!(
            thumbnail_path(pdf, "small"),
            PathBuf::from("/tmp/work/abc-thumb-small.png")
        );
        assert_eq!(
            thumbnail_path(pdf, "large"),
            PathBuf::from("/tmp/work/abc-thumb-large.png")
        );
    }
}
