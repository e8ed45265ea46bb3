//! Multi-transport file downloader.
//!
//! Open Access PDFs sit behind a wide variety of servers: plain HTTP,
//! Cloudflare-style interstitial pages, FTP mirrors, and hosts that only
//! cooperate with a command-line fetcher. The downloader composes one
//! transport per situation and tries them in order, stopping at the first
//! success. All transports share the `(url, dest) -> status` signature.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use scriba_common::http::{self, random_user_agent};
use scriba_common::sniff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Success,
    Fail,
}

impl DownloadStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadStatus::Success)
    }
}

/// A single download strategy with a uniform signature.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this transport applies to the given URL.
    fn handles(&self, url: &str) -> bool;

    async fn fetch(&self, url: &str, dest: &Path) -> DownloadStatus;
}

// ── Command-line fetcher ──────────────────────────────────────────────────

/// `wget` subprocess. The most reliable option for FTP and for a few
/// stubborn HTTP hosts, used first for FTP URLs and as the last resort
/// otherwise.
struct WgetTransport {
    ftp_only: bool,
    available: bool,
}

#[async_trait]
impl Transport for WgetTransport {
    fn name(&self) -> &'static str {
        "wget"
    }

    fn handles(&self, url: &str) -> bool {
        if !self.available {
            return false;
        }
        if self.ftp_only {
            url.starts_with("ftp://")
        } else {
            !url.starts_with("ftp://")
        }
    }

    async fn fetch(&self, url: &str, dest: &Path) -> DownloadStatus {
        let status = tokio::process::Command::new("wget")
            .arg("-c")
            .arg("--quiet")
            .arg("-O")
            .arg(dest)
            .arg("--timeout=15")
            .arg("--waitretry=0")
            .arg("--tries=5")
            .arg("--retry-connrefused")
            .arg(format!("--header=User-Agent: {}", random_user_agent()))
            .arg(format!("--header=Accept: {}", http::ACCEPT_DOWNLOAD))
            .arg(format!(
                "--header=Accept-Encoding: {}",
                http::ACCEPT_ENCODING_DOWNLOAD
            ))
            .arg("--no-check-certificate")
            .arg(url)
            .status()
            .await;

        match status {
            Ok(s) if s.success() => DownloadStatus::Success,
            Ok(s) => {
                debug!(%url, code = ?s.code(), "wget exited with failure");
                DownloadStatus::Fail
            }
            Err(e) => {
                debug!(%url, error = %e, "wget could not be spawned");
                DownloadStatus::Fail
            }
        }
    }
}

// ── In-process FTP client ─────────────────────────────────────────────────

/// Anonymous FTP fallback for when the command-line fetcher is missing or
/// fails on an FTP mirror.
struct FtpTransport;

#[async_trait]
impl Transport for FtpTransport {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn handles(&self, url: &str) -> bool {
        url.starts_with("ftp://")
    }

    async fn fetch(&self, url: &str, dest: &Path) -> DownloadStatus {
        let url = url.to_string();
        let dest = dest.to_path_buf();
        match tokio::task::spawn_blocking(move || fetch_ftp_blocking(&url, &dest)).await {
            Ok(Ok(())) => DownloadStatus::Success,
            Ok(Err(e)) => {
                debug!(error = %e, "ftp transfer failed");
                DownloadStatus::Fail
            }
            Err(e) => {
                debug!(error = %e, "ftp task panicked");
                DownloadStatus::Fail
            }
        }
    }
}

fn fetch_ftp_blocking(url: &str, dest: &Path) -> anyhow::Result<()> {
    let parsed = url::Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("ftp url without host: {url}"))?;
    let port = parsed.port().unwrap_or(21);

    let mut ftp = suppaftp::FtpStream::connect((host, port))?;
    ftp.login("anonymous", "anonymous")?;
    ftp.transfer_type(suppaftp::types::FileType::Binary)?;
    let buffer = ftp.retr_as_buffer(parsed.path())?;
    std::fs::write(dest, buffer.into_inner())?;
    let _ = ftp.quit();
    Ok(())
}

// ── Interstitial-aware HTTP ───────────────────────────────────────────────

/// HTTP session able to pass the simple interstitial wall some publishers
/// put in front of their PDFs: when the response is an HTML page holding an
/// `<a id="redirect">` anchor, wait five seconds and follow it, up to five
/// attempts.
struct InterstitialTransport {
    client: reqwest::Client,
}

impl InterstitialTransport {
    fn new() -> scriba_common::Result<Self> {
        Ok(Self {
            client: http::download_client(30)?,
        })
    }
}

#[async_trait]
impl Transport for InterstitialTransport {
    fn name(&self) -> &'static str {
        "interstitial-http"
    }

    fn handles(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn fetch(&self, url: &str, dest: &Path) -> DownloadStatus {
        let wants_pdf = dest.extension().map(|e| e == "pdf").unwrap_or(false);
        let mut current = url.trim().to_string();

        for attempt in 0..5 {
            let response = match self
                .client
                .get(&current)
                .header(USER_AGENT, random_user_agent())
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    debug!(%current, error = %e, "interstitial GET failed");
                    return DownloadStatus::Fail;
                }
            };
            if response.status() != reqwest::StatusCode::OK {
                debug!(%current, status = %response.status(), "interstitial GET non-200");
                return DownloadStatus::Fail;
            }
            let body = match response.bytes().await {
                Ok(b) => b,
                Err(e) => {
                    debug!(%current, error = %e, "interstitial body read failed");
                    return DownloadStatus::Fail;
                }
            };

            if !wants_pdf || body.starts_with(b"%PDF-") {
                return write_bytes(dest, &body);
            }

            // HTML where a PDF was expected: look for the redirect anchor
            match extract_redirect_href(&String::from_utf8_lossy(&body)) {
                Some(href) => {
                    debug!(attempt, %href, "redirect anchor found, waiting before retry");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    current = href;
                }
                None => return DownloadStatus::Fail,
            }
        }
        DownloadStatus::Fail
    }
}

/// Pull the href of the `<a id="redirect">` anchor out of an interstitial
/// page, if present.
fn extract_redirect_href(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a#redirect").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

// ── Generic HTTP ──────────────────────────────────────────────────────────

struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    fn new() -> scriba_common::Result<Self> {
        Ok(Self {
            client: http::download_client(30)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    fn handles(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn fetch(&self, url: &str, dest: &Path) -> DownloadStatus {
        let response = match self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(%url, error = %e, "http GET failed");
                return DownloadStatus::Fail;
            }
        };
        if response.status() != reqwest::StatusCode::OK {
            debug!(%url, status = %response.status(), "http GET non-200");
            return DownloadStatus::Fail;
        }
        match response.bytes().await {
            Ok(body) => write_bytes(dest, &body),
            Err(e) => {
                debug!(%url, error = %e, "http body read failed");
                DownloadStatus::Fail
            }
        }
    }
}

fn write_bytes(dest: &Path, body: &[u8]) -> DownloadStatus {
    match std::fs::write(dest, body) {
        Ok(()) => DownloadStatus::Success,
        Err(e) => {
            warn!(dest = %dest.display(), error = %e, "writing downloaded file failed");
            DownloadStatus::Fail
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────

pub struct Downloader {
    transports: Vec<Box<dyn Transport>>,
}

impl Downloader {
    pub fn new() -> scriba_common::Result<Self> {
        let wget_available = wget_available();
        if !wget_available {
            warn!("wget not found on PATH, command-line transport disabled");
        }
        Ok(Self {
            transports: vec![
                Box::new(WgetTransport {
                    ftp_only: true,
                    available: wget_available,
                }),
                Box::new(FtpTransport),
                Box::new(InterstitialTransport::new()?),
                Box::new(HttpTransport::new()?),
                Box::new(WgetTransport {
                    ftp_only: false,
                    available: wget_available,
                }),
            ],
        })
    }

    /// Try transports in order; the first one that both fetches and leaves a
    /// usable (decompressed, non-empty) file wins.
    pub async fn download(&self, url: &str, dest: &Path) -> DownloadStatus {
        for transport in &self.transports {
            if !transport.handles(url) {
                continue;
            }
            if transport.fetch(url, dest).await.is_success() && ensure_decompressed(dest) {
                debug!(transport = transport.name(), %url, "download succeeded");
                return DownloadStatus::Success;
            }
        }
        warn!(%url, "all download transports failed");
        DownloadStatus::Fail
    }
}

fn wget_available() -> bool {
    std::process::Command::new("wget")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Decompress a gzip-compressed download in place. Archives (`.tar.gz`) are
/// left untouched for the extraction step. Returns false when the file is
/// missing, empty, or decompression failed; the partial file is removed in
/// that case.
pub fn ensure_decompressed(dest: &Path) -> bool {
    if dest.to_string_lossy().ends_with(".tar.gz") {
        return dest.is_file();
    }
    if !dest.is_file() {
        return false;
    }
    let Ok(meta) = std::fs::metadata(dest) else {
        return false;
    };
    if meta.len() == 0 {
        let _ = std::fs::remove_file(dest);
        return false;
    }
    if !sniff::is_gzip(dest) {
        return true;
    }

    let tmp: PathBuf = {
        let mut name = dest.as_os_str().to_owned();
        name.push(".decompressed");
        PathBuf::from(name)
    };
    let result = (|| -> std::io::Result<()> {
        let input = std::fs::File::open(dest)?;
        let mut decoder = GzDecoder::new(input);
        let mut output = std::fs::File::create(&tmp)?;
        std::io::copy(&mut decoder, &mut output)?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            if std::fs::rename(&tmp, dest).is_err() {
                let _ = std::fs::remove_file(&tmp);
                let _ = std::fs::remove_file(dest);
                return false;
            }
            true
        }
        Err(e) => {
            warn!(dest = %dest.display(), error = %e, "decompression failed");
            let _ = std::fs::remove_file(&tmp);
            let _ = std::fs::remove_file(dest);
            false
        }
    }
}

// ── PMC archive handling ──────────────────────────────────────────────────

/// Extract the useful members of a PMC OA archive: the first `.pdf`/`.PDF`
/// member becomes `<base>.pdf`, every `.nxml` member becomes `<base>.nxml`
/// (last one wins). Members are unpacked through a per-archive scratch
/// subdirectory named after the first six characters of the archive basename
/// so concurrent extractions cannot collide. The archive is deleted
/// afterwards.
pub fn extract_pmc_archive(archive_path: &Path) -> anyhow::Result<()> {
    let name = archive_path.file_name().map(|n| n.to_string_lossy().into_owned());
    let Some(name) = name else {
        return Ok(());
    };
    if !archive_path.is_file() || !name.ends_with(".tar.gz") {
        return Ok(());
    }
    let parent = archive_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = name.trim_end_matches(".tar.gz");
    let scratch = parent.join(&name[..name.len().min(6)]);

    let pdf_dest = parent.join(format!("{stem}.pdf"));
    let nxml_dest = parent.join(format!("{stem}.nxml"));

    let file = std::fs::File::open(archive_path)?;
    // PMC ships gzip tars; tolerate an already-decompressed plain tar too
    let reader: Box<dyn Read> = if sniff::is_gzip(archive_path) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);

    let mut pdf_found = false;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let member = match entry.path() {
            Ok(p) => match p.file_name() {
                Some(f) => f.to_string_lossy().into_owned(),
                None => continue,
            },
            Err(_) => continue,
        };
        let is_pdf = member.ends_with(".pdf") || member.ends_with(".PDF");
        let is_nxml = member.ends_with(".nxml");
        if (!is_pdf || pdf_found) && !is_nxml {
            continue;
        }

        std::fs::create_dir_all(&scratch)?;
        let extracted = scratch.join(&member);
        entry.unpack(&extracted)?;
        // corrupted archives are not a legend
        if !extracted.is_file() {
            continue;
        }
        if is_pdf && !pdf_found {
            std::fs::rename(&extracted, &pdf_dest)?;
            pdf_found = true;
        } else if is_nxml {
            std::fs::rename(&extracted, &nxml_dest)?;
        }
    }

    if scratch.is_dir() {
        let _ = std::fs::remove_dir_all(&scratch);
    }
    if !pdf_found {
        warn!(archive = %archive_path.display(), "no pdf found in archive");
    }
    std::fs::remove_file(archive_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_archive(dir: &Path, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
        let path = dir.join(name);
        let file = std::fs::File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (member_name, content) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, member_name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn test_extract_pmc_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            "PMC42.tar.gz",
            &[
                ("PMC42/paper.pdf", b"%PDF-1.4 content"),
                ("PMC42/body.nxml", b"<article>first</article>"),
                ("PMC42/extra/body2.nxml", b"<article>second</article>"),
            ],
        );

        extract_pmc_archive(&archive).unwrap();

        let pdf = dir.path().join("PMC42.pdf");
        let nxml = dir.path().join("PMC42.nxml");
        assert_eq!(std::fs::read(&pdf).unwrap(), b"%PDF-1.4 content");
        // last nxml member wins
        assert_eq!(std::fs::read(&nxml).unwrap(), b"<article>second</article>");
        assert!(!archive.exists(), "tarball must be removed");
        assert!(
            !dir.path().join("PMC42.").exists() && !dir.path().join("PMC42").exists(),
            "scratch subdirectory must be removed"
        );
    }

    #[test]
    fn test_extract_archive_without_pdf_keeps_nxml() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(
            dir.path(),
            "PMC7.tar.gz",
            &[("PMC7/body.nxml", b"<article/>")],
        );
        extract_pmc_archive(&archive).unwrap();
        assert!(dir.path().join("PMC7.nxml").is_file());
        assert!(!dir.path().join("PMC7.pdf").exists());
        assert!(!archive.exists());
    }

    #[test]
    fn test_ensure_decompressed_gzip_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.xml");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"<article>hello</article>").unwrap();
        encoder.finish().unwrap();

        assert!(ensure_decompressed(&path));
        assert_eq!(std::fs::read(&path).unwrap(), b"<article>hello</article>");
        assert!(!path.with_extension("xml.decompressed").exists());
    }

    #[test]
    fn test_ensure_decompressed_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        std::fs::File::create(&path).unwrap();
        assert!(!ensure_decompressed(&path));
        assert!(!path.exists(), "empty file is deleted");
    }

    #[test]
    fn test_ensure_decompressed_leaves_archives_alone() {
        let dir = tempfile::tempdir().unwrap();
        let archive = build_archive(dir.path(), "PMC1.tar.gz", &[("a.nxml", b"<a/>")]);
        assert!(ensure_decompressed(&archive));
        assert!(sniff::is_gzip(&archive), "archive still gzip-compressed");
    }

    #[test]
    fn test_extract_redirect_href() {
        let html = r#"<html><body><a id="redirect" href="https://example.org/real.pdf">go</a></body></html>"#;
        assert_eq!(
            extract_redirect_href(html).as_deref(),
            Some("https://example.org/real.pdf")
        );
        assert_eq!(extract_redirect_href("<html><body>nothing</body></html>"), None);
    }

    #[test]
    fn test_transport_scheme_routing() {
        let wget_ftp = WgetTransport { ftp_only: true, available: true };
        let wget_http = WgetTransport { ftp_only: false, available: true };
        let ftp = FtpTransport;
        assert!(wget_ftp.handles("ftp://ftp.ncbi.nlm.nih.gov/pub/pmc/x.tar.gz"));
        assert!(!wget_ftp.handles("https://example.org/x.pdf"));
        assert!(wget_http.handles("https://example.org/x.pdf"));
        assert!(!wget_http.handles("ftp://example.org/x"));
        assert!(ftp.handles("ftp://example.org/x"));
        assert!(!ftp.handles("http://example.org/x"));
    }
}
