//! HTTP client construction shared by the downloader and the API clients.
//!
//! Open Access servers are a motley crowd; downloads go out with a rotating
//! browser User-Agent and without TLS certificate verification, matching what
//! the harvested servers actually accept in practice.

use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::Result;

/// Rotating User-Agent pool with selection weights. Rotating the agent
/// without rotating the IP is acceptable here: the harvest spreads over many
/// unrelated Open Access servers.
const USER_AGENTS: [(&str, f64); 3] = [
    (
        "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:81.0) Gecko/20100101 Firefox/81.0",
        0.2,
    ),
    (
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/94.0.4606.81 Safari/537.36",
        0.3,
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/92.0.4515.159 Safari/537.36",
        0.5,
    ),
];

pub const ACCEPT_DOWNLOAD: &str = "application/pdf, text/html;q=0.9, */*;q=0.8";
pub const ACCEPT_ENCODING_DOWNLOAD: &str = "gzip, deflate";

/// Pick a User-Agent from the weighted pool.
pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS
        .choose_weighted(&mut rng, |ua| ua.1)
        .expect("static user agent weights are valid")
        .0
}

/// Client for API calls (lookup services, Unpaywall). Follows redirects,
/// accepts invalid certificates, short timeout.
pub fn api_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(true)
        .build()?;
    Ok(client)
}

/// Client for file downloads: like `api_client` but with the download
/// Accept headers and a longer timeout.
pub fn download_client(timeout_secs: u64) -> Result<reqwest::Client> {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING};

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_DOWNLOAD));
    headers.insert(
        ACCEPT_ENCODING,
        HeaderValue::from_static(ACCEPT_ENCODING_DOWNLOAD),
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(true)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;
    Ok(client)
}
