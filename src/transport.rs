use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, LAST_MODIFIED};
use tracing::debug;

use crate::error::Result;

/// Seam between the manager and the network. Production code goes through
/// [`HttpTransport`]; tests substitute a canned implementation.
pub trait Transport {
    /// Header-only probe: the raw `Last-Modified` value of `url`, or `None`
    /// if the response carries no such header. When the header appears more
    /// than once the last value wins.
    fn last_modified(&self, url: &str) -> Result<Option<String>>;

    /// Streaming GET of `url`. The body is consumed by the caller in chunks.
    fn fetch(&self, url: &str) -> Result<Box<dyn Read>>;
}

/// Blocking `reqwest` transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client })
    }
}

/// Last `Last-Modified` value in `headers`, if any. Proxies sometimes stack
/// the header; when they do, the last value wins.
fn pick_last_modified(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LAST_MODIFIED)
        .iter()
        .last()
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

impl Transport for HttpTransport {
    fn last_modified(&self, url: &str) -> Result<Option<String>> {
        debug!(%url, "HEAD");
        let resp = self.client.head(url).send()?;
        Ok(pick_last_modified(resp.headers()))
    }

    fn fetch(&self, url: &str) -> Result<Box<dyn Read>> {
        debug!(%url, "GET");
        let resp = self.client.get(url).send()?.error_for_status()?;
        Ok(Box::new(resp))
    }
}
