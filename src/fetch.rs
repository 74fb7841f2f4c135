//! Blocking HTTP plumbing shared by the catalog client and the converter.

use std::time::Duration;

use anyhow::Result;

/// Abstraction over a blocking HTTP client, so converters and catalog
/// clients can be driven by canned responses in tests.
pub trait HttpClient {
    fn execute(
        &self,
        req: reqwest::blocking::Request,
    ) -> reqwest::Result<reqwest::blocking::Response>;
}

pub struct BasicClient(reqwest::blocking::Client);

impl BasicClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self(client))
    }
}

impl HttpClient for BasicClient {
    fn execute(
        &self,
        req: reqwest::blocking::Request,
    ) -> reqwest::Result<reqwest::blocking::Response> {
        self.0.execute(req)
    }
}

/// Fetches a URL and returns the response body, failing on non-2xx status.
pub fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::blocking::Request::new(reqwest::Method::GET, url.parse()?);
    let resp = client.execute(req)?.error_for_status()?;
    Ok(resp.bytes()?.to_vec())
}
