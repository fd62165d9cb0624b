use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::PapertrackError;

/// Hosts every Papertrack build is allowed to talk to.
const DEFAULT_ALLOWLIST: &[&str] = &[
    "export.arxiv.org", // arXiv Atom API
    "api.crossref.org", // Crossref REST API
    "localhost",        // local mirrors and test servers
    "127.0.0.1",        // localhost alt
];

/// An HTTP client that only allows requests to approved hosts.
///
/// Feed clients never hold a bare `reqwest::Client`; every request goes
/// through [`SandboxClient::get`], which rejects hosts outside the allowlist
/// before any I/O happens.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    /// Creates a new SandboxClient with the default allowlist.
    ///
    /// `connect_timeout` bounds connection setup only; per-request timeouts
    /// are set by the caller on the returned `RequestBuilder`.
    pub fn new(connect_timeout: Duration) -> Result<Self, PapertrackError> {
        let allowlist = DEFAULT_ALLOWLIST.iter().map(|d| d.to_string()).collect();

        let client = ClientBuilder::new()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_string());
    }

    /// Validates if a URL is permitted under the current sandbox policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        if let Ok(parsed) = Url::parse(url) {
            if let Some(host) = parsed.host_str() {
                // Exact match or a subdomain of an allowed host
                for allowed in &self.allowlist {
                    if host == allowed || host.ends_with(&format!(".{}", allowed)) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Builds a GET request, refusing hosts outside the allowlist.
    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder, PapertrackError> {
        if !self.is_allowed(url) {
            return Err(PapertrackError::SecurityError(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }

        Ok(self.client.get(url))
    }
}
