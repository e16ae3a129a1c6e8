//! Snapshot fetch seam: the abstract "HTTP doer" plus the reqwest-backed
//! production implementation.
//!
//! The recorder never talks to the network directly; it consumes a
//! [`SnapshotFetcher`] so scans are reproducible under test.

use std::io::Read;
use std::time::Duration;

use crate::core::errors::{LmcrecError, Result};

/// One fetched response, reduced to the parts the scan cares about.
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Every `Content-Type` header value, verbatim; the scan accepts the
    /// response if any of them matches.
    pub content_type: Vec<String>,
    /// Every `Content-Encoding` header value, verbatim.
    pub content_encoding: Vec<String>,
    /// First `Content-Length` header value, verbatim. Parsed by the scan so
    /// a bad value is classified like any other transport hiccup.
    pub content_length: Option<String>,
    /// Response body stream (still compressed when the server deflated it).
    pub body: Box<dyn Read + Send>,
}

/// The injected HTTP capability.
pub trait SnapshotFetcher: Send {
    /// Issue one GET against the status endpoint.
    fn fetch(&mut self) -> Result<FetchResponse>;

    /// Headers attached to every request, echoed by the recorder's one-time
    /// config dump (sensitive values are masked there, not here).
    fn request_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Whether to ask the endpoint for deflate-compressed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressedRequests {
    /// Always send `Accept-Encoding: deflate`.
    Always,
    /// Never ask for compression.
    Never,
    /// Ask only when the URL host is not local (`localhost` / `127.*`).
    #[default]
    RemoteOnly,
}

impl CompressedRequests {
    /// Parse the config token (`true` / `false` / `remote_only`).
    pub fn from_config(value: &str) -> Result<Self> {
        match value {
            "true" => Ok(Self::Always),
            "false" => Ok(Self::Never),
            "remote_only" => Ok(Self::RemoteOnly),
            other => Err(LmcrecError::InvalidConfig {
                details: format!(
                    "compressed_requests: {other:?} (want true, false or remote_only)"
                ),
            }),
        }
    }
}

/// Connection tuning for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherOptions {
    /// Status endpoint URL.
    pub url: String,
    /// Resolved `Security-Key` header value, if any.
    pub security_key: Option<String>,
    /// Deflate negotiation policy.
    pub compressed_requests: CompressedRequests,
    /// Total request timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub tcp_conn_timeout: Duration,
    /// TCP keep-alive, if enabled.
    pub tcp_keep_alive: Option<Duration>,
    /// Accept self-signed certificates.
    pub ignore_tls_verify: bool,
}

/// Production fetcher over a blocking reqwest client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    url: String,
    security_key: Option<String>,
    accept_deflate: bool,
}

/// A host counts as local when it is `localhost` or a `127.*` address.
fn is_remote_host(host: &str) -> bool {
    let lower = host.to_lowercase();
    !lower.starts_with("localhost") && !lower.starts_with("127.")
}

impl HttpFetcher {
    /// Build the client. Fails on an unparsable URL or client misconfig.
    pub fn new(opts: &HttpFetcherOptions) -> Result<Self> {
        let parsed = reqwest::Url::parse(&opts.url).map_err(|e| LmcrecError::InvalidConfig {
            details: format!("url {:?}: {e}", opts.url),
        })?;
        let host = parsed.host_str().unwrap_or_default();

        let accept_deflate = match opts.compressed_requests {
            CompressedRequests::Always => true,
            CompressedRequests::Never => false,
            CompressedRequests::RemoteOnly => is_remote_host(host),
        };

        let mut builder = reqwest::blocking::Client::builder()
            .timeout(opts.request_timeout)
            .connect_timeout(opts.tcp_conn_timeout)
            // One request in flight per scan; connection reuse only hides
            // endpoint restarts.
            .pool_max_idle_per_host(0);
        if let Some(keep_alive) = opts.tcp_keep_alive {
            builder = builder.tcp_keepalive(keep_alive);
        }
        if opts.ignore_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().map_err(|e| LmcrecError::InvalidConfig {
            details: format!("http client: {e}"),
        })?;

        Ok(Self {
            client,
            url: opts.url.clone(),
            security_key: opts.security_key.clone(),
            accept_deflate,
        })
    }
}

impl SnapshotFetcher for HttpFetcher {
    fn fetch(&mut self) -> Result<FetchResponse> {
        let mut request = self.client.get(&self.url);
        for (name, value) in self.request_headers() {
            request = request.header(name, value);
        }

        let response = request.send().map_err(|e| LmcrecError::Transport {
            details: format!("GET {}: {e}", self.url),
        })?;

        // A repeated header keeps every value; the scan matches against all
        // of them.
        let header_values = |name: &str| {
            response
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(ToString::to_string)
                .collect::<Vec<String>>()
        };
        let status = response.status().as_u16();
        let content_type = header_values("content-type");
        let content_encoding = header_values("content-encoding");
        let content_length = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        Ok(FetchResponse {
            status,
            content_type,
            content_encoding,
            content_length,
            body: Box::new(response),
        })
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(key) = &self.security_key {
            headers.push(("Security-Key".to_string(), key.clone()));
        }
        if self.accept_deflate {
            headers.push(("Accept-Encoding".to_string(), "deflate".to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_requests_tokens() {
        assert_eq!(
            CompressedRequests::from_config("true").unwrap(),
            CompressedRequests::Always
        );
        assert_eq!(
            CompressedRequests::from_config("false").unwrap(),
            CompressedRequests::Never
        );
        assert_eq!(
            CompressedRequests::from_config("remote_only").unwrap(),
            CompressedRequests::RemoteOnly
        );
        assert!(CompressedRequests::from_config("maybe").is_err());
    }

    #[test]
    fn request_headers_carry_security_key_and_deflate_negotiation() {
        let fetcher = HttpFetcher::new(&HttpFetcherOptions {
            url: "https://lmc.example.com/sharedmem".to_string(),
            security_key: Some("super-secret".to_string()),
            compressed_requests: CompressedRequests::RemoteOnly,
            request_timeout: std::time::Duration::from_secs(2),
            tcp_conn_timeout: std::time::Duration::from_secs(1),
            tcp_keep_alive: None,
            ignore_tls_verify: false,
        })
        .unwrap();
        assert_eq!(
            fetcher.request_headers(),
            vec![
                ("Security-Key".to_string(), "super-secret".to_string()),
                ("Accept-Encoding".to_string(), "deflate".to_string()),
            ]
        );

        // Local host with remote_only: no compression negotiation; no key
        // configured: no header at all.
        let fetcher = HttpFetcher::new(&HttpFetcherOptions {
            url: "http://localhost:8080/sharedmem".to_string(),
            security_key: None,
            compressed_requests: CompressedRequests::RemoteOnly,
            request_timeout: std::time::Duration::from_secs(2),
            tcp_conn_timeout: std::time::Duration::from_secs(1),
            tcp_keep_alive: None,
            ignore_tls_verify: false,
        })
        .unwrap();
        assert!(fetcher.request_headers().is_empty());
    }

    #[test]
    fn local_hosts_are_not_remote() {
        assert!(!is_remote_host("localhost"));
        assert!(!is_remote_host("localhost:8080"));
        assert!(!is_remote_host("LOCALHOST"));
        assert!(!is_remote_host("127.0.0.1"));
        assert!(is_remote_host("lmc.example.com"));
        assert!(is_remote_host("10.1.2.3"));
    }
}
