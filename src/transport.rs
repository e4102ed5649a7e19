//! HTTP transport for the inform link.
//!
//! The controller fingerprints its devices: the request must carry exactly
//! the embedded-agent headers, a host-only `Host`, an un-gzipped body, and a
//! fresh connection per request.

use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use crate::error::{Error, Result};

/// User agent the controller expects from gateway devices.
const USER_AGENT: &str = "AirControl Agent v1.0";

/// Content type of the binary envelope, both directions.
const CONTENT_TYPE: &str = "application/x-binary";

/// Outcome of one inform exchange at the HTTP layer.
#[derive(Debug)]
pub enum Reply {
    /// 200 with a binary body: feed it to the envelope decoder.
    Envelope(Vec<u8>),
    /// Anything else: surfaced as a synthetic response code.
    Status(u16),
}

/// Shared HTTP client with the device-mimicking discipline baked in.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Build the shared client. Keep-alive and transparent compression are
    /// disabled: the controller expects per-request connections and a raw
    /// body.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .no_gzip()
            .pool_max_idle_per_host(0)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// POST an encoded envelope to the controller.
    pub async fn send(&self, url: &str, body: Vec<u8>) -> Result<Reply> {
        let parsed = Url::parse(url).map_err(|e| Error::Config(format!("inform URL: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Config(format!("inform URL has no host: {url}")))?
            .to_string();

        let response = self
            .client
            .post(parsed)
            .header(header::HOST, host)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::CONTENT_TYPE, CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::CONNECTION, HeaderValue::from_static("close"))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if status != StatusCode::OK || content_type != CONTENT_TYPE {
            debug!(
                code = status.as_u16(),
                content_type, "controller refused the inform"
            );
            return Ok(Reply::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        Ok(Reply::Envelope(body.to_vec()))
    }
}
