//! Origin fetch with a bounded redirect budget.

use std::net::IpAddr;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use reqwest::redirect::Policy;
use url::Url;

use crate::config::{OriginConfig, TimeoutConfig};
use crate::error::ProxyError;
use crate::security::headers::{forwarded_for, pick, ORIGIN_REQUEST_HEADERS};
use crate::security::VIA_SIGNATURE;

/// Response headers from the origin plus its not-yet-read body.
#[derive(Debug)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: reqwest::Response,
}

impl From<reqwest::Response> for OriginResponse {
    fn from(response: reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: response,
        }
    }
}

impl OriginResponse {
    /// `content-type`, empty when absent or not valid text.
    pub fn content_type(&self) -> &str {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// `content-length` as sent by the origin, zero when absent or unparsable.
    pub fn content_length(&self) -> u64 {
        self.headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Error statuses and redirects carrying a `location` go back to the client.
    pub fn should_redirect_client(&self) -> bool {
        self.status.as_u16() >= 400
            || (self.status.is_redirection() && self.headers.contains_key(header::LOCATION))
    }

    /// Buffer the whole body, failing once more than `limit` bytes arrive.
    pub async fn read_body(self, limit: u64) -> Result<Bytes, ProxyError> {
        let mut stream = self.body.bytes_stream();
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ProxyError::OriginBody(e.to_string()))?;
            if (buffer.len() + chunk.len()) as u64 > limit {
                return Err(ProxyError::OriginBody(format!(
                    "body exceeds {} bytes",
                    limit
                )));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Hand the body over as a chunk stream. Dropping it closes the origin connection.
    pub fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send {
        self.body.bytes_stream()
    }
}

/// HTTP client for origin requests.
#[derive(Debug, Clone)]
pub struct OriginFetcher {
    client: reqwest::Client,
    response_timeout_secs: u64,
}

impl OriginFetcher {
    pub fn new(origin: &OriginConfig, timeouts: &TimeoutConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(origin.user_agent.clone())
            .redirect(Policy::limited(origin.max_redirects))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()?;

        Ok(Self {
            client,
            response_timeout_secs: timeouts.origin_response_secs,
        })
    }

    /// GET `url` on behalf of the client at `peer`.
    ///
    /// Only `cookie`, `dnt`, `referer` and `range` are forwarded from the
    /// inbound request; `x-forwarded-for` and `via` identify the proxy hop.
    pub async fn fetch(
        &self,
        url: &str,
        inbound: &HeaderMap,
        peer: IpAddr,
    ) -> Result<OriginResponse, ProxyError> {
        let target = parse_target(url)?;

        let mut headers = pick(inbound, &ORIGIN_REQUEST_HEADERS);
        if let Ok(value) = HeaderValue::from_str(&forwarded_for(inbound, peer)) {
            headers.insert("x-forwarded-for", value);
        }
        headers.insert(header::VIA, HeaderValue::from_static(VIA_SIGNATURE));

        let send = self.client.get(target).headers(headers).send();
        let response = tokio::time::timeout(Duration::from_secs(self.response_timeout_secs), send)
            .await
            .map_err(|_| ProxyError::OriginTimeout(self.response_timeout_secs))?
            .map_err(|e| {
                if e.is_builder() {
                    ProxyError::InvalidUrl(e.to_string())
                } else {
                    ProxyError::OriginFetch(e)
                }
            })?;

        tracing::debug!(
            url = %response.url(),
            status = %response.status(),
            "Origin responded"
        );

        Ok(OriginResponse::from(response))
    }
}

/// Absolute http(s) URL with a host, or `InvalidUrl`.
fn parse_target(url: &str) -> Result<Url, ProxyError> {
    let parsed = Url::parse(url).map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        scheme => Err(ProxyError::InvalidUrl(format!(
            "unsupported target '{}' (scheme {})",
            url, scheme
        ))),
    }
}
