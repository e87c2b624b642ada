//! Error taxonomy for the request pipeline.
//!
//! # Design Decisions
//! - Every error is handled where it occurs and turned into a response
//! - `InvalidUrl` is the only variant the client sees as an error (400)
//! - Everything else degrades to a redirect so the client can fetch directly

use thiserror::Error;

use crate::compress::TranscodeError;

/// Failures that can end the proxied part of a request.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Target URL cannot be parsed or uses an unsupported scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Transport failure reaching the origin (DNS, connect, TLS, redirect budget).
    #[error("origin fetch failed: {0}")]
    OriginFetch(#[source] reqwest::Error),

    /// Origin did not send response headers in time.
    #[error("origin did not respond within {0}s")]
    OriginTimeout(u64),

    /// Origin answered with an error status or a redirect we won't follow.
    #[error("origin responded with status {0}")]
    OriginStatus(u16),

    /// Origin body failed before any response header was committed.
    #[error("origin body read failed: {0}")]
    OriginBody(String),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl ProxyError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidUrl(_) => "invalid_url",
            ProxyError::OriginFetch(_) => "origin_fetch",
            ProxyError::OriginTimeout(_) => "origin_timeout",
            ProxyError::OriginStatus(_) => "origin_status",
            ProxyError::OriginBody(_) => "origin_body",
            ProxyError::Transcode(_) => "transcode",
        }
    }
}
