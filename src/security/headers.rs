//! Header allowlists and copying.
//!
//! # Responsibilities
//! - Pick the inbound headers that may reach the origin
//! - Resolve the client address for `x-forwarded-for`
//! - Decide whether an origin header can be set on a client response
//!
//! # Design Decisions
//! - Copying never fails as a whole: rejected headers are returned as a list
//! - Hop-by-hop headers describe the origin connection, not the body, and
//!   are never copied

use std::net::IpAddr;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

/// Inbound headers forwarded to the origin.
pub const ORIGIN_REQUEST_HEADERS: [&str; 4] = ["cookie", "dnt", "referer", "range"];

/// Inbound headers echoed on the sentinel response.
pub const SENTINEL_ECHO_HEADERS: [&str; 3] = ["cookie", "dnt", "referer"];

/// Origin headers re-asserted on every bypass response when present.
pub const PASSTHROUGH_HEADERS: [&str; 4] =
    ["accept-ranges", "content-type", "content-length", "content-range"];

/// Connection-scoped headers that the server sets itself.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
];

/// Why a header could not be placed on a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderCopyError {
    #[error("invalid header name '{0}'")]
    InvalidName(String),

    #[error("invalid value for header '{0}'")]
    InvalidValue(String),

    #[error("hop-by-hop header '{0}' is not forwarded")]
    HopByHop(String),
}

/// Check that `name: value` can be set on a response and build the typed pair.
pub fn is_settable(name: &str, value: &[u8]) -> Result<(HeaderName, HeaderValue), HeaderCopyError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HeaderCopyError::InvalidName(name.to_string()))?;

    if HOP_BY_HOP.contains(&header_name.as_str()) || header_name.as_str() == "upgrade" {
        return Err(HeaderCopyError::HopByHop(header_name.as_str().to_string()));
    }

    let header_value = HeaderValue::from_bytes(value)
        .map_err(|_| HeaderCopyError::InvalidValue(header_name.as_str().to_string()))?;

    Ok((header_name, header_value))
}

/// Copy every settable header from `source` onto `target`, preserving repeats.
///
/// Returns the headers that were skipped.
pub fn copy_headers(source: &HeaderMap, target: &mut HeaderMap) -> Vec<HeaderCopyError> {
    let mut skipped = Vec::new();
    for (name, value) in source {
        match is_settable(name.as_str(), value.as_bytes()) {
            Ok((name, value)) => {
                target.append(name, value);
            }
            Err(e) => skipped.push(e),
        }
    }
    skipped
}

/// Copy the named headers that are present in `source`.
pub fn pick(source: &HeaderMap, names: &[&'static str]) -> HeaderMap {
    let mut picked = HeaderMap::new();
    for name in names {
        for value in source.get_all(*name) {
            picked.append(HeaderName::from_static(name), value.clone());
        }
    }
    picked
}

/// Client address to report upstream: the inbound `x-forwarded-for` if any,
/// otherwise the socket peer.
pub fn forwarded_for(headers: &HeaderMap, peer: IpAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_canonical().to_string())
}
