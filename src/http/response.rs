//! Response construction for the two served branches.
//!
//! # Responsibilities
//! - Compressed: origin headers (minus the body framing) plus the transcoder
//!   output with size accounting headers
//! - Bypass: origin headers and body relayed as they arrive
//!
//! # Design Decisions
//! - Every header is decided before the body is handed to hyper
//! - Bypass bodies are pulled by hyper, so a slow client throttles the origin read
//! - A body error after the headers went out aborts the connection instead
//!   of ending the response cleanly

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use futures_util::TryStreamExt;

use crate::compress::TranscodeOutput;
use crate::http::request::RequestContext;
use crate::origin::OriginResponse;
use crate::security::headers::{copy_headers, HeaderCopyError, PASSTHROUGH_HEADERS};

/// Cross-origin headers that let pages embed proxied images.
pub const CORS_HEADERS: [(&str, &str); 3] = [
    ("access-control-allow-origin", "*"),
    ("cross-origin-resource-policy", "cross-origin"),
    ("cross-origin-embedder-policy", "unsafe-none"),
];

pub const X_ORIGINAL_SIZE: &str = "x-original-size";
pub const X_BYTES_SAVED: &str = "x-bytes-saved";
pub const X_PROXY_BYPASS: &str = "x-proxy-bypass";

/// Signed difference between origin and output sizes.
pub fn bytes_saved(original: u64, compressed: u64) -> i64 {
    original as i64 - compressed as i64
}

fn insert_cors(headers: &mut HeaderMap) {
    for (name, value) in CORS_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
}

/// 200 with the transcoded buffer.
///
/// Caching headers such as `cache-control` and `last-modified` carry over
/// from `origin_headers`; the body-describing ones are replaced. Returns the
/// origin headers that could not be copied.
pub fn compressed(
    ctx: &RequestContext,
    origin_headers: &HeaderMap,
    output: TranscodeOutput,
) -> (Response, Vec<HeaderCopyError>) {
    let original = ctx.origin_content_length;
    let size = output.metadata.size;

    let mut headers = HeaderMap::new();
    let skipped = copy_headers(origin_headers, &mut headers);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONTENT_RANGE);
    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(output.metadata.format.mime_type()),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(X_ORIGINAL_SIZE, HeaderValue::from(original));
    headers.insert(X_BYTES_SAVED, HeaderValue::from(bytes_saved(original, size)));
    insert_cors(&mut headers);

    let mut response = Response::new(Body::from(output.buffer));
    *response.headers_mut() = headers;
    (response, skipped)
}

/// Relay the origin response untouched.
///
/// Returns the response and the origin headers that could not be copied.
pub fn bypass(origin: OriginResponse) -> (Response, Vec<HeaderCopyError>) {
    let mut headers = HeaderMap::new();
    let skipped = copy_headers(&origin.headers, &mut headers);

    headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("identity"));
    insert_cors(&mut headers);
    headers.insert(X_PROXY_BYPASS, HeaderValue::from_static("1"));
    for name in PASSTHROUGH_HEADERS {
        if let Some(value) = origin.headers.get(name) {
            headers.insert(HeaderName::from_static(name), value.clone());
        }
    }

    let status = if origin.status.is_success() {
        origin.status
    } else {
        StatusCode::OK
    };

    let stream = origin.into_body_stream().inspect_err(|e| {
        tracing::warn!(error = %e, "Origin stream failed mid-body, aborting client connection");
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    (response, skipped)
}
