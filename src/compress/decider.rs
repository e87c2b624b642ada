//! Compression decision.
//!
//! A pure function of the request, the origin status and headers, and the
//! configured thresholds. Anything that is not a raster image the codecs can
//! shrink is passed through.

use axum::http::{header, HeaderMap, StatusCode};

use crate::config::CompressionConfig;
use crate::http::request::RequestContext;

/// Raster types the transcoder can decode.
const RASTER_TYPES: [&str; 11] = [
    "image/jpeg",
    "image/jpg",
    "image/pjpeg",
    "image/png",
    "image/apng",
    "image/gif",
    "image/webp",
    "image/bmp",
    "image/x-ms-bmp",
    "image/tiff",
    "image/x-icon",
];

/// Size thresholds for the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionPolicy {
    pub min_compress_length: u64,
    pub min_transparent_compress_length: u64,
    pub max_input_bytes: u64,
}

impl From<&CompressionConfig> for CompressionPolicy {
    fn from(config: &CompressionConfig) -> Self {
        Self {
            min_compress_length: config.min_compress_length,
            min_transparent_compress_length: config.min_transparent_compress_length,
            max_input_bytes: config.max_input_bytes,
        }
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::from(&CompressionConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Compress,
    Bypass(BypassReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// Anything but a full 200 body (e.g. a 206 range slice).
    Status,
    /// Origin sent `cache-control: no-transform`.
    NoTransform,
    /// Not a raster image the transcoder handles.
    NotRaster,
    /// Missing or zero `content-length`.
    UnknownLength,
    /// Larger than the transcoder will buffer.
    TooLarge,
    /// Too small for transcoding to pay off.
    BelowThreshold,
}

impl BypassReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BypassReason::Status => "status",
            BypassReason::NoTransform => "no_transform",
            BypassReason::NotRaster => "not_raster",
            BypassReason::UnknownLength => "unknown_length",
            BypassReason::TooLarge => "too_large",
            BypassReason::BelowThreshold => "below_threshold",
        }
    }
}

/// Decide whether the origin body gets transcoded.
///
/// Content type and length come from the context (recorded from the origin
/// headers); `headers` is consulted for the `no-transform` opt-out only.
pub fn decide(
    ctx: &RequestContext,
    status: StatusCode,
    headers: &HeaderMap,
    policy: &CompressionPolicy,
) -> Decision {
    if status != StatusCode::OK {
        return Decision::Bypass(BypassReason::Status);
    }
    if has_no_transform(headers) {
        return Decision::Bypass(BypassReason::NoTransform);
    }

    let mime = essence(&ctx.origin_content_type);
    if !RASTER_TYPES.contains(&mime.as_str()) {
        return Decision::Bypass(BypassReason::NotRaster);
    }

    let size = ctx.origin_content_length;
    if size == 0 {
        return Decision::Bypass(BypassReason::UnknownLength);
    }
    if size > policy.max_input_bytes {
        return Decision::Bypass(BypassReason::TooLarge);
    }

    if ctx.want_webp {
        if size < policy.min_compress_length {
            return Decision::Bypass(BypassReason::BelowThreshold);
        }
    } else {
        let transparent = mime.ends_with("png") || mime.ends_with("gif");
        if transparent && size < policy.min_transparent_compress_length {
            return Decision::Bypass(BypassReason::BelowThreshold);
        }
    }

    Decision::Compress
}

/// Lower-cased MIME type without parameters.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn has_no_transform(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-transform"))
}
