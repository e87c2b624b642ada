//! Compress-or-bypass decision and image transcoding.
//!
//! # Data Flow
//! ```text
//! RequestContext + origin status/headers
//!     → decider.rs (pure: Compress | Bypass(reason))
//!     → Compress: transcoder.rs (blocking pool) → TranscodeOutput | TranscodeError
//!     → Bypass: origin body streamed untouched
//! ```

pub mod decider;
pub mod transcoder;

pub use decider::{decide, BypassReason, CompressionPolicy, Decision};
pub use transcoder::{
    OutputMetadata, TranscodeError, TranscodeOutput, TranscodeRequest, Transcoder,
    TranscoderConfig,
};

/// Encodings the proxy produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    WebP,
    Jpeg,
}

impl OutputFormat {
    /// Subtype used in `content-type: image/<name>`.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::WebP => "webp",
            OutputFormat::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::WebP => "image/webp",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub(crate) fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::WebP => image::ImageFormat::WebP,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}
