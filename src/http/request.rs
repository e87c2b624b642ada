//! Request parameter parsing.
//!
//! # Responsibilities
//! - Decode the raw query string (repeated `url` keys are kept)
//! - Strip the loopback marker some clients prepend to the target URL
//! - Resolve output format, grayscale and quality with their defaults
//!
//! No network or file I/O happens here.

use std::sync::LazyLock;

use regex::Regex;

use crate::compress::OutputFormat;

/// Quality used when `l` is missing, unparsable or not positive.
pub const DEFAULT_QUALITY: u32 = 40;

/// `http://1.1.<d>.<d>/bmi/` optionally followed by a scheme, at the start of the URL.
static LOOP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^http://1\.1\.[0-9]\.[0-9]/bmi/(https?://)?").expect("static regex")
});

/// Query parameters as sent by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyParams {
    /// Every `url` occurrence, in order.
    pub urls: Vec<String>,
    /// `jpeg` was present (any value).
    pub jpeg: bool,
    pub bw: Option<String>,
    pub l: Option<String>,
}

impl ProxyParams {
    /// Decode a raw query string. Only the first `bw` and `l` are kept.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "url" => params.urls.push(value.into_owned()),
                "jpeg" => params.jpeg = true,
                "bw" if params.bw.is_none() => params.bw = Some(value.into_owned()),
                "l" if params.l.is_none() => params.l = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }

    /// The target URL as the client meant it: repeated values joined with `&url=`.
    ///
    /// Targets whose own query contains `url=` arrive split across several
    /// keys when the client did not encode them; joining restores them.
    pub fn joined_url(&self) -> Option<String> {
        let first = self.urls.first()?;
        if first.is_empty() && self.urls.len() == 1 {
            return None;
        }
        Some(self.urls.join("&url="))
    }
}

/// Parameters for one proxied request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Sanitized URL that is fetched.
    pub origin_url: String,
    /// URL exactly as supplied (after joining), used for redirects.
    pub raw_url: String,
    pub want_webp: bool,
    pub grayscale: bool,
    pub quality: u32,
    /// Filled in once origin headers arrive.
    pub origin_content_type: String,
    pub origin_content_length: u64,
}

impl RequestContext {
    /// Build a context; `None` when the request carries no target URL.
    pub fn from_params(params: &ProxyParams) -> Option<Self> {
        let raw_url = params.joined_url()?;
        Some(Self {
            origin_url: sanitize_url(&raw_url),
            raw_url,
            want_webp: !params.jpeg,
            grayscale: params.bw.as_deref() != Some("0"),
            quality: parse_quality(params.l.as_deref()),
            origin_content_type: String::new(),
            origin_content_length: 0,
        })
    }

    /// Record origin metadata once the response headers are in.
    pub fn record_origin(&mut self, content_type: impl Into<String>, content_length: u64) {
        self.origin_content_type = content_type.into();
        self.origin_content_length = content_length;
    }

    pub fn output_format(&self) -> OutputFormat {
        if self.want_webp {
            OutputFormat::WebP
        } else {
            OutputFormat::Jpeg
        }
    }
}

/// Replace a leading loopback marker with `http://`.
pub fn sanitize_url(url: &str) -> String {
    LOOP_MARKER.replace(url, "http://").into_owned()
}

/// Leading decimal integer of `l`; anything else, zero or negative yields the default.
pub fn parse_quality(l: Option<&str>) -> u32 {
    let Some(raw) = l else {
        return DEFAULT_QUALITY;
    };
    let trimmed = raw.trim_start();
    let digits = trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("");

    match digits.parse::<u32>() {
        Ok(q) if q > 0 => q,
        _ => DEFAULT_QUALITY,
    }
}
