//! Degrade path: send the client to the origin.
//!
//! Whatever goes wrong after the URL is known (self-loop, origin error,
//! origin redirect, fetch or transcode failure) ends here, so the client
//! can always fall back to fetching the image itself.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use url::Url;

/// `302` to `target`, or `400` when no usable `location` can be built from it.
pub fn redirect_to_origin(target: &str) -> Response {
    let Some(location) = location_value(target) else {
        return invalid_url();
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    let headers = response.headers_mut();
    headers.insert(header::LOCATION, location);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
    response
}

/// `400 Invalid URL`.
pub fn invalid_url() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid URL").into_response()
}

/// Use the URL verbatim when it is plain ASCII; otherwise let `url`
/// percent-encode it.
fn location_value(target: &str) -> Option<HeaderValue> {
    if target.is_empty() {
        return None;
    }
    if target.bytes().all(|b| b.is_ascii_graphic()) {
        return HeaderValue::from_str(target).ok();
    }
    let encoded = Url::parse(target).ok()?;
    HeaderValue::from_str(encoded.as_str()).ok()
}
