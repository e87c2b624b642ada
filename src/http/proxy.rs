//! The request pipeline.
//!
//! # Data Flow
//! ```text
//! query + headers + peer
//!     → RequestContext (no url → sentinel response)
//!     → LoopGuard (self-loop → redirect)
//!     → OriginFetcher (invalid url → 400, failure/error status → redirect)
//!     → decide()
//!         Compress → read body → Transcoder (failure → redirect) → compressed response
//!         Bypass   → streamed origin response
//! ```
//!
//! Each request runs on its own task and shares nothing mutable with others.
//! The whole pipeline up to the response headers is bounded by the request
//! deadline; running out of time degrades to a redirect like any other failure.
//! A transcode already handed to the blocking pool is not cancelled by the
//! deadline: it finishes and its output is dropped. Its cost is capped by the
//! transcoder's decode limits and `max_input_bytes`.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::compress::{decide, Decision, TranscodeRequest};
use crate::error::ProxyError;
use crate::http::redirect::{invalid_url, redirect_to_origin};
use crate::http::request::{ProxyParams, RequestContext};
use crate::http::response;
use crate::http::server::AppState;
use crate::identity::IdentityGenerator;
use crate::observability::metrics;
use crate::origin::OriginResponse;
use crate::security::headers::{is_settable, pick, HeaderCopyError, SENTINEL_ECHO_HEADERS};
use crate::security::LoopCheck;

/// Body of the response to requests that carry no `url`.
pub const SENTINEL_BODY: &str = "1we23";

/// Serve one proxy request.
pub async fn handle(state: &AppState, params: ProxyParams, headers: HeaderMap, peer: IpAddr) -> Response {
    let start = Instant::now();

    let Some(ctx) = RequestContext::from_params(&params) else {
        metrics::record_request("sentinel", start);
        return sentinel_response(&headers, state.identity.as_ref());
    };

    let raw_url = ctx.raw_url.clone();
    let deadline = Duration::from_secs(state.request_timeout_secs);
    let (outcome, response) =
        match tokio::time::timeout(deadline, run_pipeline(state, ctx, &headers, peer)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    url = %raw_url,
                    timeout_secs = state.request_timeout_secs,
                    "Request deadline exceeded, redirecting client"
                );
                ("timeout", redirect_to_origin(&raw_url))
            }
        };

    metrics::record_request(outcome, start);
    response
}

async fn run_pipeline(
    state: &AppState,
    mut ctx: RequestContext,
    headers: &HeaderMap,
    peer: IpAddr,
) -> (&'static str, Response) {
    if state.loop_guard.check(headers, peer) == LoopCheck::Redirect {
        tracing::warn!(url = %ctx.origin_url, peer = %peer, "Self-loop detected, redirecting client");
        return ("loop", redirect_to_origin(&ctx.raw_url));
    }

    let origin = match state.fetcher.fetch(&ctx.origin_url, headers, peer).await {
        Ok(origin) => origin,
        Err(e) => return degrade(&ctx, e),
    };

    if origin.should_redirect_client() {
        return degrade(&ctx, ProxyError::OriginStatus(origin.status.as_u16()));
    }

    ctx.record_origin(origin.content_type().to_string(), origin.content_length());

    match decide(&ctx, origin.status, &origin.headers, &state.policy) {
        Decision::Compress => compress(state, &ctx, origin).await,
        Decision::Bypass(reason) => {
            tracing::debug!(
                url = %ctx.origin_url,
                reason = reason.as_str(),
                content_type = %ctx.origin_content_type,
                "Passing origin response through"
            );
            let (response, skipped) = response::bypass(origin);
            report_skipped_headers(&ctx, &skipped);
            ("bypass", response)
        }
    }
}

async fn compress(state: &AppState, ctx: &RequestContext, origin: OriginResponse) -> (&'static str, Response) {
    // read_body consumes the response
    let origin_headers = origin.headers.clone();
    let body = match origin.read_body(state.policy.max_input_bytes).await {
        Ok(body) => body,
        Err(e) => return degrade(ctx, e),
    };

    let request = TranscodeRequest {
        format: ctx.output_format(),
        grayscale: ctx.grayscale,
        quality: ctx.quality,
    };

    match state.transcoder.transcode_blocking(body, request).await {
        Ok(output) => {
            let saved = response::bytes_saved(ctx.origin_content_length, output.metadata.size);
            tracing::info!(
                url = %ctx.origin_url,
                format = output.metadata.format.name(),
                original_size = ctx.origin_content_length,
                compressed_size = output.metadata.size,
                bytes_saved = saved,
                "Image compressed"
            );
            metrics::record_bytes_saved(saved);
            let (response, skipped) = response::compressed(ctx, &origin_headers, output);
            report_skipped_headers(ctx, &skipped);
            ("compressed", response)
        }
        Err(e) => degrade(ctx, e.into()),
    }
}

fn report_skipped_headers(ctx: &RequestContext, skipped: &[HeaderCopyError]) {
    for e in skipped {
        tracing::warn!(url = %ctx.origin_url, error = %e, "Skipped origin header");
    }
    metrics::record_header_copy_failures(skipped.len());
}

/// Translate a pipeline failure into the client response.
fn degrade(ctx: &RequestContext, error: ProxyError) -> (&'static str, Response) {
    match &error {
        ProxyError::InvalidUrl(reason) => {
            tracing::warn!(url = %ctx.origin_url, reason = %reason, "Rejecting invalid target URL");
            return (error.kind(), invalid_url());
        }
        ProxyError::OriginStatus(status) => {
            tracing::debug!(url = %ctx.origin_url, status, "Origin status handed back to client");
        }
        _ => {
            tracing::error!(url = %ctx.origin_url, error = %error, kind = error.kind(), "Proxying failed, redirecting client");
        }
    }
    (error.kind(), redirect_to_origin(&ctx.raw_url))
}

/// `200 1we23` with echoed request headers and a throwaway identity.
fn sentinel_response(inbound: &HeaderMap, identity: &dyn IdentityGenerator) -> Response {
    let mut headers = pick(inbound, &SENTINEL_ECHO_HEADERS);
    let id = identity.generate();
    let generated = [
        ("x-forwarded-for", id.forwarded_for.to_string()),
        ("user-agent", id.user_agent),
        ("via", id.via),
    ];
    for (name, value) in generated {
        match is_settable(name, value.as_bytes()) {
            Ok((name, value)) => {
                headers.insert(name, value);
            }
            Err(e) => tracing::warn!(error = %e, "Skipped sentinel header"),
        }
    }
    (StatusCode::OK, headers, SENTINEL_BODY).into_response()
}
