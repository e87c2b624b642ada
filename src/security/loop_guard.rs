//! Self-loop detection.
//!
//! A proxy that is pointed at itself would fetch its own URL forever. Every
//! outbound request carries [`VIA_SIGNATURE`]; when that signature comes back
//! in from a loopback client, the request is ours and is bounced to the
//! client instead of being fetched again.

use std::net::IpAddr;

use axum::http::HeaderMap;

/// `via` value this proxy stamps on every outbound request.
pub const VIA_SIGNATURE: &str = "1.1 bandwidth-hero";

/// Client addresses that identify a request as coming from this host.
pub const LOOPBACK_ADDRESSES: [&str; 2] = ["127.0.0.1", "::1"];

/// Outcome of a loop check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCheck {
    /// Request came from this proxy; send the client to the origin directly.
    Redirect,
    /// Proceed with the fetch.
    Continue,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopGuard;

impl LoopGuard {
    /// Inspect inbound headers and the peer address.
    ///
    /// The client address is the `x-forwarded-for` header when present,
    /// otherwise the socket peer.
    pub fn check(&self, headers: &HeaderMap, peer: IpAddr) -> LoopCheck {
        let via_matches = headers
            .get("via")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == VIA_SIGNATURE);
        if !via_matches {
            return LoopCheck::Continue;
        }

        let client = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(forwarded) => forwarded.to_string(),
            None => peer.to_canonical().to_string(),
        };

        if LOOPBACK_ADDRESSES.contains(&client.as_str()) {
            LoopCheck::Redirect
        } else {
            LoopCheck::Continue
        }
    }
}
