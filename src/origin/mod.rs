//! Outbound fetch to the origin server.
//!
//! # Data Flow
//! ```text
//! RequestContext.origin_url + inbound headers
//!     → fetcher.rs (validate URL, allowlisted headers, proxy identity)
//!     → reqwest (bounded redirects, connect timeout)
//!     → OriginResponse (status, headers, single-reader body)
//! ```
//!
//! # Design Decisions
//! - No retries: a failed fetch degrades to a client redirect exactly once
//! - The body is never decoded; compressed bytes are relayed as sent

pub mod fetcher;

pub use fetcher::{OriginFetcher, OriginResponse};
