//! Request/response header policy and self-loop protection.
//!
//! # Data Flow
//! ```text
//! Inbound headers
//!     → loop_guard.rs (via signature + loopback check)
//!     → headers.rs (allowlist for outbound fetch, x-forwarded-for)
//!
//! Origin headers
//!     → headers.rs (settable predicate, passthrough allowlist)
//!     → bypass response
//! ```

pub mod headers;
pub mod loop_guard;

pub use headers::{copy_headers, forwarded_for, is_settable, pick, HeaderCopyError};
pub use loop_guard::{LoopCheck, LoopGuard, VIA_SIGNATURE};
