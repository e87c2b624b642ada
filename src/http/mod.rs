//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → request.rs (query → RequestContext)
//!     → proxy.rs (pipeline: loop guard, fetch, decide, transcode)
//!     → response.rs (compressed or bypass response)
//!       or redirect.rs (302 to origin / 400)
//!     → Send to client
//! ```

pub mod proxy;
pub mod redirect;
pub mod request;
pub mod request_id;
pub mod response;
pub mod server;

pub use request::{ProxyParams, RequestContext};
pub use request_id::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
