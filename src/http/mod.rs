//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (hyper HTTP/1.1, CONNECT split)
//!     → request.rs (resolve target, strip hop-by-hop headers)
//!     → upstream::Dispatcher (one attempt to the origin)
//!     → response.rs (status, headers and streamed body back to the client)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{sanitize, OutboundRequest, RequestSummary, HOP_BY_HOP_HEADERS};
pub use response::relay_response;
pub use server::{ProxyServer, ProxyState};
