//! Forward HTTP/HTTPS proxy library.
//!
//! Plain requests are sanitized, sent to their origin and relayed back.
//! CONNECT requests become either opaque tunnels or TLS-intercepted
//! sessions whose inner requests take the same path.

pub mod ca;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod tunnel;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use error::{DispatchError, ProxyError};
pub use http::{ProxyServer, ProxyState};
pub use lifecycle::Shutdown;
pub use tunnel::TunnelMode;
