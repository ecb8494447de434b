//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (lifecycle tracking)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection and tunnel tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;
