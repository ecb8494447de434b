//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Relay pipeline:
//!     → hooks.rs (observer fan-out around each dispatch)
//!         → logging.rs (request/response summaries as tracing events)
//!         → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Observers only see shared references; they cannot alter traffic
//! - Observers run inline on the request task and must return quickly
//! - Metrics are cheap no-ops until an exporter is installed

pub mod hooks;
pub mod logging;
pub mod metrics;

pub use hooks::{Hooks, Observer, TunnelSummary};
pub use logging::LoggingObserver;
pub use metrics::MetricsObserver;
