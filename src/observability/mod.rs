//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: emitting never fails or blocks a request
//! - Request ID flows through every log line of a request span
//! - Usage write failures are reported here and nowhere else

pub mod logging;
pub mod metrics;
