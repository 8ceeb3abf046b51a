//! Forwarding engine.
//!
//! # Data Flow
//! ```text
//! inbound request + resolved target
//!     → engine.rs build_upstream_uri (target + path rest + query)
//!     → strip hop-by-hop headers, keep method, headers, body stream
//!     → shared pooled client (http or https)
//!     → upstream response streamed back unchanged
//! ```
//!
//! # Design Decisions
//! - One attempt per request; retries belong to the caller
//! - Bodies are streamed in both directions, never buffered
//! - Transport failures and timeouts surface as gateway errors (502)

pub mod engine;

pub use engine::{build_upstream_uri, strip_hop_by_hop, ForwardError, Forwarder};
