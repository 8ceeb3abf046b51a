//! Policy resolution subsystem.
//!
//! # Data Flow
//! ```text
//! Sandbox:   query parameters ──┐
//!                               ├→ resolver.rs → ForwardingPolicy | RejectionReason
//! Persisted: path key → store ──┘
//! ```
//!
//! # Design Decisions
//! - Policies are immutable once resolved
//! - Validation happens here, never at injection or forwarding time
//! - Method wildcard is a tagged variant, not a sentinel string

pub mod resolver;
pub mod types;

pub use resolver::{resolve_persisted, resolve_sandbox, RejectionReason};
pub use types::{
    AllowedMethod, ChaosPolicy, FailRate, ForwardingPolicy, KeyId, LatencyRange, PersistedKey,
    TargetUrl, DEFAULT_FAILURE_STATUS,
};
