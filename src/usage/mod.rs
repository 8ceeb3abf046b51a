//! Usage accounting subsystem.
//!
//! # Data Flow
//! ```text
//! key resolved (method check passed)
//!     → recorder.rs begin()  spawns UsageSink::append
//!     → delay / injection / forwarding run meanwhile
//!     → settle() with a grace period → diagnostic header "1" | "0"
//! ```
//!
//! # Design Decisions
//! - Recording never changes response status or body
//! - One request's failed write cannot affect another's
//! - Short-circuited and upstream-failed requests still count

pub mod recorder;

pub use recorder::{PendingUsage, UsageRecorder, UsageStatus};
