//! Fault injection subsystem.
//!
//! # Data Flow
//! ```text
//! ChaosPolicy
//!     → injector.rs (draw delay, draw failure)
//!     → InjectionOutcome { delay, short_circuit }
//!     → handler sleeps for delay, then answers synthetically or forwards
//! ```
//!
//! # Design Decisions
//! - Randomness is an explicit `RandomSource`, never an unsynchronized global
//! - Delay is an async sleep on the request's own task
//! - Short-circuited requests never reach the forwarding engine

pub mod injector;

pub use injector::{
    apply_delay, FaultInjector, InjectionOutcome, RandomSource, SeededRandom, ThreadRandom,
};
