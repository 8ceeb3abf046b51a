//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (collapse slashes, request ID, trace, CORS, timeout)
//!     → handlers.rs (sandbox: query policy | keyed: stored policy + usage)
//!     → chaos injector (delay, maybe synthetic failure)
//!     → forwarding engine (single upstream attempt)
//!     → response.rs (error mapping, diagnostic headers)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{ApiError, FAIL_RATE_HEADER, USAGE_RECORDED_HEADER};
pub use server::{AppState, HttpServer};
