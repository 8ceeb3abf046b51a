//! Chaos-injection reverse proxy library.

pub mod chaos;
pub mod config;
pub mod forwarding;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod policy;
pub mod store;
pub mod usage;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
