pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod ratelimit;
pub mod routing;
pub mod runtime;
pub mod server;
