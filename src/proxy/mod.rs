pub mod context;
pub mod filter;
pub mod formatter;
mod handler;

pub use context::{BoxBody, ConnectionContext, RequestContext};
pub use handler::handle_request;
