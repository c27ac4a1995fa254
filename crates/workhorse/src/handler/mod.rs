//! Job handlers and their execution context

mod context;
mod registry;

pub use context::JobContext;
pub use registry::{HandlerError, HandlerRegistry, HandlerResult, JobHandler};
