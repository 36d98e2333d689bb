//! Sluice Message Router
//!
//! This crate provides the routing layer on top of the pub/sub transports:
//! - Router: subscribes handlers to topics, publishes what they produce,
//!   acks/nacks deliveries and coordinates graceful shutdown
//! - HandlerFn/Handler: the unit of message processing
//! - Middleware: composable wrappers around handlers (correlation id
//!   propagation, retry with backoff, throttling, panic recovery)
//! - plugin: process signal wiring for shutdown

pub mod error;
pub mod handler;
pub mod middleware;
pub mod plugin;
pub mod router;

pub use error::RouterError;
pub use handler::{from_handler, handler_fn, Handler, HandlerFn, HandlerResult};
pub use middleware::correlation::{
    correlation_id, set_correlation_id, CorrelationId, CORRELATION_ID_METADATA_KEY,
};
pub use middleware::recoverer::Recoverer;
pub use middleware::retry::Retry;
pub use middleware::throttle::Throttle;
pub use middleware::Middleware;
pub use router::{Router, RouterConfig};

pub type Result<T> = std::result::Result<T, RouterError>;
