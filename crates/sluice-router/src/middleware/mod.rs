//! Middleware - composable handler wrappers
//!
//! A middleware takes the next `HandlerFn` in the chain and returns a
//! wrapped one. The router applies registered middleware so that the
//! FIRST one added is the OUTERMOST at execution time.

pub mod correlation;
pub mod recoverer;
pub mod retry;
pub mod throttle;

use crate::handler::HandlerFn;

pub trait Middleware: Send + Sync {
    fn wrap(&self, next: HandlerFn) -> HandlerFn;
}
