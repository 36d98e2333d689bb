//! Recoverer - converts handler panics into handler errors

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::handler::HandlerFn;
use crate::middleware::Middleware;

/// Catches a panicking handler and turns the panic into an error, so one
/// poisoned message nacks instead of killing the handler loop.
pub struct Recoverer;

impl Middleware for Recoverer {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |message| {
            let next = next.clone();
            Box::pin(async move {
                let uuid = message.uuid.clone();
                match AssertUnwindSafe(next(message)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_reason(panic);
                        error!(message_uuid = %uuid, reason = %reason, "Handler panicked");
                        Err(anyhow::anyhow!("handler panicked: {reason}"))
                    }
                }
            })
        })
    }
}

fn panic_reason(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
