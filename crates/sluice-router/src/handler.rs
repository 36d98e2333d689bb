//! Handler types - the unit of message processing
//!
//! Middleware composes over `HandlerFn`, a boxed async function from one
//! message to zero or more produced messages. Struct-based handlers
//! implement the `Handler` trait and adapt via `from_handler`.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use sluice_core::Message;

/// What a handler returns: produced messages, or an error that nacks the
/// incoming delivery
pub type HandlerResult = anyhow::Result<Vec<Message>>;

/// The composable handler function middleware wraps
pub type HandlerFn = Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Object-safe trait for struct-based handlers
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: Message) -> HandlerResult;
}

/// Adapt an async function or closure into a `HandlerFn`
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Adapt a `Handler` implementation into a `HandlerFn`
pub fn from_handler(handler: Arc<dyn Handler>) -> HandlerFn {
    Arc::new(move |message| {
        let handler = handler.clone();
        Box::pin(async move { handler.handle(message).await })
    })
}
