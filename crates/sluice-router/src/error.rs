use sluice_pubsub::PubSubError;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Router is already running")]
    AlreadyRunning,

    #[error("Router has no handlers")]
    NoHandlers,

    #[error("Handler already registered: {0}")]
    DuplicateHandler(String),

    #[error("Subscription failed: {0}")]
    Subscribe(#[from] PubSubError),
}
