#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("Transport closed")]
    Closed,

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),
}
