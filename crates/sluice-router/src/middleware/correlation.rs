//! Correlation id propagation

use std::sync::Arc;

use sluice_core::{new_uuid, Message};

use crate::handler::HandlerFn;
use crate::middleware::Middleware;

pub const CORRELATION_ID_METADATA_KEY: &str = "correlation_id";

/// Set the correlation id metadata. Does nothing if one is already set,
/// so the id survives hops through producing handlers.
pub fn set_correlation_id(id: impl Into<String>, message: &mut Message) {
    if correlation_id(message).is_some() {
        return;
    }
    message.metadata.set(CORRELATION_ID_METADATA_KEY, id);
}

pub fn correlation_id(message: &Message) -> Option<&str> {
    message.metadata.get(CORRELATION_ID_METADATA_KEY)
}

/// Copies the incoming message's correlation id onto every produced
/// message, assigning a fresh one when the incoming message has none.
pub struct CorrelationId;

impl Middleware for CorrelationId {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        Arc::new(move |mut message: Message| {
            let next = next.clone();
            Box::pin(async move {
                let id = match correlation_id(&message) {
                    Some(id) => id.to_string(),
                    None => {
                        let id = new_uuid();
                        set_correlation_id(id.clone(), &mut message);
                        id
                    }
                };

                let mut produced = next(message).await?;
                for msg in &mut produced {
                    set_correlation_id(id.clone(), msg);
                }
                Ok(produced)
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    #[test]
    fn test_set_correlation_id_does_not_overwrite() {
        let mut msg = Message::new(new_uuid(), "x");
        set_correlation_id("first", &mut msg);
        set_correlation_id("second", &mut msg);
        assert_eq!(correlation_id(&msg), Some("first"));
    }

    #[tokio::test]
    async fn test_propagates_to_produced_messages() {
        let handler = handler_fn(|_msg| async { Ok(vec![Message::new(new_uuid(), "out")]) });
        let wrapped = CorrelationId.wrap(handler);

        let mut incoming = Message::new(new_uuid(), "in");
        set_correlation_id("abc-123", &mut incoming);

        let produced = wrapped(incoming).await.unwrap();
        assert_eq!(correlation_id(&produced[0]), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_assigns_id_when_missing() {
        let handler = handler_fn(|msg: Message| async move {
            assert!(correlation_id(&msg).is_some(), "handler should see an id");
            Ok(vec![Message::new(new_uuid(), "out")])
        });
        let wrapped = CorrelationId.wrap(handler);

        let produced = wrapped(Message::new(new_uuid(), "in")).await.unwrap();
        assert!(correlation_id(&produced[0]).is_some());
    }
}
