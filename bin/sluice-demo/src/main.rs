//! Sluice Demo Router
//!
//! Wires the routing library end to end: one router with correlation id
//! propagation, retry with backoff, throttling and panic recovery, one
//! handler on an in-memory pub/sub channel, and a background task that
//! publishes a batch of messages through it. Runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sluice_core::{new_uuid, Message};
use sluice_pubsub::{InMemoryConfig, InMemoryPubSub, Publisher};
use sluice_router::{
    correlation_id, handler_fn, set_correlation_id, CorrelationId, Recoverer, Retry, Router,
    RouterConfig, Throttle,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting Sluice demo router");

    let pubsub = Arc::new(InMemoryPubSub::new(InMemoryConfig::default()));

    let mut router = Router::new(RouterConfig::default());
    router.close_on_signal();

    router.add_middleware(Arc::new(CorrelationId));
    router.add_middleware(Arc::new(Retry {
        max_retries: 3,
        initial_interval: Duration::from_millis(100),
        ..Default::default()
    }));
    router.add_middleware(Arc::new(Throttle::new(200, Duration::from_secs(1))));
    router.add_middleware(Arc::new(Recoverer));

    router.add_no_publisher_handler(
        "helloworld",
        "hello_world",
        pubsub.clone(),
        handler_fn(hello_world),
    )?;

    let publisher = pubsub.clone();
    let mut running = router.running();
    tokio::spawn(async move {
        // Don't race the handler subscriptions
        let _ = running.wait_for(|r| *r).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        publish_messages(publisher).await;
    });

    router.run().await?;

    info!("Sluice demo router stopped");
    Ok(())
}

async fn hello_world(msg: Message) -> sluice_router::HandlerResult {
    println!("{}", msg.payload_str());
    Ok(Vec::new())
}

async fn publish_messages(publisher: Arc<InMemoryPubSub>) {
    let count: u32 = std::env::var("SLUICE_MESSAGE_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);

    for i in 0..count {
        let mut msg = Message::new(new_uuid(), format!("hello world! {i}"));
        set_correlation_id(new_uuid(), &mut msg);

        info!(
            message_uuid = %msg.uuid,
            correlation_id = ?correlation_id(&msg),
            "Sending message"
        );

        if let Err(e) = publisher.publish("hello_world", vec![msg]).await {
            error!(error = %e, "Publish failed");
            return;
        }
    }

    println!("all messages published");
}
