//! Router - subscribes handlers to topics and drives deliveries through
//! the middleware chain
//!
//! Each handler gets its own loop task:
//! - receive a delivery from its subscription
//! - run the composed handler (middleware applied first-added outermost)
//! - publish produced messages, then ack; nack on any failure
//!
//! Shutdown is coordinated with a broadcast channel the way the queue
//! consumers coordinate theirs: loops finish the in-flight delivery and
//! exit, and `run` waits up to `close_timeout` for them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use sluice_pubsub::{Delivery, Publisher, Subscriber};

use crate::handler::HandlerFn;
use crate::middleware::Middleware;
use crate::plugin;
use crate::{Result, RouterError};

/// Configuration for the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// How long `run` waits for handler loops after `close`
    pub close_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            close_timeout: Duration::from_secs(30),
        }
    }
}

/// One registered handler
#[derive(Clone)]
struct HandlerEntry {
    name: String,
    subscribe_topic: String,
    subscriber: Arc<dyn Subscriber>,
    /// Topic and publisher for produced messages; None for
    /// no-publisher handlers
    publish: Option<(String, Arc<dyn Publisher>)>,
    handler: HandlerFn,
}

/// Routes messages from subscriptions through handlers and middleware
pub struct Router {
    config: RouterConfig,
    middleware: Vec<Arc<dyn Middleware>>,
    handlers: Vec<HandlerEntry>,
    started: AtomicBool,
    /// Set by `close`; lets `run` observe a close that happened before
    /// any shutdown receiver existed
    closed: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    running_tx: watch::Sender<bool>,
    running_rx: watch::Receiver<bool>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (running_tx, running_rx) = watch::channel(false);

        Self {
            config,
            middleware: Vec::new(),
            handlers: Vec::new(),
            started: AtomicBool::new(false),
            closed: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            running_tx,
            running_rx,
        }
    }

    /// Append middleware. The first middleware added is the outermost at
    /// execution time.
    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    /// Register a handler whose produced messages are published to
    /// `publish_topic` before the incoming delivery is acked
    pub fn add_handler(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        publish_topic: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        handler: HandlerFn,
    ) -> Result<()> {
        self.register(HandlerEntry {
            name: name.into(),
            subscribe_topic: subscribe_topic.into(),
            subscriber,
            publish: Some((publish_topic.into(), publisher)),
            handler,
        })
    }

    /// Register a handler that must not produce messages
    pub fn add_no_publisher_handler(
        &mut self,
        name: impl Into<String>,
        subscribe_topic: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        handler: HandlerFn,
    ) -> Result<()> {
        self.register(HandlerEntry {
            name: name.into(),
            subscribe_topic: subscribe_topic.into(),
            subscriber,
            publish: None,
            handler,
        })
    }

    fn register(&mut self, entry: HandlerEntry) -> Result<()> {
        if self.handlers.iter().any(|h| h.name == entry.name) {
            return Err(RouterError::DuplicateHandler(entry.name));
        }
        info!(
            handler = %entry.name,
            subscribe_topic = %entry.subscribe_topic,
            "Registered handler"
        );
        self.handlers.push(entry);
        Ok(())
    }

    /// A watch channel that flips to true once every handler loop has
    /// subscribed, and back to false when `run` returns
    pub fn running(&self) -> watch::Receiver<bool> {
        self.running_rx.clone()
    }

    /// Signal the router to stop; `run` drains within `close_timeout`.
    /// Closing before `run` makes `run` return immediately.
    pub fn close(&self) {
        info!("Router close requested");
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Close the router when the process receives an interrupt signal
    pub fn close_on_signal(&self) {
        let shutdown_tx = self.shutdown_tx.clone();
        let closed = self.closed.clone();
        tokio::spawn(async move {
            plugin::shutdown_signal().await;
            info!("Interrupt signal received, closing router");
            closed.store(true, Ordering::SeqCst);
            let _ = shutdown_tx.send(());
        });
    }

    /// Run all handlers until `close` is called. Acks each delivery on
    /// handler success, nacks on error.
    pub async fn run(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyRunning);
        }
        if self.handlers.is_empty() {
            return Err(RouterError::NoHandlers);
        }
        if self.closed.load(Ordering::SeqCst) {
            info!("Router was closed before starting");
            return Ok(());
        }

        info!(handlers = self.handlers.len(), "Starting router");

        let mut handles = Vec::with_capacity(self.handlers.len());
        for entry in &self.handlers {
            let composed = self.compose(entry.handler.clone());
            let rx = entry.subscriber.subscribe(&entry.subscribe_topic).await?;
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(Self::run_handler_loop(
                entry.clone(),
                composed,
                rx,
                shutdown_rx,
            )));
        }

        let _ = self.running_tx.send(true);
        info!("Router running");

        // A close racing the subscribe loop above may have fired before
        // any shutdown receiver existed; re-signal now that they do.
        if self.closed.load(Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }

        // Wait for all handler loops; after close, give them at most
        // close_timeout to finish the in-flight delivery.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let close_timeout = self.config.close_timeout;
        let all = futures::future::join_all(handles);
        tokio::pin!(all);

        tokio::select! {
            _ = &mut all => {}
            _ = async {
                let _ = shutdown_rx.recv().await;
                tokio::time::sleep(close_timeout).await;
            } => {
                warn!(timeout = ?close_timeout, "Close timeout reached before all handlers stopped");
            }
        }

        let _ = self.running_tx.send(false);
        info!("Router stopped");
        Ok(())
    }

    /// Apply middleware in reverse registration order so the first one
    /// added ends up outermost
    fn compose(&self, handler: HandlerFn) -> HandlerFn {
        let mut composed = handler;
        for middleware in self.middleware.iter().rev() {
            composed = middleware.wrap(composed);
        }
        composed
    }

    async fn run_handler_loop(
        entry: HandlerEntry,
        handler: HandlerFn,
        mut rx: tokio::sync::mpsc::Receiver<Delivery>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!(handler = %entry.name, "Handler loop started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(handler = %entry.name, "Handler shutting down");
                    break;
                }
                delivery = rx.recv() => {
                    match delivery {
                        Some(delivery) => Self::process(&entry, &handler, delivery).await,
                        None => {
                            info!(handler = %entry.name, "Subscription ended");
                            break;
                        }
                    }
                }
            }
        }

        debug!(handler = %entry.name, "Handler loop exited");
    }

    async fn process(entry: &HandlerEntry, handler: &HandlerFn, delivery: Delivery) {
        let message = delivery.message.clone();
        let uuid = message.uuid.clone();

        match handler(message).await {
            Ok(produced) => {
                match &entry.publish {
                    Some((topic, publisher)) => {
                        if !produced.is_empty() {
                            if let Err(e) = publisher.publish(topic, produced).await {
                                error!(
                                    handler = %entry.name,
                                    message_uuid = %uuid,
                                    topic = %topic,
                                    error = %e,
                                    "Failed to publish produced messages, nacking"
                                );
                                delivery.nack();
                                return;
                            }
                        }
                    }
                    None => {
                        if !produced.is_empty() {
                            error!(
                                handler = %entry.name,
                                message_uuid = %uuid,
                                produced = produced.len(),
                                "No-publisher handler produced messages, nacking"
                            );
                            delivery.nack();
                            return;
                        }
                    }
                }

                debug!(handler = %entry.name, message_uuid = %uuid, "Message processed");
                delivery.ack();
            }
            Err(e) => {
                error!(
                    handler = %entry.name,
                    message_uuid = %uuid,
                    error = %e,
                    "Handler failed, nacking"
                );
                delivery.nack();
            }
        }
    }
}
