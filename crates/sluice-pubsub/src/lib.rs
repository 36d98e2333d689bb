//! Sluice PubSub Transports
//!
//! This crate provides the transport layer for message routing:
//! - Publisher/Subscriber: the traits every transport implements
//! - Delivery: a received message paired with its ack channel
//! - InMemoryPubSub: process-local pub/sub channel with optional
//!   persistence and publish-until-ack blocking

pub mod error;
pub mod in_memory;
pub mod transport;

pub use error::PubSubError;
pub use in_memory::{InMemoryConfig, InMemoryPubSub};
pub use transport::{Delivery, Publisher, Subscriber};

pub type Result<T> = std::result::Result<T, PubSubError>;
