//! Retry with exponential backoff

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::warn;

use crate::handler::HandlerFn;
use crate::middleware::Middleware;

/// Retries a failing handler with jittered exponential backoff before
/// giving up and letting the error nack the delivery.
#[derive(Debug, Clone, Copy)]
pub struct Retry {
    /// Retries after the initial attempt
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Total budget across attempts; None means unbounded
    pub max_elapsed_time: Option<Duration>,
    /// Each sleep is scaled by a random factor in [1 - r, 1 + r]
    pub randomization_factor: f64,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(10),
            multiplier: 2.0,
            max_elapsed_time: None,
            randomization_factor: 0.25,
        }
    }
}

impl Middleware for Retry {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        let config = *self;
        Arc::new(move |message| {
            let next = next.clone();
            Box::pin(async move {
                let started = Instant::now();
                let mut interval = config.initial_interval;
                let mut attempt: u32 = 0;

                loop {
                    match next(message.clone()).await {
                        Ok(produced) => return Ok(produced),
                        Err(err) => {
                            let budget_spent = config
                                .max_elapsed_time
                                .map(|max| started.elapsed() >= max)
                                .unwrap_or(false);

                            if attempt >= config.max_retries || budget_spent {
                                return Err(err);
                            }

                            attempt += 1;
                            let delay = jittered(interval, config.randomization_factor);
                            warn!(
                                message_uuid = %message.uuid,
                                attempt,
                                max_retries = config.max_retries,
                                delay_ms = delay.as_millis() as u64,
                                error = %err,
                                "Handler failed, retrying after backoff"
                            );
                            tokio::time::sleep(delay).await;

                            interval = interval.mul_f64(config.multiplier).min(config.max_interval);
                        }
                    }
                }
            })
        })
    }
}

fn jittered(interval: Duration, randomization_factor: f64) -> Duration {
    if randomization_factor <= 0.0 {
        return interval;
    }
    let factor = rand::thread_rng()
        .gen_range(1.0 - randomization_factor..=1.0 + randomization_factor);
    interval.mul_f64(factor.max(0.0))
}
