//! Throttle - rate-limits handler executions

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;

use crate::handler::HandlerFn;
use crate::middleware::Middleware;

/// Allows at most `count` handler executions per `per` window, waiting
/// (not shedding) when over the limit. Backpressure then propagates to
/// the transport through the unacked delivery.
pub struct Throttle {
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl Throttle {
    pub fn new(count: u32, per: Duration) -> Self {
        let count = NonZeroU32::new(count).unwrap_or(nonzero!(1u32));
        let replenish = per / count.get();
        let quota = Quota::with_period(replenish)
            .unwrap_or_else(|| Quota::per_second(count))
            .allow_burst(count);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }
}

impl Middleware for Throttle {
    fn wrap(&self, next: HandlerFn) -> HandlerFn {
        let limiter = self.limiter.clone();
        Arc::new(move |message| {
            let next = next.clone();
            let limiter = limiter.clone();
            Box::pin(async move {
                limiter.until_ready().await;
                next(message).await
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use sluice_core::{new_uuid, Message};
    use std::time::Instant;

    #[tokio::test]
    async fn test_burst_passes_without_delay() {
        let throttle = Throttle::new(100, Duration::from_secs(1));
        let wrapped = throttle.wrap(handler_fn(|_msg| async { Ok(Vec::new()) }));

        let start = Instant::now();
        for _ in 0..10 {
            wrapped(Message::new(new_uuid(), "x")).await.unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_over_limit_waits() {
        let throttle = Throttle::new(1, Duration::from_millis(80));
        let wrapped = throttle.wrap(handler_fn(|_msg| async { Ok(Vec::new()) }));

        let start = Instant::now();
        wrapped(Message::new(new_uuid(), "one")).await.unwrap();
        wrapped(Message::new(new_uuid(), "two")).await.unwrap();
        // Second execution has to wait for the window to replenish
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_zero_count_clamps_to_one() {
        // Must not panic on a degenerate configuration
        let _ = Throttle::new(0, Duration::from_secs(1));
    }
}
