//! Event Bus
//!
//! Thin layer over the store's [`Broker`] so producers (ingestion, config
//! patches) and consumers (distributor, stream hub) never refer to each
//! other. Delivery is at-most-once: a subscriber that is not listening when
//! an event is published never sees it.

pub mod messages;

pub use messages::{ConfigPatch, DataChanged, DEFAULT_DATA_TOPIC, DEFAULT_PATCH_TOPIC};

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::hub::{HubError, HubResult};
use crate::shutdown::Shutdown;
use crate::store::{Broker, Subscription};

/// How hard to try before a subscription counts as lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    broker: Arc<dyn Broker>,
}

impl EventBus {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publish a payload, returning how many subscribers received it
    pub async fn publish(&self, topic: &str, payload: Bytes) -> HubResult<usize> {
        let delivered = self.broker.publish(topic, payload).await?;
        tracing::trace!(topic, delivered, "Published event");
        Ok(delivered)
    }

    pub async fn subscribe(&self, topic: &str) -> HubResult<Subscription> {
        Ok(self.broker.subscribe(topic).await?)
    }

    /// Subscribe, retrying transient failures
    ///
    /// Returns the last error once the policy is exhausted.
    pub async fn subscribe_with_retry(
        &self,
        topic: &str,
        policy: &RetryPolicy,
    ) -> HubResult<Subscription> {
        let attempts = policy.attempts.max(1);
        let mut last_err = HubError::Unavailable(format!("never tried to subscribe to {}", topic));

        for attempt in 1..=attempts {
            match self.subscribe(topic).await {
                Ok(subscription) => {
                    tracing::debug!(topic, attempt, "Subscribed");
                    return Ok(subscription);
                }
                Err(e) => {
                    tracing::warn!(topic, attempt, attempts, error = %e, "Subscribe failed");
                    last_err = e;
                    if attempt < attempts {
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }

        Err(last_err)
    }

    /// Drop every subscription on the underlying broker
    pub async fn close(&self) -> HubResult<()> {
        Ok(self.broker.disconnect().await?)
    }

    /// Feed every payload on `topic` to `handle` until shutdown
    ///
    /// Payloads are handled one at a time, in the order they were published.
    /// A subscription the broker ends is re-established under `policy`.
    /// Running out of attempts is fatal and fires `shutdown`.
    pub async fn listen<F, Fut>(&self, topic: &str, policy: &RetryPolicy, shutdown: &Shutdown, mut handle: F)
    where
        F: FnMut(Bytes) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        while !shutdown.is_triggered() {
            let mut subscription = match self.subscribe_with_retry(topic, policy).await {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::error!(topic, error = %e, "Subscription retries exhausted");
                    shutdown.trigger("subscription lost");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.wait() => return,
                    next = subscription.next() => match next {
                        Some(payload) => handle(payload).await,
                        None => {
                            tracing::warn!(topic, "Subscription ended by broker");
                            break;
                        }
                    },
                }
            }
        }
    }
}
