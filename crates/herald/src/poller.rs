//! Subscription poller.
//!
//! One task per live subscription, repeating:
//!
//! 1. fetch up to `batch_limit` live messages of the publisher that the
//!    client has not confirmed, oldest first
//! 2. if any, hand them to the fan-in and wait for a confirmation, giving up
//!    after `redelivery_timeout`
//! 3. sleep `poll_interval`, still applying confirmations that arrive
//!
//! Every wait also watches the cancellation token. Unconfirmed messages are
//! fetched again on the next cycle, so delivery is at-least-once.

use crate::catalog::{now_secs, Catalog};
use crate::config::BrokerConfig;
use herald_protocol::MessageItem;
use herald_store::{StoreResult, Subscription};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Timing and sizing shared by every poller.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub batch_limit: usize,
    pub redelivery_timeout: Duration,
}

impl From<&BrokerConfig> for PollerConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            batch_limit: config.batch_limit,
            redelivery_timeout: config.redelivery_timeout,
        }
    }
}

/// Messages fetched by one poll cycle.
#[derive(Debug)]
pub struct Batch {
    pub subscription_id: String,
    pub items: Vec<MessageItem>,
}

/// Confirmed message ids for one subscription and where to report the count.
#[derive(Debug)]
pub struct ConfirmRequest {
    pub message_ids: Vec<String>,
    pub reply: oneshot::Sender<StoreResult<u64>>,
}

/// A single subscription's delivery loop.
pub struct Poller {
    subscription: Subscription,
    catalog: Catalog,
    config: PollerConfig,
    batches: mpsc::Sender<Batch>,
    confirms: mpsc::UnboundedReceiver<ConfirmRequest>,
    cancel: CancellationToken,
}

/// Why a wait inside the loop ended early.
enum Stop {
    Cancelled,
    /// The manager dropped its side of a channel.
    Detached,
}

impl Poller {
    pub fn new(
        subscription: Subscription,
        catalog: Catalog,
        config: PollerConfig,
        batches: mpsc::Sender<Batch>,
        confirms: mpsc::UnboundedReceiver<ConfirmRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            catalog,
            config,
            batches,
            confirms,
            cancel,
        }
    }

    pub async fn run(mut self) {
        debug!(
            subscription_id = %self.subscription.id,
            publisher_id = %self.subscription.publisher_id,
            "poller started"
        );

        let stop = loop {
            if let Err(stop) = self.cycle().await {
                break stop;
            }
        };

        match stop {
            Stop::Cancelled => debug!(subscription_id = %self.subscription.id, "poller cancelled"),
            Stop::Detached => debug!(subscription_id = %self.subscription.id, "poller detached"),
        }
    }

    async fn cycle(&mut self) -> Result<(), Stop> {
        let now = now_secs();
        let pending = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
            pending = self.catalog.pending_messages(&self.subscription, self.config.batch_limit, now) => pending,
        };

        match pending {
            Ok(messages) if !messages.is_empty() => {
                let items: Vec<MessageItem> = messages
                    .into_iter()
                    .map(|message| MessageItem {
                        id: message.id,
                        publisher_id: message.publisher_id,
                        subscription_id: self.subscription.id.clone(),
                        payload: message.payload,
                    })
                    .collect();
                trace!(subscription_id = %self.subscription.id, count = items.len(), "emitting batch");

                let batch = Batch {
                    subscription_id: self.subscription.id.clone(),
                    items,
                };
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
                    sent = self.batches.send(batch) => sent.map_err(|_| Stop::Detached)?,
                }

                self.await_confirmation().await?;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(subscription_id = %self.subscription.id, error = %e, "poll query failed");
            }
        }

        self.idle(self.config.poll_interval).await
    }

    async fn await_confirmation(&mut self) -> Result<(), Stop> {
        let request = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
            _ = tokio::time::sleep(self.config.redelivery_timeout) => {
                debug!(subscription_id = %self.subscription.id, "no confirmation, will redeliver");
                return Ok(());
            }
            request = self.confirms.recv() => request.ok_or(Stop::Detached)?,
        };
        self.apply(request).await
    }

    /// Sleep for `period` while still serving confirmations.
    async fn idle(&mut self, period: Duration) -> Result<(), Stop> {
        let sleep = tokio::time::sleep(period);
        tokio::pin!(sleep);

        loop {
            let request = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
                _ = &mut sleep => return Ok(()),
                request = self.confirms.recv() => request.ok_or(Stop::Detached)?,
            };
            self.apply(request).await?;
        }
    }

    async fn apply(&mut self, request: ConfirmRequest) -> Result<(), Stop> {
        let now = now_secs();
        let result = tokio::select! {
            // Dropping the reply tells the caller nothing was confirmed here.
            _ = self.cancel.cancelled() => return Err(Stop::Cancelled),
            result = self.catalog.mark_received(&self.subscription, &request.message_ids, now) => result,
        };

        match &result {
            Ok(confirmed) => debug!(
                subscription_id = %self.subscription.id,
                requested = request.message_ids.len(),
                confirmed,
                "confirmation applied"
            ),
            Err(e) => warn!(subscription_id = %self.subscription.id, error = %e, "confirmation failed"),
        }
        let _ = request.reply.send(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::PublishMessage;
    use herald_store::MemoryStore;
    use std::sync::Arc;
    use tokio::task::JoinHandle;

    struct Rig {
        catalog: Catalog,
        subscription: Subscription,
        publisher_id: String,
        config: PollerConfig,
        batches: Option<mpsc::Receiver<Batch>>,
        confirms: Option<mpsc::UnboundedSender<ConfirmRequest>>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    }

    impl Rig {
        async fn new(config: PollerConfig) -> Self {
            let catalog = Catalog::new(Arc::new(MemoryStore::new()));
            let publisher = catalog.register_publisher("owner", "news").await.unwrap();
            let subscription = catalog.subscribe("reader", &publisher.id).await.unwrap();
            Self {
                catalog,
                subscription,
                publisher_id: publisher.id,
                config,
                batches: None,
                confirms: None,
                cancel: CancellationToken::new(),
                task: None,
            }
        }

        fn start(&mut self) {
            let (batch_tx, batch_rx) = mpsc::channel(8);
            let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
            let poller = Poller::new(
                self.subscription.clone(),
                self.catalog.clone(),
                self.config,
                batch_tx,
                confirm_rx,
                self.cancel.clone(),
            );
            self.task = Some(tokio::spawn(poller.run()));
            self.batches = Some(batch_rx);
            self.confirms = Some(confirm_tx);
        }

        async fn stop(&mut self) {
            self.cancel.cancel();
            if let Some(task) = self.task.take() {
                tokio::time::timeout(Duration::from_secs(1), task)
                    .await
                    .expect("poller ignored cancellation")
                    .unwrap();
            }
        }

        async fn publish(&self, payload: &str) -> String {
            self.catalog
                .publish(
                    "owner",
                    PublishMessage {
                        publisher_id: self.publisher_id.clone(),
                        ttl: 0,
                        payload: payload.to_string(),
                    },
                )
                .await
                .unwrap()
                .id
        }

        async fn next_batch(&mut self) -> Batch {
            let batches = self.batches.as_mut().expect("poller not started");
            tokio::time::timeout(Duration::from_secs(2), batches.recv())
                .await
                .expect("no batch in time")
                .expect("poller hung up")
        }

        async fn confirm(&self, ids: Vec<String>) -> u64 {
            let (reply, rx) = oneshot::channel();
            self.confirms
                .as_ref()
                .expect("poller not started")
                .send(ConfirmRequest {
                    message_ids: ids,
                    reply,
                })
                .unwrap();
            rx.await.unwrap().unwrap()
        }
    }

    fn fast() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(20),
            batch_limit: 10,
            redelivery_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_batch_is_tagged_and_oldest_first() {
        let mut rig = Rig::new(fast()).await;
        let first = rig.publish("one").await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = rig.publish("two").await;
        rig.start();

        let batch = rig.next_batch().await;
        assert_eq!(batch.subscription_id, rig.subscription.id);
        let ids: Vec<_> = batch.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(batch
            .items
            .iter()
            .all(|i| i.subscription_id == rig.subscription.id));

        rig.stop().await;
    }

    #[tokio::test]
    async fn test_confirmed_messages_are_not_redelivered() {
        let mut rig = Rig::new(fast()).await;
        let id = rig.publish("hello").await;
        rig.start();

        let batch = rig.next_batch().await;
        assert_eq!(batch.items.len(), 1);
        assert_eq!(rig.confirm(vec![id.clone()]).await, 1);

        // Re-confirming changes nothing.
        assert_eq!(rig.confirm(vec![id]).await, 0);

        let later = rig.publish("again").await;
        let batch = rig.next_batch().await;
        let ids: Vec<_> = batch.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![later]);

        rig.stop().await;
    }

    #[tokio::test]
    async fn test_unconfirmed_batch_is_redelivered_after_timeout() {
        let mut rig = Rig::new(PollerConfig {
            redelivery_timeout: Duration::from_millis(50),
            ..fast()
        })
        .await;
        let id = rig.publish("sticky").await;
        rig.start();

        let first = rig.next_batch().await;
        let second = rig.next_batch().await;
        assert_eq!(first.items[0].id, id);
        assert_eq!(second.items[0].id, id);

        rig.stop().await;
    }

    #[tokio::test]
    async fn test_batch_respects_limit() {
        let mut rig = Rig::new(PollerConfig {
            batch_limit: 3,
            ..fast()
        })
        .await;
        for i in 0..5 {
            rig.publish(&format!("m{i}")).await;
        }
        rig.start();

        let batch = rig.next_batch().await;
        assert_eq!(batch.items.len(), 3);

        rig.stop().await;
    }

    #[tokio::test]
    async fn test_cancel_stops_a_waiting_poller() {
        let mut rig = Rig::new(fast()).await;
        rig.publish("waiting").await;
        rig.start();
        rig.next_batch().await;

        // Blocked on the confirmation wait now.
        rig.stop().await;
    }
}
