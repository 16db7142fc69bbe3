//! Per-client subscription manager.
//!
//! A single task owns the map `subscription_id -> poller` and processes one
//! mailbox command at a time, so the map is never observed mid-mutation and
//! needs no lock. Adding a subscription starts exactly one poller; removing
//! one stops exactly one. The other pollers keep running.
//!
//! Poller output goes through a separate fan-in task that coalesces batches
//! and writes them to the connection as `messages` frames. Confirmations are
//! routed back to the owning pollers and their counts summed concurrently,
//! outside the mailbox, so a slow store update never blocks other commands.

use crate::catalog::Catalog;
use crate::connection::ConnectionHandle;
use crate::error::{RequestError, RequestResult};
use crate::poller::{Batch, ConfirmRequest, Poller, PollerConfig};
use crate::supervisor::stop_task;
use futures_util::future::join_all;
use herald_protocol::{Confirmation, MessageItem, ServerMessage};
use herald_store::{StoreResult, Subscription};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_QUEUE: usize = 32;
const BATCH_QUEUE: usize = 32;

/// Timing for one manager and its pollers.
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    pub poller: PollerConfig,
    /// Grace period per stopped task.
    pub stop_timeout: Duration,
}

type ConfirmReply = oneshot::Receiver<StoreResult<u64>>;

enum Command {
    Add {
        subscription: Subscription,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        subscription_id: String,
        reply: oneshot::Sender<bool>,
    },
    Confirm {
        groups: Vec<(String, Vec<String>)>,
        reply: oneshot::Sender<Vec<ConfirmReply>>,
    },
    List {
        reply: oneshot::Sender<Vec<Subscription>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct PollerEntry {
    subscription: Subscription,
    confirms: mpsc::UnboundedSender<ConfirmRequest>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to a client's subscription manager.
///
/// Requests made after shutdown are answered as if the subscription set
/// were empty.
#[derive(Clone)]
pub struct SubscriptionManager {
    client_id: Arc<str>,
    commands: mpsc::Sender<Command>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stop_timeout: Duration,
}

impl SubscriptionManager {
    /// Start a manager with one poller per already-persisted subscription.
    pub fn start(
        client_id: &str,
        catalog: Catalog,
        connection: ConnectionHandle,
        config: ManagerConfig,
        subscriptions: Vec<Subscription>,
    ) -> Self {
        let client_id: Arc<str> = client_id.into();
        let token = CancellationToken::new();
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        let fan_in = tokio::spawn(fan_in(
            batch_rx,
            connection,
            token.child_token(),
            client_id.clone(),
        ));

        let mut actor = ManagerActor {
            client_id: client_id.clone(),
            catalog,
            config,
            pollers: HashMap::new(),
            batches: batch_tx,
            token,
            fan_in: Some(fan_in),
        };
        for subscription in subscriptions {
            actor.add(subscription);
        }
        info!(client_id = %client_id, pollers = actor.pollers.len(), "subscription manager started");

        let task = tokio::spawn(actor.run(command_rx));
        Self {
            client_id,
            commands: command_tx,
            task: Arc::new(Mutex::new(Some(task))),
            stop_timeout: config.stop_timeout,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> Option<T> {
        self.commands.send(command).await.ok()?;
        reply.await.ok()
    }

    /// Start delivering a subscription. Returns `false` if it was already live.
    pub async fn add(&self, subscription: Subscription) -> bool {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Add { subscription, reply }, rx)
            .await
            .unwrap_or(false)
    }

    /// Stop delivering a subscription. Returns `false` if it was not live.
    pub async fn remove(&self, subscription_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        let command = Command::Remove {
            subscription_id: subscription_id.to_string(),
            reply,
        };
        self.request(command, rx).await.unwrap_or(false)
    }

    /// Live subscriptions, ordered by id.
    pub async fn list(&self) -> Vec<Subscription> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::List { reply }, rx)
            .await
            .unwrap_or_default()
    }

    /// Route confirmations to their pollers and sum what they report.
    ///
    /// Confirmations for subscriptions that are not live count as 0. A group
    /// whose store update fails is logged and left out of the sum; the
    /// request only fails when every answered group failed.
    pub async fn confirm(&self, confirmations: Vec<Confirmation>) -> RequestResult<u64> {
        let groups = group_by_subscription(confirmations);
        if groups.is_empty() {
            return Ok(0);
        }

        let (reply, rx) = oneshot::channel();
        let Some(replies) = self.request(Command::Confirm { groups, reply }, rx).await else {
            return Ok(0);
        };

        // A dropped reply means the poller stopped before answering.
        let answers = join_all(replies).await.into_iter().filter_map(Result::ok);
        sum_confirmed(&self.client_id, answers)
    }

    /// Stop every poller and the fan-in. Terminal and idempotent.
    pub async fn shutdown(&self) {
        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };

        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }

        // The actor bounds each of its own waits; this only guards against
        // it being stuck before it saw the command.
        if tokio::time::timeout(self.stop_timeout, &mut task).await.is_err() {
            warn!(client_id = %self.client_id, "subscription manager did not stop, aborting");
            task.abort();
        }
    }
}

/// Total of the successful group counts.
fn sum_confirmed(
    client_id: &str,
    answers: impl IntoIterator<Item = StoreResult<u64>>,
) -> RequestResult<u64> {
    let mut confirmed = 0;
    let mut succeeded = false;
    let mut last_error = None;

    for answer in answers {
        match answer {
            Ok(count) => {
                confirmed += count;
                succeeded = true;
            }
            Err(e) => {
                warn!(client_id, error = %e, "confirmation group failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if !succeeded => Err(RequestError::Store(e)),
        _ => Ok(confirmed),
    }
}

/// Group confirmations by subscription, keeping first-seen order.
fn group_by_subscription(confirmations: Vec<Confirmation>) -> Vec<(String, Vec<String>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();

    for Confirmation {
        id,
        subscription_id,
    } in confirmations
    {
        match index.get(&subscription_id) {
            Some(&at) => groups[at].1.push(id),
            None => {
                index.insert(subscription_id.clone(), groups.len());
                groups.push((subscription_id, vec![id]));
            }
        }
    }
    groups
}

struct ManagerActor {
    client_id: Arc<str>,
    catalog: Catalog,
    config: ManagerConfig,
    pollers: HashMap<String, PollerEntry>,
    batches: mpsc::Sender<Batch>,
    token: CancellationToken,
    fan_in: Option<JoinHandle<()>>,
}

impl ManagerActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Add {
                    subscription,
                    reply,
                } => {
                    let _ = reply.send(self.add(subscription));
                }
                Command::Remove {
                    subscription_id,
                    reply,
                } => {
                    let removed = self.remove(&subscription_id).await;
                    let _ = reply.send(removed);
                }
                Command::Confirm { groups, reply } => {
                    let _ = reply.send(self.route(groups));
                }
                Command::List { reply } => {
                    let mut live: Vec<Subscription> = self
                        .pollers
                        .values()
                        .map(|entry| entry.subscription.clone())
                        .collect();
                    live.sort_by(|a, b| a.id.cmp(&b.id));
                    let _ = reply.send(live);
                }
                Command::Shutdown { reply } => {
                    self.stop_all().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // Every handle is gone.
        self.stop_all().await;
    }

    fn add(&mut self, subscription: Subscription) -> bool {
        if self.pollers.contains_key(&subscription.id) {
            return false;
        }

        let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
        let cancel = self.token.child_token();
        let poller = Poller::new(
            subscription.clone(),
            self.catalog.clone(),
            self.config.poller,
            self.batches.clone(),
            confirm_rx,
            cancel.clone(),
        );
        let handle = tokio::spawn(poller.run());

        debug!(client_id = %self.client_id, subscription_id = %subscription.id, "poller added");
        self.pollers.insert(
            subscription.id.clone(),
            PollerEntry {
                subscription,
                confirms: confirm_tx,
                cancel,
                handle,
            },
        );
        true
    }

    async fn remove(&mut self, subscription_id: &str) -> bool {
        let Some(entry) = self.pollers.remove(subscription_id) else {
            return false;
        };

        entry.cancel.cancel();
        drop(entry.confirms);
        stop_task(
            &self.client_id,
            &format!("poller:{subscription_id}"),
            entry.handle,
            self.config.stop_timeout,
        )
        .await;
        debug!(client_id = %self.client_id, subscription_id, "poller removed");
        true
    }

    fn route(&self, groups: Vec<(String, Vec<String>)>) -> Vec<ConfirmReply> {
        let mut replies = Vec::with_capacity(groups.len());
        for (subscription_id, message_ids) in groups {
            let Some(entry) = self.pollers.get(&subscription_id) else {
                debug!(client_id = %self.client_id, subscription_id, "confirmation for unknown subscription");
                continue;
            };
            let (reply, rx) = oneshot::channel();
            if entry
                .confirms
                .send(ConfirmRequest { message_ids, reply })
                .is_ok()
            {
                replies.push(rx);
            }
        }
        replies
    }

    async fn stop_all(&mut self) {
        self.token.cancel();

        let timeout = self.config.stop_timeout;
        let stops = self.pollers.drain().map(|(subscription_id, entry)| {
            let owner = self.client_id.clone();
            async move {
                stop_task(&owner, &format!("poller:{subscription_id}"), entry.handle, timeout).await
            }
        });
        let results = join_all(stops).await;
        let aborted = results.iter().filter(|stopped| !**stopped).count();

        if let Some(fan_in) = self.fan_in.take() {
            stop_task(&self.client_id, "fan-in", fan_in, timeout).await;
        }

        info!(
            client_id = %self.client_id,
            pollers = results.len(),
            aborted,
            "subscription manager stopped"
        );
    }
}

/// Forward poller batches to the connection, coalescing whatever is queued.
async fn fan_in(
    mut batches: mpsc::Receiver<Batch>,
    connection: ConnectionHandle,
    cancel: CancellationToken,
    client_id: Arc<str>,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = batches.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };

        let mut items: Vec<MessageItem> = first.items;
        let mut sources = 1;
        while let Ok(more) = batches.try_recv() {
            items.extend(more.items);
            sources += 1;
        }
        let count = items.len();

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = connection.send(ServerMessage::Messages(items)) => sent,
        };
        match sent {
            Ok(()) => debug!(client_id = %client_id, count, sources, "delivered messages"),
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "connection gone, fan-in stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;
    use crate::error::TransportError;
    use crate::transport::{InboundStream, OutboundSink};
    use futures::channel::mpsc as fmpsc;
    use futures::{SinkExt as _, StreamExt as _};
    use herald_store::{MemoryStore, StoreError};

    fn manager_config() -> ManagerConfig {
        ManagerConfig {
            poller: PollerConfig {
                poll_interval: Duration::from_millis(20),
                batch_limit: 10,
                redelivery_timeout: Duration::from_secs(5),
            },
            stop_timeout: Duration::from_millis(500),
        }
    }

    fn subscription(id: &str, publisher_id: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            publisher_id: publisher_id.to_string(),
            client_id: "c1".to_string(),
        }
    }

    fn start(
        subscriptions: Vec<Subscription>,
    ) -> (
        SubscriptionManager,
        ConnectionHandle,
        fmpsc::UnboundedSender<String>,
    ) {
        let (out_tx, _out_rx) = fmpsc::unbounded::<String>();
        let (in_tx, in_rx) = fmpsc::unbounded::<String>();
        let sink: OutboundSink = Box::pin(out_tx.sink_map_err(|_| TransportError::Closed));
        let stream: InboundStream = Box::pin(in_rx.map(Ok::<String, TransportError>));
        let (connection, _inbound) = connection::spawn(sink, stream, Duration::from_millis(200));

        let catalog = Catalog::new(Arc::new(MemoryStore::new()));
        let manager = SubscriptionManager::start(
            "c1",
            catalog,
            connection.clone(),
            manager_config(),
            subscriptions,
        );
        (manager, connection, in_tx)
    }

    #[tokio::test]
    async fn test_add_and_remove_touch_one_poller() {
        let (manager, connection, _peer) = start(vec![subscription("s1", "p1")]);
        assert_eq!(manager.client_id(), "c1");

        assert!(manager.add(subscription("s2", "p2")).await);
        assert!(!manager.add(subscription("s2", "p2")).await);
        let ids: Vec<String> = manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["s1", "s2"]);

        assert!(manager.remove("s1").await);
        assert!(!manager.remove("s1").await);
        let ids: Vec<String> = manager.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["s2"]);

        manager.shutdown().await;
        connection.close().await;
    }

    #[tokio::test]
    async fn test_stopped_manager_answers_empty() {
        let (manager, connection, _peer) = start(vec![subscription("s1", "p1")]);

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(manager.list().await.is_empty());
        assert!(!manager.add(subscription("s2", "p2")).await);
        assert_eq!(
            manager.confirm(vec![confirmation("m1", "s1")]).await.unwrap(),
            0
        );
        connection.close().await;
    }

    fn confirmation(id: &str, subscription_id: &str) -> Confirmation {
        Confirmation {
            id: id.to_string(),
            subscription_id: subscription_id.to_string(),
        }
    }

    #[test]
    fn test_grouping_keeps_first_seen_order() {
        let groups = group_by_subscription(vec![
            confirmation("m1", "s2"),
            confirmation("m2", "s1"),
            confirmation("m3", "s2"),
        ]);
        assert_eq!(
            groups,
            vec![
                ("s2".to_string(), vec!["m1".to_string(), "m3".to_string()]),
                ("s1".to_string(), vec!["m2".to_string()]),
            ]
        );
    }

    #[test]
    fn test_partial_store_failure_keeps_applied_counts() {
        let failed = || -> StoreResult<u64> {
            Err(StoreError::Connection("database is locked".into()))
        };

        assert_eq!(sum_confirmed("c1", vec![Ok(2), failed(), Ok(1)]).unwrap(), 3);
        assert!(matches!(
            sum_confirmed("c1", vec![failed(), failed()]),
            Err(RequestError::Store(_))
        ));
        assert_eq!(sum_confirmed("c1", Vec::new()).unwrap(), 0);
    }

    #[test]
    fn test_grouping_empty() {
        assert!(group_by_subscription(Vec::new()).is_empty());
    }
}
