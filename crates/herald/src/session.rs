//! Per-connection session: handshake, dispatch loop, teardown.
//!
//! A session owns one connection actor. It authenticates the client,
//! registers it, starts its subscription manager seeded with the persisted
//! subscriptions, then answers client actions until the transport goes away
//! or the broker shuts down. Protocol errors are answered in-band and never
//! end the session.

use crate::auth::{authenticate, Authenticated};
use crate::catalog::Catalog;
use crate::config::BrokerConfig;
use crate::connection::{self, ConnectionHandle};
use crate::error::{RequestError, RequestResult, SendError};
use crate::poller::PollerConfig;
use crate::registry::ConnectionRegistry;
use crate::subscriptions::{ManagerConfig, SubscriptionManager};
use crate::transport::{InboundStream, OutboundSink};
use herald_protocol::{
    ClientRequest, ConfirmedPayload, PublishedInfo, PublisherInfo, ServerMessage,
    SubscriptionInfo, INVALID_ENVELOPE, INVALID_PAYLOAD,
};
use herald_store::{Publisher, Subscription};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Process-wide state every session shares.
#[derive(Clone)]
pub struct SessionContext {
    pub catalog: Catalog,
    pub registry: ConnectionRegistry,
    pub config: Arc<BrokerConfig>,
}

impl SessionContext {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            poller: PollerConfig::from(self.config.as_ref()),
            stop_timeout: self.config.stop_timeout,
        }
    }
}

/// Run one client session to completion on an already-open transport.
pub async fn run_session(
    ctx: SessionContext,
    sink: OutboundSink,
    stream: InboundStream,
    shutdown: CancellationToken,
) {
    let (connection, mut inbound) = connection::spawn(sink, stream, ctx.config.close_grace);

    let authenticated = authenticate(
        &connection,
        &mut inbound,
        &ctx.catalog,
        ctx.config.auth_timeout,
        &shutdown,
    )
    .await;
    let Authenticated {
        identity,
        subscriptions,
    } = match authenticated {
        Ok(authenticated) => authenticated,
        Err(_) => {
            connection.close().await;
            return;
        }
    };

    let client_id = identity.id;
    ctx.registry.register(&client_id, connection.clone());

    let manager = SubscriptionManager::start(
        &client_id,
        ctx.catalog.clone(),
        connection.clone(),
        ctx.manager_config(),
        subscriptions,
    );
    let session = Session {
        client_id: client_id.clone(),
        catalog: ctx.catalog.clone(),
        connection: connection.clone(),
        manager: manager.clone(),
    };

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(client_id = %client_id, "broker shutting down, ending session");
                break;
            }
            frame = inbound.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        let handled = tokio::select! {
            _ = shutdown.cancelled() => break,
            handled = session.handle(&frame) => handled,
        };
        if let Err(e) = handled {
            debug!(client_id = %client_id, error = %e, "reply failed, ending session");
            break;
        }
    }

    ctx.registry.unregister(&client_id, connection.id());
    manager.shutdown().await;
    connection.close().await;
    info!(client_id = %client_id, connection_id = connection.id(), "session ended");
}

/// Dispatcher for an authenticated client.
struct Session {
    client_id: String,
    catalog: Catalog,
    connection: ConnectionHandle,
    manager: SubscriptionManager,
}

impl Session {
    /// Answer one inbound frame.
    async fn handle(&self, frame: &str) -> Result<(), SendError> {
        let request = match ClientRequest::parse(frame) {
            Ok(request) => request,
            Err(e) => {
                debug!(client_id = %self.client_id, error = %e, "rejecting malformed frame");
                let reply = match e.action() {
                    Some(action) => ServerMessage::failed(action, INVALID_PAYLOAD),
                    None => ServerMessage::InvalidMessage(INVALID_ENVELOPE.to_string()),
                };
                return self.connection.send(reply).await;
            }
        };

        let action = request.action().to_string();
        let reply = match request {
            ClientRequest::RegisterPublisher(request) => self
                .catalog
                .register_publisher(&self.client_id, &request.name)
                .await
                .map(|publisher| ServerMessage::PublisherRegistered(publisher_info(publisher))),
            ClientRequest::GetPublishers => self
                .catalog
                .publishers_owned_by(&self.client_id)
                .await
                .map(|publishers| {
                    ServerMessage::YourPublishers(publishers.into_iter().map(publisher_info).collect())
                })
                .map_err(RequestError::from),
            ClientRequest::PublishMessage(request) => self
                .catalog
                .publish(&self.client_id, request)
                .await
                .map(|message| {
                    ServerMessage::MessagePublished(PublishedInfo {
                        id: message.id,
                        publisher_id: message.publisher_id,
                        ttl_at: message.ttl_at,
                    })
                }),
            ClientRequest::Subscribe(request) => {
                return self.subscribe(&action, &request.publisher_id).await;
            }
            ClientRequest::Unsubscribe(request) => self.unsubscribe(&request.subscription_id).await,
            ClientRequest::GetSubscriptions => self
                .catalog
                .subscriptions_for(&self.client_id)
                .await
                .map(|subscriptions| {
                    ServerMessage::YourSubscriptions(
                        subscriptions.into_iter().map(subscription_info).collect(),
                    )
                })
                .map_err(RequestError::from),
            ClientRequest::ConfirmMessages(request) => self
                .manager
                .confirm(request.messages)
                .await
                .map(|confirmed| ServerMessage::MessagesConfirmed(ConfirmedPayload { confirmed })),
            ClientRequest::Unknown(action) => {
                debug!(client_id = %self.client_id, action = %action, "unknown action");
                Ok(ServerMessage::InvalidMessage(format!("Unknown action: {action}")))
            }
        };

        self.connection.send(self.resolve(&action, reply)).await
    }

    /// Persist, acknowledge, then start delivering, so `subscribed` always
    /// precedes the first `messages` frame of the new subscription.
    async fn subscribe(&self, action: &str, publisher_id: &str) -> Result<(), SendError> {
        match self.catalog.subscribe(&self.client_id, publisher_id).await {
            Ok(subscription) => {
                self.connection
                    .send(ServerMessage::Subscribed(subscription_info(subscription.clone())))
                    .await?;
                self.manager.add(subscription).await;
                Ok(())
            }
            Err(e) => self.connection.send(self.resolve(action, Err(e))).await,
        }
    }

    async fn unsubscribe(&self, subscription_id: &str) -> RequestResult<ServerMessage> {
        let subscription = self
            .catalog
            .unsubscribe(&self.client_id, subscription_id)
            .await?;
        self.manager.remove(&subscription.id).await;
        Ok(ServerMessage::Unsubscribed(subscription_info(subscription)))
    }

    fn resolve(&self, action: &str, result: RequestResult<ServerMessage>) -> ServerMessage {
        match result {
            Ok(reply) => reply,
            Err(e) => {
                if let RequestError::Store(source) = &e {
                    warn!(client_id = %self.client_id, action, error = %source, "store failure");
                } else {
                    debug!(client_id = %self.client_id, action, reason = %e, "request rejected");
                }
                ServerMessage::failed(action, e.client_message())
            }
        }
    }
}

fn publisher_info(publisher: Publisher) -> PublisherInfo {
    PublisherInfo {
        id: publisher.id,
        name: publisher.name,
        owner_id: publisher.owner_id,
    }
}

fn subscription_info(subscription: Subscription) -> SubscriptionInfo {
    SubscriptionInfo {
        id: subscription.id,
        publisher_id: subscription.publisher_id,
    }
}
