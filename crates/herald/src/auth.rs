//! Authentication handshake, run once per new connection.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │ AwaitingRequest │ (initial)
//! └────────┬────────┘
//!          │ PromptSent          PromptFailed / Cancelled ──► Failed
//!          ▼
//! ┌──────────────────┐
//! │ AwaitingResponse │ ── TimedOut / Malformed / TransportLost / Cancelled ──► Failed
//! └───┬──────────┬───┘
//!     │          │
//!     │ Register │ LoginRequested
//!     ▼          ▼
//! Registering  LoggingIn ── Rejected / TransportLost ──► Failed
//!     │          │
//!     └────┬─────┘
//!          │ Accepted
//!          ▼
//!    Authenticated
//! ```
//!
//! Every terminal transition sends exactly one notification to the client,
//! except when the transport itself failed.

use crate::catalog::Catalog;
use crate::connection::{ConnectionHandle, Inbound};
use crate::error::{RequestError, SendError};
use herald_protocol::{AuthResponse, ClientInfo, Credentials, ProtocolError, ServerMessage};
use herald_store::{ClientIdentity, StoreError, Subscription};
use rust_fsm::*;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub handshake(AwaitingRequest)

    AwaitingRequest => {
        PromptSent => AwaitingResponse,
        PromptFailed => Failed,
        Cancelled => Failed
    },
    AwaitingResponse => {
        RegisterRequested => Registering,
        LoginRequested => LoggingIn,
        TimedOut => Failed,
        Malformed => Failed,
        TransportLost => Failed,
        Cancelled => Failed
    },
    Registering => {
        Accepted => Authenticated,
        Rejected => Failed,
        TransportLost => Failed
    },
    LoggingIn => {
        Accepted => Authenticated,
        Rejected => Failed,
        TransportLost => Failed
    }
}

pub use handshake::Input as HandshakeInput;
pub use handshake::State as HandshakeState;
pub use handshake::StateMachine as HandshakeMachine;

/// Successful handshake: who the client is and what it already follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: ClientIdentity,
    pub subscriptions: Vec<Subscription>,
}

/// Terminal handshake failure.
#[derive(Error, Debug)]
pub enum AuthFailure {
    /// A send to the client failed.
    #[error("Send failed: {0}")]
    Transport(#[from] SendError),

    /// The peer went away while we waited for its reply.
    #[error("Connection lost during authentication")]
    TransportLost,

    #[error("Authentication cancelled")]
    Cancelled,

    #[error("No authentication reply in time")]
    TimedOut,

    #[error("Malformed authentication reply: {0}")]
    Malformed(#[source] ProtocolError),

    #[error("Client name already registered")]
    AlreadyExists,

    /// The credentials parsed but were not acceptable, such as a blank name.
    #[error("Invalid credentials: {0}")]
    Invalid(String),

    #[error("Unknown client id")]
    UnknownClient,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AuthFailure {
    /// Text of the `authentication_failed` notification, or `None` when the
    /// transport is unusable and nothing should be sent.
    pub fn client_message(&self) -> Option<&'static str> {
        match self {
            AuthFailure::Transport(_) | AuthFailure::TransportLost | AuthFailure::Cancelled => None,
            AuthFailure::TimedOut => Some("Authentication timed out"),
            AuthFailure::Malformed(_) | AuthFailure::Invalid(_) => Some("Invalid format"),
            AuthFailure::AlreadyExists => Some("Client already exists"),
            AuthFailure::UnknownClient => Some("Incorrect credentials"),
            AuthFailure::Store(_) => Some("Authentication failed"),
        }
    }
}

impl From<RequestError> for AuthFailure {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Store(e) => AuthFailure::Store(e),
            RequestError::NotFound(_) => AuthFailure::UnknownClient,
            RequestError::Conflict(_) => AuthFailure::AlreadyExists,
            RequestError::Validation(reason) => AuthFailure::Invalid(reason),
        }
    }
}

/// Drives the state machine and logs illegal transitions instead of failing.
struct Tracker<'a> {
    machine: HandshakeMachine,
    connection_id: &'a str,
}

impl<'a> Tracker<'a> {
    fn new(connection_id: &'a str) -> Self {
        Self {
            machine: HandshakeMachine::new(),
            connection_id,
        }
    }

    fn step(&mut self, input: HandshakeInput) {
        let from = self.machine.state().clone();
        if self.machine.consume(&input).is_err() {
            warn!(
                connection_id = self.connection_id,
                state = ?from,
                input = ?input,
                "illegal handshake transition"
            );
            return;
        }
        debug!(
            connection_id = self.connection_id,
            from = ?from,
            to = ?self.machine.state(),
            "handshake transition"
        );
    }
}

/// Run the handshake on a fresh connection.
///
/// The caller owns the connection and closes it on failure.
pub async fn authenticate(
    connection: &ConnectionHandle,
    inbound: &mut Inbound,
    catalog: &Catalog,
    reply_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Authenticated, AuthFailure> {
    let mut tracker = Tracker::new(connection.id());

    let prompted = tokio::select! {
        _ = cancel.cancelled() => None,
        sent = connection.send(ServerMessage::Authenticate) => Some(sent),
    };
    match prompted {
        None => {
            tracker.step(HandshakeInput::Cancelled);
            return Err(AuthFailure::Cancelled);
        }
        Some(Err(e)) => {
            tracker.step(HandshakeInput::PromptFailed);
            return Err(AuthFailure::Transport(e));
        }
        Some(Ok(())) => tracker.step(HandshakeInput::PromptSent),
    }

    let reply = tokio::select! {
        _ = cancel.cancelled() => None,
        reply = tokio::time::timeout(reply_timeout, inbound.recv()) => Some(reply),
    };

    let credentials = match reply {
        None => {
            tracker.step(HandshakeInput::Cancelled);
            return Err(AuthFailure::Cancelled);
        }
        Some(Err(_)) => {
            tracker.step(HandshakeInput::TimedOut);
            return Err(notify_failure(connection, AuthFailure::TimedOut).await);
        }
        Some(Ok(None)) => {
            tracker.step(HandshakeInput::TransportLost);
            return Err(AuthFailure::TransportLost);
        }
        Some(Ok(Some(text))) => match AuthResponse::parse(&text) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracker.step(HandshakeInput::Malformed);
                return Err(notify_failure(connection, AuthFailure::Malformed(e)).await);
            }
        },
    };

    let resolved = match credentials {
        Credentials::Register { name } => {
            tracker.step(HandshakeInput::RegisterRequested);
            catalog
                .register_client(&name)
                .await
                .map(|identity| Authenticated {
                    identity,
                    subscriptions: Vec::new(),
                })
                .map_err(AuthFailure::from)
        }
        Credentials::Login { id } => {
            tracker.step(HandshakeInput::LoginRequested);
            login(catalog, &id).await
        }
    };

    let authenticated = match resolved {
        Ok(authenticated) => authenticated,
        Err(failure) => {
            tracker.step(HandshakeInput::Rejected);
            return Err(notify_failure(connection, failure).await);
        }
    };

    let info = ClientInfo {
        id: authenticated.identity.id.clone(),
        name: authenticated.identity.name.clone(),
    };
    if let Err(e) = connection
        .send(ServerMessage::AuthenticationSuccessful(info))
        .await
    {
        tracker.step(HandshakeInput::TransportLost);
        return Err(AuthFailure::Transport(e));
    }
    tracker.step(HandshakeInput::Accepted);

    info!(
        connection_id = connection.id(),
        client_id = %authenticated.identity.id,
        subscriptions = authenticated.subscriptions.len(),
        "client authenticated"
    );
    Ok(authenticated)
}

async fn login(catalog: &Catalog, id: &str) -> Result<Authenticated, AuthFailure> {
    let identity = catalog
        .find_client(id)
        .await?
        .ok_or(AuthFailure::UnknownClient)?;
    let subscriptions = catalog.subscriptions_for(&identity.id).await?;
    Ok(Authenticated {
        identity,
        subscriptions,
    })
}

/// Send the failure notification, if any, and hand the failure back.
async fn notify_failure(connection: &ConnectionHandle, failure: AuthFailure) -> AuthFailure {
    if let Some(message) = failure.client_message() {
        if let Err(e) = connection
            .send(ServerMessage::AuthenticationFailed(message.to_string()))
            .await
        {
            debug!(connection_id = connection.id(), error = %e, "could not report auth failure");
        }
    }
    info!(connection_id = connection.id(), reason = %failure, "authentication failed");
    failure
}
