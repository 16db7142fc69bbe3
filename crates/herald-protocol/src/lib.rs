//! # Herald Protocol
//!
//! Wire format shared by herald clients and the broker.
//!
//! Every frame is a JSON [`Envelope`] `{action, message?, data?}`. The one
//! exception is the client's reply to the `authenticate` prompt, which is a
//! bare [`AuthResponse`] object.
//!
//! Inbound frames decode in two stages so a malformed envelope and a
//! malformed payload can be answered differently:
//!
//! ```ignore
//! match ClientRequest::parse(&text) {
//!     Ok(request) => dispatch(request),
//!     Err(err) => match err.action() {
//!         Some(action) => reply(ServerMessage::failed(action, "Invalid json format")),
//!         None => reply(ServerMessage::InvalidMessage(INVALID_ENVELOPE.into())),
//!     },
//! }
//! ```

pub mod actions;
mod client;
mod envelope;
mod error;
mod server;

pub use client::{
    AuthResponse, ClientRequest, Confirmation, ConfirmMessages, Credentials, PublishMessage,
    RegisterPublisher, Subscribe, Unsubscribe,
};
pub use envelope::Envelope;
pub use error::{ProtocolError, ProtocolResult};
pub use server::{
    ClientInfo, ConfirmedPayload, MessageItem, PublishedInfo, PublisherInfo, ServerMessage,
    SubscriptionInfo, AUTHENTICATE_PROMPT,
};

/// Reply text for frames that are not a valid envelope.
pub const INVALID_ENVELOPE: &str = "The message sent was incorrectly formatted";

/// Reply text for envelopes whose `data` does not fit the action.
pub const INVALID_PAYLOAD: &str = "Invalid json format";
