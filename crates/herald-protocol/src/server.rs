//! Frames sent by the broker.

use crate::actions;
use crate::envelope::Envelope;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AUTHENTICATE_PROMPT: &str = "Please authenticate";

/// Identity returned after successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedInfo {
    pub id: String,
    pub publisher_id: String,
    pub ttl_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub publisher_id: String,
}

/// One delivered message, tagged with the subscription it arrived on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageItem {
    pub id: String,
    pub publisher_id: String,
    pub subscription_id: String,
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedPayload {
    pub confirmed: u64,
}

/// Every message the broker can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Authenticate,
    AuthenticationSuccessful(ClientInfo),
    AuthenticationFailed(String),
    PublisherRegistered(PublisherInfo),
    FailedRegisteringPublisher(String),
    YourPublishers(Vec<PublisherInfo>),
    FailedGettingPublishers(String),
    MessagePublished(PublishedInfo),
    FailedPublishingMessage(String),
    Subscribed(SubscriptionInfo),
    FailedSubscribing(String),
    Unsubscribed(SubscriptionInfo),
    FailedUnsubscribing(String),
    YourSubscriptions(Vec<SubscriptionInfo>),
    FailedGettingSubscriptions(String),
    Messages(Vec<MessageItem>),
    MessagesConfirmed(ConfirmedPayload),
    FailedConfirmingMessages(String),
    InvalidMessage(String),
}

impl ServerMessage {
    /// The failure reply for a client action, falling back to
    /// `invalid_message` for actions with no dedicated failure.
    pub fn failed(request_action: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match actions::failure_action_for(request_action) {
            Some(actions::FAILED_REGISTERING_PUBLISHER) => {
                ServerMessage::FailedRegisteringPublisher(message)
            }
            Some(actions::FAILED_GETTING_PUBLISHERS) => ServerMessage::FailedGettingPublishers(message),
            Some(actions::FAILED_PUBLISHING_MESSAGE) => ServerMessage::FailedPublishingMessage(message),
            Some(actions::FAILED_SUBSCRIBING) => ServerMessage::FailedSubscribing(message),
            Some(actions::FAILED_UNSUBSCRIBING) => ServerMessage::FailedUnsubscribing(message),
            Some(actions::FAILED_GETTING_SUBSCRIPTIONS) => {
                ServerMessage::FailedGettingSubscriptions(message)
            }
            Some(actions::FAILED_CONFIRMING_MESSAGES) => {
                ServerMessage::FailedConfirmingMessages(message)
            }
            _ => ServerMessage::InvalidMessage(message),
        }
    }

    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            ServerMessage::Authenticate => actions::AUTHENTICATE,
            ServerMessage::AuthenticationSuccessful(_) => actions::AUTHENTICATION_SUCCESSFUL,
            ServerMessage::AuthenticationFailed(_) => actions::AUTHENTICATION_FAILED,
            ServerMessage::PublisherRegistered(_) => actions::PUBLISHER_REGISTERED,
            ServerMessage::FailedRegisteringPublisher(_) => actions::FAILED_REGISTERING_PUBLISHER,
            ServerMessage::YourPublishers(_) => actions::YOUR_PUBLISHERS,
            ServerMessage::FailedGettingPublishers(_) => actions::FAILED_GETTING_PUBLISHERS,
            ServerMessage::MessagePublished(_) => actions::MESSAGE_PUBLISHED,
            ServerMessage::FailedPublishingMessage(_) => actions::FAILED_PUBLISHING_MESSAGE,
            ServerMessage::Subscribed(_) => actions::SUBSCRIBED,
            ServerMessage::FailedSubscribing(_) => actions::FAILED_SUBSCRIBING,
            ServerMessage::Unsubscribed(_) => actions::UNSUBSCRIBED,
            ServerMessage::FailedUnsubscribing(_) => actions::FAILED_UNSUBSCRIBING,
            ServerMessage::YourSubscriptions(_) => actions::YOUR_SUBSCRIPTIONS,
            ServerMessage::FailedGettingSubscriptions(_) => actions::FAILED_GETTING_SUBSCRIPTIONS,
            ServerMessage::Messages(_) => actions::MESSAGES,
            ServerMessage::MessagesConfirmed(_) => actions::MESSAGES_CONFIRMED,
            ServerMessage::FailedConfirmingMessages(_) => actions::FAILED_CONFIRMING_MESSAGES,
            ServerMessage::InvalidMessage(_) => actions::INVALID_MESSAGE,
        }
    }

    pub fn into_envelope(self) -> ProtocolResult<Envelope> {
        let envelope = Envelope::new(self.action());
        let envelope = match self {
            ServerMessage::Authenticate => envelope.with_message(AUTHENTICATE_PROMPT),
            ServerMessage::AuthenticationSuccessful(info) => envelope.with_data(to_value(&info)?),
            ServerMessage::PublisherRegistered(info) => envelope.with_data(to_value(&info)?),
            ServerMessage::YourPublishers(list) => envelope.with_data(to_value(&list)?),
            ServerMessage::MessagePublished(info) => envelope
                .with_message("Message published")
                .with_data(to_value(&info)?),
            ServerMessage::Subscribed(info) => {
                envelope.with_message("Subscribed").with_data(to_value(&info)?)
            }
            ServerMessage::Unsubscribed(info) => {
                envelope.with_message("Unsubscribed").with_data(to_value(&info)?)
            }
            ServerMessage::YourSubscriptions(list) => envelope.with_data(to_value(&list)?),
            ServerMessage::Messages(items) => envelope.with_data(to_value(&items)?),
            ServerMessage::MessagesConfirmed(payload) => envelope.with_data(to_value(&payload)?),
            ServerMessage::AuthenticationFailed(message)
            | ServerMessage::FailedRegisteringPublisher(message)
            | ServerMessage::FailedGettingPublishers(message)
            | ServerMessage::FailedPublishingMessage(message)
            | ServerMessage::FailedSubscribing(message)
            | ServerMessage::FailedUnsubscribing(message)
            | ServerMessage::FailedGettingSubscriptions(message)
            | ServerMessage::FailedConfirmingMessages(message)
            | ServerMessage::InvalidMessage(message) => envelope.with_message(message),
        };
        Ok(envelope)
    }

    pub fn to_json(self) -> ProtocolResult<String> {
        self.into_envelope()?.to_json()
    }

    /// Decode a broker frame, the way a client reads it.
    pub fn parse(json: &str) -> ProtocolResult<Self> {
        Self::from_envelope(Envelope::from_json(json)?)
    }

    pub fn from_envelope(envelope: Envelope) -> ProtocolResult<Self> {
        let Envelope {
            action,
            message,
            data,
        } = envelope;
        let text = message.unwrap_or_default();

        let decoded = match action.as_str() {
            actions::AUTHENTICATE => ServerMessage::Authenticate,
            actions::AUTHENTICATION_SUCCESSFUL => {
                ServerMessage::AuthenticationSuccessful(payload(&action, data)?)
            }
            actions::AUTHENTICATION_FAILED => ServerMessage::AuthenticationFailed(text),
            actions::PUBLISHER_REGISTERED => {
                ServerMessage::PublisherRegistered(payload(&action, data)?)
            }
            actions::FAILED_REGISTERING_PUBLISHER => ServerMessage::FailedRegisteringPublisher(text),
            actions::YOUR_PUBLISHERS => ServerMessage::YourPublishers(payload(&action, data)?),
            actions::FAILED_GETTING_PUBLISHERS => ServerMessage::FailedGettingPublishers(text),
            actions::MESSAGE_PUBLISHED => ServerMessage::MessagePublished(payload(&action, data)?),
            actions::FAILED_PUBLISHING_MESSAGE => ServerMessage::FailedPublishingMessage(text),
            actions::SUBSCRIBED => ServerMessage::Subscribed(payload(&action, data)?),
            actions::FAILED_SUBSCRIBING => ServerMessage::FailedSubscribing(text),
            actions::UNSUBSCRIBED => ServerMessage::Unsubscribed(payload(&action, data)?),
            actions::FAILED_UNSUBSCRIBING => ServerMessage::FailedUnsubscribing(text),
            actions::YOUR_SUBSCRIPTIONS => ServerMessage::YourSubscriptions(payload(&action, data)?),
            actions::FAILED_GETTING_SUBSCRIPTIONS => ServerMessage::FailedGettingSubscriptions(text),
            actions::MESSAGES => ServerMessage::Messages(payload(&action, data)?),
            actions::MESSAGES_CONFIRMED => ServerMessage::MessagesConfirmed(payload(&action, data)?),
            actions::FAILED_CONFIRMING_MESSAGES => ServerMessage::FailedConfirmingMessages(text),
            actions::INVALID_MESSAGE => ServerMessage::InvalidMessage(text),
            other => {
                return Err(ProtocolError::InvalidPayload {
                    action: other.to_string(),
                    source: serde::de::Error::custom("unknown server action"),
                })
            }
        };
        Ok(decoded)
    }
}

fn payload<T: DeserializeOwned>(action: &str, data: Option<Value>) -> ProtocolResult<T> {
    serde_json::from_value(data.unwrap_or(Value::Null)).map_err(|source| {
        ProtocolError::InvalidPayload {
            action: action.to_string(),
            source,
        }
    })
}

fn to_value<T: Serialize>(value: &T) -> ProtocolResult<Value> {
    serde_json::to_value(value).map_err(ProtocolError::Encode)
}
