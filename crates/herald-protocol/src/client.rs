//! Frames sent by clients.
//!
//! Decoding is two-stage: the [`Envelope`] is parsed first, then `data` is
//! decoded according to `action`. Unknown actions survive stage one and
//! come back as [`ClientRequest::Unknown`] so newer clients are not cut off.

use crate::actions;
use crate::envelope::Envelope;
use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reply to the `authenticate` prompt. Sent bare, not enveloped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub register: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// What the client is asking to authenticate as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Register { name: String },
    Login { id: String },
}

impl AuthResponse {
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        serde_json::from_str(json).map_err(ProtocolError::InvalidEnvelope)
    }

    /// Parse an authentication reply straight into credentials.
    pub fn parse(json: &str) -> ProtocolResult<Credentials> {
        Self::from_json(json)?.credentials()
    }

    pub fn credentials(self) -> ProtocolResult<Credentials> {
        if self.register {
            match self.name {
                Some(name) if !name.is_empty() => Ok(Credentials::Register { name }),
                _ => Err(ProtocolError::MissingCredential("name")),
            }
        } else {
            match self.id {
                Some(id) if !id.is_empty() => Ok(Credentials::Login { id }),
                _ => Err(ProtocolError::MissingCredential("id")),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPublisher {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub publisher_id: String,
    /// Seconds until expiry; `0` or negative never expires.
    #[serde(default)]
    pub ttl: i64,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribe {
    pub publisher_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub subscription_id: String,
}

/// One acknowledged message on one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: String,
    pub subscription_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmMessages {
    pub messages: Vec<Confirmation>,
}

/// A decoded client action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    RegisterPublisher(RegisterPublisher),
    GetPublishers,
    PublishMessage(PublishMessage),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    GetSubscriptions,
    ConfirmMessages(ConfirmMessages),
    Unknown(String),
}

impl ClientRequest {
    /// Decode a raw frame (both stages).
    pub fn parse(json: &str) -> ProtocolResult<Self> {
        Self::decode(Envelope::from_json(json)?)
    }

    /// Decode the payload of an already-parsed envelope.
    pub fn decode(envelope: Envelope) -> ProtocolResult<Self> {
        let Envelope { action, data, .. } = envelope;
        let request = match action.as_str() {
            actions::REGISTER_PUBLISHER => {
                ClientRequest::RegisterPublisher(payload(&action, data)?)
            }
            actions::GET_PUBLISHERS => ClientRequest::GetPublishers,
            actions::PUBLISH_MESSAGE => ClientRequest::PublishMessage(payload(&action, data)?),
            actions::SUBSCRIBE => ClientRequest::Subscribe(payload(&action, data)?),
            actions::UNSUBSCRIBE => ClientRequest::Unsubscribe(payload(&action, data)?),
            actions::GET_SUBSCRIPTIONS => ClientRequest::GetSubscriptions,
            actions::CONFIRM_MESSAGES => ClientRequest::ConfirmMessages(payload(&action, data)?),
            _ => ClientRequest::Unknown(action.clone()),
        };
        Ok(request)
    }

    /// Wire name of the action.
    pub fn action(&self) -> &str {
        match self {
            ClientRequest::RegisterPublisher(_) => actions::REGISTER_PUBLISHER,
            ClientRequest::GetPublishers => actions::GET_PUBLISHERS,
            ClientRequest::PublishMessage(_) => actions::PUBLISH_MESSAGE,
            ClientRequest::Subscribe(_) => actions::SUBSCRIBE,
            ClientRequest::Unsubscribe(_) => actions::UNSUBSCRIBE,
            ClientRequest::GetSubscriptions => actions::GET_SUBSCRIPTIONS,
            ClientRequest::ConfirmMessages(_) => actions::CONFIRM_MESSAGES,
            ClientRequest::Unknown(action) => action.as_str(),
        }
    }

    /// Encode as an envelope, the way a client would send it.
    pub fn into_envelope(self) -> ProtocolResult<Envelope> {
        let envelope = Envelope::new(self.action());
        let data = match self {
            ClientRequest::RegisterPublisher(p) => Some(to_value(&p)?),
            ClientRequest::PublishMessage(p) => Some(to_value(&p)?),
            ClientRequest::Subscribe(p) => Some(to_value(&p)?),
            ClientRequest::Unsubscribe(p) => Some(to_value(&p)?),
            ClientRequest::ConfirmMessages(p) => Some(to_value(&p)?),
            ClientRequest::GetPublishers
            | ClientRequest::GetSubscriptions
            | ClientRequest::Unknown(_) => None,
        };
        Ok(match data {
            Some(data) => envelope.with_data(data),
            None => envelope,
        })
    }

    pub fn to_json(self) -> ProtocolResult<String> {
        self.into_envelope()?.to_json()
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
