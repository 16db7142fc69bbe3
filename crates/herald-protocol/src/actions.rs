//! Action names used on the wire.

// Client -> server
pub const REGISTER_PUBLISHER: &str = "register_publisher";
pub const GET_PUBLISHERS: &str = "get_publishers";
pub const PUBLISH_MESSAGE: &str = "publish_message";
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const GET_SUBSCRIPTIONS: &str = "get_subscriptions";
pub const CONFIRM_MESSAGES: &str = "confirm_messages";

// Server -> client
pub const AUTHENTICATE: &str = "authenticate";
pub const AUTHENTICATION_SUCCESSFUL: &str = "authentication_successful";
pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
pub const PUBLISHER_REGISTERED: &str = "publisher_registered";
pub const FAILED_REGISTERING_PUBLISHER: &str = "failed_registering_publisher";
pub const YOUR_PUBLISHERS: &str = "your_publishers";
pub const FAILED_GETTING_PUBLISHERS: &str = "failed_getting_publishers";
pub const MESSAGE_PUBLISHED: &str = "message_published";
pub const FAILED_PUBLISHING_MESSAGE: &str = "failed_publishing_message";
pub const SUBSCRIBED: &str = "subscribed";
pub const FAILED_SUBSCRIBING: &str = "failed_subscribing";
pub const UNSUBSCRIBED: &str = "unsubscribed";
pub const FAILED_UNSUBSCRIBING: &str = "failed_unsubscribing";
pub const YOUR_SUBSCRIPTIONS: &str = "your_subscriptions";
pub const FAILED_GETTING_SUBSCRIPTIONS: &str = "failed_getting_subscriptions";
pub const MESSAGES: &str = "messages";
pub const MESSAGES_CONFIRMED: &str = "messages_confirmed";
pub const FAILED_CONFIRMING_MESSAGES: &str = "failed_confirming_messages";
pub const INVALID_MESSAGE: &str = "invalid_message";

/// The failure action answered when a client action cannot be carried out.
pub fn failure_action_for(action: &str) -> Option<&'static str> {
    match action {
        REGISTER_PUBLISHER => Some(FAILED_REGISTERING_PUBLISHER),
        GET_PUBLISHERS => Some(FAILED_GETTING_PUBLISHERS),
        PUBLISH_MESSAGE => Some(FAILED_PUBLISHING_MESSAGE),
        SUBSCRIBE => Some(FAILED_SUBSCRIBING),
        UNSUBSCRIBE => Some(FAILED_UNSUBSCRIBING),
        GET_SUBSCRIPTIONS => Some(FAILED_GETTING_SUBSCRIPTIONS),
        CONFIRM_MESSAGES => Some(FAILED_CONFIRMING_MESSAGES),
        _ => None,
    }
}
