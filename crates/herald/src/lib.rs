//! # Herald
//!
//! Real-time delivery engine of a publish/subscribe broker.
//!
//! Clients hold one persistent WebSocket each. Publishers append payloads
//! with an optional time-to-live; subscribers receive what they have not yet
//! confirmed, in batches, and must acknowledge receipt. Delivery is
//! at-least-once until confirmation or expiry, whichever comes first.
//!
//! ## Architecture
//!
//! ```text
//! transport ──► Connection (reader) ──► session dispatcher ──► Catalog ──► Store
//!                                          │
//!                                          ▼
//!                              SubscriptionManager ⇄ Pollers ──► Catalog
//!                                          │
//! transport ◄── Connection (writer) ◄── fan-in
//! ```
//!
//! - [`connection`]: duplex actor, serialized writes, bounded close
//! - [`auth`]: handshake state machine run once per connection
//! - [`subscriptions`]: single-owner actor over one client's pollers
//! - [`poller`]: fetch / offer / await-confirm loop for one subscription
//! - [`sweeper`]: process-wide expiry purge
//! - [`registry`]: client id to live connection

pub mod auth;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod poller;
pub mod registry;
pub mod server;
pub mod session;
pub mod subscriptions;
pub mod supervisor;
pub mod sweeper;
pub mod transport;

#[cfg(test)]
mod tests;

pub use auth::{authenticate, AuthFailure, Authenticated};
pub use catalog::Catalog;
pub use config::BrokerConfig;
pub use connection::{ConnectionHandle, Inbound};
pub use error::{HeraldError, HeraldResult, RequestError, SendError, TransportError};
pub use registry::ConnectionRegistry;
pub use server::Broker;
pub use session::{run_session, SessionContext};
pub use subscriptions::SubscriptionManager;
pub use sweeper::ExpirySweeper;
