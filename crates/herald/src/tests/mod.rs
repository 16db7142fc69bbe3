//! Integration tests for the herald delivery engine.
//!
//! Sessions run over in-memory transports against a `MemoryStore`, with
//! timings scaled down so every scenario finishes in well under a second.
//!
//! - `harness.rs`  - TestBroker, TestClient and a transport that never drains
//! - `auth.rs`     - handshake outcomes and their single notification
//! - `session.rs`  - envelope handling, publishers, registry bookkeeping
//! - `delivery.rs` - subscribe, publish, batches, persistence across reconnects
//! - `confirm.rs`  - acknowledgement counts and redelivery
//! - `expiry.rs`   - TTL cut-off and the sweeper
//! - `shutdown.rs` - bounded teardown, including a stuck peer
//! - `server.rs`   - the same flow over a real WebSocket listener

mod delivery;
mod expiry;
