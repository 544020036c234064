//! Shared test support: an in-process server bound to an ephemeral port
//! plus a raw-socket client for driving it with hand-written RESP3 frames.

mod client;
mod server;

pub use client::TestClient;
pub use server::TestServer;
