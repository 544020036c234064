//! In-process server bootstrap for end-to-end tests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio_util::sync::CancellationToken;

use crate::hash::Hasher;
use crate::registry::Registry;
use crate::shard::Shard;
use crate::shutdown::GracefulShutdown;

/// A running server bound to `127.0.0.1:0`. Dropping the value does not stop
/// the server; call [`TestServer::stop`] explicitly.
pub struct TestServer {
    addr: SocketAddr,
    cancel: CancellationToken,
}

impl TestServer {
    /// Spawns `shard_count` shards, a `Registry` over them, and one accepter
    /// bound to an ephemeral loopback port.
    pub async fn start(shard_count: usize) -> Self {
        let cancel = CancellationToken::new();
        let shutdown = GracefulShutdown::new(cancel.clone());

        let hasher = Hasher::random();
        let handles: Vec<_> = (0..shard_count)
            .map(|id| Shard::spawn(id, shutdown.clone()))
            .collect();
        let registry = Registry::new(hasher, handles);

        let ips = [IpAddr::V4(Ipv4Addr::LOCALHOST)];
        let bound = crate::server::serve(&ips, 0, 1, registry, shutdown, cancel.clone())
            .await
            .expect("test server failed to bind an ephemeral port");

        Self {
            addr: bound[0],
            cancel,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
