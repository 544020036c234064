//! Accepter / Dispatcher: binds the configured `(ip, port)` pairs and spawns
//! one Connection task per accepted socket.
//!
//! Each `(ip, accepter)` pair gets its own independently bound listener.
//! When more than one accepter shares an address, `SO_REUSEPORT` (via
//! `socket2`) lets the OS load-balance `accept()` across them instead of
//! funneling every connection through a single listener task.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::handle_connection;
use crate::registry::Registry;
use crate::shutdown::GracefulShutdown;

/// Backlog passed to `listen(2)` for every bound socket.
const LISTEN_BACKLOG: i32 = 1024;

/// Binds `accepters_per_ip` listeners on every IP in `ips` and spawns one
/// Accepter task per listener. Returns the bound local addresses, mostly
/// useful for tests that bind to an ephemeral port.
pub async fn serve(
    ips: &[IpAddr],
    port: u16,
    accepters_per_ip: usize,
    registry: Registry,
    shutdown: GracefulShutdown,
    cancel: CancellationToken,
) -> Result<Vec<SocketAddr>> {
    let mut bound = Vec::with_capacity(ips.len() * accepters_per_ip);

    for &ip in ips {
        let addr = SocketAddr::new(ip, port);
        for accepter_id in 0..accepters_per_ip {
            let listener = bind_listener(addr, accepters_per_ip > 1)
                .with_context(|| format!("failed to bind {addr}"))?;
            let local_addr = listener
                .local_addr()
                .with_context(|| format!("failed to read local address for {addr}"))?;
            bound.push(local_addr);

            let registry = registry.clone();
            let shutdown = shutdown.clone();
            let cancel = cancel.clone();
            shutdown.add(1);
            tokio::spawn(async move {
                accept_loop(accepter_id, listener, registry, cancel).await;
                shutdown.done();
            });
        }
    }

    Ok(bound)
}

/// Builds a non-blocking `TcpListener` via `socket2`, optionally with
/// `SO_REUSEPORT` set, then hands the raw socket to Tokio.
fn bind_listener(addr: SocketAddr, reuse_port: bool) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .context("failed to create socket")?;
    socket.set_reuse_address(true).context("failed to set SO_REUSEADDR")?;
    if reuse_port {
        socket.set_reuse_port(true).context("failed to set SO_REUSEPORT")?;
    }
    socket.set_nonblocking(true).context("failed to set socket non-blocking")?;
    socket.bind(&addr.into()).context("failed to bind socket")?;
    socket.listen(LISTEN_BACKLOG).context("failed to listen on socket")?;
    TcpListener::from_std(socket.into()).context("failed to hand socket to the Tokio runtime")
}

/// Accepts connections until `cancel` fires, spawning one Connection task
/// per socket. Accept errors are logged and do not stop the loop -- a
/// single bad `accept()` shouldn't take the whole accepter down.
async fn accept_loop(accepter_id: usize, listener: TcpListener, registry: Registry, cancel: CancellationToken) {
    let local_addr = listener.local_addr().ok();
    info!(component = "accepter", accepter_id, addr = ?local_addr, event = "listening", "accepter started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(component = "accepter", accepter_id, event = "shutdown", "accepter stopping");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!(component = "accepter", accepter_id, %peer, event = "accepted", "connection accepted");
                        let registry = registry.clone();
                        tokio::spawn(handle_connection(socket, registry));
                    }
                    Err(err) => {
                        error!(component = "accepter", accepter_id, error = %err, event = "accept_failed", "accept failed");
                    }
                }
            }
        }
    }
}
