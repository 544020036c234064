//! Per-connection state machine.
//!
//! A Connection task owns the socket's [`ConnStream`] between shard
//! round-trips: it parses a command, hands the stream to the Shard that
//! owns the key (or, for `KEYS`, to the first shard in a snapshot of all of
//! them), and waits for the Shard to hand it back before reading the next
//! command. This is what keeps per-connection command ordering strict while
//! still letting independent connections and shards run in parallel.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::registry::Registry;
use crate::resp::{CodecError, Command, ConnStream};
use crate::shard::ShardMessage;

/// Reported in the `HELLO` handshake reply and by `--version`, so both
/// surfaces always agree.
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Drives one accepted socket until the peer disconnects or a protocol
/// violation forces a close. Never panics on a client-triggered condition;
/// only an invariant break inside a Shard's Map/Allocator is allowed to.
pub async fn handle_connection(socket: TcpStream, registry: Registry) {
    let peer = socket.peer_addr().ok();
    let mut stream = ConnStream::new(socket);

    loop {
        let command = match stream.read_pipeline_command().await {
            Ok(command) => command,
            Err(CodecError::Closed) => {
                debug!(component = "connection", peer = ?peer, event = "closed", "client disconnected");
                return;
            }
            Err(CodecError::Soft(message)) => {
                debug!(component = "connection", peer = ?peer, event = "soft_error", %message, "reporting soft protocol error");
                if stream.write_error(&message).await.is_err() {
                    return;
                }
                continue;
            }
            Err(CodecError::Hard(message)) => {
                warn!(component = "connection", peer = ?peer, event = "hard_error", %message, "closing connection after protocol violation");
                let _ = stream.write_error(&message).await;
                return;
            }
            Err(CodecError::ReadWrite(err)) => {
                debug!(component = "connection", peer = ?peer, event = "io_error", error = %err, "closing connection");
                return;
            }
        };

        stream = match command {
            Command::Hello => match complete_handshake(&mut stream).await {
                Ok(()) => stream,
                Err(err) => {
                    report_terminal_error(&mut stream, err).await;
                    return;
                }
            },
            Command::Get | Command::Set | Command::Del => {
                match dispatch_shard_op(command, stream, &registry).await {
                    Ok(stream) => stream,
                    Err(()) => return,
                }
            }
            Command::Keys => match dispatch_keys(stream, &registry).await {
                Ok(stream) => stream,
                Err(()) => return,
            },
        };
    }
}

/// Reads the handshake's single argument (the protocol version) and
/// replies with the hello map, or a `Hard` error for anything but `"3"`.
async fn complete_handshake(stream: &mut ConnStream) -> Result<(), CodecError> {
    let version = stream.read_handshake_version().await?;
    if version != "3" {
        return Err(CodecError::Hard(format!(
            "unsupported protocol version '{version}'"
        )));
    }
    stream.write_hello_response(SERVER_VERSION).await
}

/// Reads the key, routes to the owning shard, hands the stream off, and
/// waits for the shard to serve the command and hand it back.
async fn dispatch_shard_op(
    command: Command,
    mut stream: ConnStream,
    registry: &Registry,
) -> Result<ConnStream, ()> {
    let key = match stream.read_key(registry.hasher()).await {
        Ok(key) => key,
        Err(err) => {
            report_terminal_error(&mut stream, err).await;
            return Err(());
        }
    };

    let shard = registry.select(key.hash).clone();
    let (reply, awaiting) = oneshot::channel();
    let message = match command {
        Command::Set => ShardMessage::Set { key, stream, reply },
        Command::Get => ShardMessage::Get { key, stream, reply },
        Command::Del => ShardMessage::Delete { key, stream, reply },
        Command::Hello | Command::Keys => unreachable!("dispatch_shard_op only handles GET/SET/DEL"),
    };
    shard.send(message).await;

    let (mut stream, result) = awaiting
        .await
        .expect("shard task dropped its reply channel without responding");
    match result {
        Ok(()) => Ok(stream),
        Err(err) => {
            report_terminal_error(&mut stream, err).await;
            Err(())
        }
    }
}

/// Hands the stream to the first shard of a per-call snapshot; each shard
/// appends its own keys and forwards to the next until the chain empties,
/// at which point the Connection serializes the combined list itself.
async fn dispatch_keys(stream: ConnStream, registry: &Registry) -> Result<ConnStream, ()> {
    let shards = registry.shards();
    let (reply, awaiting) = oneshot::channel();
    let message = ShardMessage::Keys {
        stream,
        shards: Arc::clone(&shards),
        next_index: 1,
        accumulator: Vec::new(),
        reply,
    };
    shards[0].send(message).await;

    let (mut stream, keys) = awaiting
        .await
        .expect("shard task dropped its reply channel without responding");

    if stream.write_array(keys.len()).await.is_err() {
        return Err(());
    }
    for name in &keys {
        if stream.write_bulk_string(name).await.is_err() {
            return Err(());
        }
    }
    Ok(stream)
}

/// Reports a `Hard`/IO error to the client (best-effort) before the caller
/// tears the connection down. `Closed` and already-silent IO errors need no
/// report.
async fn report_terminal_error(stream: &mut ConnStream, err: CodecError) {
    if let CodecError::Hard(message) | CodecError::Soft(message) = err {
        let _ = stream.write_error(&message).await;
    }
}
