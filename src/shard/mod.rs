//! Shard actor: a task that exclusively owns one [`Map`] and one
//! [`Allocator`] and serves every command routed to it.
//!
//! Shards never share state. A Connection hands its [`ConnStream`] to the
//! Shard inside a [`ShardMessage`] and waits on a `oneshot` reply; the Shard
//! writes the command's reply directly onto the stream and hands it back.
//! This is what serializes per-connection commands without a lock: the
//! stream has exactly one owner at any instant.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::resp::{CodecError, ConnStream};
use crate::shutdown::GracefulShutdown;
use crate::storage::allocator::Allocator;
use crate::storage::map::Map;
use crate::storage::value::Key;

/// Depth of a shard's inbox. Generous enough that a burst of pipelined
/// commands across many connections doesn't immediately backpressure.
const INBOX_CAPACITY: usize = 4096;

/// A cheaply `Clone`-able reference to a Shard's inbox, handed out by the
/// [`crate::registry::Registry`] to every Connection.
#[derive(Clone)]
pub struct ShardHandle {
    sender: mpsc::Sender<ShardMessage>,
}

impl ShardHandle {
    /// Enqueues a message for this shard. The send only fails if the shard
    /// task has already exited (process shutdown); in that case the stream
    /// embedded in the message is simply dropped, closing the connection.
    pub async fn send(&self, message: ShardMessage) {
        let _ = self.sender.send(message).await;
    }
}

/// Reply delivered once a `Set`/`Get`/`Delete` command has been served: the
/// stream handed back to the Connection, plus whether writing the reply (or
/// reading the value, for `Set`) succeeded.
pub type OpReply = oneshot::Sender<(ConnStream, Result<(), CodecError>)>;

/// Reply delivered once the full `KEYS` fan-out completes: the stream
/// handed back, plus every key name collected across all shards. The
/// Connection serializes the array itself.
pub type KeysReply = oneshot::Sender<(ConnStream, Vec<Vec<u8>>)>;

/// One message per command, carrying the connection's stream by value so
/// exactly one task -- Connection or Shard -- owns it at any time.
pub enum ShardMessage {
    Set {
        key: Key,
        stream: ConnStream,
        reply: OpReply,
    },
    Get {
        key: Key,
        stream: ConnStream,
        reply: OpReply,
    },
    Delete {
        key: Key,
        stream: ConnStream,
        reply: OpReply,
    },
    /// `next_index` is this shard's position in `shards`; once it has
    /// appended its own keys it forwards the message to `shards[next_index]`
    /// or, if none remain, replies to the Connection with the full list.
    Keys {
        stream: ConnStream,
        shards: Arc<[ShardHandle]>,
        next_index: usize,
        accumulator: Vec<Vec<u8>>,
        reply: KeysReply,
    },
}

/// A task-owned Map + Allocator pair. Spawned once per configured shard at
/// startup and never touched from any other task.
pub struct Shard {
    id: usize,
    map: Map,
    allocator: Allocator,
    inbox: mpsc::Receiver<ShardMessage>,
}

impl Shard {
    /// Spawns the shard's task and returns a handle to its inbox. Registers
    /// with `shutdown` so the server waits for the inbox to drain (i.e. for
    /// every in-flight command to finish) before exiting.
    pub fn spawn(id: usize, shutdown: GracefulShutdown) -> ShardHandle {
        let (sender, inbox) = mpsc::channel(INBOX_CAPACITY);
        shutdown.add(1);
        tokio::spawn(async move {
            let mut shard = Shard {
                id,
                map: Map::new(),
                allocator: Allocator::new(),
                inbox,
            };
            shard.run().await;
            shutdown.done();
        });
        ShardHandle { sender }
    }

    async fn run(&mut self) {
        while let Some(message) = self.inbox.recv().await {
            self.handle(message).await;
        }
        debug!(component = "shard", shard_id = self.id, event = "drained", "shard inbox closed");
    }

    async fn handle(&mut self, message: ShardMessage) {
        match message {
            ShardMessage::Set { key, mut stream, reply } => {
                let result = self.handle_set(&key, &mut stream).await;
                let _ = reply.send((stream, result));
            }
            ShardMessage::Get { key, mut stream, reply } => {
                let result = self.handle_get(&key, &mut stream).await;
                let _ = reply.send((stream, result));
            }
            ShardMessage::Delete { key, mut stream, reply } => {
                let result = self.handle_delete(&key, &mut stream).await;
                let _ = reply.send((stream, result));
            }
            ShardMessage::Keys { stream, shards, next_index, mut accumulator, reply } => {
                accumulator.extend(self.map.keys().map(|name| name.to_vec()));
                match shards.get(next_index) {
                    Some(next) => {
                        let next = next.clone();
                        next.send(ShardMessage::Keys {
                            stream,
                            shards,
                            next_index: next_index + 1,
                            accumulator,
                            reply,
                        })
                        .await;
                    }
                    None => {
                        let _ = reply.send((stream, accumulator));
                    }
                }
            }
        }
    }

    async fn handle_set(&mut self, key: &Key, stream: &mut ConnStream) -> Result<(), CodecError> {
        let value = stream.read_bulk_string_value(&mut self.allocator).await?;
        if let Some(old) = self.map.set(key.clone(), value) {
            self.allocator.release(&old);
        }
        self.maybe_defragment();
        stream.write_ok().await
    }

    async fn handle_get(&mut self, key: &Key, stream: &mut ConnStream) -> Result<(), CodecError> {
        match self.map.get(&key.name, key.hash) {
            None => stream.write_nil().await,
            Some(value) => {
                let bytes = self.allocator.bytes_of(value).to_vec();
                stream.write_bulk_string(&bytes).await
            }
        }
    }

    async fn handle_delete(&mut self, key: &Key, stream: &mut ConnStream) -> Result<(), CodecError> {
        match self.map.remove(&key.name, key.hash) {
            None => stream.write_int(0).await,
            Some(old) => {
                self.allocator.release(&old);
                self.maybe_defragment();
                stream.write_int(1).await
            }
        }
    }

    /// Checked after every `Set`/`Delete`: runs the compaction inline, on
    /// the affected shard, as soon as it becomes eligible.
    fn maybe_defragment(&mut self) {
        if self.allocator.should_defragment() {
            self.allocator.defragment(self.map.values_mut());
            debug!(component = "shard", shard_id = self.id, event = "defragmented", "allocator compacted");
        }
    }
}
