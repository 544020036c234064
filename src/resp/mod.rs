//! Streaming RESP3 parser and generator.
//!
//! Every Connection task owns exactly one [`RespStream`], reading pipelined
//! commands and writing replies directly against the socket's buffered
//! halves -- no intermediate message buffer sits between the wire and the
//! Shard that ultimately serves a command.

pub mod command;
pub mod error;
pub mod stream;

pub use command::Command;
pub use error::CodecError;
pub use stream::{ConnStream, RespStream};
