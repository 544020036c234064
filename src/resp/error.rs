use std::io;

/// Error taxonomy produced by the RESP codec.
///
/// `Hard` and `Soft` both report `-ERR <msg>\r\n` to the client; they differ
/// only in whether the connection survives. `Closed` and `ReadWrite` never
/// write anything back -- the peer is already gone or the stream is in an
/// unrecoverable state.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Protocol-level violation. The connection is torn down after the
    /// error is reported.
    #[error("{0}")]
    Hard(String),
    /// Semantic violation, e.g. an unknown command name. The connection
    /// continues once the current pipeline has been drained.
    #[error("{0}")]
    Soft(String),
    /// The peer closed the connection, or the read hit a clean EOF.
    #[error("connection closed")]
    Closed,
    /// Any other IO error. Logged and the connection is dropped silently.
    #[error(transparent)]
    ReadWrite(#[from] io::Error),
}

impl CodecError {
    /// Classifies a raw IO error the way the codec's error taxonomy
    /// requires: EOF and connection-reset/aborted collapse into `Closed`,
    /// since both represent a peer that is simply gone.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => CodecError::Closed,
            _ => CodecError::ReadWrite(err),
        }
    }

    pub(super) fn invalid_syntax() -> Self {
        CodecError::Hard("the syntax is invalid".to_string())
    }
}
