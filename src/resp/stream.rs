use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use crate::hash::Hasher;
use crate::storage::allocator::Allocator;
use crate::storage::value::{Key, Value};

use super::command::Command;
use super::error::CodecError;

/// Bulk-string reader is buffered over a short window: large payloads are
/// read straight from the socket into their destination, never staged
/// through this buffer.
const READ_BUFFER_SIZE: usize = 128;

/// Bulk strings at or under this length are coalesced into a single
/// generator write; longer ones are written header-then-body-then-CRLF
/// directly against the socket to avoid an extra copy.
const INLINE_WRITE_THRESHOLD: usize = 128;

/// A RESP3 connection's read/write halves plus pipeline-framing state.
///
/// Generic over the underlying reader/writer so the same parser and
/// generator exercise both a real `TcpStream` and, in tests, an in-memory
/// mock -- the wire format is all that differs, never the transport.
pub struct RespStream<R, W> {
    reader: BufReader<R>,
    writer: W,
    /// Bulk strings left to read in the pipeline currently being consumed.
    remaining: u32,
}

/// The concrete stream type every Connection and Shard actually pass
/// around: the owned halves of one accepted `TcpStream`.
pub type ConnStream = RespStream<ReadHalf<TcpStream>, WriteHalf<TcpStream>>;

impl ConnStream {
    /// Splits a freshly accepted socket into buffered read/write halves.
    pub fn new(socket: TcpStream) -> Self {
        let (read_half, write_half) = tokio::io::split(socket);
        Self::from_parts(read_half, write_half)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> RespStream<R, W> {
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            writer,
            remaining: 0,
        }
    }

    // ---- reading -------------------------------------------------------

    /// Reads the outer pipeline array header `*<n>\r\n`, storing `n` as the
    /// number of bulk strings left to consume.
    pub async fn start_pipeline(&mut self) -> Result<(), CodecError> {
        let n = self.read_header(b'*').await?;
        self.remaining = n.max(0) as u32;
        Ok(())
    }

    /// Reads one pipeline element as a command name. Starts a new pipeline
    /// first if the previous one is fully consumed. An unrecognized name is
    /// a soft error; the remainder of the current pipeline is drained so
    /// the stream is resynchronized for the next one.
    pub async fn read_pipeline_command(&mut self) -> Result<Command, CodecError> {
        if self.remaining == 0 {
            self.start_pipeline().await?;
        }
        self.remaining -= 1;
        let name = self.read_bulk_bytes().await?;
        match Command::parse(&name) {
            Ok(cmd) => Ok(cmd),
            Err(err @ CodecError::Soft(_)) => {
                self.skip_remaining_strings().await?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Reads the `HELLO` handshake's protocol-version argument as UTF-8
    /// text. The handshake's own outer array header declares a single
    /// element (`*1`, covering just the `HELLO` bulk string) even though a
    /// second bulk string carrying the version follows it on the wire, so
    /// this reads that bulk string directly without touching `remaining`:
    /// `read_pipeline_command` already brought `remaining` to zero reading
    /// `HELLO` itself, and decrementing again would underflow.
    pub async fn read_handshake_version(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_bulk_bytes().await?;
        String::from_utf8(bytes).map_err(|_| CodecError::invalid_syntax())
    }

    /// Reads one pipeline element as an owned byte buffer.
    pub async fn read_pipeline_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        self.remaining -= 1;
        self.read_bulk_bytes().await
    }

    /// Reads one pipeline element as a key name and computes its hash once.
    pub async fn read_key(&mut self, hasher: &Hasher) -> Result<Key, CodecError> {
        let name = self.read_pipeline_bytes().await?;
        let hash = hasher.hash(&name);
        Ok(Key::new(name, hash))
    }

    /// Reads the next pipeline element as a bulk string header and streams
    /// its payload directly into `allocator`, which owns where the bytes
    /// ultimately live (an allocator block, or a standalone `Large` buffer).
    pub async fn read_bulk_string_value(
        &mut self,
        allocator: &mut Allocator,
    ) -> Result<Value, CodecError> {
        self.remaining -= 1;
        let n = self.read_header(b'$').await?;
        if n < 0 {
            return Err(CodecError::invalid_syntax());
        }
        let value = allocator
            .allocate_async(&mut self.reader, n as usize)
            .await
            .map_err(CodecError::from_io)?;
        self.expect_crlf().await?;
        Ok(value)
    }

    /// Drains the remaining bulk strings of the current pipeline without
    /// interpreting them, used to resynchronize after a soft error.
    pub async fn skip_remaining_strings(&mut self) -> Result<(), CodecError> {
        while self.remaining > 0 {
            self.remaining -= 1;
            self.read_bulk_bytes().await?;
        }
        Ok(())
    }

    async fn read_bulk_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let n = self.read_header(b'$').await?;
        if n < 0 {
            return Err(CodecError::invalid_syntax());
        }
        let mut buf = vec![0u8; n as usize];
        self.reader
            .read_exact(&mut buf)
            .await
            .map_err(CodecError::from_io)?;
        self.expect_crlf().await?;
        Ok(buf)
    }

    async fn read_header(&mut self, sigil: u8) -> Result<i64, CodecError> {
        let b = self.read_byte().await?;
        if b != sigil {
            return Err(CodecError::invalid_syntax());
        }
        self.read_number_line().await
    }

    /// Reads a signed integer terminated by `\r\n`: optional leading sign,
    /// arbitrary leading zeros, wrapping accumulation on overflow (protocol
    /// sizes are never expected to approach the platform integer range).
    async fn read_number_line(&mut self) -> Result<i64, CodecError> {
        let mut byte = self.read_byte().await?;
        let negative = match byte {
            b'-' => {
                byte = self.read_byte().await?;
                true
            }
            b'+' => {
                byte = self.read_byte().await?;
                false
            }
            _ => false,
        };

        let mut val: i64 = 0;
        loop {
            match byte {
                b'0'..=b'9' => {
                    val = val.wrapping_mul(10).wrapping_add((byte - b'0') as i64);
                    byte = self.read_byte().await?;
                }
                b'\r' => {
                    let lf = self.read_byte().await?;
                    if lf != b'\n' {
                        return Err(CodecError::invalid_syntax());
                    }
                    break;
                }
                _ => return Err(CodecError::invalid_syntax()),
            }
        }

        Ok(if negative { -val } else { val })
    }

    async fn expect_crlf(&mut self) -> Result<(), CodecError> {
        let cr = self.read_byte().await?;
        let lf = self.read_byte().await?;
        if cr != b'\r' || lf != b'\n' {
            return Err(CodecError::invalid_syntax());
        }
        Ok(())
    }

    async fn read_byte(&mut self) -> Result<u8, CodecError> {
        self.reader.read_u8().await.map_err(CodecError::from_io)
    }

    // ---- writing ---------------------------------------------------------

    pub async fn write_ok(&mut self) -> Result<(), CodecError> {
        self.write_raw(b"+OK\r\n").await
    }

    pub async fn write_nil(&mut self) -> Result<(), CodecError> {
        self.write_raw(b"$-1\r\n").await
    }

    pub async fn write_int(&mut self, n: i64) -> Result<(), CodecError> {
        self.write_raw(format!(":{n}\r\n").as_bytes()).await
    }

    pub async fn write_array(&mut self, n: usize) -> Result<(), CodecError> {
        self.write_raw(format!("*{n}\r\n").as_bytes()).await
    }

    pub async fn write_map(&mut self, n: usize) -> Result<(), CodecError> {
        self.write_raw(format!("%{n}\r\n").as_bytes()).await
    }

    pub async fn write_error(&mut self, message: &str) -> Result<(), CodecError> {
        self.write_raw(format!("-ERR {message}\r\n").as_bytes()).await
    }

    /// Writes a bulk string. Payloads over `INLINE_WRITE_THRESHOLD` bytes
    /// bypass the staging buffer entirely: header, body, and trailing CRLF
    /// go straight to the socket as three writes. Shorter payloads coalesce
    /// into one buffer to save syscalls.
    pub async fn write_bulk_string(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > INLINE_WRITE_THRESHOLD {
            self.write_raw(format!("${}\r\n", bytes.len()).as_bytes())
                .await?;
            self.write_raw(bytes).await?;
            self.write_raw(b"\r\n").await
        } else {
            let mut buf = Vec::with_capacity(bytes.len() + 16);
            buf.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
            buf.extend_from_slice(bytes);
            buf.extend_from_slice(b"\r\n");
            self.write_raw(&buf).await
        }
    }

    pub async fn write_hello_response(&mut self, version: &str) -> Result<(), CodecError> {
        self.write_map(3).await?;
        self.write_bulk_string(b"server").await?;
        self.write_bulk_string(b"kvi").await?;
        self.write_bulk_string(b"version").await?;
        self.write_bulk_string(version.as_bytes()).await?;
        self.write_bulk_string(b"proto").await?;
        self.write_int(3).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.writer.write_all(bytes).await.map_err(CodecError::from_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn mock_stream(
        reads: &[&[u8]],
        writes: &[&[u8]],
    ) -> RespStream<ReadHalf<tokio_test::io::Mock>, WriteHalf<tokio_test::io::Mock>> {
        let mut builder = Builder::new();
        for r in reads {
            builder.read(r);
        }
        for w in writes {
            builder.write(w);
        }
        let io = builder.build();
        let (r, w) = tokio::io::split(io);
        RespStream::from_parts(r, w)
    }

    #[tokio::test]
    async fn reads_a_pipelined_set_command() {
        let mut stream = mock_stream(
            &[b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n"],
            &[],
        );
        let cmd = stream.read_pipeline_command().await.unwrap();
        assert_eq!(cmd, Command::Set);
        let key = stream
            .read_key(&Hasher::with_seed(1, 2))
            .await
            .unwrap();
        assert_eq!(key.name, b"foo");
        let mut alloc = Allocator::new();
        let value = stream.read_bulk_string_value(&mut alloc).await.unwrap();
        assert_eq!(alloc.bytes_of(&value), b"bar");
    }

    #[tokio::test]
    async fn unknown_command_drains_remaining_args() {
        let mut stream = mock_stream(&[b"*3\r\n$3\r\nFOO\r\n$1\r\na\r\n$1\r\nb\r\n"], &[]);
        let err = stream.read_pipeline_command().await.unwrap_err();
        assert!(matches!(err, CodecError::Soft(_)));
        // The next pipeline starts cleanly because the soft error drained
        // FOO's two dangling arguments.
        let mut stream = mock_stream(&[b"*1\r\n$5\r\nHELLO\r\n"], &[]);
        assert_eq!(
            stream.read_pipeline_command().await.unwrap(),
            Command::Hello
        );
    }

    #[tokio::test]
    async fn handshake_version_reads_past_the_undercounted_array_header() {
        // The handshake's own `*1` header covers only the `HELLO` bulk
        // string; the version that follows is read without touching
        // `remaining`, which `read_pipeline_command` already brought to
        // zero reading `HELLO` itself.
        let mut stream = mock_stream(&[b"*1\r\n$5\r\nHELLO\r\n$1\r\n3\r\n"], &[]);
        assert_eq!(
            stream.read_pipeline_command().await.unwrap(),
            Command::Hello
        );
        assert_eq!(stream.read_handshake_version().await.unwrap(), "3");
    }

    #[tokio::test]
    async fn truncated_input_is_closed_not_hard() {
        let mut stream = mock_stream(&[b"*1\r\n$5\r\nHEL"], &[]);
        let err = stream.read_pipeline_command().await.unwrap_err();
        assert!(matches!(err, CodecError::Closed));
    }

    #[tokio::test]
    async fn malformed_header_is_hard() {
        let mut stream = mock_stream(&[b"@1\r\n"], &[]);
        let err = stream.read_pipeline_command().await.unwrap_err();
        assert!(matches!(err, CodecError::Hard(_)));
    }

    #[tokio::test]
    async fn write_ok_matches_wire_format() {
        let mut stream = mock_stream(&[], &[b"+OK\r\n"]);
        stream.write_ok().await.unwrap();
    }

    #[tokio::test]
    async fn write_bulk_string_inlines_short_values() {
        let mut stream = mock_stream(&[], &[b"$3\r\nbar\r\n"]);
        stream.write_bulk_string(b"bar").await.unwrap();
    }

    #[tokio::test]
    async fn write_bulk_string_splits_long_values() {
        let payload = vec![b'x'; 200];
        let mut stream = mock_stream(
            &[],
            &[b"$200\r\n", payload.as_slice(), b"\r\n"],
        );
        stream.write_bulk_string(&payload).await.unwrap();
    }

    #[tokio::test]
    async fn write_hello_response_matches_wire_format() {
        let mut stream = mock_stream(
            &[],
            &[b"%3\r\n$6\r\nserver\r\n$3\r\nkvi\r\n$7\r\nversion\r\n$5\r\n1.2.3\r\n$5\r\nproto\r\n:3\r\n"],
        );
        stream.write_hello_response("1.2.3").await.unwrap();
    }
}
