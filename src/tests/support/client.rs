//! A thin raw-socket client: sends exact bytes, reads back exactly the
//! number of bytes the caller expects. Scenarios assert on raw wire bytes
//! rather than a parsed response, since the wire format itself is what is
//! under test.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("failed to connect to test server");
        Self { stream }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("failed to write to test server");
    }

    /// Reads exactly `n` bytes, panicking (rather than hanging) if the peer
    /// closes early.
    pub async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.stream
            .read_exact(&mut buf)
            .await
            .expect("server closed the connection early");
        buf
    }

    /// Reads whatever is available up to `n` bytes and returns how much was
    /// actually read, used to observe a clean close (`Ok(0)`).
    pub async fn read_some(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        let read = self
            .stream
            .read(&mut buf)
            .await
            .expect("read failed unexpectedly");
        buf.truncate(read);
        buf
    }

    /// True once the peer has closed its write half: the next read
    /// immediately returns `Ok(0)`.
    pub async fn is_closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.stream.read(&mut buf).await, Ok(0))
    }
}
