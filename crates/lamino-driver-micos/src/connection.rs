//! Micos TCP connection
//!
//! Commands and replies are ASCII lines terminated by [`RETURN_SEQUENCE`].
//! The motion server greets a new client with one line that has to be read
//! before the first command; [`MicosConnection`] does this lazily on the
//! first send.
//!
//! Several motors usually share one connection (all axes of a motion server
//! sit behind the same socket). The internal lock makes every
//! [`MicosConnection::execute`] an atomic command/reply pair. A reply that
//! was never read, because the read timed out or the caller dropped the
//! future, is discarded before the next exchange.

use std::net::SocketAddr;
use std::time::Duration;

use lamino_core::limits::{DEFAULT_READ_TIMEOUT, DEFAULT_SETTLE_DELAY};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

/// Line terminator used in both directions.
pub const RETURN_SEQUENCE: &str = "\r\n";

/// Timeout for establishing the TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by the Micos transport.
#[derive(Error, Debug)]
pub enum MicosError {
    /// Low-level socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TCP connection could not be established.
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed {
        /// Server address
        address: String,
        /// Failure description
        reason: String,
    },

    /// No reply line within the read timeout.
    #[error("Timeout after {0:?} waiting for reply")]
    Timeout(Duration),

    /// The server closed the socket.
    #[error("Connection closed by server")]
    Closed,

    /// Reply does not have the expected shape.
    #[error("Invalid response to '{command}': {response:?}")]
    InvalidResponse {
        /// Command that was sent
        command: String,
        /// Reply received
        response: String,
    },
}

/// Any bidirectional byte stream a connection can run over.
pub trait MicosIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> MicosIo for T {}

struct Link {
    stream: BufReader<Box<dyn MicosIo>>,
    greeted: bool,
    // Replies sent by the server that no caller has consumed.
    owed: usize,
}

/// Shared, lock-serialized connection to a Micos motion server.
pub struct MicosConnection {
    address: String,
    link: Mutex<Link>,
    sleep_between: Duration,
    read_timeout: Duration,
}

impl MicosConnection {
    /// Connect to a motion server.
    ///
    /// `sleep_between` is the pause between a command and reading its reply,
    /// also used as the polling period while motors settle.
    pub async fn connect(host: &str, port: u16, sleep_between: Duration) -> Result<Self, MicosError> {
        let address = format!("{}:{}", host, port);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| MicosError::ConnectionFailed {
                address: address.clone(),
                reason: format!("no answer within {:?}", CONNECT_TIMEOUT),
            })?
            .map_err(|e| MicosError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        debug!(%address, "connected to Micos server");

        Ok(Self::from_stream(address, stream, sleep_between))
    }

    /// Connect using timing settings from configuration.
    pub async fn connect_with(
        host: &str,
        port: u16,
        settings: MicosConnectionSettings,
    ) -> Result<Self, MicosError> {
        Ok(Self::connect(host, port, settings.sleep_between)
            .await?
            .with_read_timeout(settings.read_timeout))
    }

    /// Connect to a socket address, e.g. the one of a [`MicosSimulator`](crate::MicosSimulator).
    pub async fn connect_addr(addr: SocketAddr, sleep_between: Duration) -> Result<Self, MicosError> {
        Self::connect(&addr.ip().to_string(), addr.port(), sleep_between).await
    }

    /// Wrap an already open stream.
    pub fn from_stream(
        address: impl Into<String>,
        stream: impl MicosIo + 'static,
        sleep_between: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            link: Mutex::new(Link {
                stream: BufReader::new(Box::new(stream)),
                greeted: false,
                owed: 0,
            }),
            sleep_between,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override the reply timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Server address as `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Pause between command and reply.
    pub fn sleep_between(&self) -> Duration {
        self.sleep_between
    }

    /// Send a command without reading a reply.
    #[instrument(skip(self), fields(address = %self.address), err)]
    pub async fn send(&self, command: &str) -> Result<(), MicosError> {
        let mut link = self.link.lock().await;
        self.send_locked(&mut link, command).await
    }

    /// Read one reply line.
    pub async fn recv(&self) -> Result<String, MicosError> {
        let mut link = self.link.lock().await;
        self.recv_locked(&mut link).await
    }

    /// Send a command and return its reply, without the return sequence.
    #[instrument(skip(self), fields(address = %self.address), err)]
    pub async fn execute(&self, command: &str) -> Result<String, MicosError> {
        let mut link = self.link.lock().await;
        self.discard_stale(&mut link).await?;
        self.send_locked(&mut link, command).await?;
        link.owed += 1;
        tokio::time::sleep(self.sleep_between).await;
        let reply = self.recv_locked(&mut link).await?;
        link.owed -= 1;
        trace!(command, reply = %reply, "micos exchange");
        Ok(reply)
    }

    async fn discard_stale(&self, link: &mut Link) -> Result<(), MicosError> {
        while link.owed > 0 {
            match self.recv_locked(link).await {
                Ok(stale) => {
                    link.owed -= 1;
                    warn!(address = %self.address, reply = %stale, "discarded stale reply");
                }
                Err(MicosError::Timeout(_)) => {
                    warn!(address = %self.address, missing = link.owed, "stale replies never arrived");
                    link.owed = 0;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn send_locked(&self, link: &mut Link, command: &str) -> Result<(), MicosError> {
        if !link.greeted {
            link.greeted = true;
            match self.recv_locked(link).await {
                Ok(greeting) => debug!(greeting = %greeting, "flushed Micos server"),
                Err(MicosError::Timeout(_)) => {
                    warn!(address = %self.address, "no greeting from Micos server")
                }
                Err(e) => return Err(e),
            }
        }

        let writer = link.stream.get_mut();
        writer
            .write_all(format!("{}{}", command, RETURN_SEQUENCE).as_bytes())
            .await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv_locked(&self, link: &mut Link) -> Result<String, MicosError> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.read_timeout, link.stream.read_line(&mut line))
            .await
            .map_err(|_| MicosError::Timeout(self.read_timeout))??;
        if n == 0 {
            return Err(MicosError::Closed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl std::fmt::Debug for MicosConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicosConnection")
            .field("address", &self.address)
            .field("sleep_between", &self.sleep_between)
            .finish()
    }
}

/// Timing settings for a connection, as found in session configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MicosConnectionSettings {
    /// Pause between command and reply
    #[serde(with = "humantime_serde", default = "default_sleep_between")]
    pub sleep_between: Duration,
    /// Reply timeout
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

impl Default for MicosConnectionSettings {
    fn default() -> Self {
        Self {
            sleep_between: DEFAULT_SETTLE_DELAY,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

fn default_sleep_between() -> Duration {
    DEFAULT_SETTLE_DELAY
}

fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tracing_test::traced_test;

    fn pair() -> (MicosConnection, tokio::io::DuplexStream) {
        let (host, device) = tokio::io::duplex(256);
        let conn = MicosConnection::from_stream("test", device, Duration::from_millis(1))
            .with_read_timeout(Duration::from_millis(200));
        (conn, host)
    }

    #[tokio::test]
    #[traced_test]
    async fn first_send_flushes_greeting() {
        let (conn, mut server) = pair();
        server.write_all(b"Micos ready\r\n").await.unwrap();

        conn.send("Sam Stop").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Sam Stop\r\n");
        assert!(logs_contain("flushed Micos server"));
    }

    #[tokio::test]
    async fn execute_strips_return_sequence() {
        let (conn, mut server) = pair();
        server
            .write_all(b"hello\r\nSam Crds 1.0 2.0\r\n")
            .await
            .unwrap();

        let reply = conn.execute("Sam Crds ?").await.unwrap();
        assert_eq!(reply, "Sam Crds 1.0 2.0");
    }

    #[tokio::test]
    async fn missing_greeting_does_not_block_first_command() {
        let (conn, mut server) = pair();

        conn.send("Sam Stop").await.unwrap();

        let mut buf = vec![0u8; 64];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"Sam Stop\r\n");
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn late_reply_does_not_answer_next_command() {
        let (server, device) = tokio::io::duplex(256);
        let conn = MicosConnection::from_stream("test", device, Duration::from_millis(1))
            .with_read_timeout(Duration::from_millis(100));
        let server = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            server.get_mut().write_all(b"hello\r\n").await.unwrap();
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            assert_eq!(line, "Sam Crds ?\r\n");
            tokio::time::sleep(Duration::from_millis(150)).await;
            server.get_mut().write_all(b"Sam Crds 1 2 3\r\n").await.unwrap();

            line.clear();
            server.read_line(&mut line).await.unwrap();
            assert_eq!(line, "Sam IsReady\r\n");
            server.get_mut().write_all(b"Sam not ready\r\n").await.unwrap();
        });

        let first = conn.execute("Sam Crds ?").await;
        assert!(matches!(first, Err(MicosError::Timeout(_))));
        assert_eq!(conn.execute("Sam IsReady").await.unwrap(), "Sam not ready");
        assert!(logs_contain("discarded stale reply"));
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn lost_reply_only_delays_next_command() {
        let (server, device) = tokio::io::duplex(256);
        let conn = MicosConnection::from_stream("test", device, Duration::from_millis(1))
            .with_read_timeout(Duration::from_millis(100));
        let server = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            server.get_mut().write_all(b"hello\r\n").await.unwrap();
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            line.clear();
            server.read_line(&mut line).await.unwrap();
            assert_eq!(line, "Sam IsReady\r\n");
            server.get_mut().write_all(b"Sam ready\r\n").await.unwrap();
        });

        assert!(conn.execute("Sam Crds ?").await.is_err());
        assert_eq!(conn.execute("Sam IsReady").await.unwrap(), "Sam ready");
        server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_exchange_is_discarded() {
        let (server, device) = tokio::io::duplex(256);
        let conn = Arc::new(
            MicosConnection::from_stream("test", device, Duration::from_millis(1))
                .with_read_timeout(Duration::from_millis(100)),
        );
        let server = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            server.get_mut().write_all(b"hello\r\n").await.unwrap();
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.get_mut().write_all(b"Sam Crds 1 2 3\r\n").await.unwrap();
            line.clear();
            server.read_line(&mut line).await.unwrap();
            server.get_mut().write_all(b"Sam not ready\r\n").await.unwrap();
        });

        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.execute("Sam Crds ?").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pending.abort();
        let _ = pending.await;

        assert_eq!(conn.execute("Sam IsReady").await.unwrap(), "Sam not ready");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn recv_times_out() {
        let (conn, _server) = pair();
        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, MicosError::Timeout(_)));
    }

    #[tokio::test]
    async fn closed_socket_is_reported() {
        let (conn, server) = pair();
        drop(server);
        let err = conn.recv().await.unwrap_err();
        assert!(matches!(err, MicosError::Closed));
    }
}
