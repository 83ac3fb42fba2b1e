//! TCP/telnet host link.
//!
//! [`TcpHost`] keeps one TCP connection per [`SessionKey`] and implements
//! [`HostLink`] on top of it. Connections are opened lazily by the first
//! read or write for a key, using the key's host part and port 23 when no
//! port is given.
//!
//! Incoming bytes are split into lines on CR or LF; the empty line of a CRLF
//! pair is skipped. Telnet option negotiation (IAC sequences) is stripped
//! from the stream. A prompt that arrives without a terminator (such as
//! `Password:`) is returned once the line has been idle for the partial-line
//! timeout.
//!
//! A read that times out with nothing buffered drops the connection, as does
//! any I/O failure. The next use reconnects, so a reply that arrives late is
//! never read as the answer to a later command.
//!
//! # Example
//!
//! ```no_run
//! use sislib_core::{HostLink, SessionKey};
//! use sislib_transport::TcpHost;
//! use std::time::Duration;
//!
//! # async fn example() -> sislib_core::Result<()> {
//! let host = TcpHost::new().read_timeout(Duration::from_secs(2));
//! let key = SessionKey::new("admin:secret@192.168.1.50");
//!
//! let greeting = host.read_line(&key).await?;
//! host.write_line(&key, b"Q\r").await?;
//! let version = host.read_line(&key).await?;
//! # let _ = (greeting, version);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sislib_core::{Error, HostLink, ProtocolKind, Result, SessionKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Telnet port used when the session key names no port.
pub const DEFAULT_PORT: u16 = 23;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_PARTIAL_TIMEOUT: Duration = Duration::from_millis(300);

const IAC: u8 = 255;
const SB: u8 = 250;
const SE: u8 = 240;
const WILL: u8 = 251;
const DONT: u8 = 254;

/// Position in a telnet command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum TelnetState {
    #[default]
    Data,
    Iac,
    /// Expecting the option byte of WILL/WONT/DO/DONT.
    Option,
    Subnegotiation,
    SubnegotiationIac,
}

/// Removes telnet commands from a byte stream, across chunk boundaries.
#[derive(Debug, Default)]
struct TelnetFilter {
    state: TelnetState,
}

impl TelnetFilter {
    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &b in input {
            self.state = match (self.state, b) {
                (TelnetState::Data, IAC) => TelnetState::Iac,
                (TelnetState::Data, _) => {
                    out.push(b);
                    TelnetState::Data
                }
                (TelnetState::Iac, IAC) => {
                    out.push(IAC);
                    TelnetState::Data
                }
                (TelnetState::Iac, WILL..=DONT) => TelnetState::Option,
                (TelnetState::Iac, SB) => TelnetState::Subnegotiation,
                (TelnetState::Iac, _) => TelnetState::Data,
                (TelnetState::Option, _) => TelnetState::Data,
                (TelnetState::Subnegotiation, IAC) => TelnetState::SubnegotiationIac,
                (TelnetState::Subnegotiation, _) => TelnetState::Subnegotiation,
                (TelnetState::SubnegotiationIac, SE) => TelnetState::Data,
                (TelnetState::SubnegotiationIac, _) => TelnetState::Subnegotiation,
            };
        }
    }
}

/// One open connection and its unread bytes.
#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    addr: String,
    buf: Vec<u8>,
    telnet: TelnetFilter,
    /// Cleared once the stream fails or the peer closes it.
    alive: bool,
}

impl Connection {
    fn new(stream: TcpStream, addr: String) -> Self {
        Connection {
            stream,
            addr,
            buf: Vec::new(),
            telnet: TelnetFilter::default(),
            alive: true,
        }
    }

    /// Pop the next complete, non-empty line from the buffer.
    fn take_line(&mut self) -> Option<String> {
        loop {
            let pos = self.buf.iter().position(|b| *b == b'\r' || *b == b'\n')?;
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if pos > 0 {
                return Some(String::from_utf8_lossy(&line[..pos]).into_owned());
            }
        }
    }

    fn take_partial(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        line
    }

    async fn read_line(&mut self, timeout: Duration, partial_timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 1024];

        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }

            let wait_until = if self.buf.is_empty() {
                deadline
            } else {
                deadline.min(Instant::now() + partial_timeout)
            };

            match tokio::time::timeout_at(wait_until, self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    tracing::warn!(addr = %self.addr, "peer closed connection");
                    self.alive = false;
                    return Err(Error::Transport(format!("connection closed by {}", self.addr)));
                }
                Ok(Ok(n)) => {
                    tracing::trace!(addr = %self.addr, bytes = n, data = ?&chunk[..n], "received data");
                    self.telnet.feed(&chunk[..n], &mut self.buf);
                }
                Ok(Err(e)) => {
                    tracing::error!(addr = %self.addr, error = %e, "failed to receive data");
                    self.alive = false;
                    return Err(map_io_error(e));
                }
                Err(_) if !self.buf.is_empty() => return Ok(self.take_partial()),
                Err(_) => {
                    // A late reply would pair with the next command.
                    tracing::warn!(
                        addr = %self.addr,
                        timeout_ms = timeout.as_millis(),
                        "timeout waiting for line, dropping connection"
                    );
                    self.alive = false;
                    return Err(Error::Transport("read timed out".into()));
                }
            }
        }
    }

    async fn write_line(&mut self, line: &[u8], timeout: Duration) -> Result<()> {
        tracing::trace!(addr = %self.addr, bytes = line.len(), data = ?line, "sending data");

        let write = async {
            self.stream.write_all(line).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(addr = %self.addr, error = %e, "failed to send data");
                self.alive = false;
                Err(map_io_error(e))
            }
            Err(_) => {
                self.alive = false;
                Err(Error::Transport("write timed out".into()))
            }
        }
    }
}

type SharedConnection = Arc<tokio::sync::Mutex<Connection>>;

/// TCP/telnet [`HostLink`] serving many sessions.
#[derive(Debug)]
pub struct TcpHost {
    connections: Mutex<HashMap<SessionKey, SharedConnection>>,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    partial_timeout: Duration,
}

impl TcpHost {
    pub fn new() -> Self {
        TcpHost {
            connections: Mutex::new(HashMap::new()),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            partial_timeout: DEFAULT_PARTIAL_TIMEOUT,
        }
    }

    /// Limit for establishing a connection (default 5 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Limit for receiving one line (default 5 s).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Limit for sending one line (default 5 s).
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Idle time after which an unterminated line is returned (default 300 ms).
    pub fn partial_timeout(mut self, timeout: Duration) -> Self {
        self.partial_timeout = timeout;
        self
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<SessionKey, SharedConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the connection for `key`. Returns whether one was open.
    pub fn disconnect(&self, key: &SessionKey) -> bool {
        let removed = self.connections().remove(key).is_some();
        if removed {
            tracing::info!(session = %key, "TCP connection dropped");
        }
        removed
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections().len()
    }

    async fn connection(&self, key: &SessionKey) -> Result<SharedConnection> {
        if let Some(conn) = self.connections().get(key) {
            return Ok(conn.clone());
        }

        let addr = socket_addr(key.address());
        tracing::debug!(
            session = %key,
            addr = %addr,
            timeout_ms = self.connect_timeout.as_millis(),
            "connecting"
        );
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                tracing::error!(addr = %addr, "TCP connection timed out");
                Error::Transport(format!("connection to {addr} timed out"))
            })?
            .map_err(|e| {
                tracing::error!(addr = %addr, error = %e, "TCP connection failed");
                map_connect_error(e, &addr)
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(addr = %addr, error = %e, "failed to set TCP_NODELAY (continuing anyway)");
        }
        tracing::info!(session = %key, addr = %addr, "TCP connection established");

        let conn = Arc::new(tokio::sync::Mutex::new(Connection::new(stream, addr)));
        Ok(self
            .connections()
            .entry(key.clone())
            .or_insert(conn)
            .clone())
    }

    /// Forget `conn` if it is still the registered connection for `key`.
    fn forget(&self, key: &SessionKey, conn: &SharedConnection) {
        let mut connections = self.connections();
        if connections.get(key).is_some_and(|c| Arc::ptr_eq(c, conn)) {
            connections.remove(key);
            tracing::debug!(session = %key, "connection removed after failure");
        }
    }
}

impl Default for TcpHost {
    fn default() -> Self {
        TcpHost::new()
    }
}

#[async_trait]
impl HostLink for TcpHost {
    async fn read_line(&self, key: &SessionKey) -> Result<String> {
        let conn = self.connection(key).await?;
        let mut guard = conn.lock().await;
        let result = guard.read_line(self.read_timeout, self.partial_timeout).await;
        if !guard.alive {
            drop(guard);
            self.forget(key, &conn);
        }
        result
    }

    async fn write_line(&self, key: &SessionKey, line: &[u8]) -> Result<()> {
        let conn = self.connection(key).await?;
        let mut guard = conn.lock().await;
        let result = guard.write_line(line, self.write_timeout).await;
        if !guard.alive {
            drop(guard);
            self.forget(key, &conn);
        }
        result
    }

    fn is_connected(&self, key: &SessionKey) -> bool {
        self.connections().contains_key(key)
    }

    fn protocol(&self, _key: &SessionKey) -> ProtocolKind {
        ProtocolKind::Telnet
    }

    fn close(&self, key: &SessionKey) {
        self.disconnect(key);
    }
}

/// Append the telnet port unless `address` already names one.
fn socket_addr(address: &str) -> String {
    let has_port = match address.rsplit_once(':') {
        Some((host, port)) => {
            !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && !host.contains(':')
                || address.starts_with('[') && host.ends_with(']')
        }
        None => false,
    };
    if has_port {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_PORT}")
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {addr}"))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::Transport(format!("connection lost: {e}")),
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Helper: bind a TcpListener on a random available port and return it
    /// along with a session key addressing it.
    async fn test_listener() -> (TcpListener, SessionKey) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, SessionKey::new(format!("admin:pw@{addr}")))
    }

    fn fast_host() -> TcpHost {
        TcpHost::new()
            .read_timeout(Duration::from_millis(500))
            .partial_timeout(Duration::from_millis(50))
    }

    #[test]
    fn default_port_is_appended() {
        assert_eq!(socket_addr("10.0.0.5"), "10.0.0.5:23");
        assert_eq!(socket_addr("10.0.0.5:2023"), "10.0.0.5:2023");
        assert_eq!(socket_addr("projector.local"), "projector.local:23");
        assert_eq!(socket_addr("[::1]:2023"), "[::1]:2023");
    }

    #[test]
    fn telnet_commands_are_stripped() {
        let mut filter = TelnetFilter::default();
        let mut out = Vec::new();
        filter.feed(&[IAC, WILL, 1, b'O', b'K', IAC, IAC, b'\r'], &mut out);
        assert_eq!(out, vec![b'O', b'K', IAC, b'\r']);
    }

    #[test]
    fn telnet_sequence_split_across_chunks() {
        let mut filter = TelnetFilter::default();
        let mut out = Vec::new();
        filter.feed(&[b'A', IAC], &mut out);
        filter.feed(&[253, 3, b'B'], &mut out);
        filter.feed(&[IAC, SB, 24, 1, IAC, SE, b'C'], &mut out);
        assert_eq!(out, b"ABC");
    }

    #[tokio::test]
    async fn lazy_connect_and_line_split() {
        let (listener, key) = test_listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"(c) Copyright\r\nLine two\rLine three\n").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let host = fast_host();
        assert!(!host.is_connected(&key));
        assert_eq!(host.read_line(&key).await.unwrap(), "(c) Copyright");
        assert!(host.is_connected(&key));
        assert_eq!(host.read_line(&key).await.unwrap(), "Line two");
        assert_eq!(host.read_line(&key).await.unwrap(), "Line three");
        assert_eq!(host.protocol(&key), ProtocolKind::Telnet);

        server.abort();
    }

    #[tokio::test]
    async fn unterminated_prompt_is_returned() {
        let (listener, key) = test_listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[IAC, 251, 1]).await.unwrap();
            stream.write_all(b"Password:").await.unwrap();
            stream.flush().await.unwrap();

            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"secret\r");
            stream.write_all(b"\r\nLogin Administrator\r\n").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let host = fast_host();
        assert_eq!(host.read_line(&key).await.unwrap(), "Password:");
        host.write_line(&key, b"secret\r").await.unwrap();
        assert_eq!(host.read_line(&key).await.unwrap(), "Login Administrator");

        server.abort();
    }

    #[tokio::test]
    async fn read_timeout_drops_connection() {
        let (listener, key) = test_listener().await;
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let host = TcpHost::new().read_timeout(Duration::from_millis(100));
        let err = host.read_line(&key).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(!host.is_connected(&key));

        server.abort();
    }

    #[tokio::test]
    async fn late_reply_is_not_paired_with_next_command() {
        let (listener, key) = test_listener().await;
        let server = tokio::spawn(async move {
            // First connection answers after the client has given up.
            let (mut slow, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let n = slow.read(&mut buf).await.unwrap();
                assert_eq!(&buf[..n], b"1!\r");
                tokio::time::sleep(Duration::from_millis(300)).await;
                let _ = slow.write_all(b"REPLY-TO-FIRST\r\n").await;
                let _ = slow.flush().await;
            });

            let (mut fast, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = fast.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"2!\r");
            fast.write_all(b"REPLY-TO-SECOND\r\n").await.unwrap();
            fast.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let host = TcpHost::new().read_timeout(Duration::from_millis(100));
        host.write_line(&key, b"1!\r").await.unwrap();
        let err = host.read_line(&key).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        host.write_line(&key, b"2!\r").await.unwrap();
        assert_eq!(host.read_line(&key).await.unwrap(), "REPLY-TO-SECOND");

        server.abort();
    }

    #[tokio::test]
    async fn peer_close_drops_connection() {
        let (listener, key) = test_listener().await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let host = fast_host();
        let err = host.read_line(&key).await.unwrap_err();
        assert!(err.is_retryable(), "expected a retryable error, got: {:?}", err);
        assert!(!host.is_connected(&key));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        let (listener, key) = test_listener().await;
        drop(listener);

        let host = fast_host();
        let err = host.write_line(&key, b"Q\r").await.unwrap_err();
        match &err {
            Error::Transport(msg) => assert!(
                msg.contains("connection refused"),
                "expected 'connection refused' in message, got: {}",
                msg
            ),
            other => panic!("expected Transport error, got: {:?}", other),
        }
        assert!(!host.is_connected(&key));
    }

    #[tokio::test]
    async fn disconnect_reconnects_on_next_use() {
        let (listener, key) = test_listener().await;
        let server = tokio::spawn(async move {
            for greeting in [&b"first\r\n"[..], &b"second\r\n"[..]] {
                let (mut stream, _) = listener.accept().await.unwrap();
                stream.write_all(greeting).await.unwrap();
                stream.flush().await.unwrap();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    drop(stream);
                });
            }
        });

        let host = fast_host();
        assert_eq!(host.read_line(&key).await.unwrap(), "first");
        assert!(host.disconnect(&key));
        assert!(!host.is_connected(&key));
        assert!(!host.disconnect(&key));

        assert_eq!(host.read_line(&key).await.unwrap(), "second");
        assert_eq!(host.connection_count(), 1);

        server.await.unwrap();
    }
}
