//! Mock host link for deterministic testing of the SIS engine.
//!
//! [`MockHost`] implements [`HostLink`] for any number of sessions. Each
//! session has a login script, scripted replies, and failure injection.
//!
//! # Example
//!
//! ```
//! use sislib_core::SessionKey;
//! use sislib_test_harness::MockHost;
//!
//! let host = MockHost::new();
//! let key = SessionKey::new("admin:pw@10.0.0.5");
//! host.login_script(&key, &["Password:", "Login Administrator"]);
//! // When the engine writes `2I\r`, the next read returns this line.
//! host.expect(&key, "2I", "DTP CrossPoint 84 Matrix Switcher");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sislib_core::{Error, HostLink, ProtocolKind, Result, SessionKey};

#[derive(Debug, Default)]
struct MockSession {
    connected: bool,
    protocol: ProtocolKind,
    /// Lines served while no reply is pending.
    login: VecDeque<String>,
    /// Ordered request/reply pairs, consumed once each.
    expectations: VecDeque<(Vec<u8>, String)>,
    /// Request/reply pairs that answer any number of times.
    responses: HashMap<Vec<u8>, String>,
    pending: VecDeque<String>,
    sent: Vec<Vec<u8>>,
    writes: usize,
    reads: usize,
    fail_writes: usize,
    fail_reads: usize,
    read_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
}

/// A mock [`HostLink`] for testing without hardware.
///
/// A write is matched first against the next ordered expectation, then
/// against the repeatable responses. Unmatched writes are accepted while
/// login lines remain (the password); otherwise they fail with
/// [`Error::Protocol`] if expectations remain, or succeed silently so the
/// following read times out.
///
/// Sessions start disconnected. The first read or write connects them.
#[derive(Debug, Default)]
pub struct MockHost {
    sessions: Mutex<HashMap<SessionKey, MockSession>>,
}

fn terminated(body: &str) -> Vec<u8> {
    let mut line = body.as_bytes().to_vec();
    line.push(b'\r');
    line
}

impl MockHost {
    pub fn new() -> Self {
        MockHost::default()
    }

    fn with<T>(&self, key: &SessionKey, f: impl FnOnce(&mut MockSession) -> T) -> T {
        let mut sessions: MutexGuard<'_, _> =
            self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        f(sessions.entry(key.clone()).or_default())
    }

    /// Queue the lines a unit sends when a connection opens.
    pub fn login_script(&self, key: &SessionKey, lines: &[&str]) {
        self.with(key, |s| s.login.extend(lines.iter().map(|l| l.to_string())));
    }

    /// Expect `body` (without terminator) next and answer with `reply`.
    pub fn expect(&self, key: &SessionKey, body: &str, reply: &str) {
        self.with(key, |s| {
            s.expectations.push_back((terminated(body), reply.to_string()))
        });
    }

    /// Answer `body` (without terminator) with `reply` every time.
    pub fn respond(&self, key: &SessionKey, body: &str, reply: &str) {
        self.with(key, |s| {
            s.responses.insert(terminated(body), reply.to_string());
        });
    }

    /// Make the next `n` writes fail with [`Error::Transport`].
    pub fn fail_writes(&self, key: &SessionKey, n: usize) {
        self.with(key, |s| s.fail_writes = n);
    }

    /// Make the next `n` reads fail with [`Error::Transport`]. A pending
    /// reply is lost with each failure.
    pub fn fail_reads(&self, key: &SessionKey, n: usize) {
        self.with(key, |s| s.fail_reads = n);
    }

    /// Delay every read by `delay`.
    pub fn read_delay(&self, key: &SessionKey, delay: Duration) {
        self.with(key, |s| s.read_delay = delay);
    }

    pub fn set_connected(&self, key: &SessionKey, connected: bool) {
        self.with(key, |s| s.connected = connected);
    }

    pub fn set_protocol(&self, key: &SessionKey, protocol: ProtocolKind) {
        self.with(key, |s| s.protocol = protocol);
    }

    /// Every line written for the session, lossily decoded.
    pub fn sent(&self, key: &SessionKey) -> Vec<String> {
        self.with(key, |s| {
            s.sent
                .iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect()
        })
    }

    /// How many times `body` (without terminator) was written.
    pub fn sent_count(&self, key: &SessionKey, body: &str) -> usize {
        let line = terminated(body);
        self.with(key, |s| s.sent.iter().filter(|l| **l == line).count())
    }

    /// Write attempts, failed ones included.
    pub fn writes(&self, key: &SessionKey) -> usize {
        self.with(key, |s| s.writes)
    }

    /// Read attempts, failed ones included.
    pub fn reads(&self, key: &SessionKey) -> usize {
        self.with(key, |s| s.reads)
    }

    pub fn remaining_expectations(&self, key: &SessionKey) -> usize {
        self.with(key, |s| s.expectations.len())
    }

    /// Most commands ever written without their reply having been read.
    pub fn max_in_flight(&self, key: &SessionKey) -> usize {
        self.with(key, |s| s.max_in_flight)
    }
}

#[async_trait]
impl HostLink for MockHost {
    async fn read_line(&self, key: &SessionKey) -> Result<String> {
        let delay = self.with(key, |s| s.read_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.with(key, |s| {
            s.connected = true;
            s.reads += 1;

            if s.fail_reads > 0 {
                s.fail_reads -= 1;
                if s.pending.pop_front().is_some() {
                    s.in_flight = s.in_flight.saturating_sub(1);
                }
                return Err(Error::Transport("injected read failure".into()));
            }
            if let Some(reply) = s.pending.pop_front() {
                s.in_flight = s.in_flight.saturating_sub(1);
                return Ok(reply);
            }
            if let Some(line) = s.login.pop_front() {
                return Ok(line);
            }
            Err(Error::Transport("read timed out".into()))
        })
    }

    async fn write_line(&self, key: &SessionKey, line: &[u8]) -> Result<()> {
        self.with(key, |s| {
            s.connected = true;
            s.writes += 1;

            if s.fail_writes > 0 {
                s.fail_writes -= 1;
                return Err(Error::Transport("injected write failure".into()));
            }
            s.sent.push(line.to_vec());

            let reply = match s.expectations.front() {
                Some((request, _)) if request.as_slice() == line => {
                    s.expectations.pop_front().map(|(_, reply)| reply)
                }
                _ => s.responses.get(line).cloned(),
            };

            match reply {
                Some(reply) => {
                    s.pending.push_back(reply);
                    s.in_flight += 1;
                    s.max_in_flight = s.max_in_flight.max(s.in_flight);
                    Ok(())
                }
                None if !s.login.is_empty() => Ok(()),
                None => match s.expectations.front() {
                    Some((request, _)) => Err(Error::Protocol(format!(
                        "unexpected write: expected {:?}, got {:?}",
                        String::from_utf8_lossy(request),
                        String::from_utf8_lossy(line)
                    ))),
                    None => Ok(()),
                },
            }
        })
    }

    fn is_connected(&self, key: &SessionKey) -> bool {
        self.with(key, |s| s.connected)
    }

    fn protocol(&self, key: &SessionKey) -> ProtocolKind {
        self.with(key, |s| s.protocol)
    }

    fn close(&self, key: &SessionKey) {
        self.with(key, |s| {
            s.connected = false;
            s.pending.clear();
            s.in_flight = 0;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new("admin:pw@10.0.0.5")
    }

    #[tokio::test]
    async fn mock_host_basic_exchange() {
        let host = MockHost::new();
        host.expect(&key(), "Q", "1.23");

        assert!(!host.is_connected(&key()));
        host.write_line(&key(), b"Q\r").await.unwrap();
        assert_eq!(host.read_line(&key()).await.unwrap(), "1.23");
        assert!(host.is_connected(&key()));
        assert_eq!(host.remaining_expectations(&key()), 0);
    }

    #[tokio::test]
    async fn mock_host_login_lines_then_replies() {
        let host = MockHost::new();
        host.login_script(&key(), &["Password:", "Login Administrator"]);
        host.respond(&key(), "N", "60-1234-01");

        assert_eq!(host.read_line(&key()).await.unwrap(), "Password:");
        host.write_line(&key(), b"pw\r").await.unwrap();
        assert_eq!(host.read_line(&key()).await.unwrap(), "Login Administrator");
        host.write_line(&key(), b"N\r").await.unwrap();
        assert_eq!(host.read_line(&key()).await.unwrap(), "60-1234-01");
        assert_eq!(host.sent(&key()), vec!["pw\r", "N\r"]);
    }

    #[tokio::test]
    async fn mock_host_mismatch_is_an_error() {
        let host = MockHost::new();
        host.expect(&key(), "Q", "1.23");
        let err = host.write_line(&key(), b"N\r").await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn mock_host_unscripted_read_times_out() {
        let host = MockHost::new();
        host.write_line(&key(), b"Q\r").await.unwrap();
        let err = host.read_line(&key()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn mock_host_injected_failures() {
        let host = MockHost::new();
        host.respond(&key(), "Q", "1.23");
        host.fail_writes(&key(), 1);
        host.fail_reads(&key(), 1);

        assert!(host.write_line(&key(), b"Q\r").await.is_err());
        host.write_line(&key(), b"Q\r").await.unwrap();
        assert!(host.read_line(&key()).await.is_err());
        host.write_line(&key(), b"Q\r").await.unwrap();
        assert_eq!(host.read_line(&key()).await.unwrap(), "1.23");
        assert_eq!(host.writes(&key()), 3);
        assert_eq!(host.sent_count(&key(), "Q"), 2);
    }

    #[tokio::test]
    async fn mock_host_tracks_in_flight() {
        let host = MockHost::new();
        host.respond(&key(), "Q", "1.23");
        host.write_line(&key(), b"Q\r").await.unwrap();
        host.write_line(&key(), b"Q\r").await.unwrap();
        assert_eq!(host.max_in_flight(&key()), 2);
    }

    #[tokio::test]
    async fn mock_host_close_disconnects() {
        let host = MockHost::new();
        host.set_connected(&key(), true);
        host.close(&key());
        assert!(!host.is_connected(&key()));
    }

    #[tokio::test]
    async fn mock_host_protocol() {
        let host = MockHost::new();
        assert_eq!(host.protocol(&key()), ProtocolKind::Telnet);
        host.set_protocol(&key(), ProtocolKind::Ssh);
        assert_eq!(host.protocol(&key()), ProtocolKind::Ssh);
    }
}
