//! Host link and diagnostics traits.
//!
//! The engine never owns a socket. The hosting process keeps one connection
//! per [`SessionKey`] and exposes line-level access to it through
//! [`HostLink`]. Implementations exist for TCP/telnet (`sislib-transport`)
//! and for deterministic testing (`MockHost` in `sislib-test-harness`).

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ProtocolKind, SessionKey};

/// Line-oriented access to the host's connection for a session.
///
/// Read and write timeouts are the implementation's concern; the engine
/// treats any `Err` from [`read_line`](HostLink::read_line) or
/// [`write_line`](HostLink::write_line) as a transport failure.
#[async_trait]
pub trait HostLink: Send + Sync {
    /// Read one line from the session's connection, without its terminator.
    async fn read_line(&self, key: &SessionKey) -> Result<String>;

    /// Write one already-terminated command line to the session's connection.
    async fn write_line(&self, key: &SessionKey, line: &[u8]) -> Result<()>;

    /// Whether the host currently holds a live connection for the session.
    fn is_connected(&self, key: &SessionKey) -> bool;

    /// The wire protocol used for the session.
    fn protocol(&self, key: &SessionKey) -> ProtocolKind;

    /// Drop the session's connection so the next read or write opens a new
    /// one. Hosts that cannot do this keep the default no-op.
    fn close(&self, _key: &SessionKey) {}
}

/// Per-session error record kept by the host.
///
/// Diagnostics never influence control flow.
pub trait Diagnostics: Send + Sync {
    fn record_error(&self, key: &SessionKey, message: &str);
}

/// Diagnostics sink that forwards every record to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record_error(&self, key: &SessionKey, message: &str) {
        tracing::warn!(session = %key, "{message}");
    }
}
