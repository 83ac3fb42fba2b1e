//! EngineBuilder -- fluent builder for constructing [`Engine`] instances.
//!
//! Separates configuration from construction so that callers can set retry,
//! login, and keepalive policy before handing over a host link.
//!
//! # Example
//!
//! ```no_run
//! use sislib_extron::builder::EngineBuilder;
//! use std::time::Duration;
//!
//! # fn example() -> sislib_core::Result<()> {
//! let engine = EngineBuilder::new()
//!     .retry_interval(Duration::from_millis(500))
//!     .keepalive_interval(Duration::from_secs(60))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use sislib_core::{Diagnostics, Error, HostLink, Result, TracingDiagnostics};
use sislib_transport::TcpHost;

use crate::engine::Engine;

/// Engine policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Attempts per command cycle, first try included.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Start keepalive pollers automatically.
    pub keepalive: bool,
    pub keepalive_interval: Duration,
    /// Idempotent query sent by the poller.
    pub keepalive_command: String,
    /// Lines read during login before giving up.
    pub max_login_lines: usize,
    /// The host opens a fresh SSH session for every command, so pollers
    /// are pointless for SSH keys.
    pub ssh_per_command_session: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_attempts: 2,
            retry_interval: Duration::from_secs(1),
            keepalive: true,
            keepalive_interval: Duration::from_secs(30),
            keepalive_command: "Q".to_string(),
            max_login_lines: 7,
            ssh_per_command_session: false,
        }
    }
}

/// Fluent builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    diagnostics: Option<Arc<dyn Diagnostics>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            diagnostics: None,
        }
    }

    /// Set the number of attempts per command cycle (default: 2).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    /// Set the pause between attempts (default: 1s).
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval = interval;
        self
    }

    /// Enable or disable automatic keepalive pollers (default: enabled).
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.config.keepalive = enabled;
        self
    }

    /// Set the keepalive period (default: 30s).
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Set the keepalive query (default: `Q`, firmware version).
    pub fn keepalive_command(mut self, command: &str) -> Self {
        self.config.keepalive_command = command.to_string();
        self
    }

    /// Set the login line budget (default: 7).
    pub fn max_login_lines(mut self, n: usize) -> Self {
        self.config.max_login_lines = n;
        self
    }

    pub fn ssh_per_command_session(mut self, enabled: bool) -> Self {
        self.config.ssh_per_command_session = enabled;
        self
    }

    /// Route per-session error records somewhere other than `tracing`.
    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build an [`Engine`] over a caller-provided host link.
    ///
    /// This is the entry point for tests (pass a `MockHost` from
    /// `sislib-test-harness`) and for hosts that own their sockets.
    pub fn build_with_host(self, host: Arc<dyn HostLink>) -> Result<Engine> {
        if self.config.max_attempts == 0 {
            return Err(Error::Argument("max_attempts must be at least 1".into()));
        }
        if self.config.max_login_lines == 0 {
            return Err(Error::Argument("max_login_lines must be at least 1".into()));
        }
        if self.config.keepalive && self.config.keepalive_interval.is_zero() {
            return Err(Error::Argument("keepalive_interval must be non-zero".into()));
        }
        if self.config.keepalive_command.is_empty() {
            return Err(Error::Argument("keepalive_command must not be empty".into()));
        }
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(TracingDiagnostics));
        Ok(Engine::new(host, diagnostics, self.config))
    }

    /// Build an [`Engine`] over a default TCP/telnet host.
    pub fn build(self) -> Result<Engine> {
        self.build_with_host(Arc::new(TcpHost::new()))
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder::new()
    }
}
