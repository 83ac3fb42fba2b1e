//! Command execution over a host link.
//!
//! [`Engine`] owns the session store and runs every command cycle:
//!
//! 1. take the session's command lock,
//! 2. log in if the host has no live connection,
//! 3. write one line and read one reply,
//! 4. release the lock.
//!
//! Transport-class failures repeat the cycle up to `max_attempts` times
//! with `retry_interval` between attempts. Device errors are final.
//!
//! After a successful request the session gets a keepalive poller, unless
//! polling is disabled. Pollers hold only a weak reference to the engine and
//! exit once it is dropped.

use std::sync::{Arc, Weak};

use sislib_core::{
    DeviceCategory, Diagnostics, Error, HostLink, ProtocolKind, Result, SessionKey,
};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::builder::EngineConfig;
use crate::commands::MODEL_DESCRIPTION;
use crate::login;
use crate::models;
use crate::protocol::{Reply, encode_command};
use crate::session::{Classification, LinkState, Session, SessionState, SessionStore};

struct EngineInner {
    host: Arc<dyn HostLink>,
    diagnostics: Arc<dyn Diagnostics>,
    config: EngineConfig,
    store: SessionStore,
}

/// SIS protocol engine.
///
/// Cheap to clone; clones share sessions and pollers.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub(crate) fn new(
        host: Arc<dyn HostLink>,
        diagnostics: Arc<dyn Diagnostics>,
        config: EngineConfig,
    ) -> Self {
        let store = SessionStore::new(config.keepalive);
        Engine {
            inner: Arc::new(EngineInner {
                host,
                diagnostics,
                config,
                store,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.store
    }

    pub(crate) fn session(&self, key: &SessionKey) -> Arc<Session> {
        self.inner.store.session(key)
    }

    pub(crate) fn record(&self, key: &SessionKey, message: &str) {
        self.inner.diagnostics.record_error(key, message);
    }

    fn is_ssh(&self, key: &SessionKey) -> bool {
        self.inner.host.protocol(key) == ProtocolKind::Ssh
    }

    // ---------------------------------------------------------------
    // Public operations
    // ---------------------------------------------------------------

    /// Send one raw command body and return the normalized reply.
    pub async fn send_command(&self, key: &SessionKey, body: &str) -> Result<Reply> {
        let session = self.session(key);
        let reply = self.execute(&session, body).await?;
        self.ensure_keepalive(&session);
        Ok(reply)
    }

    /// Category of the unit behind `key`, querying it on first use.
    pub async fn device_category(&self, key: &SessionKey) -> Result<DeviceCategory> {
        let session = self.session(key);
        let category = self.category(&session).await?;
        self.ensure_keepalive(&session);
        Ok(category)
    }

    /// Cached classification, without touching the unit.
    pub fn cached_classification(&self, key: &SessionKey) -> Option<Classification> {
        self.inner
            .store
            .get(key)
            .and_then(|s| s.classification().cloned())
    }

    /// Model name from the login banner, logging in if needed.
    pub async fn device_model(&self, key: &SessionKey) -> Result<String> {
        let session = self.session(key);
        self.model(&session).await
    }

    pub async fn link_state(&self, key: &SessionKey) -> LinkState {
        match self.inner.store.get(key) {
            Some(session) => session.link_state().await,
            None => LinkState::Disconnected,
        }
    }

    /// Stop the poller for one session. The next command restarts it.
    pub fn stop_keepalive(&self, key: &SessionKey) -> bool {
        self.inner.store.stop_poller(key)
    }

    /// Stop every poller and keep them off until [`restart_keepalive`].
    ///
    /// [`restart_keepalive`]: Engine::restart_keepalive
    pub fn stop_all_keepalive(&self) -> usize {
        let count = self.inner.store.stop_all_pollers();
        info!(count, "keepalive polling stopped");
        count
    }

    /// Allow pollers again. Each session's poller starts with its next
    /// command; no connection is reopened.
    pub fn restart_keepalive(&self) {
        self.inner.store.enable_polling();
        info!("keepalive polling re-enabled");
    }

    /// The host tore down the connection for `key`.
    ///
    /// Stops the poller and forgets the session's caches.
    pub fn connection_closed(&self, key: &SessionKey) {
        if self.inner.store.remove(key) {
            info!(session = %key, "session closed");
        }
    }

    // ---------------------------------------------------------------
    // Command cycle
    // ---------------------------------------------------------------

    /// Run one command cycle with retry.
    pub(crate) async fn execute(&self, session: &Session, body: &str) -> Result<Reply> {
        let key = session.key();
        let line = encode_command(body);
        let max_attempts = self.inner.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.round_trip(session, &line).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    warn!(session = %key, attempt, error = %e, "command attempt failed");
                    if attempt >= max_attempts {
                        error!(session = %key, attempts = attempt, "max retries reached");
                        self.record(key, &format!("max retries reached: {e}"));
                        return Err(Error::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    tokio::time::sleep(self.inner.config.retry_interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn round_trip(&self, session: &Session, line: &[u8]) -> Result<Reply> {
        let key = session.key();
        let host = &self.inner.host;
        let mut state = session.lock().await;

        self.ensure_ready(key, &mut state).await?;

        if let Err(e) = host.write_line(key, line).await {
            state.link = LinkState::Disconnected;
            return Err(e);
        }
        let raw = match host.read_line(key).await {
            Ok(raw) => raw,
            Err(e) => {
                state.link = LinkState::Disconnected;
                return Err(e);
            }
        };
        drop(state);

        let reply = Reply::parse(&raw, self.is_ssh(key));
        debug!(
            session = %key,
            command = %String::from_utf8_lossy(line).escape_debug(),
            reply = %reply.text(),
            "round trip"
        );
        if let Some(fault) = reply.fault() {
            self.record(key, &format!("device returned error: {fault}"));
        }
        Ok(reply)
    }

    /// Bring the session to [`LinkState::Ready`]. Runs under the command lock.
    async fn ensure_ready(&self, key: &SessionKey, state: &mut SessionState) -> Result<()> {
        let host = &self.inner.host;

        if host.is_connected(key) {
            state.link = LinkState::Ready;
            return Ok(());
        }
        if self.is_ssh(key) {
            state.link = LinkState::Ready;
            return Ok(());
        }

        state.link = LinkState::Negotiating;
        let result = login::negotiate(
            host.as_ref(),
            self.inner.diagnostics.as_ref(),
            key,
            self.inner.config.max_login_lines,
            state.model.is_some(),
        )
        .await;

        match result {
            Ok(outcome) => {
                if outcome.model.is_some() {
                    state.model = outcome.model;
                }
                state.link = LinkState::Ready;
                Ok(())
            }
            Err(e) => {
                state.link = LinkState::Disconnected;
                host.close(key);
                self.record(key, &format!("error logging in: {e}"));
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------
    // Cached identity
    // ---------------------------------------------------------------

    /// Category for the session. Concurrent first callers share one query.
    pub(crate) async fn category(&self, session: &Session) -> Result<DeviceCategory> {
        let classification = session
            .classification_cell()
            .get_or_try_init(|| async {
                let description = self.execute(session, MODEL_DESCRIPTION).await?.into_text()?;
                let category = models::classify(&description);
                info!(
                    session = %session.key(),
                    description = %description,
                    category = %category,
                    "device classified"
                );
                Ok::<_, Error>(Classification {
                    category,
                    description,
                })
            })
            .await?;
        Ok(classification.category)
    }

    /// Model name for the session.
    pub(crate) async fn model(&self, session: &Session) -> Result<String> {
        let mut state = session.lock().await;
        if state.model.is_none() {
            self.ensure_ready(session.key(), &mut state).await?;
        }
        state
            .model
            .clone()
            .ok_or_else(|| Error::Unsupported("model name not found in cache".into()))
    }

    // ---------------------------------------------------------------
    // Keepalive
    // ---------------------------------------------------------------

    /// Start the session's poller if it is allowed and not yet running.
    ///
    /// Nothing starts for a session that `connection_closed` has removed.
    pub(crate) fn ensure_keepalive(&self, session: &Arc<Session>) {
        let key = session.key();
        if self.inner.config.ssh_per_command_session && self.is_ssh(key) {
            return;
        }
        let engine = Arc::downgrade(&self.inner);
        let interval = self.inner.config.keepalive_interval;
        let poll_key = key.clone();
        self.inner.store.start_poller(session, move |cancel| {
            tokio::spawn(keepalive_loop(engine, poll_key, interval, cancel))
        });
    }

    async fn keepalive_once(&self, key: &SessionKey) {
        let Some(session) = self.inner.store.get(key) else {
            return;
        };
        match self.execute(&session, &self.inner.config.keepalive_command).await {
            Ok(reply) if reply.text().is_empty() || reply.is_fault() => {
                warn!(session = %key, reply = %reply.text(), "keepalive got an unexpected reply");
                self.record(
                    key,
                    &format!("keepalive failed: unexpected reply '{}'", reply.text()),
                );
            }
            Ok(reply) => debug!(session = %key, reply = %reply.text(), "keepalive ok"),
            Err(e) => {
                warn!(session = %key, error = %e, "keepalive failed");
                self.record(key, &format!("keepalive failed: {e}"));
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .finish()
    }
}

/// Poll one session until cancelled or the engine is dropped.
async fn keepalive_loop(
    engine: Weak<EngineInner>,
    key: SessionKey,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(session = %key, "keepalive cancelled");
                break;
            }

            _ = ticker.tick() => {
                let Some(inner) = engine.upgrade() else {
                    debug!(session = %key, "engine dropped, keepalive exiting");
                    break;
                };
                Engine { inner }.keepalive_once(&key).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::builder::EngineBuilder;
    use sislib_test_harness::{MockHost, RecordingDiagnostics};

    const BANNER: &str =
        "(c) Copyright 2020, Extron Electronics, DTP CrossPoint 84, V1.04, 60-1234-01";

    struct Fixture {
        host: Arc<MockHost>,
        diag: Arc<RecordingDiagnostics>,
        engine: Engine,
        key: SessionKey,
    }

    fn fixture(builder: EngineBuilder) -> Fixture {
        let host = Arc::new(MockHost::new());
        let diag = Arc::new(RecordingDiagnostics::new());
        let engine = builder
            .retry_interval(Duration::from_millis(1))
            .diagnostics(diag.clone())
            .build_with_host(host.clone())
            .unwrap();
        Fixture {
            host,
            diag,
            engine,
            key: SessionKey::new("admin:pw@10.0.0.5"),
        }
    }

    fn quiet() -> EngineBuilder {
        EngineBuilder::new().keepalive(false)
    }

    // ---------------------------------------------------------------
    // Retry
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn one_failure_then_success_takes_two_attempts() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "Q", "1.23");
        f.host.fail_writes(&f.key, 1);

        let reply = f.engine.send_command(&f.key, "Q").await.unwrap();
        assert_eq!(reply.text(), "1.23");
        assert_eq!(f.host.writes(&f.key), 2);
    }

    #[tokio::test]
    async fn persistent_failure_stops_after_two_attempts() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.fail_writes(&f.key, 100);

        let err = f.engine.send_command(&f.key, "Q").await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(err.wire_text(), sislib_core::UNKNOWN_SENTINEL);
        assert_eq!(f.host.writes(&f.key), 2);
        assert!(f.diag.contains(&f.key, "max retries reached"));
    }

    #[tokio::test]
    async fn lost_reply_is_retried() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "N", "60-1234-01");
        f.host.fail_reads(&f.key, 1);

        let reply = f.engine.send_command(&f.key, "N").await.unwrap();
        assert_eq!(reply.text(), "60-1234-01");
        assert_eq!(f.host.sent_count(&f.key, "N"), 2);
    }

    #[tokio::test]
    async fn device_error_is_not_retried() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "99*1!", "E01");

        let reply = f.engine.send_command(&f.key, "99*1!").await.unwrap();
        assert!(reply.is_fault());
        assert_eq!(f.host.writes(&f.key), 1);
        assert!(f.diag.contains(&f.key, "E01"));
    }

    #[tokio::test]
    async fn configured_attempts_are_honoured() {
        let f = fixture(quiet().max_attempts(4));
        f.host.set_connected(&f.key, true);
        f.host.fail_writes(&f.key, 100);

        let err = f.engine.send_command(&f.key, "Q").await.unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { attempts: 4, .. }));
    }

    // ---------------------------------------------------------------
    // Login
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn first_command_logs_in() {
        let f = fixture(quiet());
        f.host.login_script(&f.key, &[BANNER, "Password:", "Login Administrator"]);
        f.host.respond(&f.key, "Q", "1.23");

        f.engine.send_command(&f.key, "Q").await.unwrap();
        assert_eq!(f.host.sent(&f.key), vec!["pw\r", "Q\r"]);
        assert_eq!(f.engine.link_state(&f.key).await, LinkState::Ready);
        assert_eq!(f.engine.device_model(&f.key).await.unwrap(), "DTP CrossPoint 84");
    }

    #[tokio::test]
    async fn second_command_skips_login() {
        let f = fixture(quiet());
        f.host.login_script(&f.key, &[BANNER, "Password:", "Login Administrator"]);
        f.host.respond(&f.key, "Q", "1.23");

        f.engine.send_command(&f.key, "Q").await.unwrap();
        f.engine.send_command(&f.key, "Q").await.unwrap();
        assert_eq!(f.host.sent(&f.key), vec!["pw\r", "Q\r", "Q\r"]);
    }

    #[tokio::test]
    async fn ssh_skips_negotiation_and_keeps_last_line() {
        let f = fixture(quiet());
        f.host.set_protocol(&f.key, ProtocolKind::Ssh);
        f.host.respond(&f.key, "Q", "Q\r\n1.23\r\n");

        let reply = f.engine.send_command(&f.key, "Q").await.unwrap();
        assert_eq!(reply.text(), "1.23");
        assert_eq!(f.host.sent(&f.key), vec!["Q\r"]);
    }

    #[tokio::test]
    async fn failed_login_is_retried_then_reported() {
        let f = fixture(quiet());
        f.host.login_script(&f.key, &["x"; 7]);

        let err = f.engine.send_command(&f.key, "Q").await.unwrap_err();
        match err {
            Error::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(last.is_retryable());
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert!(f.diag.contains(&f.key, "error logging in"));
        assert_eq!(f.engine.link_state(&f.key).await, LinkState::Disconnected);
    }

    #[tokio::test]
    async fn model_missing_without_banner() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        let err = f.engine.device_model(&f.key).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    // ---------------------------------------------------------------
    // Classification
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn classification_is_queried_once() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "2I", "DTP CrossPoint 84 Matrix Switcher");

        let a = f.engine.device_category(&f.key).await.unwrap();
        let b = f.engine.device_category(&f.key).await.unwrap();
        assert_eq!(a, DeviceCategory::MatrixSwitcher);
        assert_eq!(a, b);
        assert_eq!(f.host.sent_count(&f.key, "2I"), 1);
        let cached = f.engine.cached_classification(&f.key).unwrap();
        assert_eq!(cached.description, "DTP CrossPoint 84 Matrix Switcher");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_users_share_one_query() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "2I", "DMP 128 Plus");
        f.host.read_delay(&f.key, Duration::from_millis(5));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = f.engine.clone();
            let key = f.key.clone();
            tasks.push(tokio::spawn(async move { engine.device_category(&key).await }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), DeviceCategory::AudioProcessor);
        }
        assert_eq!(f.host.sent_count(&f.key, "2I"), 1);
    }

    #[tokio::test]
    async fn failed_classification_is_not_cached() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.fail_writes(&f.key, 2);
        f.host.respond(&f.key, "2I", "HDMI Switcher");

        assert!(f.engine.device_category(&f.key).await.is_err());
        assert!(f.engine.cached_classification(&f.key).is_none());
        assert_eq!(
            f.engine.device_category(&f.key).await.unwrap(),
            DeviceCategory::Switcher
        );
    }

    // ---------------------------------------------------------------
    // Serialization
    // ---------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_command_in_flight_per_session() {
        let f = fixture(quiet());
        f.host.set_connected(&f.key, true);
        f.host.read_delay(&f.key, Duration::from_millis(2));
        for i in 1..=16 {
            f.host.respond(&f.key, &format!("\x1b{i}NI"), &format!("Input {i}"));
        }

        let mut tasks = Vec::new();
        for i in 1..=16 {
            let engine = f.engine.clone();
            let key = f.key.clone();
            tasks.push(tokio::spawn(async move {
                let reply = engine.send_command(&key, &format!("\x1b{i}NI")).await.unwrap();
                (i, reply.text().to_string())
            }));
        }
        for t in tasks {
            let (i, text) = t.await.unwrap();
            assert_eq!(text, format!("Input {i}"));
        }
        assert_eq!(f.host.max_in_flight(&f.key), 1);
    }

    // ---------------------------------------------------------------
    // Keepalive
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn keepalive_starts_after_success() {
        let f = fixture(EngineBuilder::new().keepalive_interval(Duration::from_millis(10)));
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "Q", "1.23");

        f.engine.send_command(&f.key, "Q").await.unwrap();
        assert!(f.engine.sessions().has_poller(&f.key));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(f.host.sent_count(&f.key, "Q") >= 2);
        f.engine.stop_all_keepalive();
    }

    #[tokio::test]
    async fn keepalive_not_started_after_failure() {
        let f = fixture(EngineBuilder::new());
        f.host.set_connected(&f.key, true);
        f.host.fail_writes(&f.key, 100);

        assert!(f.engine.send_command(&f.key, "Q").await.is_err());
        assert!(!f.engine.sessions().has_poller(&f.key));
    }

    #[tokio::test]
    async fn keepalive_records_error_replies() {
        let f = fixture(EngineBuilder::new().keepalive_interval(Duration::from_millis(10)));
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "N", "60-1234-01");
        f.host.respond(&f.key, "Q", "E10");

        f.engine.send_command(&f.key, "N").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        f.engine.stop_all_keepalive();
        assert!(f.diag.contains(&f.key, "keepalive failed"));
    }

    #[tokio::test]
    async fn stop_all_then_restart() {
        let f = fixture(EngineBuilder::new());
        let other = SessionKey::new("admin:pw@10.0.0.6");
        for k in [&f.key, &other] {
            f.host.set_connected(k, true);
            f.host.respond(k, "Q", "1.23");
            f.engine.send_command(k, "Q").await.unwrap();
        }
        assert_eq!(f.engine.sessions().poller_count(), 2);

        assert_eq!(f.engine.stop_all_keepalive(), 2);
        f.engine.send_command(&f.key, "Q").await.unwrap();
        assert_eq!(f.engine.sessions().poller_count(), 0);

        f.engine.restart_keepalive();
        assert_eq!(f.engine.sessions().poller_count(), 0);
        f.engine.send_command(&f.key, "Q").await.unwrap();
        assert!(f.engine.sessions().has_poller(&f.key));
        f.engine.stop_all_keepalive();
    }

    #[tokio::test]
    async fn stop_one_session() {
        let f = fixture(EngineBuilder::new());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "Q", "1.23");
        f.engine.send_command(&f.key, "Q").await.unwrap();

        assert!(f.engine.stop_keepalive(&f.key));
        assert!(!f.engine.sessions().has_poller(&f.key));
        assert!(!f.engine.stop_keepalive(&f.key));
    }

    #[tokio::test]
    async fn ssh_per_command_sessions_have_no_poller() {
        let f = fixture(EngineBuilder::new().ssh_per_command_session(true));
        f.host.set_protocol(&f.key, ProtocolKind::Ssh);
        f.host.respond(&f.key, "Q", "1.23");

        f.engine.send_command(&f.key, "Q").await.unwrap();
        assert!(!f.engine.sessions().has_poller(&f.key));
    }

    #[tokio::test]
    async fn connection_closed_clears_session() {
        let f = fixture(EngineBuilder::new());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "2I", "HDMI Distribution Amplifier");
        f.engine.device_category(&f.key).await.unwrap();
        assert!(f.engine.sessions().has_poller(&f.key));

        f.engine.connection_closed(&f.key);
        assert!(!f.engine.sessions().has_poller(&f.key));
        assert!(f.engine.cached_classification(&f.key).is_none());

        f.engine.device_category(&f.key).await.unwrap();
        assert_eq!(f.host.sent_count(&f.key, "2I"), 2);
        f.engine.stop_all_keepalive();
    }

    #[tokio::test]
    async fn close_during_command_leaves_no_poller() {
        let f = fixture(EngineBuilder::new());
        f.host.set_connected(&f.key, true);
        f.host.respond(&f.key, "Q", "1.23");
        f.host.read_delay(&f.key, Duration::from_millis(50));

        let engine = f.engine.clone();
        let key = f.key.clone();
        let command = tokio::spawn(async move { engine.send_command(&key, "Q").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.engine.connection_closed(&f.key);

        assert_eq!(command.await.unwrap().unwrap().text(), "1.23");
        assert!(!f.engine.sessions().has_poller(&f.key));
        assert!(f.engine.sessions().get(&f.key).is_none());
    }
}
