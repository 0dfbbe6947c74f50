//! Connection lifecycle manager.
//!
//! [`ElectrumClient`] is the user-facing handle. A supervisor task owns the
//! connection and is the only writer of [`ConnectionState`]:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!       ^             |             |
//!       |   (retry)   v             v
//!       +------- Disconnected <-----+   (drop / ping timeout)
//!                     |
//!                     v  (budget spent)
//!                 Exhausted
//!
//! any state --close()--> Closing (terminal)
//! ```
//!
//! While connected, the supervisor probes idle connections with
//! `server.ping` and tears the connection down when the probe times out.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};

use crate::config::{ClientBuilder, ClientSettings};
use crate::error::{Error, Result};
use crate::identifiers::SubscriptionId;
use crate::protocol::method::{self, is_subscription};
use crate::protocol::Notification;
use crate::transport::Transport;

use super::dispatcher::{DispatchOptions, Dispatcher};
use super::router::SubscriptionRouter;
use super::types::ServerVersion;

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection state of an [`ElectrumClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection; a retry may be scheduled.
    Disconnected,
    /// Dialing and handshaking.
    Connecting,
    /// Handshake done; calls are accepted.
    Connected,
    /// Closed by the caller. Terminal.
    Closing,
    /// Retry budget spent. Terminal until [`ElectrumClient::resume`].
    Exhausted,
}

impl ConnectionState {
    /// Lowercase state name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Exhausted => "exhausted",
        }
    }

    /// Returns `true` if no automatic transition can leave this state.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Exhausted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Types
// ============================================================================

/// A server-side subscription to re-issue after reconnect.
#[derive(Debug, Clone, PartialEq)]
struct ServerSubscription {
    method: String,
    params: Value,
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Connection lost or keep-alive failed.
    Dropped,
    /// `close()` was called.
    Shutdown,
}

/// Shared client state.
pub(crate) struct ClientInner {
    /// Validated configuration.
    settings: ClientSettings,
    /// Remaining reconnect budget (`None` = unlimited).
    retries_left: Mutex<Option<u32>>,
    /// Current state.
    state: watch::Sender<ConnectionState>,
    /// Live connection, if any.
    session: RwLock<Option<Arc<Dispatcher>>>,
    /// Notification handlers; survive reconnects.
    router: Arc<SubscriptionRouter>,
    /// Server-side subscriptions made so far.
    server_subscriptions: Mutex<Vec<ServerSubscription>>,
    /// Cancelled by `close()` or when the last handle is dropped.
    shutdown: CancellationToken,
    /// Result of the latest handshake.
    server_version: Mutex<Option<ServerVersion>>,
    /// Set while a supervisor task is alive.
    supervisor_running: AtomicBool,
}

// ============================================================================
// ElectrumClient
// ============================================================================

/// Handle to one Electrum server connection.
///
/// Cheap to clone. When the last handle is dropped the connection is
/// closed and reconnecting stops.
///
/// # Example
///
/// ```no_run
/// # use electrum_sync::{ElectrumClient, Notification};
/// # async fn example() -> electrum_sync::Result<()> {
/// let client = ElectrumClient::builder()
///     .server_url("ssl://electrum.blockstream.info:50002")
///     .build()?;
///
/// client.connect().await?;
///
/// client.on_notification("blockchain.headers.subscribe", |n: &Notification| {
///     println!("new tip: {:?}", n.param(0));
///     Ok(())
/// });
///
/// let banner = client.call("server.banner", serde_json::json!([])).await?;
/// client.close();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ElectrumClient {
    /// Shared state (also held by the supervisor).
    pub(crate) inner: Arc<ClientInner>,
    /// Cancels `shutdown` when the last handle goes away.
    _guard: Arc<DropGuard>,
}

impl fmt::Debug for ElectrumClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElectrumClient")
            .field("server", &self.inner.settings.server)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ElectrumClient - Constructor
// ============================================================================

impl ElectrumClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a disconnected client from validated settings.
    pub(crate) fn from_settings(settings: ClientSettings) -> Self {
        let shutdown = CancellationToken::new();
        let guard = shutdown.clone().drop_guard();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let inner = ClientInner {
            retries_left: Mutex::new(settings.policy.max_retry),
            settings,
            state,
            session: RwLock::new(None),
            router: Arc::new(SubscriptionRouter::new()),
            server_subscriptions: Mutex::new(Vec::new()),
            shutdown,
            server_version: Mutex::new(None),
            supervisor_running: AtomicBool::new(false),
        };

        Self {
            inner: Arc::new(inner),
            _guard: Arc::new(guard),
        }
    }
}

// ============================================================================
// ElectrumClient - Lifecycle
// ============================================================================

impl ElectrumClient {
    /// Connects and performs the `server.version` handshake.
    ///
    /// Resolves with the outcome of the first attempt. If it fails, the
    /// retry policy keeps running in the background. If a connection is
    /// already being established, waits until it is connected or terminal.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] / [`Error::Server`] / [`Error::RequestTimeout`]
    ///   if the first attempt fails
    /// - [`Error::Exhausted`] if the retry budget is spent
    /// - [`Error::NotConnected`] if the client was closed
    pub async fn connect(&self) -> Result<ServerVersion> {
        match self.state() {
            ConnectionState::Closing => {
                return Err(Error::not_connected(ConnectionState::Closing));
            }
            ConnectionState::Exhausted => return Err(Error::Exhausted),
            ConnectionState::Connected => {
                if let Some(version) = self.server_version() {
                    return Ok(version);
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        if !self.inner.claim_supervisor()? {
            return self.wait_until_settled().await;
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(&self.inner).supervise(Some(outcome_tx)));

        outcome_rx
            .await
            .unwrap_or(Err(Error::not_connected(ConnectionState::Closing)))
    }

    /// Re-arms an exhausted client with a new retry budget and reconnects.
    ///
    /// `None` allows unlimited retries.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the client is not exhausted
    /// - any [`connect`](Self::connect) error
    pub async fn resume(&self, max_retry: Option<u32>) -> Result<ServerVersion> {
        {
            let mut retries_left = self.inner.retries_left.lock();
            let state = self.state();
            if state != ConnectionState::Exhausted {
                return Err(Error::not_connected(state));
            }

            *retries_left = max_retry;
            self.inner.set_state(ConnectionState::Disconnected);
        }
        info!(server = %self.inner.settings.server, ?max_retry, "Resuming exhausted client");

        self.connect().await
    }

    /// Closes the connection and permanently disables reconnecting.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        self.inner.shutdown.cancel();
        self.inner.set_state(ConnectionState::Closing);

        if let Some(session) = self.inner.session.write().take() {
            session.close();
        }

        info!(server = %self.inner.settings.server, "Client closed");
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Returns `true` while connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribes to state changes.
    #[inline]
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Returns the latest handshake result.
    #[inline]
    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.inner.server_version.lock().clone()
    }

    /// Returns the remaining retry budget (`None` = unlimited).
    #[inline]
    #[must_use]
    pub fn retries_left(&self) -> Option<u32> {
        *self.inner.retries_left.lock()
    }

    /// Waits until connected, or fails once the client becomes terminal.
    async fn wait_until_settled(&self) -> Result<ServerVersion> {
        let mut changes = self.state_changes();

        loop {
            let state = *changes.borrow_and_update();
            match state {
                ConnectionState::Connected => {
                    if let Some(version) = self.server_version() {
                        return Ok(version);
                    }
                }
                ConnectionState::Exhausted => return Err(Error::Exhausted),
                ConnectionState::Closing => return Err(Error::not_connected(state)),
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }

            changes
                .changed()
                .await
                .map_err(|_| Error::not_connected(ConnectionState::Closing))?;
        }
    }
}

// ============================================================================
// ElectrumClient - Calls
// ============================================================================

impl ElectrumClient {
    /// Calls `method` on the live connection.
    ///
    /// `*.subscribe` calls are remembered when sent, forgotten again if they
    /// fail, and re-issued after reconnect.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if there is no live connection
    /// - any [`Dispatcher::call`] error
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let session = self.session()?;

        let tracked = is_subscription(method)
            .then(|| params.clone())
            .filter(|params| self.inner.track_subscription(method, params.clone()));

        let result = session.call(method, params).await;

        if result.is_err()
            && let Some(params) = &tracked
        {
            self.forget_subscription(method, params);
        }

        result
    }

    /// Calls `method` once per parameter set, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if there is no live connection;
    /// per-item failures are reported in the returned vector.
    pub async fn call_batch(&self, method: &str, param_sets: Vec<Value>) -> Result<Vec<Result<Value>>> {
        let session = self.session()?;
        Ok(session.call_batch(method, param_sets).await)
    }

    /// Returns the live connection.
    fn session(&self) -> Result<Arc<Dispatcher>> {
        self.inner
            .session
            .read()
            .clone()
            .ok_or_else(|| Error::not_connected(self.state()))
    }
}

// ============================================================================
// ElectrumClient - Notifications
// ============================================================================

impl ElectrumClient {
    /// Registers a notification handler for `method`.
    ///
    /// Registrations survive reconnects. This does not issue a server-side
    /// subscription; see [`subscribe_headers`](Self::subscribe_headers) and
    /// [`subscribe_scripthash`](Self::subscribe_scripthash).
    pub fn on_notification<F>(&self, method: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.router.subscribe(method, handler)
    }

    /// Removes one notification handler.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.router.unsubscribe(id)
    }

    /// Returns the notification router.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &SubscriptionRouter {
        &self.inner.router
    }

    /// Stops re-issuing a server subscription after reconnect.
    pub(crate) fn forget_subscription(&self, method: &str, params: &Value) {
        self.inner
            .server_subscriptions
            .lock()
            .retain(|s| !(s.method == method && &s.params == params));
    }
}

// ============================================================================
// Supervisor
// ============================================================================

impl ClientInner {
    /// Applies a state change. `Closing` is never left.
    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closing || *state == next {
                return false;
            }
            *state = next;
            true
        });

        if changed {
            debug!(server = %self.settings.server, state = %next, "Connection state changed");
        }
    }

    /// Claims the supervisor slot. Returns `false` if a supervisor is already running.
    ///
    /// Runs under the `retries_left` lock, which also guards the move into
    /// and out of `Exhausted`.
    fn claim_supervisor(&self) -> Result<bool> {
        let _budget = self.retries_left.lock();
        let state = *self.state.borrow();

        match state {
            ConnectionState::Closing => Err(Error::not_connected(state)),
            ConnectionState::Exhausted => Err(Error::Exhausted),
            _ => Ok(!self.supervisor_running.swap(true, Ordering::AcqRel)),
        }
    }

    /// Consumes one retry. When the budget is spent, moves to `Exhausted` and
    /// releases the supervisor slot in one step, returning `false`.
    fn take_retry(&self) -> bool {
        let mut left = self.retries_left.lock();
        match left.as_mut() {
            None => true,
            Some(0) => {
                self.set_state(ConnectionState::Exhausted);
                self.supervisor_running.store(false, Ordering::Release);
                false
            }
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }

    /// Remembers a server subscription. Returns `false` if it was already known.
    fn track_subscription(&self, method: &str, params: Value) -> bool {
        let subscription = ServerSubscription {
            method: method.to_string(),
            params,
        };

        let mut subscriptions = self.server_subscriptions.lock();
        if subscriptions.contains(&subscription) {
            return false;
        }
        subscriptions.push(subscription);
        true
    }

    fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            call_timeout: self.settings.timing.call_timeout,
            teardown_on_timeout: self.settings.timing.teardown_on_call_timeout,
            batch_requests: self.settings.batch_requests,
        }
    }

    /// Supervisor task: connect, keep alive, retry until closed or exhausted.
    async fn supervise(
        self: Arc<Self>,
        mut first_outcome: Option<oneshot::Sender<Result<ServerVersion>>>,
    ) {
        let server = self.settings.server.clone();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Connecting);

            let attempt = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                attempt = self.establish() => attempt,
            };

            match attempt {
                Ok((session, version)) => {
                    *self.session.write() = Some(Arc::clone(&session));
                    *self.server_version.lock() = Some(version.clone());
                    self.set_state(ConnectionState::Connected);
                    info!(%server, software = %version.software, protocol = %version.protocol, "Connected");

                    if let Some(tx) = first_outcome.take() {
                        let _ = tx.send(Ok(version));
                    }

                    if self.settings.resubscribe_on_reconnect {
                        let subscriptions = self.server_subscriptions.lock().clone();
                        if !subscriptions.is_empty() {
                            tokio::spawn(Self::restore_subscriptions(
                                Arc::clone(&session),
                                Arc::clone(&self.router),
                                subscriptions,
                            ));
                        }
                    }

                    let end = self.run_connected(&session).await;
                    self.session.write().take();
                    session.close();

                    if end == SessionEnd::Shutdown {
                        break;
                    }
                    warn!(%server, "Connection lost");
                }
                Err(e) => {
                    warn!(%server, error = %e, "Connection attempt failed");
                    if let Some(tx) = first_outcome.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }

            if self.shutdown.is_cancelled() {
                break;
            }

            self.set_state(ConnectionState::Disconnected);

            if !self.take_retry() {
                info!(%server, "Reconnect attempts exhausted");
                if let Some(on_exhausted) = &self.settings.policy.on_exhausted {
                    on_exhausted();
                }
                // The slot was released with the move to `Exhausted`; a
                // resumed supervisor may already own it.
                return;
            }

            debug!(
                %server,
                retries_left = ?*self.retries_left.lock(),
                delay_ms = self.settings.timing.retry_delay.as_millis() as u64,
                "Scheduling reconnect"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.settings.timing.retry_delay) => {}
            }
        }

        self.supervisor_running.store(false, Ordering::Release);
        debug!(%server, "Supervisor terminated");
    }

    /// Opens a transport and performs the handshake.
    async fn establish(&self) -> Result<(Arc<Dispatcher>, ServerVersion)> {
        let (transport, inbound) =
            Transport::connect(self.settings.connector.as_ref(), &self.settings.server).await?;

        let session = Arc::new(Dispatcher::new(
            transport,
            inbound,
            Arc::clone(&self.router),
            self.dispatch_options(),
        ));

        let timing = self.settings.timing;
        let client = &self.settings.client_info;
        let handshake = session
            .call_with_timeout(
                method::server::VERSION,
                json!([client.client_name, client.protocol_version]),
                Some(timing.call_timeout.unwrap_or(timing.ping_timeout)),
            )
            .await
            .and_then(ServerVersion::from_value);

        match handshake {
            Ok(version) => Ok((session, version)),
            Err(e) => {
                session.close();
                Err(e)
            }
        }
    }

    /// Keep-alive loop for one connected session.
    async fn run_connected(&self, session: &Dispatcher) -> SessionEnd {
        let timing = self.settings.timing;
        let mut keepalive = interval_at(
            Instant::now() + timing.keepalive_interval,
            timing.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return SessionEnd::Shutdown,
                _ = session.closed() => return SessionEnd::Dropped,
                _ = keepalive.tick() => {
                    if session.idle_for() <= timing.keepalive_idle {
                        continue;
                    }

                    trace!(server = %self.settings.server, "Sending keep-alive ping");
                    let ping = session.call_with_timeout(
                        method::server::PING,
                        json!([]),
                        Some(timing.ping_timeout),
                    );

                    let outcome = tokio::select! {
                        _ = self.shutdown.cancelled() => return SessionEnd::Shutdown,
                        outcome = ping => outcome,
                    };

                    match outcome {
                        Ok(_) | Err(Error::Server { .. }) => {}
                        Err(Error::RequestTimeout { timeout_ms, .. }) => {
                            let e = Error::timeout(method::server::PING, timeout_ms);
                            warn!(server = %self.settings.server, error = %e, "Keep-alive failed");
                            return SessionEnd::Dropped;
                        }
                        Err(e) => debug!(error = %e, "Keep-alive ping failed"),
                    }
                }
            }
        }
    }

    /// Re-issues server subscriptions on a fresh connection.
    ///
    /// Each subscribe result is the current status, so it is routed like a
    /// notification: params are the original params followed by the result.
    async fn restore_subscriptions(
        session: Arc<Dispatcher>,
        router: Arc<SubscriptionRouter>,
        subscriptions: Vec<ServerSubscription>,
    ) {
        debug!(count = subscriptions.len(), "Restoring server subscriptions");

        for subscription in subscriptions {
            match session
                .call(&subscription.method, subscription.params.clone())
                .await
            {
                Ok(status) => {
                    let mut params = match subscription.params {
                        Value::Array(params) => params,
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    params.push(status);
                    router.dispatch(&Notification::new(subscription.method, Value::Array(params)));
                }
                Err(e) => {
                    warn!(method = %subscription.method, error = %e, "Failed to restore subscription");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
