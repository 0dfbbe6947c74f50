//! Request dispatcher.
//!
//! Turns the transport's fire-and-forget frames into call/response
//! semantics for one connection.
//!
//! # Correlation
//!
//! Every call gets a fresh numeric id and a pending entry holding a
//! oneshot sender. A reader task consumes decoded messages from the
//! transport:
//!
//! - responses resolve the pending entry with the same id (arrival order
//!   does not matter)
//! - responses for unknown ids are logged and dropped
//! - notifications go to the [`SubscriptionRouter`]
//!
//! When the transport closes, every pending entry is rejected with
//! [`Error::ConnectionClosed`] and the table refuses new entries.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Incoming, Request, Response};
use crate::transport::{InboundReceiver, Transport};

use super::router::SubscriptionRouter;

// ============================================================================
// Types
// ============================================================================

/// A call awaiting its response.
struct PendingRequest {
    /// Method name, for diagnostics.
    method: String,
    /// When the request was issued.
    issued_at: Instant,
    /// Resolves the caller.
    response_tx: oneshot::Sender<Result<Value>>,
}

/// Pending request table.
#[derive(Default)]
struct PendingTable {
    /// Entries by request id.
    entries: FxHashMap<RequestId, PendingRequest>,
    /// Set once the connection is gone; no further entries are accepted.
    closed: bool,
}

/// Dispatcher behaviour switches.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchOptions {
    /// Default per-call timeout.
    pub call_timeout: Option<Duration>,
    /// Close the transport when a call times out.
    pub teardown_on_timeout: bool,
    /// Send `call_batch` as one JSON array.
    pub batch_requests: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            call_timeout: None,
            teardown_on_timeout: false,
            batch_requests: true,
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Call/response layer over one [`Transport`].
pub struct Dispatcher {
    /// Underlying transport.
    transport: Transport,
    /// Pending request table (shared with the reader task).
    pending: Arc<Mutex<PendingTable>>,
    /// Last issued request id.
    next_id: AtomicU64,
    /// Time of the last completed round trip (shared with the reader task).
    last_activity: Arc<Mutex<Instant>>,
    /// Behaviour switches.
    options: DispatchOptions,
    /// Cancelled once the pending table has been drained after close.
    closed: CancellationToken,
}

impl Dispatcher {
    /// Wraps `transport` and spawns the reader task over `inbound`.
    pub(crate) fn new(
        transport: Transport,
        inbound: InboundReceiver,
        router: Arc<SubscriptionRouter>,
        options: DispatchOptions,
    ) -> Self {
        let pending = Arc::new(Mutex::new(PendingTable::default()));
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let closed = CancellationToken::new();

        tokio::spawn(Self::run_reader(
            inbound,
            Arc::clone(&pending),
            router,
            Arc::clone(&last_activity),
            closed.clone(),
        ));

        Self {
            transport,
            pending,
            next_id: AtomicU64::new(0),
            last_activity,
            options,
            closed,
        }
    }

    /// Calls `method` and waits for its result using the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection drops first
    /// - [`Error::Server`] if the server answers with an error
    /// - [`Error::RequestTimeout`] if the call timeout elapses
    /// - [`Error::Write`] if the transport is already closed
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.options.call_timeout)
            .await
    }

    /// Calls `method` with an explicit timeout (`None` waits forever).
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        call_timeout: Option<Duration>,
    ) -> Result<Value> {
        let (request, response_rx) = self.register(method, params)?;
        let request_id = request.id;

        if let Err(e) = self.transport.send_json(&request) {
            self.forget(request_id);
            return Err(e);
        }

        trace!(%request_id, method, "Request sent");
        self.await_response(request_id, response_rx, call_timeout)
            .await
    }

    /// Calls `method` once per parameter set.
    ///
    /// With batching enabled all requests go out as one JSON array;
    /// otherwise they are sent individually and awaited concurrently.
    /// Output order always matches `param_sets` order.
    pub async fn call_batch(&self, method: &str, param_sets: Vec<Value>) -> Vec<Result<Value>> {
        if param_sets.is_empty() {
            return Vec::new();
        }

        if !self.options.batch_requests {
            return join_all(param_sets.into_iter().map(|params| self.call(method, params))).await;
        }

        let mut requests = Vec::with_capacity(param_sets.len());
        let mut receivers = Vec::with_capacity(param_sets.len());
        for params in param_sets {
            match self.register(method, params) {
                Ok((request, rx)) => {
                    receivers.push(Ok((request.id, rx)));
                    requests.push(request);
                }
                Err(e) => receivers.push(Err(e)),
            }
        }

        if !requests.is_empty()
            && let Err(e) = self.transport.send_json(&requests)
        {
            warn!(method, count = requests.len(), error = %e, "Batch write failed");
            for request in &requests {
                self.forget(request.id);
            }

            let message = match e {
                Error::Write { message } => message,
                other => other.to_string(),
            };
            return receivers
                .into_iter()
                .map(|entry| entry.and_then(|_| Err(Error::write(message.clone()))))
                .collect();
        }

        debug!(method, count = requests.len(), "Batch sent");

        join_all(receivers.into_iter().map(|entry| async move {
            let (request_id, rx) = entry?;
            self.await_response(request_id, rx, self.options.call_timeout)
                .await
        }))
        .await
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Returns the time of the last completed round trip.
    #[inline]
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Returns how long the connection has been idle.
    #[inline]
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// Returns `true` once the connection is gone and pending calls were rejected.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Waits until the connection is gone and pending calls were rejected.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Closes the transport. Pending calls are rejected by the reader task.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Allocates an id and records the pending entry.
    fn register(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(Request, oneshot::Receiver<Result<Value>>)> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(Error::ConnectionClosed);
        }

        let id = RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (response_tx, response_rx) = oneshot::channel();
        pending.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                issued_at: Instant::now(),
                response_tx,
            },
        );

        Ok((Request::new(id, method, params), response_rx))
    }

    /// Drops a pending entry without resolving it.
    fn forget(&self, request_id: RequestId) {
        self.pending.lock().entries.remove(&request_id);
    }

    /// Waits for the reader task to resolve `request_id`.
    async fn await_response(
        &self,
        request_id: RequestId,
        response_rx: oneshot::Receiver<Result<Value>>,
        call_timeout: Option<Duration>,
    ) -> Result<Value> {
        let Some(limit) = call_timeout else {
            return response_rx.await.unwrap_or(Err(Error::ConnectionClosed));
        };

        match timeout(limit, response_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.forget(request_id);
                warn!(%request_id, timeout_ms = limit.as_millis() as u64, "Request timed out");

                if self.options.teardown_on_timeout {
                    self.close();
                }

                Err(Error::request_timeout(request_id, limit.as_millis() as u64))
            }
        }
    }

    /// Reader task: demultiplexes inbound messages until the transport closes.
    async fn run_reader(
        mut inbound: InboundReceiver,
        pending: Arc<Mutex<PendingTable>>,
        router: Arc<SubscriptionRouter>,
        last_activity: Arc<Mutex<Instant>>,
        closed: CancellationToken,
    ) {
        while let Some(message) = inbound.recv().await {
            match message {
                Incoming::Response(response) => {
                    Self::resolve(response, &pending, &last_activity);
                }
                Incoming::Notification(notification) => {
                    trace!(method = %notification.method, "Notification received");
                    router.dispatch(&notification);
                }
            }
        }

        Self::fail_pending_requests(&pending);
        closed.cancel();

        debug!("Dispatcher reader terminated");
    }

    /// Resolves the pending entry matching `response.id`.
    fn resolve(
        response: Response,
        pending: &Arc<Mutex<PendingTable>>,
        last_activity: &Arc<Mutex<Instant>>,
    ) {
        let entry = pending.lock().entries.remove(&response.id);

        let Some(entry) = entry else {
            warn!(id = %response.id, "Response for unknown request");
            return;
        };

        *last_activity.lock() = Instant::now();
        trace!(
            id = %response.id,
            method = %entry.method,
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "Response received"
        );

        let _ = entry.response_tx.send(response.into_result());
    }

    /// Rejects all pending requests with [`Error::ConnectionClosed`].
    fn fail_pending_requests(pending: &Arc<Mutex<PendingTable>>) {
        let drained: Vec<_> = {
            let mut table = pending.lock();
            table.closed = true;
            table.entries.drain().collect()
        };
        let count = drained.len();

        for (_, entry) in drained {
            let _ = entry.response_tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::io::Lines;

    use crate::protocol::Notification;

    /// Server side of an in-memory connection.
    struct Peer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        write: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn request(&mut self) -> Value {
            let line = self.lines.next_line().await.expect("read").expect("line");
            serde_json::from_str(&line).expect("json")
        }

        async fn send(&mut self, value: Value) {
            self.write
                .write_all(format!("{value}\n").as_bytes())
                .await
                .expect("write");
        }
    }

    fn pair(options: DispatchOptions) -> (Arc<Dispatcher>, Peer, Arc<SubscriptionRouter>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (transport, inbound) = Transport::open(Box::new(client));
        let router = Arc::new(SubscriptionRouter::new());
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            inbound,
            Arc::clone(&router),
            options,
        ));

        let (read, write) = tokio::io::split(server);
        let peer = Peer {
            lines: BufReader::new(read).lines(),
            write,
        };

        (dispatcher, peer, router)
    }

    #[tokio::test]
    async fn test_batch_write_failure_reports_write_error() {
        let (client, _server) = tokio::io::duplex(1024);
        let (transport, _socket_inbound) = Transport::open(Box::new(client));
        // Reader fed by a channel that stays open, so the pending table does.
        let (_inbound_tx, inbound) = tokio::sync::mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            transport.clone(),
            inbound,
            Arc::new(SubscriptionRouter::new()),
            DispatchOptions::default(),
        );

        transport.close();
        transport.closed().await;

        let results = dispatcher
            .call_batch("blockchain.scripthash.get_balance", vec![json!(["a"]), json!(["b"])])
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(Error::Write { .. }))));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions::default());

        let call = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move { d.call("server.banner", json!([])).await }
        });

        let request = peer.request().await;
        assert_eq!(request["method"], "server.banner");
        assert_eq!(request["jsonrpc"], "2.0");
        peer.send(json!({"id": request["id"], "result": "Welcome"})).await;

        assert_eq!(call.await.expect("join").expect("ok"), json!("Welcome"));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions::default());

        let mut calls = Vec::new();
        for n in 0..3 {
            let d = Arc::clone(&dispatcher);
            calls.push(tokio::spawn(async move {
                d.call("blockchain.estimatefee", json!([n])).await
            }));
        }

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(peer.request().await);
        }

        // Answer in reverse; each result echoes the request's own param.
        for request in requests.iter().rev() {
            peer.send(json!({"id": request["id"], "result": request["params"][0]}))
                .await;
        }

        for (n, call) in calls.into_iter().enumerate() {
            assert_eq!(call.await.expect("join").expect("ok"), json!(n));
        }
    }

    #[tokio::test]
    async fn test_server_error_is_tagged() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions::default());

        let call = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move { d.call("blockchain.transaction.broadcast", json!(["00"])).await }
        });

        let request = peer.request().await;
        peer.send(json!({"id": request["id"], "error": {"code": 1, "message": "bad tx"}}))
            .await;

        let err = call.await.expect("join").expect_err("server error");
        assert!(matches!(err, Error::Server { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let (dispatcher, mut peer, router) = pair(DispatchOptions::default());
        let routed = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&routed);
        router.subscribe("server.ping", move |_: &Notification| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let call = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move { d.call("server.ping", json!([])).await }
        });

        let request = peer.request().await;
        peer.send(json!({"id": 999, "result": "stray"})).await;
        peer.send(json!({"id": request["id"], "result": null})).await;

        assert_eq!(call.await.expect("join").expect("ok"), Value::Null);
        assert_eq!(routed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notifications_are_routed() {
        let (_dispatcher, mut peer, router) = pair(DispatchOptions::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        router.subscribe("blockchain.scripthash.subscribe", move |n: &Notification| {
            let _ = tx.send(n.clone());
            Ok(())
        });

        peer.send(json!({
            "jsonrpc": "2.0",
            "method": "blockchain.scripthash.subscribe",
            "params": ["abcd", "status"]
        }))
        .await;

        let notification = rx.recv().await.expect("routed");
        assert_eq!(notification.first_str(), Some("abcd"));
    }

    #[tokio::test]
    async fn test_close_rejects_all_pending_once() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions::default());

        let mut calls = Vec::new();
        for _ in 0..3 {
            let d = Arc::clone(&dispatcher);
            calls.push(tokio::spawn(async move {
                d.call("blockchain.headers.subscribe", json!([])).await
            }));
        }
        for _ in 0..3 {
            peer.request().await;
        }

        drop(peer);

        for call in calls {
            let result = call.await.expect("join");
            assert!(matches!(result, Err(Error::ConnectionClosed)));
        }

        dispatcher.closed().await;
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(matches!(
            dispatcher.call("server.ping", json!([])).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_removes_pending() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions {
            call_timeout: Some(Duration::from_secs(30)),
            ..DispatchOptions::default()
        });

        let call = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move { d.call("server.banner", json!([])).await }
        });
        let request = peer.request().await;

        let err = call.await.expect("join").expect_err("timeout");
        assert!(matches!(err, Error::RequestTimeout { timeout_ms: 30_000, .. }));
        assert_eq!(dispatcher.pending_count(), 0);

        // A late answer is treated as unknown and does not disturb the connection.
        peer.send(json!({"id": request["id"], "result": "late"})).await;
        assert!(!dispatcher.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_teardown_closes_connection() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions {
            call_timeout: Some(Duration::from_secs(5)),
            teardown_on_timeout: true,
            ..DispatchOptions::default()
        });

        let call = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move { d.call("server.banner", json!([])).await }
        });
        peer.request().await;

        assert!(call.await.expect("join").is_err());
        dispatcher.closed().await;
        assert!(dispatcher.is_closed());
    }

    #[tokio::test]
    async fn test_batch_uses_single_array_frame() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions::default());

        let batch = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move {
                d.call_batch(
                    "blockchain.scripthash.get_balance",
                    vec![json!(["a"]), json!(["b"]), json!(["c"])],
                )
                .await
            }
        });

        let frame = peer.request().await;
        let requests = frame.as_array().expect("batch array");
        assert_eq!(requests.len(), 3);

        // Reply out of order, fail the middle one.
        peer.send(json!([
            {"id": requests[2]["id"], "result": {"confirmed": 3}},
            {"id": requests[1]["id"], "error": {"code": 2, "message": "nope"}},
            {"id": requests[0]["id"], "result": {"confirmed": 1}}
        ]))
        .await;

        let results = batch.await.expect("join");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().expect("a")["confirmed"], 1);
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().expect("c")["confirmed"], 3);
    }

    #[tokio::test]
    async fn test_batch_degrades_to_individual_calls() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions {
            batch_requests: false,
            ..DispatchOptions::default()
        });

        let batch = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move {
                d.call_batch("blockchain.transaction.get", vec![json!(["t1"]), json!(["t2"])])
                    .await
            }
        });

        let first = peer.request().await;
        let second = peer.request().await;
        assert!(first.is_object() && second.is_object());

        peer.send(json!({"id": second["id"], "result": second["params"][0]})).await;
        peer.send(json!({"id": first["id"], "result": first["params"][0]})).await;

        let results = batch.await.expect("join");
        assert_eq!(results[0].as_ref().expect("t1"), &json!("t1"));
        assert_eq!(results[1].as_ref().expect("t2"), &json!("t2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_updates_last_activity() {
        let (dispatcher, mut peer, _) = pair(DispatchOptions::default());
        let before = dispatcher.last_activity();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(dispatcher.idle_for() >= Duration::from_secs(3));

        let call = tokio::spawn({
            let d = Arc::clone(&dispatcher);
            async move { d.call("server.ping", json!([])).await }
        });
        let request = peer.request().await;
        peer.send(json!({"id": request["id"], "result": null})).await;
        call.await.expect("join").expect("ok");

        assert!(dispatcher.last_activity() > before);
        assert!(dispatcher.idle_for() < Duration::from_secs(1));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Whatever order the server answers in, every caller gets its own result.
        #[test]
        fn prop_any_response_order_resolves_correct_caller(
            order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            runtime.block_on(async move {
                let (dispatcher, mut peer, _) = pair(DispatchOptions::default());

                let calls: Vec<_> = (0..order.len())
                    .map(|n| {
                        let d = Arc::clone(&dispatcher);
                        tokio::spawn(async move { d.call("blockchain.block.header", json!([n])).await })
                    })
                    .collect();

                let mut requests = Vec::new();
                for _ in 0..order.len() {
                    requests.push(peer.request().await);
                }
                for &i in &order {
                    let r = &requests[i];
                    peer.send(json!({"id": r["id"], "result": r["params"][0]})).await;
                }

                for (n, call) in calls.into_iter().enumerate() {
                    let result = call.await.expect("join").expect("ok");
                    assert_eq!(result, json!(n));
                }
            });
        }
    }
}
