//! In-process Electrum server for tests.
//!
//! [`MockConnector`] hands out `tokio::io::duplex` sockets. The far end of
//! each socket is served by a task that answers requests through a
//! [`Responder`] and can push notifications or drop the connection on
//! command.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::transport::{BoxedSocket, Connector};

// ============================================================================
// Types
// ============================================================================

/// Maps `(method, params)` to a response body (`{"result": ..}` or
/// `{"error": ..}`). `None` leaves the request unanswered.
pub(crate) type Responder = Arc<dyn Fn(&str, &Value) -> Option<Value> + Send + Sync>;

/// Commands for a served connection.
enum ServerCommand {
    Push(Value),
    Drop,
}

// ============================================================================
// MockConnector
// ============================================================================

/// Connector backed by in-memory sockets.
pub(crate) struct MockConnector {
    responder: Responder,
    accept: AtomicBool,
    attempts: AtomicUsize,
    refused_hosts: Mutex<Vec<String>>,
    dialed: Mutex<Vec<String>>,
    live: Mutex<Vec<ServerHandle>>,
    servers: mpsc::UnboundedSender<ServerHandle>,
}

impl MockConnector {
    /// Accepting connector; each new connection's handle is sent on the receiver.
    pub fn new(responder: Responder) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerHandle>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            responder,
            accept: AtomicBool::new(true),
            attempts: AtomicUsize::new(0),
            refused_hosts: Mutex::new(Vec::new()),
            dialed: Mutex::new(Vec::new()),
            live: Mutex::new(Vec::new()),
            servers,
        });
        (connector, rx)
    }

    /// Connector that refuses every attempt.
    pub fn refusing() -> Arc<Self> {
        let (connector, _) = Self::new(electrumx());
        connector.set_accept(false);
        connector
    }

    pub fn set_accept(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Refuses connections to `host` only.
    pub fn refuse_host(&self, host: &str) {
        self.refused_hosts.lock().push(host.to_string());
    }

    /// Hosts dialed so far, in order.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, server: &ServerConfig) -> Result<BoxedSocket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.dialed.lock().push(server.host.clone());

        if !self.accept.load(Ordering::SeqCst) || self.refused_hosts.lock().contains(&server.host) {
            return Err(Error::connection(format!("{server}: connection refused")));
        }

        let (client, far_end) = tokio::io::duplex(256 * 1024);
        let handle = ServerHandle::serve(far_end, Arc::clone(&self.responder));
        self.live.lock().push(handle.clone());
        let _ = self.servers.send(handle);

        Ok(Box::new(client))
    }
}

// ============================================================================
// ServerHandle
// ============================================================================

/// Controls one served connection.
#[derive(Clone)]
pub(crate) struct ServerHandle {
    commands: mpsc::UnboundedSender<ServerCommand>,
    methods: Arc<Mutex<Vec<String>>>,
}

impl ServerHandle {
    fn serve(stream: DuplexStream, responder: Responder) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let methods = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(run_server(stream, responder, command_rx, Arc::clone(&methods)));

        Self { commands, methods }
    }

    /// Pushes a notification to the client.
    pub fn notify(&self, method: &str, params: Value) {
        let _ = self
            .commands
            .send(ServerCommand::Push(json!({"jsonrpc": "2.0", "method": method, "params": params})));
    }

    /// Closes the connection from the server side.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(ServerCommand::Drop);
    }

    /// Methods received so far, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.methods.lock().clone()
    }

    /// Number of received requests for `method`.
    pub fn count(&self, method: &str) -> usize {
        self.methods.lock().iter().filter(|m| *m == method).count()
    }
}

async fn run_server(
    stream: DuplexStream,
    responder: Responder,
    mut command_rx: mpsc::UnboundedReceiver<ServerCommand>,
    methods: Arc<Mutex<Vec<String>>>,
) {
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(frame) = serde_json::from_str::<Value>(&line) else { continue };

                let reply = match frame {
                    Value::Array(requests) => {
                        let replies: Vec<Value> = requests
                            .iter()
                            .filter_map(|r| answer(r, &responder, &methods))
                            .collect();
                        (!replies.is_empty()).then(|| Value::Array(replies))
                    }
                    request => answer(&request, &responder, &methods),
                };

                if let Some(reply) = reply
                    && write.write_all(format!("{reply}\n").as_bytes()).await.is_err()
                {
                    break;
                }
            }
            command = command_rx.recv() => match command {
                Some(ServerCommand::Push(message)) => {
                    if write.write_all(format!("{message}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Drop) | None => break,
            }
        }
    }
}

fn answer(request: &Value, responder: &Responder, methods: &Mutex<Vec<String>>) -> Option<Value> {
    let method = request["method"].as_str()?;
    methods.lock().push(method.to_string());

    let mut body = responder(method, &request["params"])?;
    body["jsonrpc"] = json!("2.0");
    body["id"] = request["id"].clone();
    Some(body)
}

// ============================================================================
// Responders
// ============================================================================

/// Answers like a well-behaved ElectrumX server.
///
/// Script hashes starting with `"bad"` get a server error for every query.
pub(crate) fn electrumx() -> Responder {
    Arc::new(|method, params| {
        let first = params.get(0).and_then(Value::as_str).unwrap_or_default();
        if first.starts_with("bad") {
            return Some(json!({"error": {"code": 1, "message": format!("unknown {first}")}}));
        }

        let result = match method {
            "server.version" => json!(["ElectrumX 1.16.0", "1.4"]),
            "server.ping" => Value::Null,
            "server.banner" => json!("Welcome"),
            "blockchain.headers.subscribe" => json!({"height": 800_000, "hex": "00"}),
            "blockchain.scripthash.subscribe" => json!(format!("status-{first}")),
            "blockchain.scripthash.get_balance" => {
                json!({"confirmed": first.len() * 1000, "unconfirmed": 0})
            }
            "blockchain.scripthash.get_history" => json!([
                {"height": 100, "tx_hash": format!("{first}-h1")},
                {"height": 101, "tx_hash": format!("{first}-h2")}
            ]),
            "blockchain.scripthash.get_mempool" => {
                json!([{"height": 0, "tx_hash": format!("{first}-m1"), "fee": 200}])
            }
            "blockchain.scripthash.listunspent" => json!([
                {"height": 100, "tx_hash": format!("{first}-h1"), "tx_pos": 0, "value": 5000}
            ]),
            "blockchain.transaction.get" => {
                if params.get(1).and_then(Value::as_bool).unwrap_or(false) {
                    json!({"txid": first, "confirmations": 6, "hex": format!("raw-{first}")})
                } else {
                    json!(format!("raw-{first}"))
                }
            }
            "blockchain.estimatefee" => json!(0.0001),
            _ => return Some(json!({"error": {"code": -32601, "message": "unknown method"}})),
        };

        Some(json!({"result": result}))
    })
}

/// Like [`electrumx`], but never answers `method`.
pub(crate) fn silent_on(method: &'static str) -> Responder {
    let inner = electrumx();
    Arc::new(move |m, params| if m == method { None } else { inner(m, params) })
}
