//! Client configuration values.
//!
//! Provides the immutable configuration consumed when a client is built:
//! which server to dial, how to identify in the handshake, how hard to try
//! to stay connected, and the timers that drive keep-alive and retry.
//!
//! # Example
//!
//! ```ignore
//! use electrum_sync::{PersistencePolicy, ServerConfig, Timing};
//!
//! let server = ServerConfig::parse("ssl://electrum.blockstream.info:50002")?;
//! let policy = PersistencePolicy::new()
//!     .with_max_retry(5)
//!     .on_exhausted(|| eprintln!("giving up"));
//! let timing = Timing::default().with_call_timeout(None);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::{Host, Url};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default reconnect budget.
const DEFAULT_MAX_RETRY: u32 = 1000;

/// Default handshake client name.
const DEFAULT_CLIENT_NAME: &str = "electrum-sync";

/// Default requested protocol version.
const DEFAULT_PROTOCOL_VERSION: &str = "1.4";

// ============================================================================
// Protocol
// ============================================================================

/// Socket flavour for a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Protocol {
    /// Plain TCP.
    Tcp,
    /// TLS over TCP.
    #[default]
    Tls,
}

impl Protocol {
    /// URL scheme used when displaying an endpoint.
    #[inline]
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tls => "ssl",
        }
    }

    /// Conventional port for the protocol.
    #[inline]
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Tcp => 50001,
            Self::Tls => 50002,
        }
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

/// One Electrum server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerConfig {
    /// Host name or IP address.
    pub host: String,

    /// TCP port.
    pub port: u16,

    /// Plain or TLS.
    pub protocol: Protocol,

    /// Skip certificate verification (self-signed servers).
    pub accept_invalid_certs: bool,
}

impl ServerConfig {
    /// Creates an endpoint.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            accept_invalid_certs: false,
        }
    }

    /// Creates a plain TCP endpoint.
    #[inline]
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Tcp)
    }

    /// Creates a TLS endpoint.
    #[inline]
    #[must_use]
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, Protocol::Tls)
    }

    /// Parses `tcp://host:port`, `ssl://host:port` or `tls://host:port`.
    ///
    /// The port defaults to the protocol's conventional port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for unparseable URLs, unknown schemes or a
    /// missing host.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::config(format!("{input}: {e}")))?;

        let protocol = match url.scheme() {
            "tcp" => Protocol::Tcp,
            "ssl" | "tls" => Protocol::Tls,
            other => {
                return Err(Error::config(format!(
                    "{input}: unsupported scheme '{other}' (expected tcp, ssl or tls)"
                )));
            }
        };

        // IPv6 literals are stored without brackets, ready for dialing.
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(Error::config(format!("{input}: missing host"))),
        };
        let port = url.port().unwrap_or_else(|| protocol.default_port());

        Ok(Self::new(host, port, protocol))
    }

    /// Disables certificate verification.
    #[inline]
    #[must_use]
    pub fn with_accept_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }

    /// Returns `true` for TLS endpoints.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.protocol == Protocol::Tls
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.protocol.scheme(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.protocol.scheme(), self.host, self.port)
        }
    }
}

// ============================================================================
// ClientInfo
// ============================================================================

/// Identity sent in the `server.version` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client software name.
    pub client_name: String,

    /// Requested protocol version.
    pub protocol_version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
        }
    }
}

impl ClientInfo {
    /// Creates handshake info.
    #[inline]
    #[must_use]
    pub fn new(client_name: impl Into<String>, protocol_version: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            protocol_version: protocol_version.into(),
        }
    }
}

// ============================================================================
// PersistencePolicy
// ============================================================================

/// Callback invoked once when the reconnect budget runs out.
pub type ExhaustedCallback = Arc<dyn Fn() + Send + Sync>;

/// How many automatic reconnects to attempt and what to do after.
#[derive(Clone)]
pub struct PersistencePolicy {
    /// Reconnect budget; `None` retries forever.
    pub max_retry: Option<u32>,

    /// Invoked once on exhaustion.
    pub on_exhausted: Option<ExhaustedCallback>,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            max_retry: Some(DEFAULT_MAX_RETRY),
            on_exhausted: None,
        }
    }
}

impl fmt::Debug for PersistencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistencePolicy")
            .field("max_retry", &self.max_retry)
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}

impl PersistencePolicy {
    /// Creates the default policy.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that never gives up.
    #[inline]
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_retry: None,
            on_exhausted: None,
        }
    }

    /// Sets the reconnect budget.
    #[inline]
    #[must_use]
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = Some(max_retry);
        self
    }

    /// Sets the exhaustion callback.
    #[inline]
    #[must_use]
    pub fn on_exhausted<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Arc::new(callback));
        self
    }
}

// ============================================================================
// Timing
// ============================================================================

/// Timers driving retry, keep-alive and per-call timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Flat delay before each reconnect attempt.
    pub retry_delay: Duration,

    /// How often the keep-alive check runs.
    pub keepalive_interval: Duration,

    /// Idle time after which the check sends a ping.
    pub keepalive_idle: Duration,

    /// Time a keep-alive ping may take before the connection is declared dead.
    pub ping_timeout: Duration,

    /// Per-call timeout; `None` waits forever.
    pub call_timeout: Option<Duration>,

    /// Close the connection when an ordinary call times out.
    pub teardown_on_call_timeout: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(5),
            keepalive_idle: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(9),
            call_timeout: Some(Duration::from_secs(30)),
            teardown_on_call_timeout: false,
        }
    }
}

impl Timing {
    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets keep-alive interval and idle threshold.
    #[inline]
    #[must_use]
    pub fn with_keepalive(mut self, interval: Duration, idle: Duration) -> Self {
        self.keepalive_interval = interval;
        self.keepalive_idle = idle;
        self
    }

    /// Sets the keep-alive ping timeout.
    #[inline]
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the per-call timeout.
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Close the connection when a call times out.
    #[inline]
    #[must_use]
    pub fn with_teardown_on_call_timeout(mut self, teardown: bool) -> Self {
        self.teardown_on_call_timeout = teardown;
        self
    }

    /// Checks that every timer is non-zero.
    pub(crate) fn validate(&self) -> Result<()> {
        let zero = [
            ("keepalive_interval", self.keepalive_interval),
            ("ping_timeout", self.ping_timeout),
        ]
        .into_iter()
        .find(|(_, d)| d.is_zero());

        if let Some((name, _)) = zero {
            return Err(Error::config(format!("{name} must be greater than zero")));
        }

        if self.call_timeout.is_some_and(|d| d.is_zero()) {
            return Err(Error::config("call_timeout must be greater than zero"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ssl_url() {
        let server = ServerConfig::parse("ssl://electrum.example.org:50002").expect("parse");
        assert_eq!(server.host, "electrum.example.org");
        assert_eq!(server.port, 50002);
        assert_eq!(server.protocol, Protocol::Tls);
        assert!(server.is_secure());
    }

    #[test]
    fn test_parse_default_port() {
        let server = ServerConfig::parse("tcp://10.0.0.1").expect("parse");
        assert_eq!(server.port, 50001);
        assert_eq!(server.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_parse_ipv6_host_without_brackets() {
        let server = ServerConfig::parse("tcp://[::1]:50001").expect("parse");
        assert_eq!(server.host, "::1");
        assert_eq!(server.port, 50001);
        assert_eq!(server.to_string(), "tcp://[::1]:50001");
        assert_eq!(ServerConfig::parse(&server.to_string()).expect("parse"), server);
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        assert!(matches!(
            ServerConfig::parse("http://example.org:80"),
            Err(Error::Config { .. })
        ));
        assert!(ServerConfig::parse("not a url").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let server = ServerConfig::tls("electrum.example.org", 995);
        assert_eq!(server.to_string(), "ssl://electrum.example.org:995");
        assert_eq!(ServerConfig::parse(&server.to_string()).expect("parse"), server);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = PersistencePolicy::default();
        assert_eq!(policy.max_retry, Some(1000));
        assert!(policy.on_exhausted.is_none());

        let policy = PersistencePolicy::unlimited().on_exhausted(|| {});
        assert_eq!(policy.max_retry, None);
        assert!(policy.on_exhausted.is_some());
    }

    #[test]
    fn test_timing_defaults() {
        let timing = Timing::default();
        assert_eq!(timing.retry_delay, Duration::from_secs(1));
        assert_eq!(timing.keepalive_interval, Duration::from_secs(5));
        assert_eq!(timing.keepalive_idle, Duration::from_secs(5));
        assert_eq!(timing.ping_timeout, Duration::from_secs(9));
        assert_eq!(timing.call_timeout, Some(Duration::from_secs(30)));
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_timing_rejects_zero() {
        let timing = Timing::default().with_ping_timeout(Duration::ZERO);
        assert!(timing.validate().is_err());

        let timing = Timing::default().with_call_timeout(Some(Duration::ZERO));
        assert!(timing.validate().is_err());
    }
}
