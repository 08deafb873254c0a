//! Runtime configuration shared by clients and servers.
//!
//! Values come from three places, highest precedence first: explicit
//! `with_*` calls (CLI flags), `RINGRPC_*` environment variables, defaults.

use std::str::FromStr;
use std::time::Duration;

use crate::protocol::error::{Result, RingrpcError};

/// Default port a server binds to.
pub const DEFAULT_SERVER_PORT: u16 = 19998;

/// Default maximum frame body size (8 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Runtime settings for a ringrpc client or server.
///
/// # Example
///
/// ```
/// use ringrpc_common::RuntimeConfig;
/// use std::time::Duration;
///
/// let config = RuntimeConfig::new()
///     .with_call_timeout(Duration::from_secs(2))
///     .with_serializer("msgpack");
/// assert_eq!(config.call_timeout.as_secs(), 2);
/// assert_eq!(config.compressor, "gzip");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Coordination store endpoint
    pub registry_address: String,
    pub server_port: u16,
    /// Upper bound on establishing a new connection
    pub connect_timeout: Duration,
    /// Deadline for one call, from send to response
    pub call_timeout: Duration,
    /// Client sends PING after this long without outbound traffic
    pub heartbeat_interval: Duration,
    /// Server closes a connection after this long without inbound traffic
    pub idle_timeout: Duration,
    pub max_frame_size: usize,
    /// Serializer extension name
    pub serializer: String,
    /// Compressor extension name
    pub compressor: String,
    /// Load balancer extension name
    pub load_balance: String,
    /// Invocation worker permits on the server
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            registry_address: "127.0.0.1:2181".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(30),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            serializer: "json".to_string(),
            compressor: "gzip".to_string(),
            load_balance: "loadBalance".to_string(),
            worker_threads: cores * 2,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `RINGRPC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::InvalidRequest`] if a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    ///
    /// Recognized keys: `RINGRPC_REGISTRY_ADDRESS`, `RINGRPC_SERVER_PORT`,
    /// `RINGRPC_CONNECT_TIMEOUT_MS`, `RINGRPC_CALL_TIMEOUT_MS`,
    /// `RINGRPC_HEARTBEAT_INTERVAL_MS`, `RINGRPC_IDLE_TIMEOUT_MS`,
    /// `RINGRPC_MAX_FRAME_SIZE`, `RINGRPC_SERIALIZER`, `RINGRPC_COMPRESSOR`,
    /// `RINGRPC_LOAD_BALANCE`, `RINGRPC_WORKER_THREADS`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RINGRPC_REGISTRY_ADDRESS") {
            config.registry_address = v;
        }
        if let Some(v) = parse_var(&lookup, "RINGRPC_SERVER_PORT")? {
            config.server_port = v;
        }
        if let Some(ms) = parse_var(&lookup, "RINGRPC_CONNECT_TIMEOUT_MS")? {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "RINGRPC_CALL_TIMEOUT_MS")? {
            config.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "RINGRPC_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "RINGRPC_IDLE_TIMEOUT_MS")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = parse_var(&lookup, "RINGRPC_MAX_FRAME_SIZE")? {
            config.max_frame_size = v;
        }
        if let Some(v) = lookup("RINGRPC_SERIALIZER") {
            config.serializer = v;
        }
        if let Some(v) = lookup("RINGRPC_COMPRESSOR") {
            config.compressor = v;
        }
        if let Some(v) = lookup("RINGRPC_LOAD_BALANCE") {
            config.load_balance = v;
        }
        if let Some(v) = parse_var(&lookup, "RINGRPC_WORKER_THREADS")? {
            config.worker_threads = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_registry_address(mut self, address: impl Into<String>) -> Self {
        self.registry_address = address.into();
        self
    }

    pub fn with_server_port(mut self, port: u16) -> Self {
        self.server_port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = name.into();
        self
    }

    pub fn with_compressor(mut self, name: impl Into<String>) -> Self {
        self.compressor = name.into();
        self
    }

    pub fn with_load_balance(mut self, name: impl Into<String>) -> Self {
        self.load_balance = name.into();
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Rejects settings the runtime cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any timeout or interval is zero
    /// - The frame size limit or worker count is zero
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("connect_timeout", self.connect_timeout),
            ("call_timeout", self.call_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("idle_timeout", self.idle_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(RingrpcError::InvalidRequest(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.max_frame_size == 0 {
            return Err(RingrpcError::InvalidRequest(
                "max_frame_size must be greater than zero".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(RingrpcError::InvalidRequest(
                "worker_threads must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            RingrpcError::InvalidRequest(format!("invalid value for {}: '{}'", key, raw))
        }),
    }
}
