use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use ringrpc_common::transport::{Codecs, WireCodec};
use ringrpc_common::{
    CallEnvelope, Result, ResultEnvelope, RingrpcError, RuntimeConfig, ServiceKey, WireMessage,
};
use ringrpc_registry::ServiceDiscovery;

use crate::connection::ConnectionOptions;
use crate::pending::PendingCalls;
use crate::pool::ConnectionPool;

/// Multiplexed ringrpc client.
///
/// Calls to the same address share one connection; responses are matched to
/// callers by request id, in whatever order the server produces them.
/// Cloning is cheap and clones share the pool and pending registry.
///
/// # Example
///
/// ```no_run
/// use ringrpc_client::RpcClient;
/// use ringrpc_common::{RuntimeConfig, ServiceKey};
/// use ringrpc_registry::{RandomLoadBalance, StaticDiscovery};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let discovery = StaticDiscovery::new(vec!["127.0.0.1:19998".into()], Arc::new(RandomLoadBalance));
/// let client = RpcClient::new(RuntimeConfig::default(), Arc::new(discovery))?;
///
/// let greeting = client
///     .invoke(&ServiceKey::new("Greeter"), "greet", vec!["String".into()], vec![json!("Ann")])
///     .await?;
/// assert_eq!(greeting, json!("Hello, Ann"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: RuntimeConfig,
    discovery: Arc<dyn ServiceDiscovery>,
    pool: ConnectionPool,
    pending: Arc<PendingCalls>,
    codec_id: u8,
    compress_id: u8,
}

impl RpcClient {
    /// Client using the built-in serializers and compressors.
    ///
    /// # Errors
    ///
    /// Fails if the configured serializer or compressor name is unknown.
    pub fn new(config: RuntimeConfig, discovery: Arc<dyn ServiceDiscovery>) -> Result<Self> {
        Self::with_codecs(config, discovery, Arc::new(Codecs::default()))
    }

    pub fn with_codecs(
        config: RuntimeConfig,
        discovery: Arc<dyn ServiceDiscovery>,
        codecs: Arc<Codecs>,
    ) -> Result<Self> {
        config.validate()?;
        let (codec_id, compress_id) = codecs.resolve_ids(&config.serializer, &config.compressor)?;
        let codec = WireCodec::new(codecs).with_max_frame_size(config.max_frame_size);

        let pending = Arc::new(PendingCalls::new());
        let options = ConnectionOptions {
            codec,
            codec_id,
            compress_id,
            heartbeat_interval: config.heartbeat_interval,
        };
        let pool = ConnectionPool::new(options, config.connect_timeout, pending.clone());

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                discovery,
                pool,
                pending,
                codec_id,
                compress_id,
            }),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn pending(&self) -> &Arc<PendingCalls> {
        &self.inner.pending
    }

    /// Calls `method` on the service addressed by `key`.
    ///
    /// # Errors
    ///
    /// - [`RingrpcError::ServiceNotFound`] if discovery has no address
    /// - [`RingrpcError::Connection`] / [`RingrpcError::Timeout`] if the
    ///   server cannot be reached or the call deadline passes
    /// - [`RingrpcError::InvocationFailure`] if the server reports failure
    pub async fn invoke(
        &self,
        key: &ServiceKey,
        method: impl Into<String>,
        param_types: Vec<String>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let call = CallEnvelope::new(key, method, param_types, args);
        let result = self.send(call.clone()).await?;
        check_result(&call, result)
    }

    /// Sends a prepared call and returns the raw result envelope.
    pub async fn send(&self, call: CallEnvelope) -> Result<ResultEnvelope> {
        let inner = &self.inner;
        let address = inner.discovery.lookup(&call)?;
        let conn = inner.pool.get(&address).await?;

        let request_id = call.request_id;
        let interface = call.interface_name.clone();
        let receiver = inner.pending.register(request_id, conn.id());
        let message = WireMessage::request(inner.codec_id, inner.compress_id, call);
        debug!(request_id = %request_id, addr = %address, "sending request");

        if let Err(e) = conn.send(message).await {
            inner.pending.cancel(request_id);
            inner.pool.evict_connection(&address, &conn).await;
            return Err(e);
        }

        let deadline = inner.config.call_timeout;
        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RingrpcError::invocation(
                interface,
                format!("no response from {}", address),
            )),
            Err(_) => {
                inner.pending.cancel(request_id);
                warn!(request_id = %request_id, addr = %address, "call timed out");
                Err(RingrpcError::Timeout(deadline.as_millis() as u64))
            }
        }
    }

    /// Typed handle for one service.
    pub fn stub(&self, key: ServiceKey) -> ServiceStub {
        ServiceStub {
            client: self.clone(),
            key,
        }
    }

    /// Closes every pooled connection.
    pub async fn close(&self) {
        self.inner.pool.close_all().await;
    }
}

/// Turns a result envelope into the call's return value.
///
/// # Errors
///
/// Returns [`RingrpcError::InvocationFailure`] naming the interface if the
/// request ids differ or the server reported failure.
pub fn check_result(call: &CallEnvelope, result: ResultEnvelope) -> Result<Value> {
    if result.request_id != call.request_id {
        return Err(RingrpcError::invocation(
            &call.interface_name,
            "The request and response do not match",
        ));
    }
    if !result.is_success() {
        return Err(RingrpcError::invocation(&call.interface_name, result.message));
    }
    // `null` return values arrive without a payload.
    Ok(result.data.unwrap_or(Value::Null))
}

/// Typed calls against one service.
///
/// Arguments are passed as a tuple (serialized as a JSON array, one element
/// per parameter) and the return value is deserialized into `R`.
///
/// ```no_run
/// # use ringrpc_client::RpcClient;
/// # use ringrpc_common::ServiceKey;
/// # async fn demo(client: RpcClient) -> ringrpc_common::Result<()> {
/// let greeter = client.stub(ServiceKey::new("Greeter"));
/// let greeting: String = greeter.call("greet", &["String"], ("Ann",)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ServiceStub {
    client: RpcClient,
    key: ServiceKey,
}

impl ServiceStub {
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Calls `method`; `args` must serialize to one array element per entry
    /// of `param_types`.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::InvalidRequest`] if the arguments do not line
    /// up with `param_types`, plus everything [`RpcClient::invoke`] returns.
    pub async fn call<A, R>(&self, method: &str, param_types: &[&str], args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let values = match serde_json::to_value(args)? {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => {
                return Err(RingrpcError::InvalidRequest(format!(
                    "arguments must be a tuple, got {}",
                    other
                )))
            }
        };
        if values.len() != param_types.len() {
            return Err(RingrpcError::InvalidRequest(format!(
                "{} declares {} parameters but {} arguments were given",
                method,
                param_types.len(),
                values.len()
            )));
        }

        let param_types = param_types.iter().map(|t| t.to_string()).collect();
        let value = self
            .client
            .invoke(&self.key, method, param_types, values)
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_registry::{RandomLoadBalance, StaticDiscovery};
    use serde_json::json;

    fn call() -> CallEnvelope {
        CallEnvelope::new(&ServiceKey::new("Greeter"), "greet", vec![], vec![])
    }

    #[test]
    fn test_check_result_success() {
        let call = call();
        let value = check_result(&call, ResultEnvelope::success(call.request_id, json!("hi"))).unwrap();
        assert_eq!(value, json!("hi"));
    }

    #[test]
    fn test_check_result_mismatch_names_interface() {
        let call = call();
        let other = ResultEnvelope::success(ringrpc_common::RequestId::new_v4(), json!(1));
        let err = check_result(&call, other).unwrap_err();
        assert!(matches!(err, RingrpcError::InvocationFailure { ref interface, .. } if interface == "Greeter"));
    }

    #[test]
    fn test_check_result_failure_carries_message() {
        let call = call();
        let err = check_result(&call, ResultEnvelope::fail(call.request_id, "no such method")).unwrap_err();
        assert!(err.to_string().contains("no such method"));
    }

    #[test]
    fn test_unknown_serializer_rejected() {
        let discovery = Arc::new(StaticDiscovery::new(vec![], Arc::new(RandomLoadBalance)));
        let config = RuntimeConfig::default().with_serializer("kryo");
        assert!(matches!(
            RpcClient::new(config, discovery),
            Err(RingrpcError::Extension(_))
        ));
    }

    #[tokio::test]
    async fn test_stub_rejects_mismatched_arguments() {
        let discovery = Arc::new(StaticDiscovery::new(vec![], Arc::new(RandomLoadBalance)));
        let client = RpcClient::new(RuntimeConfig::default(), discovery).unwrap();
        let stub = client.stub(ServiceKey::new("Greeter"));

        let result: Result<String> = stub.call("greet", &["String", "String"], ("Ann",)).await;
        assert!(matches!(result, Err(RingrpcError::InvalidRequest(_))));

        let result: Result<String> = stub.call("greet", &["String"], "Ann").await;
        assert!(matches!(result, Err(RingrpcError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_discovery_miss_surfaces() {
        let discovery = Arc::new(StaticDiscovery::new(vec![], Arc::new(RandomLoadBalance)));
        let client = RpcClient::new(RuntimeConfig::default(), discovery).unwrap();
        let err = client
            .invoke(&ServiceKey::new("Greeter"), "greet", vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RingrpcError::ServiceNotFound(_)));
        assert!(client.pending().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_call_names_interface() {
        // Accepts and holds connections without ever answering.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let discovery = Arc::new(StaticDiscovery::new(vec![addr], Arc::new(RandomLoadBalance)));
        let client = RpcClient::new(RuntimeConfig::default(), discovery).unwrap();
        let call = call();
        let request_id = call.request_id;

        let sender = client.clone();
        let outcome = tokio::spawn(async move { sender.send(call).await });

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !client.pending().contains(&request_id) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(client.pending().cancel(request_id));

        let err = outcome.await.unwrap().unwrap_err();
        assert!(matches!(err, RingrpcError::InvocationFailure { ref interface, .. } if interface == "Greeter"));
        client.close().await;
    }
}
