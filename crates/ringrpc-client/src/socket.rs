use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use ringrpc_common::transport::{Codecs, TcpTransport, WireCodec};
use ringrpc_common::{
    CallEnvelope, MessageBody, Result, ResultEnvelope, RingrpcError, RuntimeConfig, ServiceKey,
    WireMessage,
};
use ringrpc_registry::ServiceDiscovery;

use crate::client::check_result;

/// Blocking client: one connection per call.
///
/// Each call connects to the discovered address, writes one request frame,
/// reads one response frame and closes. The call timeout bounds every
/// socket operation.
///
/// # Example
///
/// ```no_run
/// use ringrpc_client::SocketClient;
/// use ringrpc_common::{RuntimeConfig, ServiceKey};
/// use ringrpc_registry::{RandomLoadBalance, StaticDiscovery};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let discovery = StaticDiscovery::new(vec!["127.0.0.1:19998".into()], Arc::new(RandomLoadBalance));
/// let client = SocketClient::new(RuntimeConfig::default(), Arc::new(discovery)).unwrap();
/// let greeting = client
///     .invoke(&ServiceKey::new("Greeter"), "greet", vec!["String".into()], vec![json!("Ann")])
///     .unwrap();
/// ```
pub struct SocketClient {
    transport: TcpTransport,
    discovery: Arc<dyn ServiceDiscovery>,
    codec_id: u8,
    compress_id: u8,
}

impl SocketClient {
    pub fn new(config: RuntimeConfig, discovery: Arc<dyn ServiceDiscovery>) -> Result<Self> {
        config.validate()?;
        let codecs = Arc::new(Codecs::default());
        let (codec_id, compress_id) = codecs.resolve_ids(&config.serializer, &config.compressor)?;
        let codec = WireCodec::new(codecs).with_max_frame_size(config.max_frame_size);

        Ok(Self {
            transport: TcpTransport::new(codec, config.call_timeout),
            discovery,
            codec_id,
            compress_id,
        })
    }

    pub fn invoke(
        &self,
        key: &ServiceKey,
        method: impl Into<String>,
        param_types: Vec<String>,
        args: Vec<Value>,
    ) -> Result<Value> {
        let call = CallEnvelope::new(key, method, param_types, args);
        let result = self.send(call.clone())?;
        check_result(&call, result)
    }

    /// Sends a prepared call and returns the raw result envelope.
    pub fn send(&self, call: CallEnvelope) -> Result<ResultEnvelope> {
        let address = self.discovery.lookup(&call)?;
        let interface = call.interface_name.clone();
        let mut stream = self.transport.connect(&address)?;

        let request = WireMessage::request(self.codec_id, self.compress_id, call);
        debug!(addr = %address, sequence = request.request_id, "sending request");
        self.transport.send_message(&mut stream, &request)?;

        let response = self.transport.receive_message(&mut stream)?;
        match response.body {
            MessageBody::Result(result) => Ok(result),
            other => Err(RingrpcError::invocation(
                interface,
                format!("unexpected reply {:?}", other),
            )),
        }
    }
}
