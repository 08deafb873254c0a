//! Multiplexed async server.
//!
//! Each accepted connection gets a reader loop and a writer task joined by a
//! bounded response queue. Requests are handed to the [`WorkerPool`], so a
//! slow method never stalls reads; responses go out in completion order.

use futures::{SinkExt, StreamExt};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ringrpc_common::transport::{Codecs, WireCodec};
use ringrpc_common::{
    CallEnvelope, MessageBody, Result, ResultEnvelope, RingrpcError, RuntimeConfig, WireMessage,
};

use crate::handler::RequestHandler;
use crate::provider::ServiceProvider;
use crate::service::ServiceConfig;
use crate::worker::WorkerPool;

/// Responses queued per connection before backpressure kicks in.
const RESPONSE_QUEUE: usize = 256;

/// How long a FAIL reply may wait for queue space under backpressure
/// before the connection is closed.
const BACKPRESSURE_WAIT: Duration = Duration::from_millis(100);

/// Async ringrpc server.
///
/// # Example
///
/// ```no_run
/// use ringrpc_common::RuntimeConfig;
/// use ringrpc_registry::{MemoryStore, StoreRegistry};
/// use ringrpc_server::{RpcServer, ServiceConfig, ServiceDefinition, ServiceProvider};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Arc::new(StoreRegistry::new(Arc::new(MemoryStore::new())));
/// let provider = Arc::new(ServiceProvider::new(registry));
/// let server = RpcServer::bind("0.0.0.0:19998", RuntimeConfig::default(), provider).await?;
///
/// let greeter = ServiceDefinition::new("Greeter")
///     .typed_method("greet", &["String"], |(name,): (String,)| Ok(format!("Hello, {}", name)));
/// server.register_service(&ServiceConfig::new(greeter))?;
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    advertised_addr: SocketAddr,
    config: RuntimeConfig,
    provider: Arc<ServiceProvider>,
    handler: RequestHandler,
    codec: WireCodec,
    workers: WorkerPool,
    shutdown: CancellationToken,
}

impl RpcServer {
    /// Binds to `bind_addr` with the built-in codecs.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::Connection`] if the address cannot be bound,
    /// or [`RingrpcError::InvalidRequest`] for an invalid config.
    pub async fn bind(
        bind_addr: &str,
        config: RuntimeConfig,
        provider: Arc<ServiceProvider>,
    ) -> Result<Self> {
        Self::bind_with_codecs(bind_addr, config, provider, Arc::new(Codecs::default())).await
    }

    pub async fn bind_with_codecs(
        bind_addr: &str,
        config: RuntimeConfig,
        provider: Arc<ServiceProvider>,
        codecs: Arc<Codecs>,
    ) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RingrpcError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RingrpcError::Connection(format!("Failed to get local addr: {}", e)))?;

        info!(addr = %local_addr, workers = config.worker_threads, "server bound");

        Ok(Self {
            listener,
            local_addr,
            advertised_addr: advertise(local_addr),
            codec: WireCodec::new(codecs).with_max_frame_size(config.max_frame_size),
            workers: WorkerPool::new(config.worker_threads),
            handler: RequestHandler::new(provider.clone()),
            provider,
            config,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address published to the registry.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised_addr
    }

    /// Overrides the published address, e.g. when bound to `0.0.0.0`
    /// behind a known host name.
    pub fn with_advertised_addr(mut self, addr: SocketAddr) -> Self {
        self.advertised_addr = addr;
        self
    }

    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.provider
    }

    /// Adds the service and publishes it under the advertised address.
    pub fn register_service(&self, service: &ServiceConfig) -> Result<()> {
        self.provider.publish_service(service, self.advertised_addr)
    }

    /// Stops accepting, closes connections and clears this server's
    /// registry entries.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.provider.clear(self.advertised_addr);
    }

    /// Accepts connections until shut down.
    pub async fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr, "server listening");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
            }
            debug!(peer = %peer, "connection established");

            let session = Session {
                peer,
                handler: self.handler.clone(),
                workers: self.workers.clone(),
                codec: self.codec.clone(),
                idle_timeout: self.config.idle_timeout,
                shutdown: self.shutdown.child_token(),
            };
            tokio::spawn(session.serve(stream));
        }

        info!(addr = %self.local_addr, "server stopped");
        Ok(())
    }
}

/// Loopback in place of an unspecified bind address.
pub(crate) fn advertise(local: SocketAddr) -> SocketAddr {
    if local.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
    } else {
        local
    }
}

struct Session {
    peer: SocketAddr,
    handler: RequestHandler,
    workers: WorkerPool,
    codec: WireCodec,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

impl Session {
    async fn serve(self, stream: TcpStream) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, self.codec.clone());
        let writer = FramedWrite::new(write_half, self.codec.clone());
        let (responses, queue) = mpsc::channel(RESPONSE_QUEUE);
        let writer_task = tokio::spawn(write_loop(writer, queue, self.peer));

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = tokio::time::timeout(self.idle_timeout, reader.next()) => frame,
            };

            let message = match frame {
                Err(_) => {
                    info!(peer = %self.peer, "idle check happened, closing connection");
                    break;
                }
                Ok(None) => {
                    debug!(peer = %self.peer, "connection closed by peer");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(peer = %self.peer, error = %e, "dropping connection");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message.body {
                MessageBody::Ping => {
                    debug!(peer = %self.peer, request_id = message.request_id, "heartbeat");
                    let pong = WireMessage::pong(message.codec, message.compress, message.request_id);
                    if responses.try_send(pong).is_err() {
                        warn!(peer = %self.peer, "response queue full, heartbeat dropped");
                    }
                }
                MessageBody::Call(call) => {
                    let reply = Reply {
                        codec: message.codec,
                        compress: message.compress,
                        sequence: message.request_id,
                    };
                    tokio::spawn(dispatch(
                        call,
                        reply,
                        self.handler.clone(),
                        self.workers.clone(),
                        responses.clone(),
                        self.shutdown.clone(),
                        self.peer,
                    ));
                }
                other => {
                    warn!(peer = %self.peer, kind = ?other, "unexpected frame from client");
                }
            }
        }

        // The writer drains what in-flight calls still queue, then exits.
        drop(responses);
        if self.shutdown.is_cancelled() {
            writer_task.abort();
        }
    }
}

/// Header fields echoed on the response frame.
#[derive(Clone, Copy)]
struct Reply {
    codec: u8,
    compress: u8,
    sequence: u32,
}

/// Invokes `call` on the worker pool and queues the response.
///
/// A full queue gets a FAIL result instead. If no slot frees up within
/// [`BACKPRESSURE_WAIT`] the session is cancelled, which closes the
/// connection so the client fails its calls rather than waiting them out.
async fn dispatch(
    call: CallEnvelope,
    reply: Reply,
    handler: RequestHandler,
    workers: WorkerPool,
    responses: mpsc::Sender<WireMessage>,
    session: CancellationToken,
    peer: SocketAddr,
) {
    let request_id = call.request_id;
    let result = match workers.run(move || handler.handle(call)).await {
        Ok(result) => result,
        Err(e) => ResultEnvelope::fail(request_id, e.to_string()),
    };

    let response = WireMessage::response(reply.codec, reply.compress, reply.sequence, result);
    match responses.try_send(response) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(peer = %peer, request_id = %request_id, "connection not writable, replying FAIL");
            let fail = WireMessage::response(
                reply.codec,
                reply.compress,
                reply.sequence,
                ResultEnvelope::fail(request_id, "server busy: response queue full"),
            );
            match responses.send_timeout(fail, BACKPRESSURE_WAIT).await {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    warn!(peer = %peer, request_id = %request_id, "response queue stuck, closing connection");
                    session.cancel();
                }
                Err(SendTimeoutError::Closed(_)) => {
                    debug!(peer = %peer, request_id = %request_id, "connection gone, response dropped");
                }
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!(peer = %peer, request_id = %request_id, "connection gone, response dropped");
        }
    }
}

async fn write_loop<W>(
    mut writer: FramedWrite<W, WireCodec>,
    mut queue: mpsc::Receiver<WireMessage>,
    peer: SocketAddr,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(message) = queue.recv().await {
        if let Err(e) = writer.send(message).await {
            warn!(peer = %peer, error = %e, "write failed, closing connection");
            break;
        }
    }
}
