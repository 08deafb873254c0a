//! Blocking thread-per-connection server.

use crossbeam::channel;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use ringrpc_common::transport::{Codecs, TcpTransport, WireCodec};
use ringrpc_common::{
    CallEnvelope, MessageBody, Result, ResultEnvelope, RingrpcError, RuntimeConfig, WireMessage,
};

use crate::handler::RequestHandler;
use crate::provider::ServiceProvider;
use crate::server::advertise;
use crate::service::ServiceConfig;

/// Blocking ringrpc server.
///
/// Accepted connections are queued to a fixed set of worker threads; a
/// worker serves one connection until the peer closes it or it stays idle
/// past the configured idle timeout. Speaks the same frames as
/// [`RpcServer`](crate::RpcServer), one request at a time per connection.
pub struct SocketRpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    advertised_addr: SocketAddr,
    provider: Arc<ServiceProvider>,
    handler: RequestHandler,
    transport: TcpTransport,
    workers: usize,
    stopped: Arc<AtomicBool>,
}

impl SocketRpcServer {
    pub fn bind(
        bind_addr: &str,
        config: RuntimeConfig,
        provider: Arc<ServiceProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(bind_addr)
            .map_err(|e| RingrpcError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RingrpcError::Connection(format!("Failed to get local addr: {}", e)))?;
        let codec =
            WireCodec::new(Arc::new(Codecs::default())).with_max_frame_size(config.max_frame_size);

        info!(addr = %local_addr, workers = config.worker_threads, "socket server bound");

        Ok(Self {
            listener,
            local_addr,
            advertised_addr: advertise(local_addr),
            handler: RequestHandler::new(provider.clone()),
            provider,
            transport: TcpTransport::new(codec, config.idle_timeout),
            workers: config.worker_threads,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address published to the registry.
    pub fn advertised_addr(&self) -> SocketAddr {
        self.advertised_addr
    }

    /// Overrides the published address.
    pub fn with_advertised_addr(mut self, addr: SocketAddr) -> Self {
        self.advertised_addr = addr;
        self
    }

    /// Adds the service and publishes it under the advertised address.
    pub fn register_service(&self, service: &ServiceConfig) -> Result<()> {
        self.provider.publish_service(service, self.advertised_addr)
    }

    /// Handle that stops [`run`](Self::run) from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            advertised_addr: self.advertised_addr,
            wake_addr: advertise(self.local_addr),
            provider: self.provider.clone(),
            stopped: self.stopped.clone(),
        }
    }

    /// Accepts connections until shut down, then waits for the workers to
    /// finish their current connections.
    pub fn run(&self) -> Result<()> {
        let (sender, receiver) = channel::bounded::<TcpStream>(self.workers);

        thread::scope(|scope| {
            for id in 0..self.workers {
                let receiver = receiver.clone();
                scope.spawn(move || {
                    for stream in receiver.iter() {
                        self.serve(stream);
                    }
                    debug!(worker = id, "worker exiting");
                });
            }

            info!(addr = %self.local_addr, "socket server listening");
            for incoming in self.listener.incoming() {
                if self.stopped.load(Ordering::Acquire) {
                    break;
                }
                match incoming {
                    Ok(stream) => {
                        if sender.send(stream).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                }
            }
            drop(sender);
        });

        info!(addr = %self.local_addr, "socket server stopped");
        Ok(())
    }

    fn serve(&self, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if let Err(e) = self.transport.configure(&stream) {
            warn!(peer = %peer, error = %e, "failed to configure connection");
            return;
        }
        info!(peer = %peer, "client connected");

        while !self.stopped.load(Ordering::Acquire) {
            let message = match self.transport.receive_message(&mut stream) {
                Ok(message) => message,
                Err(RingrpcError::Timeout(_)) => {
                    info!(peer = %peer, "idle check happened, closing connection");
                    break;
                }
                Err(RingrpcError::Connection(_)) => {
                    debug!(peer = %peer, "connection closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dropping connection");
                    break;
                }
            };

            let reply = match message.body {
                MessageBody::Ping => {
                    WireMessage::pong(message.codec, message.compress, message.request_id)
                }
                MessageBody::Call(call) => WireMessage::response(
                    message.codec,
                    message.compress,
                    message.request_id,
                    self.invoke(call, &peer),
                ),
                other => {
                    warn!(peer = %peer, kind = ?other, "unexpected frame from client");
                    continue;
                }
            };

            if let Err(e) = self.transport.send_message(&mut stream, &reply) {
                warn!(peer = %peer, error = %e, "write failed, closing connection");
                break;
            }
        }
    }

    /// Runs the handler on this worker; a panicking method becomes a FAIL
    /// result and the worker keeps serving.
    fn invoke(&self, call: CallEnvelope, peer: &str) -> ResultEnvelope {
        let request_id = call.request_id;
        panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(call))).unwrap_or_else(|_| {
            warn!(peer = %peer, request_id = %request_id, "service method panicked");
            ResultEnvelope::fail(request_id, "service method panicked")
        })
    }
}

/// Stops a [`SocketRpcServer`] and clears its registry entries.
#[derive(Clone)]
pub struct ShutdownHandle {
    advertised_addr: SocketAddr,
    wake_addr: SocketAddr,
    provider: Arc<ServiceProvider>,
    stopped: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.provider.clear(self.advertised_addr);
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.wake_addr);
    }
}
