//! One multiplexed connection to a server.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ringrpc_common::transport::WireCodec;
use ringrpc_common::{MessageBody, Result, RingrpcError, WireMessage};

use crate::pending::{ConnectionId, PendingCalls};

/// Frames queued for the writer before senders wait.
const OUTBOUND_QUEUE: usize = 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Settings a connection needs besides its stream.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub codec: WireCodec,
    /// Serializer id stamped on heartbeats
    pub codec_id: u8,
    /// Compressor id stamped on heartbeats
    pub compress_id: u8,
    /// PING after this long without outbound frames
    pub heartbeat_interval: Duration,
}

/// A live connection shared by every call to one address.
///
/// Two tasks own the socket: a writer that drains the outbound queue and
/// sends a PING whenever the queue stays idle for the heartbeat interval,
/// and a reader that hands responses to the [`PendingCalls`] registry.
/// When either side stops, the other is cancelled, every call still
/// pending on this connection is failed, and the connection reports itself
/// dead so the pool replaces it.
pub struct Connection {
    id: ConnectionId,
    address: String,
    outbound: mpsc::Sender<WireMessage>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Takes ownership of `stream` and spawns its reader and writer tasks.
    pub fn spawn(
        stream: TcpStream,
        address: impl Into<String>,
        options: ConnectionOptions,
        pending: Arc<PendingCalls>,
    ) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let address = address.into();
        let (read_half, write_half) = stream.into_split();
        let (outbound, inbound) = mpsc::channel(OUTBOUND_QUEUE);
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let reader = FramedRead::new(read_half, options.codec.clone());
        tokio::spawn(read_loop(
            reader,
            address.clone(),
            pending.clone(),
            shutdown.clone(),
        ));

        let writer = FramedWrite::new(write_half, options.codec.clone());
        tokio::spawn(write_loop(
            writer,
            inbound,
            id,
            address.clone(),
            options,
            pending,
            closed.clone(),
            shutdown.clone(),
        ));

        debug!(addr = %address, connection = id, "connection established");

        Self {
            id,
            address,
            outbound,
            closed,
            shutdown,
        }
    }

    /// Process-unique id, used to tie pending calls to this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether calls may still be sent on this connection.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Queues a frame for the writer.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::Connection`] if the connection has shut down.
    pub async fn send(&self, message: WireMessage) -> Result<()> {
        if !self.is_alive() {
            return Err(RingrpcError::Connection(format!(
                "{}: connection closed",
                self.address
            )));
        }
        self.outbound.send(message).await.map_err(|_| {
            RingrpcError::Connection(format!("{}: connection closed", self.address))
        })
    }

    /// Stops both tasks; pending calls on this address fail.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn read_loop<R>(
    mut reader: FramedRead<R, WireCodec>,
    address: String,
    pending: Arc<PendingCalls>,
    shutdown: CancellationToken,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(message)) => match message.body {
                MessageBody::Result(result) => {
                    pending.resolve(result);
                }
                MessageBody::Pong => {
                    debug!(addr = %address, request_id = message.request_id, "heartbeat received");
                }
                other => {
                    warn!(addr = %address, kind = ?other, "unexpected frame from server");
                }
            },
            Some(Err(e)) => {
                warn!(addr = %address, error = %e, "dropping connection");
                break;
            }
            None => {
                debug!(addr = %address, "server closed connection");
                break;
            }
        }
    }
    shutdown.cancel();
}

async fn write_loop<W>(
    mut writer: FramedWrite<W, WireCodec>,
    mut inbound: mpsc::Receiver<WireMessage>,
    id: ConnectionId,
    address: String,
    options: ConnectionOptions,
    pending: Arc<PendingCalls>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        let outgoing = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = tokio::time::sleep(options.heartbeat_interval) => {
                debug!(addr = %address, "write idle, sending heartbeat");
                WireMessage::ping(options.codec_id, options.compress_id)
            }
        };

        if let Err(e) = writer.send(outgoing).await {
            warn!(addr = %address, error = %e, "write failed, closing connection");
            break;
        }
    }

    shutdown.cancel();
    // Refuse new frames, then fail whatever was registered against them.
    inbound.close();
    drop(writer);
    pending.fail_connection(id, &format!("{}: connection closed", address));
    closed.store(true, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_common::transport::Codecs;
    use ringrpc_common::{CallEnvelope, RequestId, ResultEnvelope, ServiceKey};
    use serde_json::json;
    use tokio::net::TcpListener;

    fn options(heartbeat: Duration) -> ConnectionOptions {
        ConnectionOptions {
            codec: WireCodec::new(Arc::new(Codecs::default())),
            codec_id: 1,
            compress_id: 0,
            heartbeat_interval: heartbeat,
        }
    }

    #[tokio::test]
    async fn test_idle_writer_sends_ping() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = TcpStream::connect(&addr).await.unwrap();
        let pending = Arc::new(PendingCalls::new());
        let _conn = Connection::spawn(stream, &addr, options(Duration::from_millis(50)), pending);

        let (server, _) = listener.accept().await.unwrap();
        let mut frames = FramedRead::new(server, options(Duration::from_secs(1)).codec);
        let first = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.body, MessageBody::Ping);
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending_and_marks_dead() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = TcpStream::connect(&addr).await.unwrap();
        let pending = Arc::new(PendingCalls::new());
        let conn = Connection::spawn(stream, &addr, options(Duration::from_secs(60)), pending.clone());

        let (server, _) = listener.accept().await.unwrap();
        let rx = pending.register(RequestId::new_v4(), conn.id());
        drop(server);

        let outcome = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(RingrpcError::Connection(_))));

        tokio::time::timeout(Duration::from_secs(2), async {
            while conn.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(conn.send(WireMessage::ping(1, 0)).await.is_err());
    }

    #[tokio::test]
    async fn test_closing_one_connection_spares_another_to_same_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let pending = Arc::new(PendingCalls::new());

        let old = Connection::spawn(
            TcpStream::connect(&addr).await.unwrap(),
            &addr,
            options(Duration::from_secs(60)),
            pending.clone(),
        );
        let (_old_server, _) = listener.accept().await.unwrap();
        let new = Connection::spawn(
            TcpStream::connect(&addr).await.unwrap(),
            &addr,
            options(Duration::from_secs(60)),
            pending.clone(),
        );
        let (_new_server, _) = listener.accept().await.unwrap();
        assert_ne!(old.id(), new.id());

        let survivor = RequestId::new_v4();
        let _rx = pending.register(survivor, new.id());
        old.close();

        tokio::time::timeout(Duration::from_secs(2), async {
            while old.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(pending.contains(&survivor));
        assert!(new.is_alive());
    }

    #[tokio::test]
    async fn test_response_resolves_pending_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let stream = TcpStream::connect(&addr).await.unwrap();
        let pending = Arc::new(PendingCalls::new());
        let conn = Connection::spawn(stream, &addr, options(Duration::from_secs(60)), pending.clone());

        let (server, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = server.into_split();
        let mut server_in = FramedRead::new(read_half, options(Duration::from_secs(1)).codec);
        let mut server_out = FramedWrite::new(write_half, options(Duration::from_secs(1)).codec);

        let call = CallEnvelope::new(&ServiceKey::new("Greeter"), "greet", vec![], vec![json!("Ann")]);
        let rx = pending.register(call.request_id, conn.id());
        conn.send(WireMessage::request(1, 0, call.clone())).await.unwrap();

        let request = server_in.next().await.unwrap().unwrap();
        server_out
            .send(WireMessage::response(
                1,
                0,
                request.request_id,
                ResultEnvelope::success(call.request_id, json!("Hello, Ann")),
            ))
            .await
            .unwrap();

        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.data, Some(json!("Hello, Ann")));
    }
}
