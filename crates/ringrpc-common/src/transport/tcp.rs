use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::protocol::error::{Result, RingrpcError};
use crate::protocol::WireMessage;
use crate::transport::codec::{WireCodec, HEADER_LEN};

/// Blocking frame transport over `std::net::TcpStream`.
///
/// Used by the blocking client and server profiles: one frame is written,
/// one frame is read, no multiplexing.
///
/// # Example
///
/// ```no_run
/// use ringrpc_common::transport::{Codecs, TcpTransport, WireCodec};
/// use ringrpc_common::{CallEnvelope, ServiceKey, WireMessage};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let transport = TcpTransport::new(WireCodec::new(Arc::new(Codecs::default())), Duration::from_secs(5));
/// let mut stream = transport.connect("127.0.0.1:19998").unwrap();
///
/// let call = CallEnvelope::new(&ServiceKey::new("Greeter"), "greet", vec![], vec![]);
/// transport.send_message(&mut stream, &WireMessage::request(1, 1, call)).unwrap();
/// let response = transport.receive_message(&mut stream).unwrap();
/// ```
#[derive(Clone)]
pub struct TcpTransport {
    codec: WireCodec,
    timeout: Duration,
}

impl TcpTransport {
    /// `timeout` bounds the connect and every subsequent read and write.
    pub fn new(codec: WireCodec, timeout: Duration) -> Self {
        Self { codec, timeout }
    }

    pub fn codec(&self) -> &WireCodec {
        &self.codec
    }

    /// Connects to a remote endpoint.
    ///
    /// The address may resolve to several socket addresses; each is tried in
    /// turn until one accepts.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The address cannot be resolved
    /// - Connection fails to all resolved addresses
    /// - Timeouts cannot be set on the stream
    pub fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| RingrpcError::Connection(format!("Invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect_timeout(&socket_addr, self.timeout) {
                Ok(stream) => {
                    self.configure(&stream)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(RingrpcError::Connection(format!(
            "Failed to connect to {}: {}",
            addr,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Applies read/write timeouts and `TCP_NODELAY` to an accepted stream.
    pub fn configure(&self, stream: &TcpStream) -> Result<()> {
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| RingrpcError::Connection(format!("Failed to set read timeout: {}", e)))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| RingrpcError::Connection(format!("Failed to set write timeout: {}", e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| RingrpcError::Connection(format!("Failed to set nodelay: {}", e)))?;
        Ok(())
    }

    /// Writes one frame and flushes.
    pub fn send_message(&self, stream: &mut TcpStream, message: &WireMessage) -> Result<()> {
        let frame = self.codec.encode_frame(message)?;

        stream
            .write_all(&frame)
            .map_err(|e| self.map_io_error(e, "writing frame"))?;
        stream
            .flush()
            .map_err(|e| self.map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Reads exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The peer closes before a full frame arrives
    /// - The header does not validate or the body exceeds the size limit
    /// - The read times out
    pub fn receive_message(&self, stream: &mut TcpStream) -> Result<WireMessage> {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.resize(HEADER_LEN, 0);
        stream
            .read_exact(&mut buf[..])
            .map_err(|e| self.map_io_error(e, "reading frame header"))?;

        // Validates the header and reports the body length still missing.
        if let Some(message) = self.codec.decode_message(&mut buf)? {
            return Ok(message);
        }
        let body_len = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;

        let mut body = vec![0u8; body_len];
        stream
            .read_exact(&mut body)
            .map_err(|e| self.map_io_error(e, "reading frame body"))?;
        buf.extend_from_slice(&body);

        self.codec
            .decode_message(&mut buf)?
            .ok_or_else(|| RingrpcError::Protocol("Incomplete frame".to_string()))
    }

    /// Map IO errors to appropriate RingrpcError variants
    ///
    /// - Timeouts/would block -> `Timeout`
    /// - Connection errors -> `Connection`
    /// - Other IO errors -> `Io`
    pub fn map_io_error(&self, err: std::io::Error, context: &str) -> RingrpcError {
        map_io_error(err, context, self.timeout)
    }
}

/// Shared IO error mapping for the blocking and async transports.
pub fn map_io_error(err: std::io::Error, context: &str, timeout: Duration) -> RingrpcError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            RingrpcError::Timeout(timeout.as_millis() as u64)
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => {
            RingrpcError::Connection(format!("{}: Connection lost", context))
        }
        _ => RingrpcError::Io(err),
    }
}

/// Connects a tokio stream within `timeout`.
///
/// # Errors
///
/// Returns [`RingrpcError::Timeout`] if the deadline passes and
/// [`RingrpcError::Connection`] if every resolved address refuses.
pub async fn connect_async(addr: &str, timeout: Duration) -> Result<tokio::net::TcpStream> {
    match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream
                .set_nodelay(true)
                .map_err(|e| RingrpcError::Connection(format!("Failed to set nodelay: {}", e)))?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(RingrpcError::Connection(format!(
            "Failed to connect to {}: {}",
            addr, e
        ))),
        Err(_) => Err(RingrpcError::Timeout(timeout.as_millis() as u64)),
    }
}
