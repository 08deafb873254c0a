use thiserror::Error;

#[derive(Error, Debug)]
pub enum RingrpcError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invocation failed, interfaceName:{interface}: {reason}")]
    InvocationFailure { interface: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Extension not found: {0}")]
    Extension(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RingrpcError {
    /// Builds an [`RingrpcError::InvocationFailure`] for the given interface.
    pub fn invocation(interface: impl Into<String>, reason: impl Into<String>) -> Self {
        RingrpcError::InvocationFailure {
            interface: interface.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error leaves the underlying stream in an unknown state.
    ///
    /// Protocol, connection and I/O errors cannot be recovered from on the same
    /// connection: the peer is closed and evicted so the next call reconnects.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            RingrpcError::Protocol(_) | RingrpcError::Connection(_) | RingrpcError::Io(_)
        )
    }
}

impl From<rmp_serde::encode::Error> for RingrpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RingrpcError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RingrpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RingrpcError::Serialization(err.to_string())
    }
}

impl From<std::net::AddrParseError> for RingrpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RingrpcError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RingrpcError>;
