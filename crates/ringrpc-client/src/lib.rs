//! ringrpc Client
//!
//! Client side of the runtime.
//!
//! - **[`RpcClient`]**: multiplexed async client; discovery picks an address,
//!   the [`ConnectionPool`] supplies the shared [`Connection`], and
//!   [`PendingCalls`] matches responses to callers
//! - **[`ServiceStub`]**: typed calls against one service
//! - **[`SocketClient`]**: blocking connect-per-call client

pub mod client;
pub mod connection;
pub mod pending;
pub mod pool;
pub mod socket;

pub use client::{check_result, RpcClient, ServiceStub};
pub use connection::{Connection, ConnectionOptions};
pub use pending::{ConnectionId, PendingCalls, PendingReceiver};
pub use pool::ConnectionPool;
pub use socket::SocketClient;
