//! ringrpc Server
//!
//! Hosts services and answers calls from ringrpc clients.
//!
//! - **[`ServiceDefinition`]**: an interface name and its [`MethodTable`]
//! - **[`ServiceProvider`]**: services hosted by this process, published to
//!   the registry
//! - **[`RequestHandler`]**: turns a call into a result envelope
//! - **[`RpcServer`]**: multiplexed async server with a bounded
//!   [`WorkerPool`]
//! - **[`SocketRpcServer`]**: blocking server, one worker thread per
//!   connection

pub mod handler;
pub mod provider;
pub mod server;
pub mod service;
pub mod socket;
pub mod worker;

pub use handler::RequestHandler;
pub use provider::ServiceProvider;
pub use server::RpcServer;
pub use service::{MethodHandler, MethodSignature, MethodTable, ServiceConfig, ServiceDefinition};
pub use socket::{ShutdownHandle, SocketRpcServer};
pub use worker::WorkerPool;
