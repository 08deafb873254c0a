//! ringrpc Common Types and Transport
//!
//! This crate provides the core protocol definitions, the binary wire codec and
//! the TCP transport helpers shared by every ringrpc component.
//!
//! # Overview
//!
//! ringrpc is a request/response RPC runtime: clients invoke remote services as
//! if they were local, servers expose implementations that are published into a
//! coordination store and load-balanced across replicas. This crate contains the
//! pieces both sides agree on:
//!
//! - **Protocol Layer**: call/result envelopes, service keys, wire messages and
//!   the error taxonomy
//! - **Transport Layer**: the framed binary codec, pluggable serializers and
//!   compressors, and blocking/async TCP helpers
//! - **Extensions**: named capability lookup with one cached instance per name
//! - **Configuration**: [`RuntimeConfig`] with environment overrides
//!
//! # Wire Format
//!
//! ```text
//! magic "rrpc" (4) | version (1) | type (1) | codec (1) | compress (1) |
//! request id (4, big-endian) | body length (4, big-endian) | body
//! ```
//!
//! # Example
//!
//! ```no_run
//! use ringrpc_common::{CallEnvelope, ResultEnvelope, ServiceKey};
//! use serde_json::json;
//!
//! let key = ServiceKey::new("Greeter");
//! let call = CallEnvelope::new(&key, "greet", vec!["String".into()], vec![json!("Ann")]);
//! let result = ResultEnvelope::success(call.request_id, json!("Hello, Ann"));
//! assert!(result.is_success());
//! ```

pub mod config;
pub mod extension;
pub mod protocol;
pub mod transport;

pub use config::RuntimeConfig;
pub use extension::ExtensionLoader;
pub use protocol::*;
