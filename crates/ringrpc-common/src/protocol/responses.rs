//! ringrpc Response Types
//!
//! This module defines the result envelope returned for every call.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use super::RequestId;

/// Outcome of a call as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Success,
    Fail,
}

impl ResponseCode {
    /// Numeric status, kept for log output.
    pub fn code(self) -> u16 {
        match self {
            ResponseCode::Success => 200,
            ResponseCode::Fail => 500,
        }
    }
}

/// A result returned from a server to the client.
///
/// # Response Flow
///
/// 1. Server receives and dispatches a [`CallEnvelope`](super::CallEnvelope)
/// 2. Server builds a `ResultEnvelope` (success or fail), echoing `request_id`
/// 3. The envelope is serialized, compressed and framed as a RESPONSE
/// 4. The client resolves the pending call registered under `request_id`
///
/// # Fields
///
/// - `request_id`: The request this result corresponds to
/// - `code`: `Success` or `Fail`
/// - `message`: Human-readable status or failure reason
/// - `data`: The return value, present iff `code == Success`
///
/// # Example
///
/// ```
/// use ringrpc_common::{ResultEnvelope, RequestId};
/// use serde_json::json;
///
/// let id = RequestId::new_v4();
/// let ok = ResultEnvelope::success(id, json!("Hello, Ann"));
/// assert!(ok.is_success());
///
/// let failed = ResultEnvelope::fail(id, "method not found");
/// assert!(failed.data.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub request_id: RequestId,
    pub code: ResponseCode,
    pub message: String,
    pub data: Option<Value>,
}

impl ResultEnvelope {
    /// Creates a successful result.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The request identifier (must match the call's ID)
    /// * `data` - The value returned by the invoked method
    pub fn success(request_id: RequestId, data: Value) -> Self {
        ResultEnvelope {
            request_id,
            code: ResponseCode::Success,
            message: "The remote call is successful".to_string(),
            data: Some(data),
        }
    }

    /// Creates a failed result.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The request identifier (must match the call's ID)
    /// * `message` - Why the call failed
    pub fn fail(request_id: RequestId, message: impl Into<String>) -> Self {
        ResultEnvelope {
            request_id,
            code: ResponseCode::Fail,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResponseCode::Success
    }
}
