use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Process-unique identifier of one invocation.
pub type RequestId = Uuid;

/// Identifies a logical service: interface name plus group and version.
///
/// Two keys with equal tuples address the same service. The flattened form
/// returned by [`rpc_service_name`](Self::rpc_service_name) is what gets
/// published into the coordination store and used as the lookup key on both
/// sides.
///
/// # Example
///
/// ```
/// use ringrpc_common::ServiceKey;
///
/// let key = ServiceKey::new("Greeter").with_group("g1").with_version("v2");
/// assert_eq!(key.rpc_service_name(), "Greeterg1v2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub interface: String,
    pub group: String,
    pub version: String,
}

impl ServiceKey {
    /// Creates a key with empty group and version.
    pub fn new(interface: impl Into<String>) -> Self {
        ServiceKey {
            interface: interface.into(),
            group: String::new(),
            version: String::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// `interface + group + version`, the name used by registry and discovery.
    pub fn rpc_service_name(&self) -> String {
        format!("{}{}{}", self.interface, self.group, self.version)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rpc_service_name())
    }
}

/// An RPC call as produced by the client dispatcher.
///
/// # Call Flow
///
/// 1. The client builds a `CallEnvelope` with a fresh `request_id`
/// 2. The envelope is serialized, compressed and framed as a REQUEST
/// 3. The server resolves the [`ServiceKey`] and invokes the method whose
///    name and `param_types` match
/// 4. The server answers with a [`ResultEnvelope`](super::ResultEnvelope)
///    carrying the same `request_id`
///
/// Envelopes are never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Random 128-bit identifier correlating the response
    pub request_id: RequestId,
    /// Declaring interface of the invoked method
    pub interface_name: String,
    /// Method to invoke
    pub method_name: String,
    /// Ordered parameter type descriptors, part of the method signature
    pub param_types: Vec<String>,
    /// Ordered parameter values
    pub parameters: Vec<Value>,
    pub group: String,
    pub version: String,
}

impl CallEnvelope {
    /// Creates a call for `method` on the service addressed by `key`.
    ///
    /// # Arguments
    ///
    /// * `key` - The target service (interface, group, version)
    /// * `method` - The method name
    /// * `param_types` - Parameter type descriptors, in declaration order
    /// * `parameters` - Parameter values, in declaration order
    pub fn new(
        key: &ServiceKey,
        method: impl Into<String>,
        param_types: Vec<String>,
        parameters: Vec<Value>,
    ) -> Self {
        CallEnvelope {
            request_id: Uuid::new_v4(),
            interface_name: key.interface.clone(),
            method_name: method.into(),
            param_types,
            parameters,
            group: key.group.clone(),
            version: key.version.clone(),
        }
    }

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey {
            interface: self.interface_name.clone(),
            group: self.group.clone(),
            version: self.version.clone(),
        }
    }

    pub fn rpc_service_name(&self) -> String {
        format!("{}{}{}", self.interface_name, self.group, self.version)
    }
}
