//! Service definitions.
//!
//! A service is an interface name plus a [`MethodTable`]: handlers keyed by
//! method name and parameter type descriptors, the same pair a
//! [`CallEnvelope`](ringrpc_common::CallEnvelope) carries. Overloads are
//! distinct entries.
//!
//! # Example
//!
//! ```
//! use ringrpc_server::{ServiceConfig, ServiceDefinition};
//! use serde_json::json;
//!
//! let greeter = ServiceDefinition::new("Greeter")
//!     .typed_method("greet", &["String"], |(name,): (String,)| Ok(format!("Hello, {}", name)));
//!
//! let value = greeter
//!     .invoke("greet", &["String".to_string()], vec![json!("Ann")])
//!     .unwrap();
//! assert_eq!(value, json!("Hello, Ann"));
//!
//! let config = ServiceConfig::new(greeter).with_version("1.0");
//! assert_eq!(config.rpc_service_name(), "Greeter1.0");
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ringrpc_common::{Result, RingrpcError, ServiceKey};

/// Handler for one method. Receives the call's parameters in order.
pub type MethodHandler = Arc<dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync>;

/// Method name plus parameter type descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub name: String,
    pub param_types: Vec<String>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, param_types: &[&str]) -> Self {
        Self {
            name: name.into(),
            param_types: param_types.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.param_types.join(", "))
    }
}

/// Handlers keyed by [`MethodSignature`].
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<MethodSignature, MethodHandler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, replacing any previous one with the same signature.
    pub fn insert(&mut self, signature: MethodSignature, handler: MethodHandler) {
        self.methods.insert(signature, handler);
    }

    pub fn get(&self, name: &str, param_types: &[String]) -> Option<&MethodHandler> {
        // Borrowed lookup would need a second key type; tables are small.
        self.methods
            .iter()
            .find(|(sig, _)| sig.name == name && sig.param_types == param_types)
            .map(|(_, handler)| handler)
    }

    pub fn signatures(&self) -> Vec<&MethodSignature> {
        self.methods.keys().collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// A service implementation: interface name and its methods.
#[derive(Clone)]
pub struct ServiceDefinition {
    interface: String,
    methods: MethodTable,
}

impl ServiceDefinition {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            methods: MethodTable::new(),
        }
    }

    /// Adds a method working on raw JSON values.
    pub fn method<F>(mut self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods
            .insert(MethodSignature::new(name, param_types), Arc::new(handler));
        self
    }

    /// Adds a method whose arguments deserialize into the tuple `A` and whose
    /// return value serializes from `R`.
    pub fn typed_method<A, R, F>(self, name: &str, param_types: &[&str], handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        let interface = self.interface.clone();
        let method = name.to_string();
        self.method(name, param_types, move |args| {
            let args: A = serde_json::from_value(Value::Array(args)).map_err(|e| {
                RingrpcError::invocation(
                    &interface,
                    format!("bad arguments for {}: {}", method, e),
                )
            })?;
            Ok(serde_json::to_value(handler(args)?)?)
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Runs the method matching `name` and `param_types`.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::InvocationFailure`] if no method matches, plus
    /// whatever the handler returns.
    pub fn invoke(&self, name: &str, param_types: &[String], args: Vec<Value>) -> Result<Value> {
        let handler = self.methods.get(name, param_types).ok_or_else(|| {
            RingrpcError::invocation(
                &self.interface,
                format!("no method {}({})", name, param_types.join(", ")),
            )
        })?;
        handler(args)
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("interface", &self.interface)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// A service bound to a group and version.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service: Arc<ServiceDefinition>,
    pub group: String,
    pub version: String,
}

impl ServiceConfig {
    pub fn new(service: ServiceDefinition) -> Self {
        Self {
            service: Arc::new(service),
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

    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.service.interface())
            .with_group(self.group.clone())
            .with_version(self.version.clone())
    }

    /// Name the service is stored and published under.
    pub fn rpc_service_name(&self) -> String {
        self.service_key().rpc_service_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> ServiceDefinition {
        ServiceDefinition::new("Calculator")
            .typed_method("add", &["int", "int"], |(a, b): (i64, i64)| Ok(a + b))
            .typed_method("add", &["double", "double"], |(a, b): (f64, f64)| Ok(a + b))
            .method("nothing", &[], |_| Ok(Value::Null))
    }

    #[test]
    fn test_overloads_are_distinct() {
        let calc = calculator();
        assert_eq!(calc.methods().len(), 3);

        let mut signatures: Vec<String> =
            calc.methods().signatures().iter().map(|s| s.to_string()).collect();
        signatures.sort();
        assert_eq!(signatures, vec!["add(double, double)", "add(int, int)", "nothing()"]);

        let ints = calc
            .invoke("add", &["int".into(), "int".into()], vec![json!(2), json!(3)])
            .unwrap();
        assert_eq!(ints, json!(5));

        let doubles = calc
            .invoke("add", &["double".into(), "double".into()], vec![json!(0.5), json!(0.25)])
            .unwrap();
        assert_eq!(doubles, json!(0.75));
    }

    #[test]
    fn test_unknown_signature_names_interface() {
        let calc = calculator();
        let err = calc
            .invoke("add", &["String".into()], vec![json!("x")])
            .unwrap_err();
        match err {
            RingrpcError::InvocationFailure { interface, reason } => {
                assert_eq!(interface, "Calculator");
                assert!(reason.contains("add(String)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_bad_arguments_are_invocation_failures() {
        let calc = calculator();
        let err = calc
            .invoke("add", &["int".into(), "int".into()], vec![json!("two"), json!(3)])
            .unwrap_err();
        assert!(matches!(err, RingrpcError::InvocationFailure { .. }));
    }

    #[test]
    fn test_no_argument_method() {
        let calc = calculator();
        assert_eq!(calc.invoke("nothing", &[], vec![]).unwrap(), Value::Null);
    }

    #[test]
    fn test_config_service_name() {
        let config = ServiceConfig::new(calculator())
            .with_group("g1")
            .with_version("2");
        assert_eq!(config.rpc_service_name(), "Calculatorg12");
        assert_eq!(config.service_key().interface, "Calculator");
    }

    #[test]
    fn test_signature_display() {
        let sig = MethodSignature::new("add", &["int", "int"]);
        assert_eq!(sig.to_string(), "add(int, int)");
    }
}
