use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use ringrpc_common::{Result, RingrpcError};
use ringrpc_registry::ServiceRegistry;

use crate::service::{ServiceConfig, ServiceDefinition};

/// Services hosted by this process, keyed by rpc service name.
///
/// Adding stores the service locally; publishing also announces it in the
/// registry under the server's advertised address. The first service
/// added under a name wins.
pub struct ServiceProvider {
    services: DashMap<String, Arc<ServiceDefinition>>,
    registry: Arc<dyn ServiceRegistry>,
}

impl ServiceProvider {
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            services: DashMap::new(),
            registry,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// Stores the service. Returns `false` if the name was already taken.
    pub fn add_service(&self, config: &ServiceConfig) -> bool {
        let name = config.rpc_service_name();
        match self.services.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!(service = %entry.key(), "service already added");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                info!(
                    service = %entry.key(),
                    methods = config.service.methods().len(),
                    "service added"
                );
                entry.insert(config.service.clone());
                true
            }
        }
    }

    /// Looks up a service by rpc service name.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::ServiceNotFound`] if nothing was added under
    /// `rpc_service_name`.
    pub fn get_service(&self, rpc_service_name: &str) -> Result<Arc<ServiceDefinition>> {
        self.services
            .get(rpc_service_name)
            .map(|service| service.value().clone())
            .ok_or_else(|| RingrpcError::ServiceNotFound(rpc_service_name.to_string()))
    }

    /// Adds the service and publishes it under `addr`.
    ///
    /// # Errors
    ///
    /// Returns the registry's error if the node cannot be created.
    pub fn publish_service(&self, config: &ServiceConfig, addr: SocketAddr) -> Result<()> {
        self.add_service(config);
        self.registry.publish(&config.rpc_service_name(), addr)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Removes everything this process published under `addr`.
    pub fn clear(&self, addr: SocketAddr) {
        self.registry.clear(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_registry::{
        address_path, CoordinationStore, MemoryStore, StoreRegistry,
    };
    use serde_json::json;

    fn provider() -> (ServiceProvider, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(StoreRegistry::new(store.clone()));
        (ServiceProvider::new(registry), store)
    }

    fn greeter(reply: &'static str) -> ServiceConfig {
        ServiceConfig::new(
            ServiceDefinition::new("Greeter").method("greet", &["String"], move |_| Ok(json!(reply))),
        )
    }

    #[test]
    fn test_first_service_wins() {
        let (provider, _) = provider();
        assert!(provider.add_service(&greeter("first")));
        assert!(!provider.add_service(&greeter("second")));

        let service = provider.get_service("Greeter").unwrap();
        let reply = service.invoke("greet", &["String".into()], vec![json!("x")]).unwrap();
        assert_eq!(reply, json!("first"));
    }

    #[test]
    fn test_versions_are_separate_services() {
        let (provider, _) = provider();
        assert!(provider.add_service(&greeter("v1").with_version("1")));
        assert!(provider.add_service(&greeter("v2").with_version("2")));

        let mut names = provider.service_names();
        names.sort();
        assert_eq!(names, vec!["Greeter1", "Greeter2"]);
    }

    #[test]
    fn test_missing_service() {
        let (provider, _) = provider();
        assert!(matches!(
            provider.get_service("Greeter"),
            Err(RingrpcError::ServiceNotFound(name)) if name == "Greeter"
        ));
    }

    #[test]
    fn test_publish_and_clear() {
        let (provider, store) = provider();
        let addr: SocketAddr = "127.0.0.1:19998".parse().unwrap();
        provider.publish_service(&greeter("hi"), addr).unwrap();

        assert!(provider.get_service("Greeter").is_ok());
        assert!(store.exists(&address_path("Greeter", addr)).unwrap());

        provider.clear(addr);
        assert!(!store.exists(&address_path("Greeter", addr)).unwrap());
    }
}
