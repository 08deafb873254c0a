use dashmap::DashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use ringrpc_common::Result;

use crate::store::{address_path, CoordinationStore};

/// Publishes service endpoints.
pub trait ServiceRegistry: Send + Sync {
    /// Records that `addr` serves `service_name`. Idempotent.
    fn publish(&self, service_name: &str, addr: SocketAddr) -> Result<()>;

    /// Removes every path this registry published for `addr`.
    ///
    /// Best-effort: failures are logged, not returned.
    fn clear(&self, addr: SocketAddr);
}

/// [`ServiceRegistry`] writing durable nodes into a [`CoordinationStore`].
///
/// Nodes live at `/my-rpc/{service name}/{host:port}`. Paths created by
/// this registry are remembered locally; publishing one again skips the
/// store round trip.
pub struct StoreRegistry {
    store: Arc<dyn CoordinationStore>,
    registered: DashSet<String>,
}

impl StoreRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            registered: DashSet::new(),
        }
    }

    /// Paths published through this registry, sorted.
    pub fn registered_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.registered.iter().map(|p| p.key().clone()).collect();
        paths.sort();
        paths
    }
}

impl ServiceRegistry for StoreRegistry {
    fn publish(&self, service_name: &str, addr: SocketAddr) -> Result<()> {
        let path = address_path(service_name, addr);

        if self.registered.contains(&path) {
            info!(path = %path, "node already exists");
            return Ok(());
        }

        let outcome = match self.store.exists(&path) {
            Ok(true) => {
                info!(path = %path, "node already exists");
                Ok(())
            }
            Ok(false) => self.store.create_persistent(&path).map(|()| {
                info!(path = %path, "node created");
            }),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                self.registered.insert(path);
                Ok(())
            }
            Err(e) => {
                error!(path = %path, error = %e, "failed to create persistent node");
                Err(e)
            }
        }
    }

    fn clear(&self, addr: SocketAddr) {
        let suffix = format!("/{}", addr);
        let owned: Vec<String> = self
            .registered
            .iter()
            .filter(|p| p.key().ends_with(&suffix))
            .map(|p| p.key().clone())
            .collect();

        for path in owned {
            match self.store.delete(&path) {
                Ok(()) => {
                    self.registered.remove(&path);
                }
                Err(e) => error!(path = %path, error = %e, "failed to clear registry path"),
            }
        }
        info!(addr = %addr, "registered services cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use ringrpc_common::RingrpcError;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_publish_creates_node() {
        let store = Arc::new(MemoryStore::new());
        let registry = StoreRegistry::new(store.clone());

        registry.publish("Greeter", addr(19998)).unwrap();

        assert!(store.exists("/my-rpc/Greeter/127.0.0.1:19998").unwrap());
        assert_eq!(registry.registered_paths(), vec!["/my-rpc/Greeter/127.0.0.1:19998"]);
    }

    #[test]
    fn test_publish_is_idempotent_across_registries() {
        let store = Arc::new(MemoryStore::new());
        let first = StoreRegistry::new(store.clone());
        let second = StoreRegistry::new(store.clone());

        first.publish("Greeter", addr(1)).unwrap();
        first.publish("Greeter", addr(1)).unwrap();
        second.publish("Greeter", addr(1)).unwrap();

        assert_eq!(store.children("/my-rpc/Greeter").unwrap().len(), 1);
    }

    #[test]
    fn test_clear_removes_only_own_address() {
        let store = Arc::new(MemoryStore::new());
        let registry = StoreRegistry::new(store.clone());
        registry.publish("Greeter", addr(1)).unwrap();
        registry.publish("Clock", addr(1)).unwrap();
        registry.publish("Greeter", addr(2)).unwrap();

        registry.clear(addr(1));

        assert_eq!(
            store.children("/my-rpc/Greeter").unwrap(),
            vec!["127.0.0.1:2".to_string()]
        );
        assert!(store.children("/my-rpc/Clock").unwrap().is_empty());
        assert_eq!(registry.registered_paths(), vec!["/my-rpc/Greeter/127.0.0.1:2"]);
    }

    struct Unreachable;

    impl CoordinationStore for Unreachable {
        fn create_persistent(&self, _: &str) -> Result<()> {
            Err(RingrpcError::Topology("store unreachable".into()))
        }
        fn exists(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        fn children(&self, _: &str) -> Result<Vec<String>> {
            Err(RingrpcError::Topology("store unreachable".into()))
        }
        fn delete(&self, _: &str) -> Result<()> {
            Err(RingrpcError::Topology("store unreachable".into()))
        }
        fn watch_children(&self, _: &str) -> Result<crate::store::ChildrenWatch> {
            Err(RingrpcError::Topology("store unreachable".into()))
        }
    }

    #[test]
    fn test_publish_failure_is_topology_error() {
        let registry = StoreRegistry::new(Arc::new(Unreachable));
        let result = registry.publish("Greeter", addr(1));
        assert!(matches!(result, Err(RingrpcError::Topology(_))));
        assert!(registry.registered_paths().is_empty());

        // clear never panics or propagates
        registry.clear(addr(1));
    }
}
