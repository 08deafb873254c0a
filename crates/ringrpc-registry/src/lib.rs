//! ringrpc Registry
//!
//! Service publication, discovery and load balancing.
//!
//! # Components
//!
//! - **[`CoordinationStore`]**: hierarchical store with child watches;
//!   [`ZkStore`] talks to a ZooKeeper ensemble, [`MemoryStore`] is the
//!   in-process implementation
//! - **[`ServiceRegistry`]** / **[`StoreRegistry`]**: publishes
//!   `/my-rpc/{service}/{host:port}` nodes and clears them on shutdown
//! - **[`ServiceDiscovery`]**: [`StoreDiscovery`] (cached, watched) and
//!   [`StaticDiscovery`] (fixed node list)
//! - **[`LoadBalance`]**: [`ConsistentHashLoadBalance`] and
//!   [`RandomLoadBalance`], resolved by name via [`load_balancers`]
//!
//! # Example
//!
//! ```
//! use ringrpc_common::{CallEnvelope, ServiceKey};
//! use ringrpc_registry::{
//!     load_balancers, MemoryStore, ServiceDiscovery, ServiceRegistry, StoreDiscovery,
//!     StoreRegistry,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let registry = StoreRegistry::new(store.clone());
//! registry.publish("Greeter", "127.0.0.1:19998".parse().unwrap()).unwrap();
//!
//! let discovery = StoreDiscovery::new(store, load_balancers().get("loadBalance").unwrap());
//! let call = CallEnvelope::new(&ServiceKey::new("Greeter"), "greet", vec![], vec![]);
//! assert_eq!(discovery.lookup(&call).unwrap(), "127.0.0.1:19998");
//! ```

pub mod balance;
pub mod discovery;
pub mod registry;
pub mod store;
pub mod zookeeper;

pub use balance::{
    load_balancers, ConsistentHashLoadBalance, LoadBalance, RandomLoadBalance, DEFAULT_REPLICAS,
};
pub use discovery::{split_host_port, ServiceDiscovery, StaticDiscovery, StoreDiscovery};
pub use registry::{ServiceRegistry, StoreRegistry};
pub use store::{
    address_path, service_path, ChildrenWatch, CoordinationStore, MemoryStore, ROOT_PATH,
};
pub use zookeeper::ZkStore;

use ringrpc_common::{ExtensionLoader, Result, RuntimeConfig};
use std::sync::Arc;

/// Name of the store-backed registry/discovery backend.
pub const STORE_BACKEND: &str = "zk";

/// Connects to the ZooKeeper ensemble at `config.registry_address`, bounded
/// by `config.connect_timeout`.
pub fn connect_store(config: &RuntimeConfig) -> Result<Arc<dyn CoordinationStore>> {
    let store = ZkStore::connect(&config.registry_address, config.connect_timeout)?;
    Ok(Arc::new(store))
}

/// Registry backends, with the store-backed one under [`STORE_BACKEND`].
pub fn registries(store: Arc<dyn CoordinationStore>) -> ExtensionLoader<dyn ServiceRegistry> {
    ExtensionLoader::new().with(STORE_BACKEND, move || {
        Arc::new(StoreRegistry::new(Arc::clone(&store))) as Arc<dyn ServiceRegistry>
    })
}

/// Discovery backends, with the store-backed one under [`STORE_BACKEND`].
pub fn discoveries(
    store: Arc<dyn CoordinationStore>,
    balancer: Arc<dyn LoadBalance>,
) -> ExtensionLoader<dyn ServiceDiscovery> {
    ExtensionLoader::new().with(STORE_BACKEND, move || {
        Arc::new(StoreDiscovery::new(Arc::clone(&store), Arc::clone(&balancer)))
            as Arc<dyn ServiceDiscovery>
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_common::{CallEnvelope, ServiceKey};

    #[test]
    fn test_backends_share_one_store() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let registry = registries(store.clone()).get(STORE_BACKEND).unwrap();
        let discovery = discoveries(store, Arc::new(RandomLoadBalance))
            .get(STORE_BACKEND)
            .unwrap();

        registry
            .publish("Greeter", "127.0.0.1:7000".parse().unwrap())
            .unwrap();
        let call = CallEnvelope::new(&ServiceKey::new("Greeter"), "greet", vec![], vec![]);
        assert_eq!(discovery.lookup(&call).unwrap(), "127.0.0.1:7000");
    }

    #[test]
    fn test_connect_store_uses_registry_address() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = RuntimeConfig::default()
            .with_registry_address(addr.clone())
            .with_connect_timeout(std::time::Duration::from_millis(300));
        match connect_store(&config) {
            Err(ringrpc_common::RingrpcError::Topology(msg)) => assert!(msg.contains(&addr), "{}", msg),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("nothing listens on {}", addr),
        }
    }
}
