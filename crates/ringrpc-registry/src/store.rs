//! Coordination store abstraction.
//!
//! The registry and discovery talk to a hierarchical key store with child
//! watches (ZooKeeper-like). Paths are `/`-separated; every node may have
//! children; creating a node creates its missing ancestors.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use ringrpc_common::{Result, RingrpcError};

/// Root under which every service is published.
pub const ROOT_PATH: &str = "/my-rpc";

/// Live view of a node's children. Every membership change publishes a new
/// `Arc`, so pointer identity changes exactly when the list does.
pub type ChildrenWatch = watch::Receiver<Arc<Vec<String>>>;

/// `/my-rpc/{service name}`
pub fn service_path(service_name: &str) -> String {
    format!("{}/{}", ROOT_PATH, service_name)
}

/// `/my-rpc/{service name}/{host:port}`
pub fn address_path(service_name: &str, addr: SocketAddr) -> String {
    format!("{}/{}/{}", ROOT_PATH, service_name, addr)
}

/// Hierarchical store used by [`ServiceRegistry`](crate::ServiceRegistry)
/// and [`StoreDiscovery`](crate::StoreDiscovery).
///
/// Failures reaching the store are reported as [`RingrpcError::Topology`].
pub trait CoordinationStore: Send + Sync {
    /// Creates a durable node and any missing ancestors. Creating a node that
    /// already exists succeeds.
    fn create_persistent(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> Result<bool>;

    /// Child names (last path segment) of `path`, sorted. Empty if the node
    /// does not exist.
    fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Deletes a leaf node. Deleting a missing node succeeds.
    fn delete(&self, path: &str) -> Result<()>;

    /// Subscribes to the children of `path`. The receiver starts with the
    /// current children and sees every later change.
    fn watch_children(&self, path: &str) -> Result<ChildrenWatch>;
}

#[derive(Default)]
struct Tree {
    /// node path -> child names
    nodes: std::collections::HashMap<String, BTreeSet<String>>,
}

impl Tree {
    fn children_of(&self, path: &str) -> Vec<String> {
        self.nodes
            .get(path)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// In-process [`CoordinationStore`].
///
/// Suitable for single-process deployments and tests: a server and a client
/// that share one `MemoryStore` see each other's publications immediately.
#[derive(Default)]
pub struct MemoryStore {
    tree: Mutex<Tree>,
    watchers: DashMap<String, watch::Sender<Arc<Vec<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, parent: &str, children: Vec<String>) {
        if let Some(sender) = self.watchers.get(parent) {
            debug!(path = %parent, count = children.len(), "children changed");
            sender.send_replace(Arc::new(children));
        }
    }
}

pub(crate) fn validate(path: &str) -> Result<()> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') || path.contains("//") {
        return Err(RingrpcError::Topology(format!("invalid path '{}'", path)));
    }
    Ok(())
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

impl CoordinationStore for MemoryStore {
    fn create_persistent(&self, path: &str) -> Result<()> {
        validate(path)?;

        // Notify under the lock so watchers observe changes in order.
        let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        let mut current = path;
        while current != "/" {
            if tree.nodes.contains_key(current) {
                break;
            }
            tree.nodes.insert(current.to_string(), BTreeSet::new());
            let (parent, name) = split_parent(current);
            tree.nodes
                .entry(parent.to_string())
                .or_default()
                .insert(name.to_string());
            self.notify(parent, tree.children_of(parent));
            current = parent;
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        let tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tree.nodes.contains_key(path))
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        let tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(tree.children_of(path))
    }

    fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;

        let mut tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        match tree.nodes.get(path) {
            None => return Ok(()),
            Some(children) if !children.is_empty() => {
                return Err(RingrpcError::Topology(format!(
                    "cannot delete '{}': node has children",
                    path
                )));
            }
            Some(_) => {}
        }
        tree.nodes.remove(path);
        let (parent, name) = split_parent(path);
        if let Some(children) = tree.nodes.get_mut(parent) {
            children.remove(name);
        }
        self.notify(parent, tree.children_of(parent));
        Ok(())
    }

    fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        validate(path)?;
        // Hold the tree lock so no change slips between reading and subscribing.
        let tree = self.tree.lock().unwrap_or_else(PoisonError::into_inner);
        let receiver = self
            .watchers
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(Arc::new(tree.children_of(path))).0)
            .subscribe();
        Ok(receiver)
    }
}
