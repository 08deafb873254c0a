//! ZooKeeper-backed coordination store.
//!
//! The ZooKeeper session lives on a dedicated thread with its own runtime;
//! [`ZkStore`] forwards each store operation to it and waits for the reply,
//! so the synchronous [`CoordinationStore`] API can be used from any thread,
//! including tokio workers.

use crossbeam::channel;
use dashmap::DashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use zookeeper_client as zk;

use ringrpc_common::{Result, RingrpcError};

use crate::store::{validate, ChildrenWatch, CoordinationStore};

type Reply<T> = channel::Sender<Result<T>>;

enum Command {
    Create(String, Reply<()>),
    Exists(String, Reply<bool>),
    Children(String, Reply<Vec<String>>),
    Delete(String, Reply<()>),
    Watch(String, watch::Sender<Arc<Vec<String>>>),
}

/// [`CoordinationStore`] on a ZooKeeper ensemble.
///
/// Nodes are created persistent with open ACLs. Child watches are re-armed
/// after every notification, so a [`ChildrenWatch`] follows the node for the
/// lifetime of the store.
///
/// # Example
///
/// ```no_run
/// use ringrpc_registry::{StoreRegistry, ZkStore};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let store = ZkStore::connect("127.0.0.1:2181", Duration::from_secs(5))?;
/// let registry = StoreRegistry::new(Arc::new(store));
/// # Ok::<(), ringrpc_common::RingrpcError>(())
/// ```
pub struct ZkStore {
    address: String,
    commands: mpsc::UnboundedSender<Command>,
    request_timeout: Duration,
    watchers: DashMap<String, watch::Sender<Arc<Vec<String>>>>,
}

impl ZkStore {
    /// Connects to the ensemble at `address` (`"host:port[,host:port...]"`).
    ///
    /// `timeout` bounds the initial connect and every later request.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::Topology`] if no session is established
    /// within `timeout`.
    pub fn connect(address: &str, timeout: Duration) -> Result<Self> {
        let (commands, queue) = mpsc::unbounded_channel();
        let (ready, connected) = channel::bounded(1);

        let cluster = address.to_string();
        thread::Builder::new()
            .name("ringrpc-zk".to_string())
            .spawn(move || run_session(cluster, timeout, queue, ready))
            .map_err(|e| RingrpcError::Topology(format!("Failed to start zookeeper thread: {}", e)))?;

        connected
            .recv()
            .map_err(|_| RingrpcError::Topology(format!("{}: zookeeper session ended", address)))??;
        info!(addr = %address, "connected to zookeeper");

        Ok(Self {
            address: address.to_string(),
            commands,
            request_timeout: timeout,
            watchers: DashMap::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, outcome) = channel::bounded(1);
        self.commands
            .send(command(reply))
            .map_err(|_| self.session_gone())?;
        match outcome.recv_timeout(self.request_timeout) {
            Ok(result) => result,
            Err(channel::RecvTimeoutError::Timeout) => Err(RingrpcError::Topology(format!(
                "{}: zookeeper request timed out after {}ms",
                self.address,
                self.request_timeout.as_millis()
            ))),
            Err(channel::RecvTimeoutError::Disconnected) => Err(self.session_gone()),
        }
    }

    fn session_gone(&self) -> RingrpcError {
        RingrpcError::Topology(format!("{}: zookeeper session ended", self.address))
    }
}

impl CoordinationStore for ZkStore {
    fn create_persistent(&self, path: &str) -> Result<()> {
        validate(path)?;
        self.request(|reply| Command::Create(path.to_string(), reply))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        validate(path)?;
        self.request(|reply| Command::Exists(path.to_string(), reply))
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        validate(path)?;
        self.request(|reply| Command::Children(path.to_string(), reply))
    }

    fn delete(&self, path: &str) -> Result<()> {
        validate(path)?;
        self.request(|reply| Command::Delete(path.to_string(), reply))
    }

    fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        validate(path)?;
        if let Some(sender) = self.watchers.get(path) {
            return Ok(sender.subscribe());
        }

        let current = self.children(path)?;
        let sender = self
            .watchers
            .entry(path.to_string())
            .or_insert_with(|| {
                let (sender, _) = watch::channel(Arc::new(current));
                let _ = self
                    .commands
                    .send(Command::Watch(path.to_string(), sender.clone()));
                sender
            })
            .clone();
        Ok(sender.subscribe())
    }
}

fn topology(address: &str, err: zk::Error) -> RingrpcError {
    RingrpcError::Topology(format!("{}: {}", address, err))
}

/// `/a/b/c` -> `/a`, `/a/b`, `/a/b/c`
fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .skip(1)
        .map(|(idx, _)| &path[..idx])
        .chain(std::iter::once(path))
        .collect()
}

fn run_session(
    address: String,
    timeout: Duration,
    mut queue: mpsc::UnboundedReceiver<Command>,
    ready: channel::Sender<Result<()>>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(RingrpcError::Topology(format!(
                "Failed to start zookeeper runtime: {}",
                e
            ))));
            return;
        }
    };

    runtime.block_on(async move {
        let client = match tokio::time::timeout(timeout, zk::Client::connect(&address)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => {
                let _ = ready.send(Err(topology(&address, e)));
                return;
            }
            Err(_) => {
                let _ = ready.send(Err(RingrpcError::Topology(format!(
                    "{}: no zookeeper session within {}ms",
                    address,
                    timeout.as_millis()
                ))));
                return;
            }
        };
        let _ = ready.send(Ok(()));

        while let Some(command) = queue.recv().await {
            match command {
                Command::Create(path, reply) => {
                    let _ = reply.send(create_persistent(&client, &address, &path).await);
                }
                Command::Exists(path, reply) => {
                    let outcome = client.check_stat(&path).await;
                    let _ = reply.send(
                        outcome
                            .map(|stat| stat.is_some())
                            .map_err(|e| topology(&address, e)),
                    );
                }
                Command::Children(path, reply) => {
                    let _ = reply.send(children(&client, &address, &path).await);
                }
                Command::Delete(path, reply) => {
                    let _ = reply.send(delete(&client, &address, &path).await);
                }
                Command::Watch(path, sender) => {
                    tokio::spawn(follow_children(client.clone(), path, sender));
                }
            }
        }
        debug!(addr = %address, "zookeeper session closed");
    });
}

async fn create_persistent(client: &zk::Client, address: &str, path: &str) -> Result<()> {
    let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
    for node in ancestors(path) {
        match client.create(node, &[], &options).await {
            Ok(_) => debug!(path = %node, "created node"),
            Err(zk::Error::NodeExists) => {}
            Err(e) => return Err(topology(address, e)),
        }
    }
    Ok(())
}

async fn children(client: &zk::Client, address: &str, path: &str) -> Result<Vec<String>> {
    match client.list_children(path).await {
        Ok(mut names) => {
            names.sort();
            Ok(names)
        }
        Err(zk::Error::NoNode) => Ok(Vec::new()),
        Err(e) => Err(topology(address, e)),
    }
}

async fn delete(client: &zk::Client, address: &str, path: &str) -> Result<()> {
    match client.delete(path, None).await {
        Ok(()) | Err(zk::Error::NoNode) => Ok(()),
        Err(zk::Error::NotEmpty) => Err(RingrpcError::Topology(format!(
            "cannot delete '{}': node has children",
            path
        ))),
        Err(e) => Err(topology(address, e)),
    }
}

/// Publishes the children of `path` into `sender` until the session ends.
async fn follow_children(client: zk::Client, path: String, sender: watch::Sender<Arc<Vec<String>>>) {
    loop {
        let watcher = match client.list_and_watch_children(&path).await {
            Ok((mut names, watcher)) => {
                names.sort();
                publish(&sender, &path, names);
                watcher
            }
            // Wait for the node to appear.
            Err(zk::Error::NoNode) => match client.check_and_watch_stat(&path).await {
                Ok((stat, watcher)) => {
                    if stat.is_some() {
                        continue;
                    }
                    publish(&sender, &path, Vec::new());
                    watcher
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "children watch stopped");
                    return;
                }
            },
            Err(e) => {
                warn!(path = %path, error = %e, "children watch stopped");
                return;
            }
        };
        watcher.changed().await;
    }
}

fn publish(sender: &watch::Sender<Arc<Vec<String>>>, path: &str, names: Vec<String>) {
    sender.send_if_modified(|current| {
        if **current == names {
            return false;
        }
        debug!(path = %path, count = names.len(), "children changed");
        *current = Arc::new(names);
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::service_path;

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/my-rpc"), vec!["/my-rpc"]);
        assert_eq!(
            ancestors("/my-rpc/Greeter/127.0.0.1:1"),
            vec!["/my-rpc", "/my-rpc/Greeter", "/my-rpc/Greeter/127.0.0.1:1"]
        );
    }

    #[test]
    fn test_publish_keeps_identity_when_unchanged() {
        let (sender, receiver) = watch::channel(Arc::new(vec!["a:1".to_string()]));
        let before = receiver.borrow().clone();

        publish(&sender, "/p", vec!["a:1".to_string()]);
        assert!(Arc::ptr_eq(&before, &receiver.borrow()));

        publish(&sender, "/p", vec!["a:1".to_string(), "b:2".to_string()]);
        assert_eq!(receiver.borrow().len(), 2);
    }

    #[test]
    fn test_unreachable_ensemble_fails_within_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = std::time::Instant::now();
        let result = ZkStore::connect(&addr, Duration::from_millis(500));
        assert!(matches!(result, Err(RingrpcError::Topology(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Needs a ZooKeeper at `RINGRPC_REGISTRY_ADDRESS` (default
    /// `127.0.0.1:2181`): `cargo test -p ringrpc-registry -- --ignored`.
    #[test]
    #[ignore]
    fn test_live_ensemble_round_trip() {
        let address = std::env::var("RINGRPC_REGISTRY_ADDRESS")
            .unwrap_or_else(|_| "127.0.0.1:2181".to_string());
        let store = ZkStore::connect(&address, Duration::from_secs(5)).unwrap();
        let service = service_path(&format!("ZkRoundTrip{}", std::process::id()));
        let node = format!("{}/127.0.0.1:7000", service);

        let watch = store.watch_children(&service).unwrap();
        assert!(watch.borrow().is_empty());

        store.create_persistent(&node).unwrap();
        store.create_persistent(&node).unwrap();
        assert!(store.exists(&node).unwrap());
        assert_eq!(store.children(&service).unwrap(), vec!["127.0.0.1:7000"]);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while watch.borrow().is_empty() {
            assert!(std::time::Instant::now() < deadline, "watch never fired");
            thread::sleep(Duration::from_millis(20));
        }

        assert!(matches!(store.delete(&service), Err(RingrpcError::Topology(_))));
        store.delete(&node).unwrap();
        store.delete(&node).unwrap();
        store.delete(&service).unwrap();
        assert!(store.children(&service).unwrap().is_empty());
    }
}
