use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use ringrpc_common::transport::connect_async;
use ringrpc_common::Result;

use crate::connection::{Connection, ConnectionOptions};
use crate::pending::PendingCalls;

/// Connections keyed by `"host:port"`, one per address.
///
/// # Strategy
///
/// 1. Return the cached connection if it is still alive
/// 2. Otherwise drop it and connect (outside the lock, bounded by the
///    connect timeout)
/// 3. If another task connected to the same address in the meantime, keep
///    theirs and close ours
///
/// # Thread Safety
///
/// The map is guarded by an async mutex that is never held across a
/// connect, so a slow peer does not stall calls to other addresses.
///
/// # Example
///
/// ```rust,no_run
/// use ringrpc_client::{ConnectionOptions, ConnectionPool, PendingCalls};
/// use ringrpc_common::transport::{Codecs, WireCodec};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = ConnectionOptions {
///     codec: WireCodec::new(Arc::new(Codecs::default())),
///     codec_id: 1,
///     compress_id: 1,
///     heartbeat_interval: Duration::from_secs(5),
/// };
/// let pool = ConnectionPool::new(options, Duration::from_secs(5), Arc::new(PendingCalls::new()));
/// let conn = pool.get("127.0.0.1:19998").await?;
/// assert!(conn.is_alive());
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    options: ConnectionOptions,
    connect_timeout: Duration,
    pending: Arc<PendingCalls>,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(
        options: ConnectionOptions,
        connect_timeout: Duration,
        pending: Arc<PendingCalls>,
    ) -> Self {
        Self {
            options,
            connect_timeout,
            pending,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a live connection to `address`, connecting if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Timeout`](ringrpc_common::RingrpcError::Timeout) if the
    /// connect deadline passes, or
    /// [`Connection`](ringrpc_common::RingrpcError::Connection) if the peer
    /// refuses.
    pub async fn get(&self, address: &str) -> Result<Arc<Connection>> {
        {
            let mut connections = self.connections.lock().await;
            match connections.get(address) {
                Some(conn) if conn.is_alive() => return Ok(Arc::clone(conn)),
                Some(_) => {
                    debug!(addr = %address, "evicting dead connection");
                    connections.remove(address);
                }
                None => {}
            }
        }

        let stream = connect_async(address, self.connect_timeout).await?;
        let fresh = Arc::new(Connection::spawn(
            stream,
            address,
            self.options.clone(),
            self.pending.clone(),
        ));

        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(address) {
            if existing.is_alive() {
                fresh.close();
                return Ok(Arc::clone(existing));
            }
        }
        connections.insert(address.to_string(), Arc::clone(&fresh));
        info!(addr = %address, "connected");
        Ok(fresh)
    }

    /// Drops and closes the connection to `address`, if any.
    pub async fn evict(&self, address: &str) {
        if let Some(conn) = self.connections.lock().await.remove(address) {
            debug!(addr = %address, "connection evicted");
            conn.close();
        }
    }

    /// Closes `conn` and drops it from the pool, unless the pool already
    /// holds a different connection for `address`. A caller whose send
    /// failed must not tear down a replacement another caller set up.
    pub async fn evict_connection(&self, address: &str, conn: &Arc<Connection>) {
        {
            let mut connections = self.connections.lock().await;
            if connections
                .get(address)
                .is_some_and(|current| current.id() == conn.id())
            {
                connections.remove(address);
                debug!(addr = %address, connection = conn.id(), "connection evicted");
            }
        }
        conn.close();
    }

    /// Number of cached connections, live or not.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Closes every connection.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<Connection>> =
            self.connections.lock().await.drain().map(|(_, c)| c).collect();
        for conn in drained {
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_common::transport::{Codecs, WireCodec};
    use ringrpc_common::RingrpcError;
    use tokio::net::TcpListener;

    fn pool() -> ConnectionPool {
        let options = ConnectionOptions {
            codec: WireCodec::new(Arc::new(Codecs::default())),
            codec_id: 1,
            compress_id: 1,
            heartbeat_interval: Duration::from_secs(60),
        };
        ConnectionPool::new(options, Duration::from_secs(2), Arc::new(PendingCalls::new()))
    }

    #[tokio::test]
    async fn test_connect_refused_fails() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = pool().get(&addr).await;
        assert!(matches!(result, Err(RingrpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_live_connection_is_shared() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let pool = pool();
        let a = pool.get(&addr).await.unwrap();
        let b = pool.get(&addr).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_dead_connection_is_replaced() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let pool = pool();
        let first = pool.get(&addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        tokio::time::timeout(Duration::from_secs(2), async {
            while first.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });
        let second = pool.get(&addr).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_alive());
        let _server_side = accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_evicting_stale_connection_keeps_replacement() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let pool = pool();
        let stale = pool.get(&addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);

        tokio::time::timeout(Duration::from_secs(2), async {
            while stale.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });
        let replacement = pool.get(&addr).await.unwrap();
        let _server_side = accept.await.unwrap().unwrap();
        let mut in_flight = pool
            .pending
            .register(ringrpc_common::RequestId::new_v4(), replacement.id());

        // The holder of the stale connection reports its send failure late.
        pool.evict_connection(&addr, &stale).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(replacement.is_alive());
        assert_eq!(pool.len().await, 1);
        assert!(Arc::ptr_eq(&pool.get(&addr).await.unwrap(), &replacement));
        assert!(matches!(
            in_flight.try_recv(),
            Err(tokio::sync::oneshot::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_evict_connection_removes_current_entry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let pool = pool();
        let conn = pool.get(&addr).await.unwrap();
        let _server_side = listener.accept().await.unwrap();
        pool.evict_connection(&addr, &conn).await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_evict_removes_entry() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let pool = pool();
        let conn = pool.get(&addr).await.unwrap();
        pool.evict(&addr).await;
        assert!(pool.is_empty().await);

        tokio::time::timeout(Duration::from_secs(2), async {
            while conn.is_alive() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
