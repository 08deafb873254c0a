use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use ringrpc_common::{CallEnvelope, Result, RingrpcError};

use crate::balance::LoadBalance;
use crate::store::{service_path, ChildrenWatch, CoordinationStore};

/// Resolves the address that should serve a call.
pub trait ServiceDiscovery: Send + Sync {
    /// Returns one `"host:port"` for the call's service.
    ///
    /// # Errors
    ///
    /// Returns [`RingrpcError::ServiceNotFound`] when no address is registered
    /// for the service name.
    fn lookup(&self, call: &CallEnvelope) -> Result<String>;
}

/// Splits `"host:port"`.
///
/// IPv6 hosts may be bracketed (`"[::1]:19998"`); the brackets are removed.
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| RingrpcError::InvalidRequest(format!("missing port in '{}'", address)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| RingrpcError::InvalidRequest(format!("invalid port in '{}'", address)))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(RingrpcError::InvalidRequest(format!(
            "missing host in '{}'",
            address
        )));
    }
    Ok((host.to_string(), port))
}

/// Discovery backed by a [`CoordinationStore`].
///
/// The first lookup of a service name subscribes to the children of its
/// service path; the subscription then doubles as the address cache, so
/// later lookups never touch the store and membership changes show up as
/// soon as the store delivers them.
pub struct StoreDiscovery {
    store: Arc<dyn CoordinationStore>,
    balancer: Arc<dyn LoadBalance>,
    cache: DashMap<String, ChildrenWatch>,
}

impl StoreDiscovery {
    pub fn new(store: Arc<dyn CoordinationStore>, balancer: Arc<dyn LoadBalance>) -> Self {
        Self {
            store,
            balancer,
            cache: DashMap::new(),
        }
    }

    /// Current addresses of `service_name`, subscribing on first use.
    pub fn addresses(&self, service_name: &str) -> Result<Arc<Vec<String>>> {
        if let Some(watch) = self.cache.get(service_name) {
            return Ok(Arc::clone(&watch.borrow()));
        }

        let watch = match self.cache.entry(service_name.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let watch = self.store.watch_children(&service_path(service_name))?;
                debug!(service = %service_name, "watching service addresses");
                entry.insert(watch.clone());
                watch
            }
        };
        let addresses = Arc::clone(&watch.borrow());
        Ok(addresses)
    }
}

impl ServiceDiscovery for StoreDiscovery {
    fn lookup(&self, call: &CallEnvelope) -> Result<String> {
        let service_name = call.rpc_service_name();
        let addresses = self.addresses(&service_name)?;

        let address = self
            .balancer
            .select(&addresses, call)
            .ok_or_else(|| RingrpcError::ServiceNotFound(service_name.clone()))?;
        info!(service = %service_name, addr = %address, "found service address");
        Ok(address)
    }
}

/// Discovery over a fixed address list shared by every service.
///
/// Used when no coordination store is available (the CLI's `-n` nodes).
pub struct StaticDiscovery {
    addresses: Arc<Vec<String>>,
    balancer: Arc<dyn LoadBalance>,
}

impl StaticDiscovery {
    pub fn new(addresses: Vec<String>, balancer: Arc<dyn LoadBalance>) -> Self {
        Self {
            addresses: Arc::new(addresses),
            balancer,
        }
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn lookup(&self, call: &CallEnvelope) -> Result<String> {
        self.balancer
            .select(&self.addresses, call)
            .ok_or_else(|| RingrpcError::ServiceNotFound(call.rpc_service_name()))
    }
}
