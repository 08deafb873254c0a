//! Load balancing strategies.
//!
//! A strategy picks one address out of the candidates discovery found for a
//! call. Strategies are looked up by name through
//! [`load_balancers`], which registers:
//!
//! - `"loadBalance"`: consistent hashing (the default)
//! - `"consistentHash"`: same strategy under its descriptive name
//! - `"random"`: uniform random choice

mod consistent_hash;
mod random;

pub use consistent_hash::{ConsistentHashLoadBalance, DEFAULT_REPLICAS};
pub use random::RandomLoadBalance;

use std::sync::Arc;

use ringrpc_common::{CallEnvelope, ExtensionLoader};

/// Chooses a target address for a call.
///
/// Implementors provide [`do_select`](Self::do_select) for two or more
/// candidates; [`select`](Self::select) handles the degenerate cases.
pub trait LoadBalance: Send + Sync {
    /// `None` for no candidates, the sole candidate for one, otherwise the
    /// strategy's choice.
    fn select(&self, addresses: &Arc<Vec<String>>, call: &CallEnvelope) -> Option<String> {
        match addresses.len() {
            0 => None,
            1 => Some(addresses[0].clone()),
            _ => self.do_select(addresses, call),
        }
    }

    fn do_select(&self, addresses: &Arc<Vec<String>>, call: &CallEnvelope) -> Option<String>;
}

/// Loader with the built-in strategies registered.
pub fn load_balancers() -> ExtensionLoader<dyn LoadBalance> {
    ExtensionLoader::new()
        .with("loadBalance", || {
            Arc::new(ConsistentHashLoadBalance::new()) as Arc<dyn LoadBalance>
        })
        .with("consistentHash", || {
            Arc::new(ConsistentHashLoadBalance::new()) as Arc<dyn LoadBalance>
        })
        .with("random", || Arc::new(RandomLoadBalance) as Arc<dyn LoadBalance>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_common::ServiceKey;

    fn call() -> CallEnvelope {
        CallEnvelope::new(&ServiceKey::new("Greeter"), "greet", vec![], vec![])
    }

    #[test]
    fn test_degenerate_cases_for_every_strategy() {
        let loader = load_balancers();
        for name in loader.names() {
            let balancer = loader.get(&name).unwrap();
            assert_eq!(balancer.select(&Arc::new(vec![]), &call()), None, "{}", name);
            assert_eq!(
                balancer.select(&Arc::new(vec!["only:1".to_string()]), &call()),
                Some("only:1".to_string()),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_default_name_resolves() {
        let loader = load_balancers();
        assert!(loader.contains("loadBalance"));
        let a = loader.get("loadBalance").unwrap();
        let b = loader.get("loadBalance").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(loader.get("roundRobin").is_err());
    }

    #[test]
    fn test_selection_is_a_candidate() {
        let addresses = Arc::new(vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]);
        let loader = load_balancers();
        for name in loader.names() {
            let balancer = loader.get(&name).unwrap();
            for _ in 0..20 {
                let picked = balancer.select(&addresses, &call()).unwrap();
                assert!(addresses.contains(&picked));
            }
        }
    }
}
