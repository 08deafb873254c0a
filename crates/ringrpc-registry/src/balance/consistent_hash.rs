use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use ringrpc_common::CallEnvelope;

use super::LoadBalance;

/// Virtual points per address on the ring.
pub const DEFAULT_REPLICAS: usize = 160;

/// Consistent-hash selection over a ring of virtual nodes.
///
/// Each address is placed on a 32-bit ring `replicas` times. A call's key is
/// its service name followed by its stringified parameters; the chosen
/// address owns the first ring position at or after the key's hash,
/// wrapping to the lowest position. Calls with equal keys land on the same
/// address while the candidate list is unchanged, and growing the list by
/// one address moves only about `1/K` of the keys (all of them to the new
/// address).
///
/// One ring is kept per service name and rebuilt when discovery hands over
/// a different candidate list (compared by `Arc` identity). Two callers may
/// race to rebuild; both build the same ring and the last store wins.
pub struct ConsistentHashLoadBalance {
    replicas: usize,
    selectors: DashMap<String, Arc<Selector>>,
}

struct Selector {
    addresses: Arc<Vec<String>>,
    ring: BTreeMap<u32, String>,
}

impl Selector {
    fn build(addresses: &Arc<Vec<String>>, replicas: usize) -> Self {
        let mut ring = BTreeMap::new();
        for address in addresses.iter() {
            for i in 0..replicas / 4 {
                let digest = digest(&format!("{}{}", address, i));
                for h in 0..4 {
                    ring.insert(position(&digest, h), address.clone());
                }
            }
        }
        Self {
            addresses: Arc::clone(addresses),
            ring,
        }
    }

    fn select(&self, key: &str) -> Option<String> {
        let hash = position(&digest(key), 0);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, address)| address.clone())
    }
}

/// First 16 bytes of the SHA-256 of `key`.
fn digest(key: &str) -> [u8; 16] {
    let full = Sha256::digest(key.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

/// Little-endian word `idx` (0..4) of a digest.
fn position(digest: &[u8; 16], idx: usize) -> u32 {
    let i = idx * 4;
    u32::from_le_bytes([digest[i], digest[i + 1], digest[i + 2], digest[i + 3]])
}

fn call_key(service_name: &str, call: &CallEnvelope) -> String {
    let params: Vec<String> = call.parameters.iter().map(|p| p.to_string()).collect();
    format!("{}{}", service_name, params.join(","))
}

impl ConsistentHashLoadBalance {
    pub fn new() -> Self {
        Self::with_replicas(DEFAULT_REPLICAS)
    }

    /// `replicas` is rounded down to a multiple of 4, minimum 4.
    pub fn with_replicas(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(4) / 4 * 4,
            selectors: DashMap::new(),
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

impl Default for ConsistentHashLoadBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalance for ConsistentHashLoadBalance {
    fn do_select(&self, addresses: &Arc<Vec<String>>, call: &CallEnvelope) -> Option<String> {
        let service_name = call.rpc_service_name();

        let cached = self
            .selectors
            .get(&service_name)
            .map(|s| Arc::clone(s.value()));
        let selector = match cached {
            Some(selector) if Arc::ptr_eq(&selector.addresses, addresses) => selector,
            _ => {
                debug!(service = %service_name, addresses = addresses.len(), "rebuilding hash ring");
                let selector = Arc::new(Selector::build(addresses, self.replicas));
                self.selectors
                    .insert(service_name.clone(), Arc::clone(&selector));
                selector
            }
        };

        selector.select(&call_key(&service_name, call))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringrpc_common::ServiceKey;
    use serde_json::json;

    fn addresses(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.0.{}:19998", i + 1)).collect()
    }

    fn call_with(arg: usize) -> CallEnvelope {
        CallEnvelope::new(
            &ServiceKey::new("Greeter"),
            "greet",
            vec!["Integer".into()],
            vec![json!(arg)],
        )
    }

    #[test]
    fn test_ring_has_replica_points_per_address() {
        let list = Arc::new(addresses(3));
        let selector = Selector::build(&list, DEFAULT_REPLICAS);
        // Collisions on a 32-bit ring are possible but vanishingly rare here.
        assert!(selector.ring.len() >= 3 * DEFAULT_REPLICAS - 2);
    }

    #[test]
    fn test_same_key_same_address() {
        let lb = ConsistentHashLoadBalance::new();
        let list = Arc::new(addresses(5));
        let first = lb.select(&list, &call_with(7)).unwrap();
        for _ in 0..10 {
            assert_eq!(lb.select(&list, &call_with(7)).unwrap(), first);
        }

        // A different list with the same contents builds an identical ring.
        let fresh = Arc::new(addresses(5));
        assert_eq!(lb.select(&fresh, &call_with(7)).unwrap(), first);
    }

    #[test]
    fn test_keys_spread_over_addresses() {
        let lb = ConsistentHashLoadBalance::new();
        let list = Arc::new(addresses(4));
        let mut hits = std::collections::HashMap::new();
        for i in 0..2000 {
            *hits.entry(lb.select(&list, &call_with(i)).unwrap()).or_insert(0usize) += 1;
        }
        assert_eq!(hits.len(), 4);
        for count in hits.values() {
            assert!(*count > 200, "uneven distribution: {:?}", hits);
        }
    }

    #[test]
    fn test_growth_remaps_about_one_kth_to_the_new_address() {
        let lb = ConsistentHashLoadBalance::new();
        let before = Arc::new(addresses(10));
        let after = Arc::new(addresses(11));
        let newcomer = after[10].clone();

        let total = 2000;
        let mut moved = 0;
        for i in 0..total {
            let old = lb.select(&before, &call_with(i)).unwrap();
            let new = lb.select(&after, &call_with(i)).unwrap();
            if old != new {
                assert_eq!(new, newcomer, "keys may only move to the added address");
                moved += 1;
            }
        }

        let fraction = moved as f64 / total as f64;
        assert!(fraction > 0.02 && fraction < 0.25, "moved fraction {}", fraction);
    }

    #[test]
    fn test_rings_are_per_service() {
        let lb = ConsistentHashLoadBalance::new();
        let greeter = Arc::new(addresses(3));
        let other = Arc::new(vec!["192.168.1.1:1".to_string(), "192.168.1.2:2".to_string()]);

        let a = lb.select(&greeter, &call_with(1)).unwrap();
        let b_call = CallEnvelope::new(&ServiceKey::new("Clock"), "now", vec![], vec![]);
        let b = lb.select(&other, &b_call).unwrap();

        assert!(greeter.contains(&a));
        assert!(other.contains(&b));
        assert_eq!(lb.selectors.len(), 2);
    }

    #[test]
    fn test_min_replicas() {
        assert_eq!(ConsistentHashLoadBalance::with_replicas(1).replicas(), 4);
    }

    #[test]
    fn test_replicas_match_ring_points() {
        let lb = ConsistentHashLoadBalance::with_replicas(10);
        assert_eq!(lb.replicas(), 8);

        let list = Arc::new(addresses(1));
        let selector = Selector::build(&list, lb.replicas());
        assert_eq!(selector.ring.len(), lb.replicas());
    }
}
