use rand::Rng;
use std::sync::Arc;

use ringrpc_common::CallEnvelope;

use super::LoadBalance;

/// Uniform random choice among the candidates.
pub struct RandomLoadBalance;

impl LoadBalance for RandomLoadBalance {
    fn do_select(&self, addresses: &Arc<Vec<String>>, _call: &CallEnvelope) -> Option<String> {
        let idx = rand::thread_rng().gen_range(0..addresses.len());
        addresses.get(idx).cloned()
    }
}
