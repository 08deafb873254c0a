use std::sync::Arc;
use tracing::{debug, warn};

use ringrpc_common::{CallEnvelope, Result, ResultEnvelope};
use serde_json::Value;

use crate::provider::ServiceProvider;

/// Resolves a call to its service and method and runs it.
///
/// Every outcome becomes a [`ResultEnvelope`] carrying the call's request
/// id: lookup and invocation errors are reported to the client as FAIL
/// results, never as connection errors.
#[derive(Clone)]
pub struct RequestHandler {
    provider: Arc<ServiceProvider>,
}

impl RequestHandler {
    pub fn new(provider: Arc<ServiceProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<ServiceProvider> {
        &self.provider
    }

    pub fn handle(&self, call: CallEnvelope) -> ResultEnvelope {
        let request_id = call.request_id;
        match self.invoke(call) {
            Ok(value) => ResultEnvelope::success(request_id, value),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "call failed");
                ResultEnvelope::fail(request_id, e.to_string())
            }
        }
    }

    fn invoke(&self, call: CallEnvelope) -> Result<Value> {
        let service = self.provider.get_service(&call.rpc_service_name())?;
        debug!(
            request_id = %call.request_id,
            service = %call.interface_name,
            method = %call.method_name,
            "invoking"
        );
        service.invoke(&call.method_name, &call.param_types, call.parameters)
    }
}
