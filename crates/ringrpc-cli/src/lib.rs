// Copyright 2025 ringrpc Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # ringrpc CLI
//!
//! Command-line front end for the ringrpc runtime.
//!
//! ## Key Commands
//!
//! - `ringrpc serve`: host the demo `Greeter` service
//! - `ringrpc call`: make one call against a fixed list of servers and
//!   print the JSON result

use anyhow::{anyhow, Result};
use ringrpc_common::RuntimeConfig;
use ringrpc_server::{ServiceConfig, ServiceDefinition};
use serde_json::Value;
use std::time::Duration;

/// The demo service hosted by `ringrpc serve`.
///
/// - `greet(String) -> String`
/// - `add(int, int) -> int`
/// - `echo(Object) -> Object`
pub fn greeter_service() -> ServiceConfig {
    let greeter = ServiceDefinition::new("Greeter")
        .typed_method("greet", &["String"], |(name,): (String,)| {
            Ok(format!("Hello, {}", name))
        })
        .typed_method("add", &["int", "int"], |(a, b): (i64, i64)| Ok(a + b))
        .method("echo", &["Object"], |mut args| Ok(args.pop().unwrap_or(Value::Null)));
    ServiceConfig::new(greeter)
}

/// Parses the `--args` JSON: an array, one element per parameter.
pub fn parse_call_args(json: &str, param_types: &[String]) -> Result<Vec<Value>> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| anyhow!("Invalid JSON in args: {}", e))?;
    let args = match value {
        Value::Array(values) => values,
        other => return Err(anyhow!("args must be a JSON array, got {}", other)),
    };
    if args.len() != param_types.len() {
        return Err(anyhow!(
            "{} argument(s) given for {} parameter type(s)",
            args.len(),
            param_types.len()
        ));
    }
    Ok(args)
}

/// Overrides a config with whatever flags were given.
///
/// Precedence is flag, then `RINGRPC_*` environment variable, then default.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub registry: Option<String>,
    pub serializer: Option<String>,
    pub compressor: Option<String>,
    pub load_balance: Option<String>,
    pub call_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub workers: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(self, mut config: RuntimeConfig) -> Result<RuntimeConfig> {
        if let Some(address) = self.registry {
            config = config.with_registry_address(address);
        }
        if let Some(name) = self.serializer {
            config = config.with_serializer(name);
        }
        if let Some(name) = self.compressor {
            config = config.with_compressor(name);
        }
        if let Some(name) = self.load_balance {
            config = config.with_load_balance(name);
        }
        if let Some(ms) = self.call_timeout_ms {
            config = config.with_call_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.idle_timeout_ms {
            config = config.with_idle_timeout(Duration::from_millis(ms));
        }
        if let Some(workers) = self.workers {
            config = config.with_worker_threads(workers);
        }
        config.validate()?;
        Ok(config)
    }
}
