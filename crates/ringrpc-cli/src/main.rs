//! # ringrpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Host the demo Greeter service, published to ZooKeeper at 127.0.0.1:2181
//! ringrpc serve -b 0.0.0.0:19998 -r 127.0.0.1:2181
//!
//! # Same, on the blocking thread-per-connection server
//! ringrpc serve -b 0.0.0.0:19998 --blocking
//!
//! # Without ZooKeeper: publish into an in-process store
//! ringrpc serve -b 0.0.0.0:19998 --standalone
//!
//! # Call it through the registry (outputs raw JSON)
//! ringrpc call Greeter greet -t String -a '["Ann"]'
//!
//! # Or address the server directly
//! ringrpc call -n 127.0.0.1:19998 Greeter greet -t String -a '["Ann"]'
//! ```

use anyhow::Result;
use argh::FromArgs;
use ringrpc_client::{RpcClient, SocketClient};
use ringrpc_common::{RuntimeConfig, ServiceKey};
use ringrpc_registry::{
    connect_store, load_balancers, CoordinationStore, MemoryStore, ServiceDiscovery,
    StaticDiscovery, StoreDiscovery, StoreRegistry,
};
use ringrpc_server::{RpcServer, ServiceProvider, SocketRpcServer};
use std::net::SocketAddr;
use std::sync::Arc;

use ringrpc_cli::{greeter_service, parse_call_args, ConfigOverrides};

#[derive(FromArgs)]
/// ringrpc - RPC runtime with consistent-hash load balancing
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for hosting the demo service.
///
/// Services are published to the ZooKeeper ensemble at `--registry`
/// (RINGRPC_REGISTRY_ADDRESS by default). With `--standalone` they go into
/// an in-process store and clients reach the server through `call -n`.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// host the demo Greeter service
struct ServeArgs {
    /// address to bind to
    ///
    /// Defaults to 0.0.0.0 on the configured server port (19998, or
    /// RINGRPC_SERVER_PORT).
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// address to publish instead of the bound one
    #[argh(option, long = "advertise")]
    advertise: Option<String>,

    /// zookeeper ensemble address (host:port)
    #[argh(option, short = 'r', long = "registry")]
    registry: Option<String>,

    /// publish into an in-process store instead of zookeeper
    #[argh(switch)]
    standalone: bool,

    /// use the blocking thread-per-connection server
    #[argh(switch)]
    blocking: bool,

    /// worker threads for service invocation
    #[argh(option, short = 'w', long = "workers")]
    workers: Option<usize>,

    /// close connections idle for this many milliseconds
    #[argh(option, long = "idle-timeout-ms")]
    idle_timeout_ms: Option<u64>,
}

/// Arguments for making a single call.
///
/// Outputs the raw JSON result to stdout. Errors go to stderr with a
/// non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a ringrpc server
struct CallArgs {
    /// server address (host:port); repeat for several servers
    ///
    /// Without any, servers are discovered through the registry.
    #[argh(option, short = 'n', long = "node")]
    nodes: Vec<String>,

    /// zookeeper ensemble address (host:port)
    #[argh(option, short = 'r', long = "registry")]
    registry: Option<String>,

    /// interface name of the service
    #[argh(positional)]
    interface: String,

    /// method to call
    #[argh(positional)]
    method: String,

    /// parameter type descriptor; repeat once per parameter
    #[argh(option, short = 't', long = "type")]
    types: Vec<String>,

    /// JSON array of arguments, one per parameter
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// service group
    #[argh(option, long = "group", default = "String::new()")]
    group: String,

    /// service version
    #[argh(option, long = "version", default = "String::new()")]
    version: String,

    /// serializer name (json, msgpack)
    #[argh(option, long = "serializer")]
    serializer: Option<String>,

    /// compressor name (gzip, none)
    #[argh(option, long = "compressor")]
    compressor: Option<String>,

    /// load balancer name (loadBalance, random)
    #[argh(option, long = "load-balance")]
    load_balance: Option<String>,

    /// call deadline in milliseconds
    #[argh(option, long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// use the blocking connect-per-call client
    #[argh(switch)]
    blocking: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call: keep stdout clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        registry: args.registry,
        workers: args.workers,
        idle_timeout_ms: args.idle_timeout_ms,
        ..Default::default()
    };
    let config = overrides.apply(RuntimeConfig::from_env()?)?;
    let bind = args
        .bind
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.server_port));
    let advertise: Option<SocketAddr> = args
        .advertise
        .map(|a| a.parse())
        .transpose()
        .map_err(|e| anyhow::anyhow!("Invalid advertise address: {}", e))?;

    let store: Arc<dyn CoordinationStore> = if args.standalone {
        Arc::new(MemoryStore::new())
    } else {
        connect_store(&config)?
    };
    let provider = Arc::new(ServiceProvider::new(Arc::new(StoreRegistry::new(store))));
    let service = greeter_service();

    if args.blocking {
        let mut server = SocketRpcServer::bind(&bind, config, provider)?;
        if let Some(addr) = advertise {
            server = server.with_advertised_addr(addr);
        }
        server.register_service(&service)?;
        tracing::info!(
            "Serving {} on {} (blocking, advertised as {})",
            service.rpc_service_name(),
            server.local_addr(),
            server.advertised_addr()
        );

        let server = Arc::new(server);
        let shutdown = server.shutdown_handle();
        let running = server.clone();
        let task = tokio::task::spawn_blocking(move || running.run());

        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutting down");
        shutdown.shutdown();
        task.await??;
        return Ok(());
    }

    let mut server = RpcServer::bind(&bind, config, provider).await?;
    if let Some(addr) = advertise {
        server = server.with_advertised_addr(addr);
    }
    server.register_service(&service)?;
    tracing::info!(
        "Serving {} on {} (advertised as {})",
        service.rpc_service_name(),
        server.local_addr(),
        server.advertised_addr()
    );

    let server = Arc::new(server);
    let running = server.clone();
    let task = tokio::spawn(async move { running.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.shutdown();
    task.await??;
    Ok(())
}

async fn run_call(args: CallArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        registry: args.registry,
        serializer: args.serializer,
        compressor: args.compressor,
        load_balance: args.load_balance,
        call_timeout_ms: args.timeout_ms,
        ..Default::default()
    };
    let config = overrides.apply(RuntimeConfig::from_env()?)?;
    let call_args = parse_call_args(&args.args, &args.types)?;

    let balancer = load_balancers().get(&config.load_balance)?;
    let discovery: Arc<dyn ServiceDiscovery> = if args.nodes.is_empty() {
        Arc::new(StoreDiscovery::new(connect_store(&config)?, balancer))
    } else {
        Arc::new(StaticDiscovery::new(args.nodes, balancer))
    };
    let key = ServiceKey::new(args.interface)
        .with_group(args.group)
        .with_version(args.version);

    let result = if args.blocking {
        let client = SocketClient::new(config, discovery)?;
        tokio::task::spawn_blocking(move || client.invoke(&key, args.method, args.types, call_args))
            .await??
    } else {
        let client = RpcClient::new(config, discovery)?;
        let result = client.invoke(&key, args.method, args.types, call_args).await;
        client.close().await;
        result?
    };

    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve_defaults() {
        let args: Cli = Cli::from_args(&["ringrpc"], &["serve"]).unwrap();
        match args.command {
            Commands::Serve(ServeArgs { bind, blocking, workers, registry, standalone, .. }) => {
                assert!(bind.is_none());
                assert!(!blocking);
                assert!(workers.is_none());
                assert!(registry.is_none());
                assert!(!standalone);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_blocking() {
        let args: Cli = Cli::from_args(
            &["ringrpc"],
            &["serve", "-b", "127.0.0.1:7000", "--blocking", "-w", "3"],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs { bind, blocking, workers, .. }) => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1:7000"));
                assert!(blocking);
                assert_eq!(workers, Some(3));
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_serve_blocking_advertise() {
        let args: Cli = Cli::from_args(
            &["ringrpc"],
            &[
                "serve", "--blocking", "--advertise", "10.0.0.5:7000",
                "-r", "zk1:2181", "--standalone",
            ],
        )
        .unwrap();
        match args.command {
            Commands::Serve(ServeArgs { blocking, advertise, registry, standalone, .. }) => {
                assert!(blocking);
                assert_eq!(advertise.as_deref(), Some("10.0.0.5:7000"));
                assert_eq!(registry.as_deref(), Some("zk1:2181"));
                assert!(standalone);
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_cli_parse_call() {
        let args: Cli = Cli::from_args(
            &["ringrpc"],
            &[
                "call",
                "-n", "127.0.0.1:7000",
                "-n", "127.0.0.1:7001",
                "Greeter", "greet",
                "-t", "String",
                "-a", "[\"Ann\"]",
                "--version", "2",
            ],
        )
        .unwrap();
        match args.command {
            Commands::Call(CallArgs { nodes, interface, method, types, args, version, group, .. }) => {
                assert_eq!(nodes, vec!["127.0.0.1:7000", "127.0.0.1:7001"]);
                assert_eq!(interface, "Greeter");
                assert_eq!(method, "greet");
                assert_eq!(types, vec!["String"]);
                assert_eq!(args, "[\"Ann\"]");
                assert_eq!(version, "2");
                assert!(group.is_empty());
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_defaults() {
        let args: Cli = Cli::from_args(&["ringrpc"], &["call", "Greeter", "ping"]).unwrap();
        match args.command {
            Commands::Call(CallArgs { nodes, registry, types, args, blocking, timeout_ms, .. }) => {
                assert!(nodes.is_empty());
                assert!(registry.is_none());
                assert!(types.is_empty());
                assert_eq!(args, "[]");
                assert!(!blocking);
                assert!(timeout_ms.is_none());
            }
            _ => panic!("Expected Call command"),
        }
    }

    #[test]
    fn test_cli_parse_call_missing_method() {
        assert!(Cli::from_args(&["ringrpc"], &["call", "Greeter"]).is_err());
    }
}
