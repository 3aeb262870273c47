//! Fabric gateway — entry point.
//!
//! Flags and environment variables:
//!
//! | Flag | Env | Default | Description |
//! |------|-----|---------|-------------|
//! | `--transport` | `FABRIC_TRANSPORT` | `http` | `http` or `stdio`. |
//! | `--port` | `FABRIC_PORT` | `8000` | HTTP listen port. |
//! | `--config` | `FABRIC_CONFIG` | `agents.yaml` | Manifest document path. |
//! | `--psk` | `FABRIC_PSK` | *(none)* | Pre-shared key; unset disables auth. |
//! | `--database-url` | `DATABASE_URL` | *(none)* | Durable registry (SQLite URL). |
//! | `--brave-api-key` | `BRAVE_API_KEY` | *(none)* | Enables `web.brave_search`. |

use clap::{Parser, ValueEnum};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fabric_gateway::http::{serve, HttpFrontConfig};
use fabric_gateway::pipeline::{FabricPipeline, PipelineConfig};
use fabric_gateway::stdio;
use fabric_kernel::auth::AuthVerifier;
use fabric_kernel::bus::FabricMessageBus;
use fabric_kernel::config::ManifestDocument;
use fabric_plugins::{builtin_tool_host, BuiltinToolsConfig};
use fabric_runtime::adapter::HttpAdapterProvider;
use fabric_runtime::health::{HealthConfig, HealthMonitor};
use fabric_runtime::registry::{DurableRegistry, MemoryRegistry, RegistryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Http,
    Stdio,
}

#[derive(Debug, Parser)]
#[command(name = "fabric-gateway", about = "Agent-to-agent communication gateway")]
struct Args {
    /// Transport front to serve.
    #[arg(long, value_enum, default_value_t = Transport::Http, env = "FABRIC_TRANSPORT")]
    transport: Transport,

    /// HTTP listen port.
    #[arg(long, default_value_t = 8000, env = "FABRIC_PORT")]
    port: u16,

    /// Path to the agents manifest document (YAML or TOML).
    #[arg(long, default_value = "agents.yaml", env = "FABRIC_CONFIG")]
    config: String,

    /// Pre-shared key for bearer authentication. When unset, authentication
    /// is disabled — do not run that way in production.
    #[arg(long, env = "FABRIC_PSK")]
    psk: Option<String>,

    /// SQLite URL for the durable registry (e.g. sqlite://fabric.db). When
    /// unset the in-memory registry is used.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Brave search API key for the web.brave_search tool.
    #[arg(long, env = "BRAVE_API_KEY")]
    brave_api_key: Option<String>,

    /// Disable the background health monitor.
    #[arg(long, default_value_t = false)]
    no_health_monitor: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,fabric_gateway=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Manifest document: a missing file starts an empty registry.
    let document = match ManifestDocument::load_file(&args.config) {
        Ok(document) => {
            info!(path = %args.config, agents = document.agents.len(), "loaded manifest document");
            document
        }
        Err(err) => {
            warn!(path = %args.config, error = %err, "manifest not loaded, starting with empty registry");
            ManifestDocument::default()
        }
    };

    // Registry: durable when a database URL is configured.
    let mut durable_handle: Option<Arc<DurableRegistry>> = None;
    let registry: Arc<dyn RegistryStore> = match &args.database_url {
        Some(url) => {
            let durable = Arc::new(DurableRegistry::connect(url).await?);
            for manifest in &document.agents {
                durable.register(manifest.clone()).await?;
            }
            durable_handle = Some(durable.clone());
            durable
        }
        None => {
            let memory = MemoryRegistry::new();
            for manifest in &document.agents {
                memory.register(manifest.clone()).await?;
            }
            Arc::new(memory)
        }
    };

    // Tool host, with manifest-disabled tools removed.
    let disabled: HashSet<String> = document
        .tools
        .iter()
        .filter(|t| !t.enabled)
        .map(|t| t.tool_id.clone())
        .collect();
    let tools = Arc::new(builtin_tool_host(BuiltinToolsConfig {
        brave_api_key: args.brave_api_key.clone(),
        disabled,
        ..Default::default()
    }));

    // Durable variant also records the discovered tool set.
    if let Some(durable) = &durable_handle {
        for descriptor in tools.list_tools(None, None) {
            durable
                .sync_tool(
                    &descriptor.tool_id,
                    &descriptor.category,
                    "builtin",
                    &serde_json::to_value(&descriptor.capabilities)?,
                )
                .await?;
        }
    }

    let adapters = Arc::new(HttpAdapterProvider::new());

    if !args.no_health_monitor {
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            adapters.clone(),
            HealthConfig::default(),
        ));
        let _monitor_task = monitor.spawn();
        info!("health monitor started");
    }

    let auth = match &args.psk {
        Some(psk) => AuthVerifier::new(psk.clone()),
        None => {
            warn!("FABRIC_PSK is not set — authentication is DISABLED");
            AuthVerifier::disabled()
        }
    };

    let pipeline = Arc::new(FabricPipeline::new(
        registry,
        adapters,
        tools,
        FabricMessageBus::in_memory(),
        auth,
        PipelineConfig::default(),
    ));

    match args.transport {
        Transport::Http => {
            let config = HttpFrontConfig {
                port: args.port,
                ..Default::default()
            };
            serve(pipeline, config).await?;
        }
        Transport::Stdio => {
            stdio::serve(pipeline).await?;
        }
    }

    Ok(())
}
