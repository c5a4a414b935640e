use clap::Parser;
use gateway_proxy::config::config_search_paths;
use gateway_proxy::{build_router, AppState, GatewayConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "gateway-proxy",
    about = "OpenAI and Anthropic compatible front for an AI gateway",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Request journal path (JSONL)
    #[arg(long, default_value = "gateway-proxy.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gateway_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }

    // Fail at startup rather than on the first request.
    let registry = config.model_registry()?;
    let gateway_key = config.resolve_gateway_key()?;
    let provider_key = config.resolve_provider_key()?;

    if registry.is_empty() {
        warn!("Model list is empty; every request will be rejected as unsupported");
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("gateway-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Host:      {}", config.host);
    info!("  Port:      {}", config.port);
    info!("  Models:    {}", registry.len());
    for model in registry.models() {
        info!("    {} -> {} ({})", model.name, model.id, model.endpoint);
    }
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting gateway-proxy host={} port={} models={}",
            config.host,
            config.port,
            registry.len()
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        registry,
        client,
        gateway_key,
        provider_key,
        logger,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
