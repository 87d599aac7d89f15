//! docfeed server
//!
//! Run with: cargo run -- --config docfeed.toml
//!
//! # Configuration
//!
//! Settings come from a TOML file (see `--print-config`) with environment
//! overrides:
//! - `DOCFEED_HOST`, `DOCFEED_PORT`: Bind address (default: 0.0.0.0:8090)
//! - `DOCFEED_SECRET`: Shared secret; enables the side channel
//! - `DOCFEED_SUBSCRIPTION_TIMEOUT_MS`: Pending subscription lifetime
//! - `DOCFEED_LOG_LEVEL`, `DOCFEED_LOG_FORMAT`: Logging (`pretty` or `json`)
//! - `RUST_LOG`: Full filter directive, takes precedence over the level

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use docfeed::api::{serve, AppState};
use docfeed::broker::{Broker, MemoryBroker};
use docfeed::config::{generate_default_config, Config, LoggingConfig};
use docfeed::document::{DocumentRef, Projection};
use docfeed::manager::{Manager, RouteError, RouteHandler, RouteRequest};
use docfeed::store::MemoryStore;
use docfeed::subscription::Exposure;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "docfeed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live document change notifications over WebSockets")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,
}

/// Exposes the document named in the route, with every field visible.
///
/// Clients connecting with `route=/docs/<collection>/<id>` receive that
/// document without a separate subscribe call.
struct DocumentRoute;

#[async_trait]
impl RouteHandler for DocumentRoute {
    async fn handle(&self, request: &RouteRequest) -> Result<Vec<Exposure>, RouteError> {
        match (request.param("collection"), request.param("id")) {
            (Some(collection), Some(id)) => Ok(vec![Exposure::new(
                DocumentRef::new(collection, id),
                Projection::All,
            )]),
            _ => Err(RouteError::Handler(format!(
                "route {} is missing collection or id",
                request.route
            ))),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load_default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);

    tracing::info!("Starting docfeed v{}", env!("CARGO_PKG_VERSION"));

    let (broker, deliveries) = MemoryBroker::new();
    let broker: Arc<dyn Broker> = Arc::new(broker);
    let store = Arc::new(MemoryStore::new(
        Arc::clone(&broker),
        config.broker.channel_prefix.clone(),
    ));

    let manager = Manager::new(store.clone(), broker, config.manager_config());
    let dispatcher = manager.start(deliveries);

    manager
        .route("/docs/:collection/:id", Arc::new(DocumentRoute))
        .context("registering document route")?;

    let mut state = AppState::new(Arc::clone(&manager), store, config.server.clone());
    match &config.auth.secret {
        Some(secret) => {
            tracing::info!("Side channel enabled at {}/subscribe", config.server.path);
            state = state.with_secret(secret);
        }
        None => tracing::info!("Side channel disabled (set DOCFEED_SECRET to enable)"),
    }

    tracing::info!(
        "Subscriptions wait {:?} for their connection",
        config.subscription_timeout()
    );

    serve(state, &config.server).await?;

    dispatcher.abort();
    tracing::info!("docfeed stopped");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("docfeed={},tower_http=info", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
