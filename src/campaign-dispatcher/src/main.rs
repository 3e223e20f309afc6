//! Campaign Dispatcher: drives WhatsApp template campaigns from the
//! campaign store to the messaging provider.
//!
//! Main entry point that wires the store, provider clients, progress
//! publisher and campaign manager together and runs until Ctrl-C.

use campaign_channels::{
    ProviderFactory, RecordingProvider, RecordingProviderFactory, WhatsAppProviderFactory,
};
use campaign_core::config::AppConfig;
use campaign_core::event_bus::{LogPublisher, ProgressPublisher, TracingAlertSink};
use campaign_dispatch::{CampaignManager, InMemoryCampaignStore, NatsProgressPublisher, SeedData};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "campaign-dispatcher")]
#[command(about = "Rate-limited WhatsApp campaign dispatch engine")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, env = "CAMPAIGN_DISPATCH_CONFIG")]
    config: Option<String>,

    /// JSON seed file with business accounts, campaigns and contacts
    #[arg(long, env = "CAMPAIGN_DISPATCH_SEED")]
    seed: Option<String>,

    /// Scan interval in seconds (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__DISPATCH__SCAN_INTERVAL_SECS")]
    scan_interval_secs: Option<u64>,

    /// Default per-account sends per second (overrides config)
    #[arg(long, env = "CAMPAIGN_DISPATCH__DISPATCH__RATE_LIMIT_PER_SECOND")]
    rate_limit: Option<u32>,

    /// Record sends instead of calling the WhatsApp API
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Log progress instead of publishing it to NATS
    #[arg(long, default_value_t = false)]
    no_nats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "campaign_dispatcher=info,campaign_dispatch=info,campaign_channels=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campaign Dispatcher starting up");

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(secs) = cli.scan_interval_secs {
        config.dispatch.scan_interval_secs = secs;
    }
    if let Some(rate) = cli.rate_limit {
        config.dispatch.rate_limit_per_second = rate;
    }
    if cli.no_nats {
        config.nats.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        scan_interval_secs = config.dispatch.scan_interval_secs,
        rate_limit_per_second = config.dispatch.rate_limit_per_second,
        batch_size = config.dispatch.batch_size,
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    if config.metrics.enabled {
        if let Err(e) = start_metrics(&config) {
            error!(error = %e, "Failed to start metrics exporter");
        }
    }

    let seed = match &cli.seed {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<SeedData>(&raw)?
        }
        None => {
            warn!("No seed file given; starting with an empty campaign store");
            SeedData::default()
        }
    };
    let store = Arc::new(InMemoryCampaignStore::from_seed(seed));

    let providers: Arc<dyn ProviderFactory> = if cli.dry_run {
        info!("Dry run: sends are recorded, not delivered");
        Arc::new(RecordingProviderFactory::new(Arc::new(RecordingProvider::dry_run())))
    } else {
        Arc::new(WhatsAppProviderFactory::new(config.whatsapp.clone())?)
    };

    let publisher: Arc<dyn ProgressPublisher> = if config.nats.enabled {
        match NatsProgressPublisher::connect(&config.nats).await {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS, progress will only be logged");
                Arc::new(LogPublisher)
            }
        }
    } else {
        info!("NATS disabled; progress will only be logged");
        Arc::new(LogPublisher)
    };

    let manager = CampaignManager::new(
        config.dispatch.clone(),
        store,
        providers,
        publisher,
        Arc::new(TracingAlertSink),
    );

    info!("Campaign Dispatcher is running");

    let run = tokio::spawn(manager.clone().run());
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    manager.stop();
    run.await??;

    info!("Campaign Dispatcher stopped");
    Ok(())
}

fn start_metrics(config: &AppConfig) -> anyhow::Result<()> {
    let addr = SocketAddr::new(config.metrics.host.parse()?, config.metrics.port);
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!(port = config.metrics.port, "Metrics exporter started");
    Ok(())
}
