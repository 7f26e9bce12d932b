use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arena_match_server::config::ServerConfig;
use arena_match_server::lobby::outbound::Outbound;
use arena_match_server::lobby::registry::SessionRegistry;
use arena_match_server::metrics::{self, Metrics};
use arena_match_server::net::dispatch::Dispatcher;
use arena_match_server::net::hub::ConnectionHub;
use arena_match_server::net::transport::WebTransportServer;
use arena_match_server::settlement::ledger::{LedgerVerifier, ScoreRatioLedger};
use arena_match_server::settlement::store::{InMemoryStore, JsonFileStore, MatchStore};
use arena_match_server::settlement::RewardSettlement;

fn build_ledger(config: &ServerConfig) -> anyhow::Result<Arc<dyn LedgerVerifier>> {
    match &config.ledger_url {
        #[cfg(feature = "ledger_http")]
        Some(url) => {
            use arena_match_server::settlement::ledger::HttpLedgerVerifier;
            let ledger = HttpLedgerVerifier::new(url, config.ledger_timeout)?;
            info!("Verifying rewards against {}", ledger.endpoint());
            Ok(Arc::new(ledger))
        }
        #[cfg(not(feature = "ledger_http"))]
        Some(url) => {
            warn!("LEDGER_URL {} ignored: built without ledger_http", url);
            Ok(Arc::new(ScoreRatioLedger::default()))
        }
        None => {
            warn!("No LEDGER_URL set, using the local score-ratio verifier");
            Ok(Arc::new(ScoreRatioLedger::default()))
        }
    }
}

fn build_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn MatchStore>> {
    match &config.store_path {
        Some(path) => {
            let store = JsonFileStore::open(path)?;
            info!("Persisting match data to {}", store.path().display());
            Ok(Arc::new(store))
        }
        None => {
            warn!("No STORE_PATH set, match data is kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Arena Match Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: {}:{}, max_sessions={}, max_players_per_session={}",
        config.bind_address, config.port, config.max_sessions, config.max_players_per_session
    );

    let metrics = Arc::new(Metrics::new());
    if config.metrics_port != 0 {
        let metrics_clone = metrics.clone();
        let metrics_port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let settlement = RewardSettlement::new(build_ledger(&config)?, build_store(&config)?, config.ledger_timeout)
        .with_metrics(metrics.clone());

    let hub = Arc::new(ConnectionHub::with_metrics(metrics.clone()));
    let outbound: Arc<dyn Outbound> = hub.clone();
    let registry = Arc::new(
        SessionRegistry::new(outbound, settlement, config.max_sessions, config.max_players_per_session)
            .with_metrics(metrics.clone()),
    );
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()).with_metrics(metrics.clone()));

    let server = WebTransportServer::new(config.clone(), dispatcher, hub, metrics).await?;
    info!("Server ready on https://{}", server.bind_addr());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    registry.shutdown().await;
    info!("Server stopped");

    Ok(())
}
