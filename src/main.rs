use dotenv::dotenv;
use sports_arb::broadcaster::Broadcaster;
use sports_arb::config::Config;
use sports_arb::feed_server::{self, FeedState};
use sports_arb::market_fetcher::{OddsFeed, SportsDataClient};
use sports_arb::market_scanner::MarketScanner;
use sports_arb::poller::{EventPoller, SnapshotStore};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sports_arb=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    if config.api_key.is_empty() {
        warn!("SPORTSDATA_API_KEY is not set; upstream requests will be rejected");
    }

    let feed: Arc<dyn OddsFeed> = Arc::new(SportsDataClient::new(
        &config.odds_api_base_url,
        &config.api_key,
        config.http_timeout,
    )?);
    let scanner = Arc::new(MarketScanner::new(feed.clone(), config.total_stake));
    let broadcaster = Arc::new(Broadcaster::new(config.subscriber_buffer));
    let store = SnapshotStore::default();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = EventPoller::new(
        feed,
        scanner.clone(),
        broadcaster.clone(),
        store.clone(),
        config.poller(),
    );
    let poll_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    let listener = TcpListener::bind(&config.bind_addr).await?;
    let state = FeedState::new(store, broadcaster, scanner, config.scan_concurrency);
    let server_task = tokio::spawn(feed_server::serve(listener, state, shutdown_rx));

    info!(stake = %config.total_stake, "sports arbitrage scanner running");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    poll_task.await?;
    server_task.await??;
    info!("shutdown complete");
    Ok(())
}
