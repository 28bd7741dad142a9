use chrono::Utc;
use dotenv::dotenv;
use sports_arb::config::Config;
use sports_arb::market_fetcher::{decode_events, OddsFeed, SportsDataClient};
use sports_arb::market_scanner::{scan_markets, MarketOutcome};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let config = Config::from_env()?;
    if config.api_key.is_empty() {
        return Err("SPORTSDATA_API_KEY not set".into());
    }

    println!("Connecting to {}...", config.odds_api_base_url);
    let client = SportsDataClient::new(
        &config.odds_api_base_url,
        &config.api_key,
        config.http_timeout,
    )?;

    let today = Utc::now().date_naive();
    let events = decode_events(client.fetch_events(today).await?)?;
    println!("✅ Connection Successful. {} events on {}", events.len(), today);

    if let Some(event) = events.first() {
        let payload = client.fetch_markets(event.event_id).await?;
        let outcomes = scan_markets(payload, config.total_stake)?;
        let found = outcomes
            .iter()
            .filter(|o| matches!(o, MarketOutcome::Found(_)))
            .count();
        println!(
            "✅ Event {} ({}): {} markets, {} arbitrage opportunities",
            event.event_id,
            event.name,
            outcomes.len(),
            found
        );
    }

    Ok(())
}
