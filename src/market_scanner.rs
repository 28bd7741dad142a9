use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::arbitrage_engine::{detect_market, market_sides, LineArbitrage};
use crate::error::{ArbError, Result};
use crate::line_grouper::group_by_line;
use crate::market_fetcher::{decode_markets, OddsFeed};
use crate::normalization::normalize_market;
use crate::shared_types::{EventId, EventSnapshot, MarketId, MarketRecord, Opportunity};
use crate::stake_allocator::allocate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotAcceptingBets,
    NotTwoSided(usize),
}

/// What happened to one market during a scan.
#[derive(Debug)]
pub enum MarketOutcome {
    Found(Opportunity),
    NoArbitrage(MarketId),
    Skipped(MarketId, SkipReason),
    Failed(ArbError),
}

/// Runs normalize -> group -> detect -> allocate for a single market.
pub fn scan_market(market: &MarketRecord, total_stake: Decimal) -> MarketOutcome {
    if !market.accepting_bets {
        return MarketOutcome::Skipped(market.market_id, SkipReason::NotAcceptingBets);
    }

    let quotes = normalize_market(market);
    let groups = group_by_line(&quotes);
    let side_count = market_sides(&groups).len();
    if side_count != 2 {
        return MarketOutcome::Skipped(market.market_id, SkipReason::NotTwoSided(side_count));
    }

    match detect_market(&groups) {
        Some(arb) => MarketOutcome::Found(build_opportunity(market, arb, total_stake)),
        None => MarketOutcome::NoArbitrage(market.market_id),
    }
}

fn build_opportunity(
    market: &MarketRecord,
    arb: LineArbitrage,
    total_stake: Decimal,
) -> Opportunity {
    let allocation = allocate(&arb.pair, total_stake);
    Opportunity {
        market_id: market.market_id,
        market_label: market.display_label(),
        market_type: market.market_type.clone(),
        line: arb.line,
        pair: arb.pair,
        profit_percentage: arb.profit_percentage,
        allocation,
    }
}

/// Scans every market in a payload. Only a payload that is not a market
/// list fails the whole call.
pub fn scan_markets(payload: Value, total_stake: Decimal) -> Result<Vec<MarketOutcome>> {
    Ok(decode_markets(payload)?
        .into_iter()
        .map(|record| match record {
            Ok(market) => scan_market(&market, total_stake),
            Err(e) => MarketOutcome::Failed(e),
        })
        .collect())
}

/// Produces one event's snapshot from the odds feed.
pub struct MarketScanner {
    feed: Arc<dyn OddsFeed>,
    total_stake: Decimal,
}

impl MarketScanner {
    pub fn new(feed: Arc<dyn OddsFeed>, total_stake: Decimal) -> Self {
        Self { feed, total_stake }
    }

    pub async fn scan_event(&self, event_id: EventId) -> Result<EventSnapshot> {
        self.scan(event_id).await.map(|(snapshot, _)| snapshot)
    }

    /// Scans an event the poller never listed. The upstream may answer an
    /// unknown id with an empty market list instead of a 404, so no
    /// markets at all means not found here.
    pub async fn scan_unlisted_event(&self, event_id: EventId) -> Result<EventSnapshot> {
        let (snapshot, markets) = self.scan(event_id).await?;
        if markets == 0 {
            return Err(ArbError::EventNotFound(event_id));
        }
        Ok(snapshot)
    }

    async fn scan(&self, event_id: EventId) -> Result<(EventSnapshot, usize)> {
        let payload = self.feed.fetch_markets(event_id).await?;
        let outcomes = scan_markets(payload, self.total_stake)?;
        let markets = outcomes.len();

        let mut opportunities = Vec::new();
        for outcome in outcomes {
            match outcome {
                MarketOutcome::Found(opp) => {
                    debug!(
                        event_id,
                        market_id = opp.market_id,
                        line = %opp.line,
                        profit = %opp.profit_percentage.round_dp(4),
                        "arbitrage found"
                    );
                    opportunities.push(opp);
                }
                MarketOutcome::Failed(e) => {
                    warn!(event_id, error = %e, "market skipped");
                }
                MarketOutcome::NoArbitrage(_) | MarketOutcome::Skipped(..) => {}
            }
        }

        let snapshot = EventSnapshot::new(event_id, Utc::now(), opportunities);
        Ok((snapshot, markets))
    }
}
