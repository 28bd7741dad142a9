use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::normalization::NormalizedOdds;

pub type EventId = u64;
pub type MarketId = u64;

/// One side of a two-sided wager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutcomeSide {
    Over,
    Under,
    Home,
    Away,
    Yes,
    No,
    Other(String),
}

impl OutcomeSide {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "over" => OutcomeSide::Over,
            "under" => OutcomeSide::Under,
            "home" => OutcomeSide::Home,
            "away" => OutcomeSide::Away,
            "yes" => OutcomeSide::Yes,
            "no" => OutcomeSide::No,
            other => OutcomeSide::Other(other.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            OutcomeSide::Over => "over",
            OutcomeSide::Under => "under",
            OutcomeSide::Home => "home",
            OutcomeSide::Away => "away",
            OutcomeSide::Yes => "yes",
            OutcomeSide::No => "no",
            OutcomeSide::Other(label) => label,
        }
    }
}

impl fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of the wager a quote refers to. Markets without a threshold
/// (moneyline and similar) all share `NoLine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineKey {
    NoLine,
    Value(Decimal),
}

impl LineKey {
    pub fn from_value(value: Option<Decimal>) -> Self {
        match value {
            // 25.5 and 25.50 are the same wager
            Some(v) => LineKey::Value(v.normalize()),
            None => LineKey::NoLine,
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            LineKey::NoLine => None,
            LineKey::Value(v) => Some(*v),
        }
    }
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKey::NoLine => f.write_str("no-line"),
            LineKey::Value(v) => write!(f, "{}", v),
        }
    }
}

/// A single sportsbook price for one side of one line. Built only through
/// `normalization`, so the odds are always valid.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub sportsbook: String,
    pub side: OutcomeSide,
    pub american_odds: i64,
    pub line_value: Option<Decimal>,
    pub available: bool,
    pub odds: NormalizedOdds,
}

impl Quote {
    pub fn line_key(&self) -> LineKey {
        LineKey::from_value(self.line_value)
    }

    pub fn decimal_odds(&self) -> Decimal {
        self.odds.decimal
    }

    pub fn implied_probability(&self) -> Decimal {
        self.odds.implied_probability
    }
}

/// All quotes for one outcome side of a line, in scan order.
#[derive(Debug, Clone, PartialEq)]
pub struct SideQuotes {
    pub side: OutcomeSide,
    pub quotes: Vec<Quote>,
}

/// Quotes from every sportsbook referring to the identical wager.
#[derive(Debug, Clone, PartialEq)]
pub struct LineGroup {
    pub line: LineKey,
    sides: Vec<SideQuotes>,
}

impl LineGroup {
    pub fn new(line: LineKey) -> Self {
        Self { line, sides: Vec::new() }
    }

    pub fn push(&mut self, quote: Quote) {
        match self.sides.iter_mut().find(|s| s.side == quote.side) {
            Some(entry) => entry.quotes.push(quote),
            None => self.sides.push(SideQuotes {
                side: quote.side.clone(),
                quotes: vec![quote],
            }),
        }
    }

    /// Sides in the order they were first seen.
    pub fn sides(&self) -> &[SideQuotes] {
        &self.sides
    }

    pub fn side_count(&self) -> usize {
        self.sides.len()
    }

    pub fn quotes(&self, side: &OutcomeSide) -> &[Quote] {
        self.sides
            .iter()
            .find(|s| &s.side == side)
            .map(|s| s.quotes.as_slice())
            .unwrap_or(&[])
    }
}

/// The most favorable quote for each of the two sides of a line.
#[derive(Debug, Clone, PartialEq)]
pub struct BestQuotePair {
    pub legs: [Quote; 2],
}

impl BestQuotePair {
    pub fn implied_probability_sum(&self) -> Decimal {
        self.legs.iter().map(|q| q.implied_probability()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StakeLeg {
    pub side: OutcomeSide,
    pub sportsbook: String,
    pub american_odds: i64,
    pub stake: Decimal,
    pub potential_win: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StakeAllocation {
    pub total_stake: Decimal,
    pub legs: Vec<StakeLeg>,
    /// Equal payout minus total staked, `S/P - S`.
    pub guaranteed_profit: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub market_id: MarketId,
    pub market_label: String,
    pub market_type: String,
    pub line: LineKey,
    pub pair: BestQuotePair,
    pub profit_percentage: Decimal,
    pub allocation: StakeAllocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventSnapshot {
    pub event_id: EventId,
    pub scan_timestamp: DateTime<Utc>,
    pub opportunities: Vec<Opportunity>,
    pub has_arbitrage: bool,
    pub best_profit_percentage: Decimal,
}

impl EventSnapshot {
    /// Orders opportunities by profit, best first.
    pub fn new(
        event_id: EventId,
        scan_timestamp: DateTime<Utc>,
        mut opportunities: Vec<Opportunity>,
    ) -> Self {
        opportunities.sort_by(|a, b| {
            b.profit_percentage
                .cmp(&a.profit_percentage)
                .then(a.market_id.cmp(&b.market_id))
        });
        let best_profit_percentage = opportunities
            .first()
            .map(|o| o.profit_percentage)
            .unwrap_or(Decimal::ZERO);
        Self {
            event_id,
            scan_timestamp,
            has_arbitrage: !opportunities.is_empty(),
            best_profit_percentage,
            opportunities,
        }
    }

    pub fn empty(event_id: EventId, scan_timestamp: DateTime<Utc>) -> Self {
        Self::new(event_id, scan_timestamp, Vec::new())
    }

    pub fn to_wire(&self) -> WireSnapshot {
        WireSnapshot {
            event_id: self.event_id,
            scan_timestamp: self.scan_timestamp,
            has_arbitrage: self.has_arbitrage,
            best_profit_percentage: self.best_profit_percentage.round_dp(4),
            opportunities: self.opportunities.iter().map(WireOpportunity::from).collect(),
        }
    }
}

/// Event listing record, already decoded from the upstream payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub event_id: EventId,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub status: Option<String>,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketRecord {
    pub market_id: MarketId,
    pub market_type: String,
    pub label: Option<String>,
    pub accepting_bets: bool,
    pub outcomes: Vec<OutcomeRecord>,
}

impl MarketRecord {
    pub fn display_label(&self) -> String {
        match (&self.label, self.market_type.is_empty()) {
            (Some(label), _) if !label.is_empty() => label.clone(),
            (_, false) => self.market_type.clone(),
            _ => format!("market {}", self.market_id),
        }
    }
}

/// Raw outcome as offered upstream; may still carry invalid odds.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub sportsbook: Option<String>,
    pub american_odds: Option<i64>,
    pub side_label: Option<String>,
    pub line_value: Option<Decimal>,
    pub available: bool,
}

// Wire shapes published to subscribers and query clients.

#[derive(Debug, Clone, Serialize)]
pub struct WireSnapshot {
    pub event_id: EventId,
    pub scan_timestamp: DateTime<Utc>,
    pub has_arbitrage: bool,
    #[serde(with = "rust_decimal::serde::float")]
    pub best_profit_percentage: Decimal,
    pub opportunities: Vec<WireOpportunity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireOpportunity {
    pub market_id: MarketId,
    pub market_label: String,
    pub market_type: String,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub line_value: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit_percentage: Decimal,
    pub stakes: BTreeMap<String, WireStake>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireStake {
    #[serde(with = "rust_decimal::serde::float")]
    pub stake: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub win: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit: Decimal,
    pub odds: i64,
    pub sportsbook: String,
}

impl From<&Opportunity> for WireOpportunity {
    fn from(opp: &Opportunity) -> Self {
        let total = opp.allocation.total_stake;
        let stakes = opp
            .allocation
            .legs
            .iter()
            .map(|leg| {
                (
                    leg.side.label().to_string(),
                    WireStake {
                        stake: leg.stake.round_dp(2),
                        win: leg.potential_win.round_dp(2),
                        profit: (leg.potential_win - total).round_dp(2),
                        odds: leg.american_odds,
                        sportsbook: leg.sportsbook.clone(),
                    },
                )
            })
            .collect();
        WireOpportunity {
            market_id: opp.market_id,
            market_label: opp.market_label.clone(),
            market_type: opp.market_type.clone(),
            line_value: opp.line.value(),
            profit_percentage: opp.profit_percentage.round_dp(4),
            stakes,
        }
    }
}
