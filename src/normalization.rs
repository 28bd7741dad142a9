use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{ArbError, Result};
use crate::shared_types::{MarketRecord, OutcomeRecord, OutcomeSide, Quote};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// American odds expressed as a payout multiplier and the break-even
/// probability it implies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedOdds {
    pub decimal: Decimal,
    pub implied_probability: Decimal,
}

/// `+150` pays 2.5x the stake, `-200` pays 1.5x.
pub fn american_to_decimal(odds: i64) -> Result<Decimal> {
    if odds == 0 {
        return Err(ArbError::InvalidOdds("american odds of 0".to_string()));
    }
    let magnitude = Decimal::from(odds.unsigned_abs());
    if odds > 0 {
        Ok(Decimal::ONE + magnitude / HUNDRED)
    } else {
        Ok(Decimal::ONE + HUNDRED / magnitude)
    }
}

pub fn normalize_american(odds: i64) -> Result<NormalizedOdds> {
    let decimal = american_to_decimal(odds)?;
    Ok(NormalizedOdds {
        decimal,
        implied_probability: Decimal::ONE / decimal,
    })
}

/// Inverse of `american_to_decimal`. Even money comes back as `+100`,
/// which is the same price as `-100`.
pub fn decimal_to_american(decimal: Decimal) -> Result<i64> {
    if decimal <= Decimal::ONE {
        return Err(ArbError::InvalidOdds(format!(
            "decimal odds {} must exceed 1",
            decimal
        )));
    }
    let profit = decimal - Decimal::ONE;
    let american = if decimal >= Decimal::TWO {
        profit * HUNDRED
    } else {
        -(HUNDRED / profit)
    };
    american
        .round()
        .to_i64()
        .ok_or_else(|| ArbError::InvalidOdds(format!("decimal odds {} out of range", decimal)))
}

/// Turns one upstream outcome into a `Quote`. Outcomes without a
/// sportsbook, side or price are rejected individually.
pub fn normalize_outcome(record: &OutcomeRecord) -> Result<Quote> {
    let sportsbook = record
        .sportsbook
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ArbError::DataShape("outcome without sportsbook".to_string()))?;
    let side = record
        .side_label
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(OutcomeSide::from_label)
        .ok_or_else(|| ArbError::DataShape("outcome without side".to_string()))?;
    let american_odds = record
        .american_odds
        .ok_or_else(|| ArbError::InvalidOdds("missing american odds".to_string()))?;
    let odds = normalize_american(american_odds)?;

    Ok(Quote {
        sportsbook: sportsbook.to_string(),
        side,
        american_odds,
        line_value: record.line_value,
        available: record.available,
        odds,
    })
}

/// Normalizes every outcome of a market, dropping the ones that cannot be
/// priced without affecting their siblings. Scan order is preserved.
pub fn normalize_market(market: &MarketRecord) -> Vec<Quote> {
    market
        .outcomes
        .iter()
        .filter_map(|outcome| match normalize_outcome(outcome) {
            Ok(quote) => Some(quote),
            Err(e) => {
                debug!(market_id = market.market_id, error = %e, "skipping outcome");
                None
            }
        })
        .collect()
}
