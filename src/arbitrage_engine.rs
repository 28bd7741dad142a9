use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::shared_types::{BestQuotePair, LineGroup, LineKey, OutcomeSide, Quote};

/// A line whose best prices sum to less than certainty.
#[derive(Debug, Clone, PartialEq)]
pub struct LineArbitrage {
    pub line: LineKey,
    pub pair: BestQuotePair,
    pub implied_probability_sum: Decimal,
    pub profit_percentage: Decimal,
}

/// Highest payout for one side. Ties go to the earliest quote seen.
fn best_quote(quotes: &[Quote]) -> Option<&Quote> {
    quotes.iter().fold(None, |best: Option<&Quote>, q| match best {
        Some(b) if b.decimal_odds() >= q.decimal_odds() => Some(b),
        _ => Some(q),
    })
}

/// Picks the best quote per side. Only lines with exactly two sides can
/// hedge each other; the two legs may come from different sportsbooks.
pub fn select_best_pair(group: &LineGroup) -> Option<BestQuotePair> {
    match group.sides() {
        [first, second] => {
            let a = best_quote(&first.quotes)?;
            let b = best_quote(&second.quotes)?;
            Some(BestQuotePair {
                legs: [a.clone(), b.clone()],
            })
        }
        _ => None,
    }
}

pub fn detect_line(group: &LineGroup) -> Option<LineArbitrage> {
    let pair = select_best_pair(group)?;
    let implied_probability_sum = pair.implied_probability_sum();

    if implied_probability_sum < Decimal::ONE {
        Some(LineArbitrage {
            line: group.line,
            profit_percentage: (Decimal::ONE - implied_probability_sum) * Decimal::ONE_HUNDRED,
            implied_probability_sum,
            pair,
        })
    } else {
        None
    }
}

/// Distinct sides offered anywhere in the market, in scan order.
pub fn market_sides(groups: &BTreeMap<LineKey, LineGroup>) -> Vec<OutcomeSide> {
    let mut sides: Vec<OutcomeSide> = Vec::new();
    for group in groups.values() {
        for entry in group.sides() {
            if !sides.contains(&entry.side) {
                sides.push(entry.side.clone());
            }
        }
    }
    sides
}

/// Best arbitrage across every line of one market. Lower-profit lines are
/// dominated and dropped; equal profits keep the lowest line.
pub fn detect_market(groups: &BTreeMap<LineKey, LineGroup>) -> Option<LineArbitrage> {
    if market_sides(groups).len() != 2 {
        return None;
    }
    groups
        .values()
        .filter_map(detect_line)
        .fold(None, |best: Option<LineArbitrage>, arb| match best {
            Some(b) if b.profit_percentage >= arb.profit_percentage => Some(b),
            _ => Some(arb),
        })
}
