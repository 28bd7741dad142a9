use rust_decimal::Decimal;

use crate::shared_types::{BestQuotePair, StakeAllocation, StakeLeg};

/// Splits `total_stake` across the legs so that every outcome pays the same
/// amount. Values are left unrounded; rounding happens on the wire.
///
/// With decimal odds `d_i` and `P = sum(1 / d_i)`, each leg gets
/// `(S / d_i) / P` and pays `S / P`. The stakes sum to `S`, so the
/// guaranteed profit is that payout less `S`.
pub fn allocate(pair: &BestQuotePair, total_stake: Decimal) -> StakeAllocation {
    let implied_sum = pair.implied_probability_sum();

    let legs: Vec<StakeLeg> = pair
        .legs
        .iter()
        .map(|quote| {
            let stake = (total_stake / quote.decimal_odds()) / implied_sum;
            StakeLeg {
                side: quote.side.clone(),
                sportsbook: quote.sportsbook.clone(),
                american_odds: quote.american_odds,
                stake,
                potential_win: stake * quote.decimal_odds(),
            }
        })
        .collect();

    let staked: Decimal = legs.iter().map(|l| l.stake).sum();
    let payout = legs
        .iter()
        .map(|l| l.potential_win)
        .min()
        .unwrap_or(Decimal::ZERO);

    StakeAllocation {
        total_stake,
        guaranteed_profit: payout - staked,
        legs,
    }
}
