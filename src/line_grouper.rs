use std::collections::BTreeMap;

use crate::shared_types::{LineGroup, LineKey, Quote};

/// Partitions a market's quotes by the wager they refer to. Unavailable
/// quotes are dropped first; within each line, sides and quotes keep
/// scan order so later tie-breaks are deterministic.
pub fn group_by_line(quotes: &[Quote]) -> BTreeMap<LineKey, LineGroup> {
    let mut groups: BTreeMap<LineKey, LineGroup> = BTreeMap::new();
    for quote in quotes.iter().filter(|q| q.available) {
        let key = quote.line_key();
        groups
            .entry(key)
            .or_insert_with(|| LineGroup::new(key))
            .push(quote.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::normalize_american;
    use crate::shared_types::OutcomeSide;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn quote(
        book: &str,
        side: OutcomeSide,
        odds: i64,
        line: Option<Decimal>,
        available: bool,
    ) -> Quote {
        Quote {
            sportsbook: book.to_string(),
            side,
            american_odds: odds,
            line_value: line,
            available,
            odds: normalize_american(odds).unwrap(),
        }
    }

    #[test]
    fn test_groups_by_exact_line() {
        let quotes = vec![
            quote("BookA", OutcomeSide::Over, -110, Some(dec!(220.5)), true),
            quote("BookB", OutcomeSide::Under, 105, Some(dec!(220.5)), true),
            quote("BookA", OutcomeSide::Over, -105, Some(dec!(221.5)), true),
            quote("BookC", OutcomeSide::Under, -115, Some(dec!(220.50)), true),
        ];

        let groups = group_by_line(&quotes);
        assert_eq!(groups.len(), 2);

        let main = &groups[&LineKey::Value(dec!(220.5))];
        assert_eq!(main.side_count(), 2);
        let unders: Vec<&str> = main
            .quotes(&OutcomeSide::Under)
            .iter()
            .map(|q| q.sportsbook.as_str())
            .collect();
        assert_eq!(unders, vec!["BookB", "BookC"]);

        let alt = &groups[&LineKey::Value(dec!(221.5))];
        assert_eq!(alt.side_count(), 1);
        assert!(alt.quotes(&OutcomeSide::Under).is_empty());
    }

    #[test]
    fn test_unavailable_quotes_excluded() {
        let quotes = vec![
            quote("BookA", OutcomeSide::Over, 102, Some(dec!(25.5)), true),
            quote("BookB", OutcomeSide::Under, 150, Some(dec!(25.5)), false),
        ];

        let groups = group_by_line(&quotes);
        let group = &groups[&LineKey::Value(dec!(25.5))];
        assert_eq!(group.side_count(), 1);
        assert_eq!(group.sides()[0].side, OutcomeSide::Over);
    }

    #[test]
    fn test_missing_line_shares_one_group() {
        let quotes = vec![
            quote("BookA", OutcomeSide::Home, -120, None, true),
            quote("BookB", OutcomeSide::Away, 110, None, true),
            quote("BookC", OutcomeSide::Away, 115, None, true),
        ];

        let groups = group_by_line(&quotes);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&LineKey::NoLine].quotes(&OutcomeSide::Away).len(), 2);
    }
}
