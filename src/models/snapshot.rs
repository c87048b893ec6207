//! Snapshot: the complete set of open positions from one polling cycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Position;

/// All positions observed in one polling cycle, with aggregate PnL.
///
/// Immutable once constructed; the pipeline shares it as `Arc<Snapshot>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub positions: Vec<Position>,

    /// Sum of all position PnL values
    #[serde(with = "rust_decimal::serde::float")]
    pub total_pnl: Decimal,

    /// Arithmetic mean of all position PnL percentages
    #[serde(with = "rust_decimal::serde::float")]
    pub total_pnl_percentage: Decimal,

    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    /// Build a snapshot from raw extraction output.
    ///
    /// Positions are deduplicated by `(trader, symbol)`; when two rendering
    /// contexts return the same pair, the first occurrence wins and later
    /// ones are discarded.
    pub fn from_positions(raw: Vec<Position>) -> Self {
        let mut seen = HashSet::new();
        let positions: Vec<Position> = raw
            .into_iter()
            .filter(|p| seen.insert(p.key()))
            .collect();

        let total_pnl: Decimal = positions.iter().map(|p| p.pnl_value).sum();
        let total_pnl_percentage = if positions.is_empty() {
            Decimal::ZERO
        } else {
            let sum: Decimal = positions.iter().map(|p| p.pnl_percentage).sum();
            sum / Decimal::from(positions.len())
        };

        Self {
            positions,
            total_pnl,
            total_pnl_percentage,
            timestamp: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_position(trader: &str, symbol: &str, pnl: Decimal, pct: Decimal) -> Position {
        let pnl_cell = format!("{} USDT{}%", pnl, pct);
        let cells = [symbol, "Long 5x", "1.0", "100.00", pnl_cell.as_str()];
        Position::from_row(trader, &cells).unwrap()
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let first = make_position("a", "BTCUSDT", dec!(1.00), dec!(2.00));
        let dupe = make_position("a", "BTCUSDT", dec!(9.99), dec!(9.99));
        let other = make_position("b", "BTCUSDT", dec!(0.50), dec!(1.00));

        let snap = Snapshot::from_positions(vec![first, dupe, other]);

        assert_eq!(snap.len(), 2);
        assert_eq!(snap.positions[0].pnl_value, dec!(1.00));
        assert_eq!(snap.positions[1].trader, "b");
    }

    #[test]
    fn test_aggregates() {
        let snap = Snapshot::from_positions(vec![
            make_position("a", "BTCUSDT", dec!(2.00), dec!(4.00)),
            make_position("a", "ETHUSDT", dec!(-1.00), dec!(-2.00)),
        ]);

        assert_eq!(snap.total_pnl, dec!(1.00));
        assert_eq!(snap.total_pnl_percentage, dec!(1.00));
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = Snapshot::from_positions(vec![]);

        assert!(snap.is_empty());
        assert_eq!(snap.total_pnl, Decimal::ZERO);
        assert_eq!(snap.total_pnl_percentage, Decimal::ZERO);
    }
}
