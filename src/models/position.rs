//! Position model for one scraped row of a trader's open-position table.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Currency codes recognized inside a PnL cell, in match priority order.
const PNL_CURRENCIES: [&str; 2] = ["USDT", "USDC"];

/// Minimum number of cells a table row must have to be accepted:
/// symbol, side, size, margin, pnl.
pub const MIN_ROW_CELLS: usize = 5;

/// One open copy-trading position as scraped from a trader's table.
///
/// `size` and `margin` keep the exact text the table showed (the UI mixes
/// units and decimal separators per locale); only the PnL cell is parsed
/// into numeric fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Name of the followed trader this position belongs to
    pub trader: String,

    /// Contract symbol, e.g. "BTCUSDT"
    pub symbol: String,

    /// Direction as displayed, e.g. "Long 10x"
    pub side: String,

    /// Position size, text-preserving
    pub size: String,

    /// Margin, text-preserving
    pub margin: String,

    /// The raw PnL cell text
    pub pnl_raw: String,

    /// Signed PnL amount parsed from the cell
    #[serde(with = "rust_decimal::serde::float")]
    pub pnl_value: Decimal,

    /// Currency code found in the cell, empty if none was recognized
    pub pnl_currency: String,

    /// Signed PnL percentage parsed from the cell
    #[serde(with = "rust_decimal::serde::float")]
    pub pnl_percentage: Decimal,
}

impl Position {
    /// Build a position from one row of cells. Returns `None` for rows that
    /// are too short or have an empty symbol cell; those are skipped, never
    /// fatal.
    pub fn from_row(trader: &str, cells: &[&str]) -> Option<Self> {
        if cells.len() < MIN_ROW_CELLS {
            return None;
        }

        let symbol = cells[0].trim();
        if symbol.is_empty() {
            return None;
        }

        let pnl = PnlCell::parse(cells[4]);

        Some(Self {
            trader: trader.to_string(),
            symbol: symbol.to_string(),
            side: cells[1].trim().to_string(),
            size: cells[2].trim().to_string(),
            margin: cells[3].trim().to_string(),
            pnl_raw: pnl.raw,
            pnl_value: pnl.value,
            pnl_currency: pnl.currency,
            pnl_percentage: pnl.percentage,
        })
    }

    /// Dedup key: one position per `(trader, symbol)` pair in a snapshot.
    pub fn key(&self) -> (String, String) {
        (self.trader.clone(), self.symbol.clone())
    }

    /// True when the position is currently in profit.
    pub fn is_profit(&self) -> bool {
        self.pnl_value > Decimal::ZERO
    }
}

/// Parsed form of a PnL table cell like `-1.10 USDT-4.80%`.
#[derive(Debug, Clone, Default)]
pub struct PnlCell {
    pub raw: String,
    pub value: Decimal,
    pub currency: String,
    pub percentage: Decimal,
}

impl PnlCell {
    /// Parse a free-text PnL cell.
    ///
    /// The cell format is `"<signed-number> <CURRENCY><signed-percent>%"`.
    /// The first recognized currency code splits the cell: everything before
    /// it is the signed amount, everything between it and a trailing `%` is
    /// the signed percentage. Unparseable fields default to zero; this
    /// function never fails.
    pub fn parse(cell: &str) -> Self {
        let raw = cell.trim().to_string();

        let found = PNL_CURRENCIES
            .iter()
            .find_map(|c| raw.find(c).map(|idx| (idx, *c)));

        let (idx, currency) = match found {
            Some(hit) => hit,
            None => {
                return Self {
                    raw,
                    ..Self::default()
                }
            }
        };

        let value = parse_signed_decimal(&raw[..idx]);

        let rest = raw[idx + currency.len()..].trim();
        let pct_text = rest.strip_suffix('%').unwrap_or(rest);
        let percentage = parse_signed_decimal(pct_text);

        Self {
            raw,
            value,
            currency: currency.to_string(),
            percentage,
        }
    }
}

/// Parse a signed decimal out of scraped text, normalizing `,` decimal
/// separators. Returns zero on failure.
fn parse_signed_decimal(text: &str) -> Decimal {
    let normalized = text.trim().replace(',', ".");
    Decimal::from_str(&normalized).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_negative_pnl_cell() {
        let cell = PnlCell::parse("-1.10 USDT-4.80%");

        assert_eq!(cell.value, dec!(-1.10));
        assert_eq!(cell.currency, "USDT");
        assert_eq!(cell.percentage, dec!(-4.80));
        assert_eq!(cell.raw, "-1.10 USDT-4.80%");
    }

    #[test]
    fn test_parse_positive_pnl_cell() {
        let cell = PnlCell::parse("+0.13 USDT+0.15%");

        assert_eq!(cell.value, dec!(0.13));
        assert_eq!(cell.currency, "USDT");
        assert_eq!(cell.percentage, dec!(0.15));
    }

    #[test]
    fn test_parse_usdc_cell() {
        let cell = PnlCell::parse("2.50 USDC1.20%");

        assert_eq!(cell.value, dec!(2.50));
        assert_eq!(cell.currency, "USDC");
        assert_eq!(cell.percentage, dec!(1.20));
    }

    #[test]
    fn test_parse_comma_decimal_separator() {
        let cell = PnlCell::parse("-1,10 USDT-4,80%");

        assert_eq!(cell.value, dec!(-1.10));
        assert_eq!(cell.percentage, dec!(-4.80));
    }

    #[test]
    fn test_unknown_currency_is_noop() {
        let cell = PnlCell::parse("12.34 EUR5.00%");

        assert_eq!(cell.value, Decimal::ZERO);
        assert_eq!(cell.currency, "");
        assert_eq!(cell.percentage, Decimal::ZERO);
        assert_eq!(cell.raw, "12.34 EUR5.00%");
    }

    #[test]
    fn test_garbage_fields_default_to_zero() {
        let cell = PnlCell::parse("n/a USDT--%");

        assert_eq!(cell.currency, "USDT");
        assert_eq!(cell.value, Decimal::ZERO);
        assert_eq!(cell.percentage, Decimal::ZERO);
    }

    #[test]
    fn test_from_row() {
        let cells = ["BTCUSDT", "Long 10x", "0.5", "120.00", "-1.10 USDT-4.80%"];
        let pos = Position::from_row("trader-a", &cells).unwrap();

        assert_eq!(pos.trader, "trader-a");
        assert_eq!(pos.symbol, "BTCUSDT");
        assert_eq!(pos.side, "Long 10x");
        assert_eq!(pos.size, "0.5");
        assert_eq!(pos.margin, "120.00");
        assert_eq!(pos.pnl_value, dec!(-1.10));
        assert_eq!(pos.pnl_percentage, dec!(-4.80));
        assert!(!pos.is_profit());
    }

    #[test]
    fn test_from_row_rejects_short_rows() {
        let cells = ["BTCUSDT", "Long", "0.5"];
        assert!(Position::from_row("trader-a", &cells).is_none());
    }

    #[test]
    fn test_from_row_rejects_empty_symbol() {
        let cells = ["  ", "Long", "0.5", "120.00", "+1 USDT+1%"];
        assert!(Position::from_row("trader-a", &cells).is_none());
    }
}
