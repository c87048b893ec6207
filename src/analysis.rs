//! Advisory text generation behind a trait seam.
//!
//! The production deployment can plug an LLM-backed generator in here; the
//! shipped implementation summarizes the latest snapshot with plain rules
//! so the `analyze` commands work out of the box.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Snapshot;

/// Produces recommendation text for one symbol or the whole portfolio.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze_symbol(&self, snapshot: Option<Arc<Snapshot>>, symbol: &str)
        -> Result<String>;

    async fn analyze_portfolio(&self, snapshot: Option<Arc<Snapshot>>) -> Result<String>;
}

/// Rule-based advisory: exposure counts, aggregate PnL, and outliers.
pub struct HeuristicAnalysis {
    /// Positions beyond this absolute percentage get called out
    pub outlier_pct: Decimal,
}

impl Default for HeuristicAnalysis {
    fn default() -> Self {
        Self {
            outlier_pct: dec!(15),
        }
    }
}

#[async_trait]
impl AnalysisService for HeuristicAnalysis {
    async fn analyze_symbol(
        &self,
        snapshot: Option<Arc<Snapshot>>,
        symbol: &str,
    ) -> Result<String> {
        let Some(snapshot) = snapshot else {
            return Ok(format!("No live data yet for {}.", symbol));
        };

        let matching: Vec<_> = snapshot
            .positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .collect();

        if matching.is_empty() {
            return Ok(format!("No open position in {} right now.", symbol));
        }

        let total: Decimal = matching.iter().map(|p| p.pnl_value).sum();
        let mut lines = vec![format!(
            "{}: {} open position(s), combined PnL {:.2} USDT.",
            symbol,
            matching.len(),
            total
        )];

        for pos in &matching {
            let stance = if pos.pnl_percentage >= self.outlier_pct {
                "consider taking profit"
            } else if pos.pnl_percentage <= -self.outlier_pct {
                "review the stop level"
            } else {
                "within normal range"
            };
            lines.push(format!(
                "  {} {} at {:.2}%: {}",
                pos.trader, pos.side, pos.pnl_percentage, stance
            ));
        }

        Ok(lines.join("\n"))
    }

    async fn analyze_portfolio(&self, snapshot: Option<Arc<Snapshot>>) -> Result<String> {
        let Some(snapshot) = snapshot else {
            return Ok("No live data yet; nothing to analyze.".to_string());
        };

        let winners = snapshot
            .positions
            .iter()
            .filter(|p| p.pnl_value > Decimal::ZERO)
            .count();
        let outliers: Vec<String> = snapshot
            .positions
            .iter()
            .filter(|p| p.pnl_percentage.abs() >= self.outlier_pct)
            .map(|p| format!("{} ({:.2}%)", p.symbol, p.pnl_percentage))
            .collect();

        let mut text = format!(
            "{} open positions, {} in profit. Total PnL {:.2} USDT (avg {:.2}%).",
            snapshot.len(),
            winners,
            snapshot.total_pnl,
            snapshot.total_pnl_percentage
        );

        if !outliers.is_empty() {
            text.push_str(&format!(" Outliers worth a look: {}.", outliers.join(", ")));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;

    fn snapshot() -> Arc<Snapshot> {
        let rows = [
            ("a", "BTCUSDT", "2.00 USDT20.00%"),
            ("b", "ETHUSDT", "-0.50 USDT-3.00%"),
        ];
        let positions = rows
            .iter()
            .map(|(trader, symbol, pnl)| {
                let cells = [*symbol, "Long 5x", "1.0", "100.00", *pnl];
                Position::from_row(trader, &cells).unwrap()
            })
            .collect();
        Arc::new(Snapshot::from_positions(positions))
    }

    #[tokio::test]
    async fn test_symbol_analysis_flags_outliers() {
        let analysis = HeuristicAnalysis::default();
        let text = analysis
            .analyze_symbol(Some(snapshot()), "BTCUSDT")
            .await
            .unwrap();

        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("taking profit"));
    }

    #[tokio::test]
    async fn test_portfolio_analysis_without_data() {
        let analysis = HeuristicAnalysis::default();
        let text = analysis.analyze_portfolio(None).await.unwrap();
        assert!(text.contains("No live data"));
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let analysis = HeuristicAnalysis::default();
        let text = analysis
            .analyze_symbol(Some(snapshot()), "DOGEUSDT")
            .await
            .unwrap();
        assert!(text.contains("No open position"));
    }
}
