//! Closed-position ledger: realized results keyed by ISO week.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use crate::models::ClosedPosition;

/// One realized position as recorded when it left the live snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedRecord {
    pub id: String,
    pub trader: String,
    pub symbol: String,
    pub pnl: f64,
    pub pnl_percentage: f64,
    pub first_seen: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl ClosedRecord {
    /// Key used by `get_avg_pnl` lookups.
    pub fn unique_key(&self) -> String {
        format!("{}:{}", self.trader, self.symbol)
    }
}

/// JSON-file-backed ledger of closed positions, grouped by the ISO week of
/// the close.
pub struct ClosedPositionStore {
    path: PathBuf,
    weeks: RwLock<BTreeMap<String, Vec<ClosedRecord>>>,
}

impl ClosedPositionStore {
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let weeks = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(weeks) => weeks,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt closed-position file, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self {
            path,
            weeks: RwLock::new(weeks),
        }
    }

    /// Append one close event under its ISO week.
    pub async fn record(&self, closed: &ClosedPosition) -> bool {
        let record = ClosedRecord {
            id: Uuid::new_v4().to_string(),
            trader: closed.trader.clone(),
            symbol: closed.symbol.clone(),
            pnl: closed.pnl.to_f64().unwrap_or(0.0),
            pnl_percentage: closed.pnl_percentage.to_f64().unwrap_or(0.0),
            first_seen: closed.first_seen,
            closed_at: closed.closed_at,
        };

        let mut weeks = self.weeks.write().await;
        weeks
            .entry(week_key(closed.closed_at))
            .or_default()
            .push(record);
        self.persist(&weeks).await
    }

    /// Average realized PnL (and sample count) across every record matching
    /// a `trader:symbol` key.
    pub async fn average_pnl(&self, unique_key: &str) -> (Option<f64>, usize) {
        let weeks = self.weeks.read().await;

        let matching: Vec<f64> = weeks
            .values()
            .flatten()
            .filter(|r| r.unique_key() == unique_key)
            .map(|r| r.pnl)
            .collect();

        if matching.is_empty() {
            (None, 0)
        } else {
            let avg = matching.iter().sum::<f64>() / matching.len() as f64;
            (Some(avg), matching.len())
        }
    }

    /// Total number of records across all weeks.
    pub async fn len(&self) -> usize {
        self.weeks.read().await.values().map(Vec::len).sum()
    }

    async fn persist(&self, weeks: &BTreeMap<String, Vec<ClosedRecord>>) -> bool {
        let text = match serde_json::to_string_pretty(weeks) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize closed-position ledger");
                return false;
            }
        };

        match tokio::fs::write(&self.path, text).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to write closed-position file");
                false
            }
        }
    }
}

/// ISO week bucket, e.g. `2026-W32`.
fn week_key(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn closed(trader: &str, symbol: &str, pnl: rust_decimal::Decimal) -> ClosedPosition {
        let at = Utc.with_ymd_and_hms(2026, 8, 3, 12, 0, 0).unwrap();
        ClosedPosition {
            trader: trader.to_string(),
            symbol: symbol.to_string(),
            pnl,
            pnl_percentage: dec!(1.0),
            first_seen: at,
            closed_at: at,
        }
    }

    #[tokio::test]
    async fn test_average_over_matching_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClosedPositionStore::load(dir.path().join("closed.json")).await;

        store.record(&closed("a", "BTCUSDT", dec!(2.0))).await;
        store.record(&closed("a", "BTCUSDT", dec!(4.0))).await;
        store.record(&closed("b", "BTCUSDT", dec!(100.0))).await;

        let (avg, count) = store.average_pnl("a:BTCUSDT").await;
        assert_eq!(avg, Some(3.0));
        assert_eq!(count, 2);

        let (avg, count) = store.average_pnl("c:ETHUSDT").await;
        assert_eq!(avg, None);
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_week_bucketing_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.json");

        let store = ClosedPositionStore::load(&path).await;
        store.record(&closed("a", "BTCUSDT", dec!(1.0))).await;

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(text.contains("2026-W32"));

        let reloaded = ClosedPositionStore::load(&path).await;
        assert_eq!(reloaded.len().await, 1);
    }
}
