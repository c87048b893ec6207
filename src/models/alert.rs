//! Alert and close events emitted by the position tracker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which threshold a position crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    QuickGainer,
    Explosion,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::QuickGainer => "quick_gainer",
            AlertKind::Explosion => "explosion",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::QuickGainer => "Quick gainer",
            AlertKind::Explosion => "Position explosion",
        }
    }
}

/// One-shot notification fired when a position's PnL percentage growth
/// crosses a configured threshold. Ephemeral: alerts are broadcast, not
/// persisted.
#[derive(Debug, Clone)]
pub struct GrowthAlert {
    pub trader: String,
    pub symbol: String,
    pub kind: AlertKind,
    pub current_pnl_percentage: Decimal,
    /// Growth since first observation (for entry-case alerts, the entry
    /// percentage itself)
    pub growth: Decimal,
    pub pnl: Decimal,
    pub message: String,
}

/// Emitted when a tracked key disappears from a snapshot. Consumed by the
/// closed-position ledger.
#[derive(Debug, Clone)]
pub struct ClosedPosition {
    pub trader: String,
    pub symbol: String,
    pub pnl: Decimal,
    pub pnl_percentage: Decimal,
    pub first_seen: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}
