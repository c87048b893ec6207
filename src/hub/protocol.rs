//! Wire protocol: JSON text frames exchanged with viewer clients.
//!
//! Inbound messages decode once into [`ClientCommand`]; dispatch is a plain
//! match with one arm per tag. Unknown tags fail the decode and the caller
//! logs and ignores them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{GrowthAlert, Position, Snapshot};
use crate::stores::PortfolioData;

/// Everything a client may send us.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    Ping,
    GetPositions,
    Refresh,
    Restart,
    Analyze {
        symbol: String,
    },
    PortfolioAnalysis,
    ClickTpsl {
        trader: String,
        symbol: String,
        #[serde(default)]
        size: String,
    },
    ClosePosition {
        trader: String,
        symbol: String,
        #[serde(default)]
        size: String,
    },
    CloseModal {
        trader: String,
    },
    GetAvgPnl {
        unique_key: String,
    },
    GetPortfolio,
    UpdateInitialValue {
        value: f64,
        #[serde(default)]
        date: Option<String>,
    },
    AddGrowthUpdate {
        value: f64,
        #[serde(default)]
        notes: String,
        #[serde(default)]
        date: Option<String>,
    },
    UpdateCurrentValue {
        value: f64,
    },
    AddWithdrawal {
        amount: f64,
        category: String,
        #[serde(default)]
        description: String,
        currency: String,
    },
    UpdateWithdrawal {
        id: String,
        #[serde(default)]
        amount: Option<f64>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        currency: Option<String>,
    },
    DeleteWithdrawal {
        id: String,
    },
    ScrapeGrowth,
    Auth {
        token: String,
    },
}

/// Everything we push to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Positions {
        data: Vec<Position>,
        count: usize,
        #[serde(rename = "totalPnL", with = "rust_decimal::serde::float")]
        total_pnl: Decimal,
        #[serde(rename = "totalPnLPercentage", with = "rust_decimal::serde::float")]
        total_pnl_percentage: Decimal,
        timestamp: DateTime<Utc>,
    },
    Alert {
        title: String,
        message: String,
        is_profit: bool,
        timestamp: DateTime<Utc>,
    },
    QuickGainer {
        alert_type: String,
        trader: String,
        symbol: String,
        #[serde(with = "rust_decimal::serde::float")]
        pnl: Decimal,
        #[serde(with = "rust_decimal::serde::float")]
        pnl_percentage: Decimal,
        #[serde(with = "rust_decimal::serde::float")]
        growth: Decimal,
        message: String,
        timestamp: DateTime<Utc>,
    },
    AuthSuccess,
    AuthFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    RefreshStarted {
        success: bool,
    },
    RestartStarted {
        success: bool,
    },
    AnalysisStarted {
        target: String,
    },
    TpslClickResult {
        success: bool,
    },
    ClosePositionResult {
        success: bool,
    },
    CloseModalResult {
        success: bool,
    },
    AvgPnlResult {
        unique_key: String,
        avg_pnl: Option<f64>,
        count: usize,
        success: bool,
    },
    PortfolioUpdateResult {
        action: String,
        success: bool,
    },
    #[serde(rename = "portfolio_data")]
    Portfolio {
        data: PortfolioData,
    },
    GrowthScraped {
        value: Option<f64>,
        success: bool,
    },
}

impl ServerMessage {
    /// The `positions` push for one snapshot.
    pub fn positions(snapshot: &Snapshot) -> Self {
        Self::Positions {
            data: snapshot.positions.clone(),
            count: snapshot.positions.len(),
            total_pnl: snapshot.total_pnl,
            total_pnl_percentage: snapshot.total_pnl_percentage,
            timestamp: snapshot.timestamp,
        }
    }

    /// The structured frame for a tracker alert.
    pub fn growth_alert(alert: &GrowthAlert) -> Self {
        Self::QuickGainer {
            alert_type: alert.kind.as_str().to_string(),
            trader: alert.trader.clone(),
            symbol: alert.symbol.clone(),
            pnl: alert.pnl,
            pnl_percentage: alert.current_pnl_percentage,
            growth: alert.growth,
            message: alert.message.clone(),
            timestamp: Utc::now(),
        }
    }

    /// The human-readable companion frame for a tracker alert.
    pub fn alert_banner(alert: &GrowthAlert) -> Self {
        Self::Alert {
            title: alert.kind.title().to_string(),
            message: alert.message.clone(),
            is_profit: alert.pnl > Decimal::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// A generic notification frame.
    pub fn notice(title: &str, message: String, is_profit: bool) -> Self {
        Self::Alert {
            title: title.to_string(),
            message,
            is_profit,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_simple_commands() {
        for (json, expect_ping) in [
            (r#"{"type":"ping"}"#, true),
            (r#"{"type":"get_positions"}"#, false),
        ] {
            let cmd: ClientCommand = serde_json::from_str(json).unwrap();
            assert_eq!(matches!(cmd, ClientCommand::Ping), expect_ping);
        }
    }

    #[test]
    fn test_decode_click_tpsl() {
        let json = r#"{"type":"click_tpsl","trader":"a","symbol":"BTCUSDT","size":"0.5"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();

        match cmd {
            ClientCommand::ClickTpsl {
                trader,
                symbol,
                size,
            } => {
                assert_eq!(trader, "a");
                assert_eq!(symbol, "BTCUSDT");
                assert_eq!(size, "0.5");
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_camel_case_fields() {
        let json = r#"{"type":"get_avg_pnl","uniqueKey":"a:BTCUSDT"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();

        match cmd {
            ClientCommand::GetAvgPnl { unique_key } => assert_eq!(unique_key, "a:BTCUSDT"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_partial_withdrawal_update() {
        let json = r#"{"type":"update_withdrawal","id":"w1","amount":25.0}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();

        match cmd {
            ClientCommand::UpdateWithdrawal {
                id,
                amount,
                category,
                ..
            } => {
                assert_eq!(id, "w1");
                assert_eq!(amount, Some(25.0));
                assert_eq!(category, None);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_an_error() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"format_disk"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>("not json at all").is_err());
    }

    #[test]
    fn test_positions_frame_wire_spelling() {
        let snapshot = Snapshot::from_positions(vec![]);
        let json = serde_json::to_value(ServerMessage::positions(&snapshot)).unwrap();

        assert_eq!(json["type"], "positions");
        assert!(json.get("totalPnL").is_some());
        assert!(json.get("totalPnLPercentage").is_some());
        assert_eq!(json["count"], 0);
    }

    #[test]
    fn test_growth_alert_frame() {
        let alert = GrowthAlert {
            trader: "a".to_string(),
            symbol: "BTCUSDT".to_string(),
            kind: AlertKind::Explosion,
            current_pnl_percentage: dec!(22.0),
            growth: dec!(22.0),
            pnl: dec!(2.2),
            message: "boom".to_string(),
        };

        let json = serde_json::to_value(ServerMessage::growth_alert(&alert)).unwrap();
        assert_eq!(json["type"], "quick_gainer");
        assert_eq!(json["alertType"], "explosion");
        assert_eq!(json["pnlPercentage"], 22.0);

        let json = serde_json::to_value(ServerMessage::alert_banner(&alert)).unwrap();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["isProfit"], true);
    }

    #[test]
    fn test_auth_frames() {
        let json = serde_json::to_value(ServerMessage::AuthSuccess).unwrap();
        assert_eq!(json["type"], "auth_success");

        let json = serde_json::to_value(ServerMessage::AuthFailed {
            reason: Some("bad token".to_string()),
        })
        .unwrap();
        assert_eq!(json["type"], "auth_failed");
        assert_eq!(json["reason"], "bad token");
    }
}
