//! Position tracker: turns the snapshot stream into debounced, idempotent
//! growth alerts.
//!
//! Pure state machine, no I/O. `update` is the only mutator and is called
//! from exactly one place (the snapshot pump), so the map needs no locking.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use crate::models::{AlertKind, ClosedPosition, GrowthAlert, Snapshot};

/// Alert thresholds, in PnL percentage points.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Growth that fires a quick-gainer alert
    pub quick_gainer_pct: Decimal,

    /// Growth that fires an explosion alert
    pub explosion_pct: Decimal,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            quick_gainer_pct: dec!(10),
            explosion_pct: dec!(20),
        }
    }
}

/// Per-key growth state. Created when a `(trader, symbol)` pair first
/// appears, deleted the cycle it disappears; alert flags live and die with
/// the entry, so a reopened position starts fresh.
#[derive(Debug, Clone)]
pub struct TrackedPosition {
    pub first_seen: DateTime<Utc>,
    pub initial_pnl_percentage: Decimal,
    pub current_pnl_percentage: Decimal,
    pub current_pnl: Decimal,
    pub peak_pnl_percentage: Decimal,
    pub quick_gainer_sent: bool,
    pub explosion_sent: bool,
}

/// What one `update` call produced.
#[derive(Debug, Default)]
pub struct TrackerOutcome {
    pub alerts: Vec<GrowthAlert>,
    pub closed: Vec<ClosedPosition>,
}

/// The tracker owns its map exclusively; no other component mutates it.
pub struct PositionTracker {
    config: TrackerConfig,
    tracked: HashMap<(String, String), TrackedPosition>,
}

impl PositionTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracked: HashMap::new(),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Consume one snapshot: drop closed keys, update or create the rest,
    /// and run the threshold crossing checks.
    pub fn update(&mut self, snapshot: &Snapshot) -> TrackerOutcome {
        let mut outcome = TrackerOutcome::default();
        let now = snapshot.timestamp;

        let present: HashSet<(String, String)> =
            snapshot.positions.iter().map(|p| p.key()).collect();

        // Keys no longer in the snapshot are closed positions.
        let gone: Vec<(String, String)> = self
            .tracked
            .keys()
            .filter(|k| !present.contains(*k))
            .cloned()
            .collect();

        for key in gone {
            if let Some(tp) = self.tracked.remove(&key) {
                debug!(trader = %key.0, symbol = %key.1, pnl = %tp.current_pnl, "Position closed");
                outcome.closed.push(ClosedPosition {
                    trader: key.0,
                    symbol: key.1,
                    pnl: tp.current_pnl,
                    pnl_percentage: tp.current_pnl_percentage,
                    first_seen: tp.first_seen,
                    closed_at: now,
                });
            }
        }

        for pos in &snapshot.positions {
            let key = pos.key();

            let crossed = match self.tracked.get_mut(&key) {
                Some(tp) => {
                    tp.current_pnl = pos.pnl_value;
                    tp.current_pnl_percentage = pos.pnl_percentage;
                    if pos.pnl_percentage > tp.peak_pnl_percentage {
                        tp.peak_pnl_percentage = pos.pnl_percentage;
                    }

                    let growth = tp.current_pnl_percentage - tp.initial_pnl_percentage;
                    if growth > Decimal::ZERO {
                        check_crossing(&self.config, tp, growth).map(|kind| (kind, growth))
                    } else {
                        None
                    }
                }
                None => {
                    let mut tp = TrackedPosition {
                        first_seen: now,
                        initial_pnl_percentage: pos.pnl_percentage,
                        current_pnl_percentage: pos.pnl_percentage,
                        current_pnl: pos.pnl_value,
                        peak_pnl_percentage: pos.pnl_percentage,
                        quick_gainer_sent: false,
                        explosion_sent: false,
                    };

                    // A position discovered already deep in profit alerts on
                    // its entry percentage the same cycle.
                    let entry = pos.pnl_percentage;
                    let crossed = if entry > Decimal::ZERO {
                        check_crossing(&self.config, &mut tp, entry).map(|kind| (kind, entry))
                    } else {
                        None
                    };

                    self.tracked.insert(key.clone(), tp);
                    crossed
                }
            };

            if let Some((kind, growth)) = crossed {
                let alert = GrowthAlert {
                    trader: pos.trader.clone(),
                    symbol: pos.symbol.clone(),
                    kind,
                    current_pnl_percentage: pos.pnl_percentage,
                    growth,
                    pnl: pos.pnl_value,
                    message: format!(
                        "{} ({}) is up {:.2}% since first seen, now at {:.2}% ({} {})",
                        pos.symbol,
                        pos.trader,
                        growth,
                        pos.pnl_percentage,
                        pos.pnl_value,
                        if pos.pnl_currency.is_empty() {
                            "USDT"
                        } else {
                            &pos.pnl_currency
                        },
                    ),
                };

                info!(
                    trader = %alert.trader,
                    symbol = %alert.symbol,
                    kind = alert.kind.as_str(),
                    growth = %alert.growth,
                    "Growth alert"
                );

                outcome.alerts.push(alert);
            }
        }

        outcome
    }
}

/// One-shot crossing check. Explosion sets both flags so a later dip back
/// through the gainer threshold cannot re-fire the lower alert.
fn check_crossing(
    config: &TrackerConfig,
    tp: &mut TrackedPosition,
    value: Decimal,
) -> Option<AlertKind> {
    if value >= config.explosion_pct && !tp.explosion_sent {
        tp.explosion_sent = true;
        tp.quick_gainer_sent = true;
        Some(AlertKind::Explosion)
    } else if value >= config.quick_gainer_pct && !tp.quick_gainer_sent {
        tp.quick_gainer_sent = true;
        Some(AlertKind::QuickGainer)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Position;

    fn snapshot(entries: &[(&str, &str, Decimal, Decimal)]) -> Snapshot {
        let positions = entries
            .iter()
            .map(|(trader, symbol, pnl, pct)| {
                let cell = format!("{} USDT{}%", pnl, pct);
                let cells = [*symbol, "Long 5x", "1.0", "100.00", cell.as_str()];
                Position::from_row(trader, &cells).unwrap()
            })
            .collect();
        Snapshot::from_positions(positions)
    }

    fn tracker() -> PositionTracker {
        PositionTracker::new(TrackerConfig::default())
    }

    #[test]
    fn test_quick_gainer_fires_once() {
        let mut t = tracker();

        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.0), dec!(0.0))]));
        assert!(out.alerts.is_empty());

        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(1.2), dec!(12.0))]));
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].kind, AlertKind::QuickGainer);
        assert_eq!(out.alerts[0].growth, dec!(12.0));

        // Still above the threshold: no repeat.
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(1.5), dec!(15.0))]));
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_explosion_skips_quick_gainer() {
        let mut t = tracker();

        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.0), dec!(0.0))]));
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(2.5), dec!(25.0))]));

        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].kind, AlertKind::Explosion);

        // Both flags are set; nothing else fires while the key lives.
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(3.0), dec!(30.0))]));
        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_entry_already_deep_in_profit() {
        let mut t = tracker();

        // Brand-new position at 22% fires an explosion the same cycle.
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(2.2), dec!(22.0))]));

        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].kind, AlertKind::Explosion);
        assert_eq!(out.alerts[0].growth, dec!(22.0));
    }

    #[test]
    fn test_negative_growth_never_checks() {
        let mut t = tracker();

        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.0), dec!(5.0))]));
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(-3.0), dec!(-30.0))]));

        assert!(out.alerts.is_empty());
    }

    #[test]
    fn test_reopen_resets_state() {
        let mut t = tracker();

        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.0), dec!(0.0))]));
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(1.5), dec!(15.0))]));
        assert_eq!(out.alerts.len(), 1);

        // Position closes.
        let out = t.update(&snapshot(&[("a", "ETHUSDT", dec!(0.0), dec!(0.0))]));
        assert_eq!(out.closed.len(), 1);
        assert_eq!(out.closed[0].symbol, "BTCUSDT");
        assert_eq!(out.closed[0].pnl_percentage, dec!(15.0));

        // Reopened: treated as brand new, seeded at 0, fires again at 12.
        t.update(&snapshot(&[
            ("a", "BTCUSDT", dec!(0.0), dec!(0.0)),
            ("a", "ETHUSDT", dec!(0.0), dec!(0.0)),
        ]));
        let out = t.update(&snapshot(&[
            ("a", "BTCUSDT", dec!(1.2), dec!(12.0)),
            ("a", "ETHUSDT", dec!(0.0), dec!(0.0)),
        ]));
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].kind, AlertKind::QuickGainer);
    }

    #[test]
    fn test_peak_tracking() {
        let mut t = tracker();

        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.0), dec!(0.0))]));
        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.8), dec!(8.0))]));
        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.3), dec!(3.0))]));

        let tp = t
            .tracked
            .get(&("a".to_string(), "BTCUSDT".to_string()))
            .unwrap();
        assert_eq!(tp.peak_pnl_percentage, dec!(8.0));
        assert_eq!(tp.current_pnl_percentage, dec!(3.0));
    }

    #[test]
    fn test_custom_thresholds() {
        let mut t = PositionTracker::new(TrackerConfig {
            quick_gainer_pct: dec!(30),
            explosion_pct: dec!(50),
        });

        t.update(&snapshot(&[("a", "BTCUSDT", dec!(0.0), dec!(0.0))]));
        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(2.5), dec!(25.0))]));
        assert!(out.alerts.is_empty());

        let out = t.update(&snapshot(&[("a", "BTCUSDT", dec!(3.5), dec!(35.0))]));
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].kind, AlertKind::QuickGainer);
    }
}
