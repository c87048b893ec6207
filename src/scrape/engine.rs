//! Extraction engine: pulls every ready view's table and folds the rows
//! into one snapshot.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::browser::TraderView;
use crate::models::{Position, Snapshot};

/// Extract one snapshot across all views.
///
/// Per-entity extraction runs concurrently; a view with no table, a
/// transport error, or an unready page contributes an empty partial result
/// and never fails the call. Partial results are concatenated in view order
/// and deduplicated by `(trader, symbol)`, first occurrence winning.
pub async fn extract_snapshot(views: &[Arc<dyn TraderView>]) -> Snapshot {
    let partials = futures::future::join_all(views.iter().map(|view| async move {
        if !view.is_ready().await {
            debug!(trader = %view.trader(), "View not ready, skipping");
            return Vec::new();
        }

        match view.table_text().await {
            Ok(Some(text)) => parse_table(view.trader(), &text),
            Ok(None) => {
                debug!(trader = %view.trader(), "No position table present");
                Vec::new()
            }
            Err(e) => {
                warn!(trader = %view.trader(), error = %e, "Table extraction failed");
                Vec::new()
            }
        }
    }))
    .await;

    Snapshot::from_positions(partials.concat())
}

/// Parse tab/newline-delimited table text into positions. Malformed rows
/// are skipped, never propagated.
pub fn parse_table(trader: &str, text: &str) -> Vec<Position> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let cells: Vec<&str> = line.split('\t').collect();
            Position::from_row(trader, &cells)
        })
        .collect()
}
