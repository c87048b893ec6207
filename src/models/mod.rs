//! Data models for positions, snapshots, and alerts.

mod alert;
mod position;
mod snapshot;

pub use alert::{AlertKind, ClosedPosition, GrowthAlert};
pub use position::{PnlCell, Position, MIN_ROW_CELLS};
pub use snapshot::Snapshot;
