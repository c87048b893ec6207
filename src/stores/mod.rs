//! JSON-file-backed ledgers consumed by the broadcast hub.

mod closed;
mod portfolio;

pub use closed::{ClosedPositionStore, ClosedRecord};
pub use portfolio::{GrowthUpdate, PortfolioData, PortfolioStore, Withdrawal};
