//! Broadcast hub: WebSocket fan-out, client auth, and inbound command
//! dispatch.
//!
//! Collaborators are injected behind the traits below so the hub can be
//! tested against fakes.

mod protocol;
mod server;

pub use protocol::{ClientCommand, ServerMessage};
pub use server::{BroadcastHub, HubConfig};

use async_trait::async_trait;

/// Control surface of the live position source (the session supervisor).
/// Every action returns a success boolean; a dead source answers `false`,
/// never panics.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn request_refresh(&self) -> bool;

    async fn restart(&self) -> bool;

    /// Open the take-profit/stop-loss editor for one trader's symbol row.
    async fn click_tpsl(&self, trader: &str, symbol: &str) -> bool;

    /// Click the close control for one trader's symbol row.
    async fn close_position(&self, trader: &str, symbol: &str) -> bool;

    /// Dismiss the currently open dialog in one trader's view.
    async fn close_modal(&self, trader: &str) -> bool;

    /// Read the current portfolio balance off the rendering surface.
    async fn scrape_growth(&self) -> Option<f64>;
}
