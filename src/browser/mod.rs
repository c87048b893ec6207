//! External rendering surface: DevTools protocol client and per-entity views.

mod cdp;
mod view;

pub use cdp::{CdpClient, CdpConfig};
pub use view::{
    balance_js, open_trader_js, selectors, trader_names_js, CdpTraderView, TraderView,
};
