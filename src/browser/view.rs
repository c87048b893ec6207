//! Per-entity viewing context over the rendering surface.
//!
//! The extraction engine and every test depend only on the [`TraderView`]
//! trait; the CDP-backed implementation below is the one production wiring.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::cdp::CdpClient;

/// Selectors for the copy-trading web UI. Centralized so a site markup
/// change is a one-file fix.
pub mod selectors {
    pub const TRADER_NAME: &str = "[data-testid='copy-trader-name']";
    pub const TRADER_CARD: &str = "[data-testid='copy-trader-card']";
    pub const POSITION_TABLE: &str = "[data-testid='position-table']";
    pub const TPSL_BUTTON: &str = "[data-testid='tpsl-button']";
    pub const CLOSE_BUTTON: &str = "[data-testid='close-position-button']";
    pub const MODAL_CANCEL: &str = "[data-testid='modal-cancel']";
    pub const PORTFOLIO_BALANCE: &str = "[data-testid='portfolio-balance']";
}

/// Narrow handle onto one entity's live view. `table_text` returns `None`
/// when no data table is present, which callers treat as "contribute
/// nothing", never as an error.
#[async_trait]
pub trait TraderView: Send + Sync {
    fn trader(&self) -> &str;

    async fn is_ready(&self) -> bool;

    /// The position table rendered as text: rows separated by `\n`, cells
    /// by `\t`.
    async fn table_text(&self) -> Result<Option<String>>;

    async fn click(&self, selector: &str) -> Result<bool>;

    async fn dispose(&self);
}

/// Quote a string into a JS string literal.
fn js_str(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

/// JS that renders the position table to tab/newline-delimited text, or
/// null when the table is absent.
pub fn table_text_js() -> String {
    format!(
        r#"(() => {{
            const table = document.querySelector({sel});
            if (!table) return null;
            const rows = Array.from(table.querySelectorAll('tbody tr'));
            return rows
                .map(r => Array.from(r.querySelectorAll('td'))
                    .map(c => (c.innerText || '').trim().replace(/[\t\n]+/g, ' '))
                    .join('\t'))
                .join('\n');
        }})()"#,
        sel = js_str(selectors::POSITION_TABLE),
    )
}

/// JS that lists the followed-trader names on the portfolio page.
pub fn trader_names_js() -> String {
    format!(
        r#"(() => Array.from(document.querySelectorAll({sel}))
            .map(e => (e.innerText || '').trim())
            .filter(Boolean))()"#,
        sel = js_str(selectors::TRADER_NAME),
    )
}

/// JS that clicks the card of one named trader to expose their table.
pub fn open_trader_js(name: &str) -> String {
    format!(
        r#"(() => {{
            const card = Array.from(document.querySelectorAll({sel}))
                .find(e => (e.innerText || '').includes({name}));
            if (!card) return false;
            card.click();
            return true;
        }})()"#,
        sel = js_str(selectors::TRADER_CARD),
        name = js_str(name),
    )
}

/// JS that clicks a button inside the table row whose symbol cell matches.
pub fn row_action_js(symbol: &str, button_selector: &str) -> String {
    format!(
        r#"(() => {{
            const table = document.querySelector({table});
            if (!table) return false;
            const row = Array.from(table.querySelectorAll('tbody tr'))
                .find(r => ((r.cells[0] || {{}}).innerText || '').includes({symbol}));
            if (!row) return false;
            const button = row.querySelector({button});
            if (!button) return false;
            button.click();
            return true;
        }})()"#,
        table = js_str(selectors::POSITION_TABLE),
        symbol = js_str(symbol),
        button = js_str(button_selector),
    )
}

/// JS that clicks the first match of a selector anywhere on the page.
pub fn click_js(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return false;
            el.click();
            return true;
        }})()"#,
        sel = js_str(selector),
    )
}

/// JS that reads the portfolio balance as a number, or null.
pub fn balance_js() -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector({sel});
            if (!el) return null;
            const v = parseFloat((el.innerText || '').replace(/[^0-9.,\-]/g, '').replace(',', '.'));
            return Number.isFinite(v) ? v : null;
        }})()"#,
        sel = js_str(selectors::PORTFOLIO_BALANCE),
    )
}

/// One entity's isolated browser context, page, and attached session. Owned
/// exclusively by the supervisor.
pub struct CdpTraderView {
    cdp: Arc<CdpClient>,
    trader: String,
    context_id: String,
    target_id: String,
    session_id: String,
}

impl CdpTraderView {
    pub fn new(
        cdp: Arc<CdpClient>,
        trader: String,
        context_id: String,
        target_id: String,
        session_id: String,
    ) -> Self {
        Self {
            cdp,
            trader,
            context_id,
            target_id,
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn eval_bool(&self, expression: &str) -> Result<bool> {
        let value = self.cdp.evaluate(&self.session_id, expression).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Open the take-profit/stop-loss editor for one symbol's row.
    pub async fn open_tpsl(&self, symbol: &str) -> Result<bool> {
        self.eval_bool(&row_action_js(symbol, selectors::TPSL_BUTTON))
            .await
    }

    /// Click the close-position control for one symbol's row.
    pub async fn close_position(&self, symbol: &str) -> Result<bool> {
        self.eval_bool(&row_action_js(symbol, selectors::CLOSE_BUTTON))
            .await
    }

    /// Dismiss whatever modal dialog is currently open.
    pub async fn dismiss_modal(&self) -> Result<bool> {
        self.eval_bool(&click_js(selectors::MODAL_CANCEL)).await
    }

    pub async fn reload(&self) -> Result<()> {
        self.cdp.reload(&self.session_id).await
    }

    /// Cheap probe used by housekeeping to keep the session warm and detect
    /// dead pages early.
    pub async fn probe(&self) -> bool {
        self.cdp
            .evaluate(&self.session_id, "document.readyState")
            .await
            .is_ok()
    }
}

#[async_trait]
impl TraderView for CdpTraderView {
    fn trader(&self) -> &str {
        &self.trader
    }

    async fn is_ready(&self) -> bool {
        let expr = format!(
            "document.querySelector({}) !== null",
            js_str(selectors::POSITION_TABLE)
        );
        self.eval_bool(&expr).await.unwrap_or(false)
    }

    async fn table_text(&self) -> Result<Option<String>> {
        let value = self.cdp.evaluate(&self.session_id, &table_text_js()).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, selector: &str) -> Result<bool> {
        self.eval_bool(&click_js(selector)).await
    }

    async fn dispose(&self) {
        if let Err(e) = self.cdp.close_target(&self.target_id).await {
            debug!(trader = %self.trader, error = %e, "Failed to close target");
        }
        if let Err(e) = self.cdp.dispose_context(&self.context_id).await {
            debug!(trader = %self.trader, error = %e, "Failed to dispose context");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_str_escapes_quotes() {
        let js = open_trader_js(r#"Trader "X" \ co"#);
        assert!(js.contains(r#""Trader \"X\" \\ co""#));
    }

    #[test]
    fn test_row_action_js_embeds_symbol() {
        let js = row_action_js("BTCUSDT", selectors::TPSL_BUTTON);
        assert!(js.contains(r#""BTCUSDT""#));
        assert!(js.contains("tpsl-button"));
    }
}
