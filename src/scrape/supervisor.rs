//! Session supervisor: owns the rendering surface lifecycle and drives the
//! polling loop.
//!
//! State machine: Stopped -> Discovering -> PerEntitySetup -> Polling ->
//! Stopped. Remote control arrives on a command channel; each command
//! replies with a success boolean over a oneshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

use crate::browser::{
    balance_js, open_trader_js, trader_names_js, CdpClient, CdpConfig, CdpTraderView, TraderView,
};
use crate::hub::PositionSource;
use crate::models::Snapshot;

use super::engine;

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Copy-trading portfolio page listing the followed traders
    pub portfolio_url: String,

    /// Polling cadence for extraction cycles
    pub poll_interval: Duration,

    /// Extra delay after a failed cycle before the next one
    pub error_backoff: Duration,

    /// Run housekeeping every N cycles
    pub housekeeping_every: u64,

    /// How long to wait for a page element to materialize
    pub table_timeout: Duration,

    /// Browser connection settings
    pub cdp: CdpConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            portfolio_url: "https://www.binance.com/en/copy-trading".to_string(),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(5),
            housekeeping_every: 20,
            table_timeout: Duration::from_secs(10),
            cdp: CdpConfig::default(),
        }
    }
}

enum Command {
    Refresh(oneshot::Sender<bool>),
    Restart(oneshot::Sender<bool>),
    ClickTpsl {
        trader: String,
        symbol: String,
        reply: oneshot::Sender<bool>,
    },
    ClosePosition {
        trader: String,
        symbol: String,
        reply: oneshot::Sender<bool>,
    },
    CloseModal {
        trader: String,
        reply: oneshot::Sender<bool>,
    },
    ScrapeGrowth(oneshot::Sender<Option<f64>>),
    Stop,
}

/// Clonable control handle. Implements [`PositionSource`] for the hub.
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<Command>,
    running: Arc<AtomicBool>,
}

impl SupervisorHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the supervisor to tear down and exit its loop.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(Command::Stop).await;
    }

    async fn request(&self, command: Command, reply: oneshot::Receiver<bool>) -> bool {
        if self.cmd_tx.send(command).await.is_err() {
            return false;
        }
        reply.await.unwrap_or(false)
    }
}

#[async_trait]
impl PositionSource for SupervisorHandle {
    async fn request_refresh(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Refresh(tx), rx).await
    }

    async fn restart(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Restart(tx), rx).await
    }

    async fn click_tpsl(&self, trader: &str, symbol: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(
            Command::ClickTpsl {
                trader: trader.to_string(),
                symbol: symbol.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    async fn close_position(&self, trader: &str, symbol: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(
            Command::ClosePosition {
                trader: trader.to_string(),
                symbol: symbol.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    async fn close_modal(&self, trader: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        self.request(
            Command::CloseModal {
                trader: trader.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    async fn scrape_growth(&self) -> Option<f64> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::ScrapeGrowth(tx)).await.is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }
}

/// Owns the browser connection, the primary page, and one view per
/// discovered trader.
pub struct Supervisor {
    config: SupervisorConfig,
    cdp: Option<Arc<CdpClient>>,
    primary_target: Option<String>,
    primary_session: Option<String>,
    views: Vec<Arc<CdpTraderView>>,
    snapshot_tx: broadcast::Sender<Arc<Snapshot>>,
    cmd_rx: mpsc::Receiver<Command>,
    running: Arc<AtomicBool>,
}

impl Supervisor {
    /// Build a supervisor plus its control handle and snapshot stream.
    pub fn new(
        config: SupervisorConfig,
    ) -> (Self, SupervisorHandle, broadcast::Receiver<Arc<Snapshot>>) {
        let (snapshot_tx, snapshot_rx) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let running = Arc::new(AtomicBool::new(true));

        let supervisor = Self {
            config,
            cdp: None,
            primary_target: None,
            primary_session: None,
            views: Vec::new(),
            snapshot_tx,
            cmd_rx,
            running: running.clone(),
        };

        let handle = SupervisorHandle { cmd_tx, running };

        (supervisor, handle, snapshot_rx)
    }

    /// Run the full lifecycle. A start-sequence failure is returned to the
    /// caller; the rest of the process (notably the hub) keeps running.
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;
        self.poll_loop().await;
        self.teardown().await;
        info!("Supervisor stopped");
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        let cdp = Arc::new(CdpClient::connect(&self.config.cdp).await?);
        self.cdp = Some(cdp.clone());

        let (target_id, session_id) = cdp
            .create_page(None, &self.config.portfolio_url)
            .await
            .context("Failed to open primary page")?;
        self.primary_target = Some(target_id);
        self.primary_session = Some(session_id);

        let names = self.discover().await?;
        info!(count = names.len(), "Discovered followed traders");

        self.setup_views(&names).await;
        Ok(())
    }

    /// Read the followed-trader names off the primary page. Zero names gets
    /// one reload-and-retry before the start sequence fails.
    async fn discover(&self) -> Result<Vec<String>> {
        for attempt in 0..2 {
            if attempt > 0 {
                warn!("No followed traders found, reloading primary page");
                if let (Some(cdp), Some(session)) = (&self.cdp, &self.primary_session) {
                    let _ = cdp.reload(session).await;
                }
            }

            let names = self.wait_for_trader_names().await;
            if !names.is_empty() {
                return Ok(names);
            }
        }

        anyhow::bail!("No followed traders discoverable after retry")
    }

    async fn wait_for_trader_names(&self) -> Vec<String> {
        let (cdp, session) = match (&self.cdp, &self.primary_session) {
            (Some(cdp), Some(session)) => (cdp, session),
            _ => return Vec::new(),
        };

        let deadline = Instant::now() + self.config.table_timeout;
        let expression = trader_names_js();

        loop {
            match cdp.evaluate(session, &expression).await {
                Ok(value) => {
                    let names: Vec<String> = serde_json::from_value(value).unwrap_or_default();
                    if !names.is_empty() {
                        return names;
                    }
                }
                Err(e) => debug!(error = %e, "Trader list not readable yet"),
            }

            if Instant::now() >= deadline {
                return Vec::new();
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Open one isolated viewing context per discovered trader. A
    /// per-entity failure is logged and that entity skipped.
    async fn setup_views(&mut self, names: &[String]) {
        for name in names {
            match self.open_view(name).await {
                Ok(view) => self.views.push(Arc::new(view)),
                Err(e) => warn!(trader = %name, error = %e, "View setup failed, skipping entity"),
            }
        }

        info!(
            ready = self.views.len(),
            discovered = names.len(),
            "Per-entity setup complete"
        );
    }

    async fn open_view(&self, name: &str) -> Result<CdpTraderView> {
        let cdp = self
            .cdp
            .as_ref()
            .context("Browser connection not established")?
            .clone();

        let context_id = cdp.create_browser_context().await?;
        let (target_id, session_id) = cdp
            .create_page(Some(&context_id), &self.config.portfolio_url)
            .await?;

        let view = CdpTraderView::new(
            cdp.clone(),
            name.to_string(),
            context_id,
            target_id,
            session_id,
        );

        // Click the trader card once the page has it, then wait for the
        // position table to materialize.
        let open_expr = open_trader_js(name);
        let session = view.session_id().to_string();
        let opened = self
            .wait_until(|| {
                let cdp = cdp.clone();
                let session = session.clone();
                let expr = open_expr.clone();
                async move {
                    cdp.evaluate(&session, &expr)
                        .await
                        .map(|v| v.as_bool().unwrap_or(false))
                        .unwrap_or(false)
                }
            })
            .await;
        if !opened {
            view.dispose().await;
            anyhow::bail!("Trader card never appeared");
        }

        let ready = self.wait_until(|| view.is_ready()).await;
        if !ready {
            view.dispose().await;
            anyhow::bail!("Position table never materialized");
        }

        debug!(trader = %name, "View ready");
        Ok(view)
    }

    async fn wait_until<F, Fut>(&self, probe: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + self.config.table_timeout;
        loop {
            if probe().await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn poll_loop(&mut self) {
        let mut ticker = interval(self.config.poll_interval);
        let mut cycle: u64 = 0;

        info!(
            interval_ms = self.config.poll_interval.as_millis() as u64,
            views = self.views.len(),
            "Entering polling loop"
        );

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => {
                    cycle += 1;
                    if let Err(e) = self.tick(cycle).await {
                        error!(error = %e, "Polling cycle failed");
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Stop) | None => {
                            self.running.store(false, Ordering::SeqCst);
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                    }
                }
            }
        }
    }

    async fn tick(&mut self, cycle: u64) -> Result<()> {
        let views: Vec<Arc<dyn TraderView>> = self
            .views
            .iter()
            .map(|v| v.clone() as Arc<dyn TraderView>)
            .collect();

        let snapshot = engine::extract_snapshot(&views).await;

        // Empty snapshots are not published: to subscribers, "no data" must
        // look exactly like "nothing changed yet".
        if !snapshot.is_empty() {
            let _ = self.snapshot_tx.send(Arc::new(snapshot));
        }

        if cycle % self.config.housekeeping_every == 0 {
            self.housekeeping().await;
        }

        Ok(())
    }

    /// Low-priority maintenance on a longer cadence: probe every view and
    /// drop the ones whose page died so the next refresh can rebuild them.
    async fn housekeeping(&mut self) {
        let mut dead = Vec::new();
        for (idx, view) in self.views.iter().enumerate() {
            if !view.probe().await {
                warn!(trader = %view.trader(), "View no longer responding");
                dead.push(idx);
            }
        }

        for idx in dead.into_iter().rev() {
            let view = self.views.remove(idx);
            view.dispose().await;
        }

        debug!(views = self.views.len(), "Housekeeping pass complete");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh(reply) => {
                let ok = self.refresh().await;
                let _ = reply.send(ok);
            }
            Command::Restart(reply) => {
                let ok = self.restart().await;
                let _ = reply.send(ok);
            }
            Command::ClickTpsl {
                trader,
                symbol,
                reply,
            } => {
                let ok = match self.view_for(&trader) {
                    Some(view) => view.open_tpsl(&symbol).await.unwrap_or(false),
                    None => false,
                };
                let _ = reply.send(ok);
            }
            Command::ClosePosition {
                trader,
                symbol,
                reply,
            } => {
                let ok = match self.view_for(&trader) {
                    Some(view) => view.close_position(&symbol).await.unwrap_or(false),
                    None => false,
                };
                let _ = reply.send(ok);
            }
            Command::CloseModal { trader, reply } => {
                let ok = match self.view_for(&trader) {
                    Some(view) => view.dismiss_modal().await.unwrap_or(false),
                    None => false,
                };
                let _ = reply.send(ok);
            }
            Command::ScrapeGrowth(reply) => {
                let _ = reply.send(self.scrape_balance().await);
            }
            Command::Stop => {
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    fn view_for(&self, trader: &str) -> Option<&Arc<CdpTraderView>> {
        self.views.iter().find(|v| v.trader() == trader)
    }

    /// Re-run per-entity setup without a full stop.
    async fn refresh(&mut self) -> bool {
        info!("Refreshing per-entity views");

        for view in self.views.drain(..) {
            view.dispose().await;
        }

        match self.discover().await {
            Ok(names) => {
                self.setup_views(&names).await;
                true
            }
            Err(e) => {
                error!(error = %e, "Refresh discovery failed");
                false
            }
        }
    }

    /// Full teardown and a fresh start sequence.
    async fn restart(&mut self) -> bool {
        info!("Restarting rendering surface");
        self.teardown().await;

        match self.start().await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Restart failed");
                false
            }
        }
    }

    async fn scrape_balance(&self) -> Option<f64> {
        let (cdp, session) = match (&self.cdp, &self.primary_session) {
            (Some(cdp), Some(session)) => (cdp, session),
            _ => return None,
        };

        match cdp.evaluate(session, &balance_js()).await {
            Ok(value) => value.as_f64(),
            Err(e) => {
                warn!(error = %e, "Balance scrape failed");
                None
            }
        }
    }

    async fn teardown(&mut self) {
        for view in self.views.drain(..) {
            view.dispose().await;
        }

        if let (Some(cdp), Some(target)) = (&self.cdp, self.primary_target.take()) {
            if let Err(e) = cdp.close_target(&target).await {
                debug!(error = %e, "Failed to close primary target");
            }
        }

        self.primary_session = None;
        self.cdp = None;
    }
}
