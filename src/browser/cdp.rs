//! Minimal Chrome DevTools protocol client.
//!
//! Talks to a Chromium instance started with `--remote-debugging-port` over
//! a single multiplexed WebSocket. Commands are correlated to replies by id;
//! page-scoped commands carry a flat session id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use backoff::ExponentialBackoff;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, trace, warn};

/// Where to find the browser and how long to wait for it.
#[derive(Debug, Clone)]
pub struct CdpConfig {
    /// HTTP endpoint of the remote-debugging browser
    pub endpoint: String,

    /// Per-command reply timeout
    pub call_timeout: Duration,

    /// How long to keep retrying endpoint discovery before giving up
    pub discovery_timeout: Duration,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9222".to_string(),
            call_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    web_socket_debugger_url: String,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// One connection to the browser's debugging WebSocket.
pub struct CdpClient {
    tx: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl CdpClient {
    /// Discover the browser WebSocket endpoint and connect to it. Discovery
    /// is retried with exponential backoff until `discovery_timeout`, so a
    /// browser that is still starting up does not fail the whole process.
    pub async fn connect(config: &CdpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        let version_url = format!("{}/json/version", config.endpoint.trim_end_matches('/'));

        let retry_policy = ExponentialBackoff {
            max_elapsed_time: Some(config.discovery_timeout),
            ..ExponentialBackoff::default()
        };

        let version: VersionInfo = backoff::future::retry(retry_policy, || {
            let http = http.clone();
            let url = version_url.clone();
            async move {
                let response = http.get(&url).send().await.map_err(backoff::Error::transient)?;
                response
                    .json::<VersionInfo>()
                    .await
                    .map_err(backoff::Error::transient)
            }
        })
        .await
        .with_context(|| format!("DevTools endpoint not reachable at {}", version_url))?;

        debug!(url = %version.web_socket_debugger_url, "Connecting to browser");

        let (ws, _) = connect_async(version.web_socket_debugger_url.as_str())
            .await
            .context("Failed to open DevTools WebSocket")?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        // Writer: serializes outbound commands onto the socket.
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "DevTools socket write failed");
                    break;
                }
            }
        });

        // Reader: routes replies to their callers, drops events.
        let reader_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                };

                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "Unparseable DevTools frame");
                        continue;
                    }
                };

                match value.get("id").and_then(Value::as_u64) {
                    Some(id) => {
                        let sender = reader_pending.lock().ok().and_then(|mut p| p.remove(&id));
                        if let Some(sender) = sender {
                            let _ = sender.send(value);
                        }
                    }
                    None => {
                        trace!(method = value["method"].as_str().unwrap_or(""), "DevTools event");
                    }
                }
            }
            debug!("DevTools socket closed");
        });

        Ok(Self {
            tx,
            pending,
            next_id: AtomicU64::new(1),
            call_timeout: config.call_timeout,
        })
    }

    /// Send one command and wait for its reply. Protocol-level errors come
    /// back as `Err`, as do reply timeouts and a closed socket.
    pub async fn call(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut frame = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(session) = session_id {
            frame["sessionId"] = json!(session);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| anyhow!("DevTools reply map poisoned"))?;
            pending.insert(id, reply_tx);
        }

        self.tx
            .send(Message::Text(frame.to_string()))
            .map_err(|_| anyhow!("DevTools connection closed"))?;

        let reply = tokio::time::timeout(self.call_timeout, reply_rx)
            .await
            .map_err(|_| {
                if let Ok(mut pending) = self.pending.lock() {
                    pending.remove(&id);
                }
                anyhow!("DevTools call {} timed out", method)
            })?
            .map_err(|_| anyhow!("DevTools connection dropped reply for {}", method))?;

        if let Some(error) = reply.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error");
            anyhow::bail!("DevTools call {} failed: {}", method, message);
        }

        Ok(reply["result"].clone())
    }

    /// Create one isolated browser context (separate cookie jar and storage).
    pub async fn create_browser_context(&self) -> Result<String> {
        let result = self
            .call(None, "Target.createBrowserContext", json!({}))
            .await?;
        result["browserContextId"]
            .as_str()
            .map(str::to_string)
            .context("createBrowserContext returned no id")
    }

    /// Open a page in the given context (or the default one) and attach to
    /// it. Returns `(target_id, session_id)`.
    pub async fn create_page(
        &self,
        context_id: Option<&str>,
        url: &str,
    ) -> Result<(String, String)> {
        let mut params = json!({ "url": url });
        if let Some(ctx) = context_id {
            params["browserContextId"] = json!(ctx);
        }

        let result = self.call(None, "Target.createTarget", params).await?;
        let target_id = result["targetId"]
            .as_str()
            .map(str::to_string)
            .context("createTarget returned no id")?;

        let result = self
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .map(str::to_string)
            .context("attachToTarget returned no session")?;

        Ok((target_id, session_id))
    }

    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
        self.call(Some(session_id), "Page.navigate", json!({ "url": url }))
            .await?;
        Ok(())
    }

    pub async fn reload(&self, session_id: &str) -> Result<()> {
        self.call(Some(session_id), "Page.reload", json!({})).await?;
        Ok(())
    }

    /// Evaluate an expression in the page and return its JSON value.
    pub async fn evaluate(&self, session_id: &str, expression: &str) -> Result<Value> {
        let result = self
            .call(
                Some(session_id),
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            anyhow::bail!(
                "Evaluation threw: {}",
                exception["text"].as_str().unwrap_or("unknown")
            );
        }

        Ok(result["result"]["value"].clone())
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.call(None, "Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    pub async fn dispose_context(&self, context_id: &str) -> Result<()> {
        self.call(
            None,
            "Target.disposeBrowserContext",
            json!({ "browserContextId": context_id }),
        )
        .await?;
        Ok(())
    }
}
