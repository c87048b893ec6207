//! Portfolio ledger: one JSON document tracking initial value, growth
//! updates, and withdrawals.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

/// One dated portfolio-value observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthUpdate {
    pub id: String,
    pub value: f64,
    #[serde(default)]
    pub notes: String,
    pub date: String,
}

/// One withdrawal from the portfolio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: String,
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub currency: String,
    pub date: String,
}

/// The whole ledger document as persisted on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioData {
    pub initial_value: f64,
    #[serde(default)]
    pub initial_date: String,
    pub current_value: f64,
    #[serde(default)]
    pub growth_updates: Vec<GrowthUpdate>,
    #[serde(default)]
    pub withdrawals: Vec<Withdrawal>,
}

/// JSON-file-backed portfolio store. Every mutation rewrites the file and
/// reports success as a boolean; a failed write is logged and leaves the
/// in-memory state authoritative for the rest of the session.
pub struct PortfolioStore {
    path: PathBuf,
    data: RwLock<PortfolioData>,
}

impl PortfolioStore {
    /// Load the ledger, starting fresh when the file is missing or
    /// unreadable.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let data = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt portfolio file, starting fresh");
                    PortfolioData::default()
                }
            },
            Err(_) => PortfolioData::default(),
        };

        Self {
            path,
            data: RwLock::new(data),
        }
    }

    pub async fn get(&self) -> PortfolioData {
        self.data.read().await.clone()
    }

    pub async fn update_initial_value(&self, value: f64, date: Option<String>) -> bool {
        let mut data = self.data.write().await;
        data.initial_value = value;
        data.initial_date = date.unwrap_or_else(today);
        if data.current_value == 0.0 {
            data.current_value = value;
        }
        self.persist(&data).await
    }

    pub async fn add_growth_update(&self, value: f64, notes: String, date: Option<String>) -> bool {
        let mut data = self.data.write().await;
        data.growth_updates.push(GrowthUpdate {
            id: Uuid::new_v4().to_string(),
            value,
            notes,
            date: date.unwrap_or_else(today),
        });
        data.current_value = value;
        self.persist(&data).await
    }

    pub async fn update_current_value(&self, value: f64) -> bool {
        let mut data = self.data.write().await;
        data.current_value = value;
        self.persist(&data).await
    }

    pub async fn add_withdrawal(
        &self,
        amount: f64,
        category: String,
        description: String,
        currency: String,
    ) -> bool {
        let mut data = self.data.write().await;
        data.withdrawals.push(Withdrawal {
            id: Uuid::new_v4().to_string(),
            amount,
            category,
            description,
            currency,
            date: today(),
        });
        self.persist(&data).await
    }

    /// Patch one withdrawal in place. Unknown ids report `false`.
    pub async fn update_withdrawal(
        &self,
        id: &str,
        amount: Option<f64>,
        category: Option<String>,
        description: Option<String>,
        currency: Option<String>,
    ) -> bool {
        let mut data = self.data.write().await;

        let Some(entry) = data.withdrawals.iter_mut().find(|w| w.id == id) else {
            return false;
        };

        if let Some(amount) = amount {
            entry.amount = amount;
        }
        if let Some(category) = category {
            entry.category = category;
        }
        if let Some(description) = description {
            entry.description = description;
        }
        if let Some(currency) = currency {
            entry.currency = currency;
        }

        self.persist(&data).await
    }

    pub async fn delete_withdrawal(&self, id: &str) -> bool {
        let mut data = self.data.write().await;

        let before = data.withdrawals.len();
        data.withdrawals.retain(|w| w.id != id);
        if data.withdrawals.len() == before {
            return false;
        }

        self.persist(&data).await
    }

    async fn persist(&self, data: &PortfolioData) -> bool {
        let text = match serde_json::to_string_pretty(data) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize portfolio");
                return false;
            }
        };

        match tokio::fs::write(&self.path, text).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to write portfolio file");
                false
            }
        }
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");

        let store = PortfolioStore::load(&path).await;
        assert!(store.update_initial_value(1000.0, Some("2026-01-01".to_string())).await);
        assert!(store.add_growth_update(1100.0, "good week".to_string(), None).await);
        assert!(
            store
                .add_withdrawal(50.0, "fees".to_string(), String::new(), "USDT".to_string())
                .await
        );

        let reloaded = PortfolioStore::load(&path).await;
        let data = reloaded.get().await;

        assert_eq!(data.initial_value, 1000.0);
        assert_eq!(data.initial_date, "2026-01-01");
        assert_eq!(data.current_value, 1100.0);
        assert_eq!(data.growth_updates.len(), 1);
        assert_eq!(data.withdrawals.len(), 1);
        assert_eq!(data.withdrawals[0].currency, "USDT");
    }

    #[tokio::test]
    async fn test_withdrawal_patch_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = PortfolioStore::load(dir.path().join("p.json")).await;

        store
            .add_withdrawal(50.0, "fees".to_string(), String::new(), "USDT".to_string())
            .await;
        let id = store.get().await.withdrawals[0].id.clone();

        assert!(
            store
                .update_withdrawal(&id, Some(75.0), None, Some("updated".to_string()), None)
                .await
        );
        let w = store.get().await.withdrawals[0].clone();
        assert_eq!(w.amount, 75.0);
        assert_eq!(w.description, "updated");
        assert_eq!(w.category, "fees");

        assert!(!store.update_withdrawal("no-such-id", Some(1.0), None, None, None).await);
        assert!(!store.delete_withdrawal("no-such-id").await);
        assert!(store.delete_withdrawal(&id).await);
        assert!(store.get().await.withdrawals.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let store = PortfolioStore::load(&path).await;
        assert_eq!(store.get().await.initial_value, 0.0);
    }
}
