use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

/// Models in descending order of preference. A credential's priority is the
/// minimum index of any model its `working_models` column lists; credentials
/// listing none of these get the sentinel `MODEL_PREFERENCE.len() + 1`.
pub const MODEL_PREFERENCE: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
];

#[derive(Debug, thiserror::Error)]
pub enum KeyPoolError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the credential CSV. Column order matches the on-disk header:
/// `key,provider,active,working_models,checked_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub key: String,
    pub provider: String,
    pub active: bool,
    /// `|`- or `,`-separated model identifiers, optionally `models/`-prefixed.
    #[serde(default)]
    pub working_models: String,
    #[serde(default)]
    pub checked_at: String,
}

impl Credential {
    pub fn priority(&self) -> usize {
        self.working_models
            .split(['|', ','])
            .map(|model| model.trim().trim_start_matches("models/"))
            .filter(|model| !model.is_empty())
            .filter_map(|model| MODEL_PREFERENCE.iter().position(|name| *name == model))
            .min()
            .unwrap_or(MODEL_PREFERENCE.len() + 1)
    }
}

/// Priority-ranked credential pool backed by a CSV file.
///
/// The in-memory list holds active rows only, sorted non-decreasingly by
/// priority. `select`/`active_count` take the read lock; `rotate` and
/// `deactivate` take the write lock, and the CSV rewrite in `deactivate`
/// happens under that lock so two deactivations cannot interleave on the
/// file.
pub struct KeyPool {
    csv_path: PathBuf,
    keys: RwLock<Vec<Credential>>,
}

impl KeyPool {
    pub fn load(csv_path: impl Into<PathBuf>) -> Result<Self, KeyPoolError> {
        let csv_path = csv_path.into();
        let mut keys: Vec<Credential> = read_rows(&csv_path)?
            .into_iter()
            .filter(|row| row.active)
            .collect();
        keys.sort_by_key(Credential::priority);
        info!(path = %csv_path.display(), active = keys.len(), "loaded credential pool");
        Ok(Self {
            csv_path,
            keys: RwLock::new(keys),
        })
    }

    /// Pool with no credentials; used when the CSV is missing and the proxy
    /// runs in user-supplied-key-only mode.
    pub fn empty(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
            keys: RwLock::new(Vec::new()),
        }
    }

    /// Best-priority credential, ties broken uniformly at random.
    pub async fn select(&self) -> Option<Credential> {
        let keys = self.keys.read().await;
        pick_best(&keys)
    }

    /// Drop `failed` from the in-memory pool for the remainder of this
    /// request's retry loop and select again. The CSV is untouched.
    pub async fn rotate(&self, failed: &str) -> Option<Credential> {
        let mut keys = self.keys.write().await;
        keys.retain(|credential| credential.key != failed);
        pick_best(&keys)
    }

    pub async fn active_count(&self) -> usize {
        self.keys.read().await.len()
    }

    /// Durably mark `key` inactive: flip the CSV row, rewrite the file via
    /// temp-file-and-rename, and remove the key from in-memory selection.
    pub async fn deactivate(&self, key: &str) -> Result<(), KeyPoolError> {
        let mut keys = self.keys.write().await;
        let mut rows = read_rows(&self.csv_path)?;
        for row in &mut rows {
            if row.key == key {
                row.active = false;
            }
        }
        write_rows_atomic(&self.csv_path, &rows)?;
        keys.retain(|credential| credential.key != key);
        info!(remaining = keys.len(), "deactivated credential");
        Ok(())
    }
}

fn pick_best(keys: &[Credential]) -> Option<Credential> {
    // The list is kept sorted, so the head carries the best priority.
    let best = keys.first()?.priority();
    let tier: Vec<&Credential> = keys
        .iter()
        .take_while(|credential| credential.priority() == best)
        .collect();
    let index = rand::rng().random_range(0..tier.len());
    Some(tier[index].clone())
}

fn read_rows(path: &Path) -> Result<Vec<Credential>, KeyPoolError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

fn write_rows_atomic(path: &Path, rows: &[Credential]) -> Result<(), KeyPoolError> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(key: &str, working_models: &str) -> Credential {
        Credential {
            key: key.to_string(),
            provider: "gemini".to_string(),
            active: true,
            working_models: working_models.to_string(),
            checked_at: String::new(),
        }
    }

    #[test]
    fn priority_is_min_index_of_working_model() {
        assert_eq!(credential("a", "gemini-2.5-pro").priority(), 0);
        assert_eq!(
            credential("b", "gemini-1.5-flash|gemini-2.0-flash").priority(),
            2
        );
    }

    #[test]
    fn priority_strips_models_prefix_and_accepts_commas() {
        assert_eq!(credential("a", "models/gemini-2.5-flash").priority(), 1);
        assert_eq!(
            credential("b", "models/gemini-1.5-pro, gemini-2.5-pro").priority(),
            0
        );
    }

    #[test]
    fn unknown_models_get_sentinel_priority() {
        assert_eq!(
            credential("a", "palm-2").priority(),
            MODEL_PREFERENCE.len() + 1
        );
        assert_eq!(credential("b", "").priority(), MODEL_PREFERENCE.len() + 1);
    }
}
