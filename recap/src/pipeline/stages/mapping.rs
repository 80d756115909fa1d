//! JSON index of processed videos (`map.json`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::warn;

use super::MappingStore;
use crate::utils::fs;
use crate::{Error, Result};

/// One entry of the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub title: String,
    /// Whether a short form was produced.
    #[serde(rename = "abstract", default)]
    pub has_abstract: bool,
}

/// `{ "<id>": { "title": ..., "abstract": bool } }`, in insertion order.
pub struct JsonMappingStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries in insertion order. A missing or corrupt file reads as empty.
    pub async fn entries(&self) -> Result<Vec<(String, MappingEntry)>> {
        let map = self.load().await?;
        Ok(map
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value(value) {
                Ok(entry) => Some((id, entry)),
                Err(e) => {
                    warn!(video_id = %id, error = %e, "Skipping malformed mapping entry");
                    None
                }
            })
            .collect())
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let Some(raw) = fs::read_to_string_if_exists("reading mapping index", &self.path).await?
        else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Mapping index is corrupt, starting empty");
                Ok(Map::new())
            }
        }
    }
}

#[async_trait]
impl MappingStore for JsonMappingStore {
    async fn record(&self, video_id: &str, title: &str, has_short_form: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut map = self
            .load()
            .await
            .map_err(|e| Error::persistence(e.to_string()))?;
        let entry = MappingEntry {
            title: title.to_string(),
            has_abstract: has_short_form,
        };
        // Existing keys keep their position.
        map.insert(video_id.to_string(), serde_json::to_value(entry)?);

        let body = serde_json::to_vec_pretty(&map)?;
        fs::write_atomic("writing mapping index", &self.path, &body)
            .await
            .map_err(|e| Error::persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_in_insertion_order_and_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMappingStore::new(dir.path().join("map.json"));

        store.record("b", "Second", false).await.unwrap();
        store.record("a", "First", true).await.unwrap();
        store.record("b", "Second (renamed)", true).await.unwrap();

        let entries = store.entries().await.unwrap();
        assert_eq!(
            entries,
            vec![
                (
                    "b".to_string(),
                    MappingEntry {
                        title: "Second (renamed)".to_string(),
                        has_abstract: true
                    }
                ),
                (
                    "a".to_string(),
                    MappingEntry {
                        title: "First".to_string(),
                        has_abstract: true
                    }
                ),
            ]
        );
    }

    #[tokio::test]
    async fn file_uses_abstract_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        let store = JsonMappingStore::new(&path);
        store.record("abc", "Title", false).await.unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["abc"]["title"], "Title");
        assert_eq!(raw["abc"]["abstract"], false);
    }

    #[tokio::test]
    async fn corrupt_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonMappingStore::new(&path);
        assert!(store.entries().await.unwrap().is_empty());

        store.record("abc", "Title", true).await.unwrap();
        assert_eq!(store.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_file_has_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMappingStore::new(dir.path().join("map.json"));
        assert!(store.entries().await.unwrap().is_empty());
    }
}
