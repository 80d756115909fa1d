//! Read-only view over processed videos.

use serde::Serialize;

use crate::Result;
use crate::config::StoragePaths;
use crate::pipeline::stages::JsonMappingStore;
use crate::utils::fs;

/// A processed video as listed in the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    pub video_id: String,
    pub title: String,
    pub has_abstract: bool,
}

/// Stored outputs of one video. Missing files are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Artifacts {
    pub summary: Option<String>,
    pub short_form: Option<String>,
}

pub struct Library {
    storage: StoragePaths,
    mapping: JsonMappingStore,
}

impl Library {
    pub fn new(storage: StoragePaths) -> Self {
        let mapping = JsonMappingStore::new(storage.mapping_file());
        Self { storage, mapping }
    }

    /// Processed videos, most recently added first.
    pub async fn entries(&self) -> Result<Vec<LibraryEntry>> {
        let mut entries: Vec<LibraryEntry> = self
            .mapping
            .entries()
            .await?
            .into_iter()
            .map(|(video_id, entry)| LibraryEntry {
                video_id,
                title: entry.title,
                has_abstract: entry.has_abstract,
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }

    pub async fn artifacts(&self, video_id: &str) -> Result<Artifacts> {
        let summary =
            fs::read_to_string_if_exists("reading summary", &self.storage.summary_file(video_id))
                .await?;
        let short_form = fs::read_to_string_if_exists(
            "reading short form",
            &self.storage.abstract_file(video_id),
        )
        .await?;
        Ok(Artifacts {
            summary,
            short_form,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::MappingStore;

    #[tokio::test]
    async fn entries_are_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StoragePaths::new(dir.path());
        let store = JsonMappingStore::new(storage.mapping_file());
        store.record("old", "Old video", false).await.unwrap();
        store.record("new", "New video", true).await.unwrap();

        let library = Library::new(storage);
        let ids: Vec<_> = library
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.video_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn missing_artifacts_are_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StoragePaths::new(dir.path());
        std::fs::create_dir_all(storage.summary_file("abc").parent().unwrap()).unwrap();
        std::fs::write(storage.summary_file("abc"), "# Summary").unwrap();

        let artifacts = Library::new(storage).artifacts("abc").await.unwrap();
        assert_eq!(artifacts.summary.as_deref(), Some("# Summary"));
        assert!(artifacts.short_form.is_none());
    }
}
