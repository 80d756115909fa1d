use std::path::{Path, PathBuf};

const MAPPING_FILE: &str = "map.json";

/// On-disk layout of the artifacts produced by the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn audio_file(&self, video_id: &str) -> PathBuf {
        self.audio_dir().join(format!("{video_id}.m4a"))
    }

    pub fn transcript_file(&self, video_id: &str) -> PathBuf {
        self.root.join("transcripts").join(format!("{video_id}.txt"))
    }

    pub fn summary_file(&self, video_id: &str) -> PathBuf {
        self.root.join("summaries").join(format!("{video_id}.md"))
    }

    pub fn abstract_file(&self, video_id: &str) -> PathBuf {
        self.root.join("abstracts").join(format!("{video_id}.md"))
    }

    /// Idempotency index of processed videos.
    pub fn mapping_file(&self) -> PathBuf {
        self.root.join(MAPPING_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_rooted_at_data_dir() {
        let paths = StoragePaths::new("/data");
        assert_eq!(paths.audio_file("abc"), PathBuf::from("/data/audio/abc.m4a"));
        assert_eq!(
            paths.transcript_file("abc"),
            PathBuf::from("/data/transcripts/abc.txt")
        );
        assert_eq!(paths.summary_file("abc"), PathBuf::from("/data/summaries/abc.md"));
        assert_eq!(paths.abstract_file("abc"), PathBuf::from("/data/abstracts/abc.md"));
        assert_eq!(paths.mapping_file(), PathBuf::from("/data/map.json"));
    }
}
