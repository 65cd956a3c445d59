//! Resume-by-count checkpoint file.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::error::ScraperError;
use crate::model::ChapterContent;

/// Progress of one run: how many entries of the range-filtered chapter list
/// were processed, and the content collected from them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source_url: String,
    pub completed: usize,
    pub chapters: Vec<ChapterContent>,
}

impl Checkpoint {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            ..Self::default()
        }
    }

    /// Load a checkpoint. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ScraperError> {
        let data = match fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(checkpoint_error(path, e)),
        };
        let checkpoint: Self = serde_json::from_str(&data).map_err(|e| checkpoint_error(path, e))?;
        debug!(path = %path.display(), completed = checkpoint.completed, "loaded checkpoint");
        Ok(Some(checkpoint))
    }

    /// Write the checkpoint through a sibling temp file so an interrupted
    /// write never leaves a truncated file behind.
    pub fn save(&self, path: &Path) -> Result<(), ScraperError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| checkpoint_error(path, e))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| checkpoint_error(path, e))?;
        fs::rename(&tmp, path).map_err(|e| checkpoint_error(path, e))
    }

    /// Remove the checkpoint after a successful run. A missing file is fine.
    pub fn remove(path: &Path) -> Result<(), ScraperError> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(checkpoint_error(path, e)),
            _ => Ok(()),
        }
    }

    /// Whether this checkpoint belongs to `url` (trailing slashes ignored).
    pub fn matches(&self, url: &str) -> bool {
        self.source_url.trim().trim_end_matches('/') == url.trim().trim_end_matches('/')
    }
}

fn checkpoint_error(path: &Path, e: impl std::fmt::Display) -> ScraperError {
    ScraperError::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_preserves_progress() -> Result<(), ScraperError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("progress.json");
        let mut cp = Checkpoint::new("https://www.bqg5.com/0_521/");
        cp.completed = 2;
        cp.chapters.push(ChapterContent {
            title: "第一章".to_string(),
            paragraphs: vec!["正文。".to_string()],
        });
        cp.save(&path)?;
        assert_eq!(Checkpoint::load(&path)?, Some(cp));
        assert!(!path.with_extension("tmp").exists());
        Ok(())
    }

    #[test]
    fn missing_file_loads_as_none() -> Result<(), ScraperError> {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(Checkpoint::load(&dir.path().join("absent.json"))?, None);
        Checkpoint::remove(&dir.path().join("absent.json"))?;
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            Checkpoint::load(&path),
            Err(ScraperError::Checkpoint { .. })
        ));
    }

    #[test]
    fn url_match_ignores_trailing_slash() {
        let cp = Checkpoint::new("https://www.bqg5.com/0_521/");
        assert!(cp.matches("https://www.bqg5.com/0_521"));
        assert!(!cp.matches("https://www.bqg5.com/0_522/"));
    }
}
