use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write history file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallDirection {
    Older,
    Newer,
}

/// Submitted prompts, oldest first, persisted one per line.
#[derive(Debug, Clone, Default)]
pub struct PromptHistory {
    path: Option<PathBuf>,
    entries: Vec<String>,
}

impl PromptHistory {
    /// A store that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path: Some(path),
                entries: Vec::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| HistoryError::Read {
            path: path.clone(),
            source,
        })?;
        let entries = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends unless blank or equal to the newest entry. Returns whether it was added.
    pub fn push(&mut self, entry: &str) -> bool {
        let entry = entry
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if entry.is_empty() || self.entries.last() == Some(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry `offset` steps back from the newest; `0` is the newest.
    #[must_use]
    pub fn recall(&self, offset: usize) -> Option<&str> {
        let index = self.entries.len().checked_sub(offset + 1)?;
        self.entries.get(index).map(String::as_str)
    }

    /// Moves a recall cursor one step. `None` means "not recalling".
    #[must_use]
    pub fn step_cursor(&self, cursor: Option<usize>, direction: RecallDirection) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let last = self.entries.len() - 1;
        match (direction, cursor) {
            (RecallDirection::Older, None) => Some(0),
            (RecallDirection::Older, Some(offset)) => Some((offset + 1).min(last)),
            (RecallDirection::Newer, None | Some(0)) => None,
            (RecallDirection::Newer, Some(offset)) => Some((offset - 1).min(last)),
        }
    }

    /// Newest first, for list views.
    #[must_use]
    pub fn newest_first(&self) -> Vec<String> {
        self.entries.iter().rev().cloned().collect()
    }

    /// Rewrites the whole file. In-memory stores succeed without writing.
    pub fn persist(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| HistoryError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let mut rendered = self.entries.join("\n");
        if !rendered.is_empty() {
            rendered.push('\n');
        }

        fs::write(path, rendered).map_err(|source| HistoryError::Write {
            path: path.clone(),
            source,
        })?;
        restrict_permissions(path);
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::debug!(path = %path.display(), %error, "could not restrict history file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
