//! Store handle for Prospectus state.
//!
//! A store is a directory holding `prospectus.db`, the content-addressed
//! `blobs/` directory and the broker audit log. Every operation takes the
//! store explicitly; there is no ambient "current document".

use crate::core::error::ProspectusError;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the project-level directory that marks a Prospectus workspace.
pub const PROJECT_DIR_NAME: &str = ".prospectus";

/// Store handle representing a Prospectus state workspace.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory (`<project>/.prospectus/data`)
    pub root: PathBuf,
    /// Actor recorded in the broker audit log for operations on this store
    pub actor: String,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            actor: "prospectus".to_string(),
        }
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    /// Store rooted at `<project>/.prospectus/data`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(PROJECT_DIR_NAME).join("data"))
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    /// Create the store directories if missing.
    pub fn ensure_dirs(&self) -> Result<(), ProspectusError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.blobs_dir())?;
        Ok(())
    }
}

/// Walk up from `start_dir` until a `.prospectus` directory is found.
pub fn find_project_root(start_dir: &Path) -> Result<PathBuf, ProspectusError> {
    let mut current_dir = PathBuf::from(start_dir);
    loop {
        if current_dir.join(PROJECT_DIR_NAME).exists() {
            return Ok(current_dir);
        }
        if !current_dir.pop() {
            return Err(ProspectusError::NotFound(
                "'.prospectus' directory not found in current or parent directories. Run `prospectus init` first.".to_string(),
            ));
        }
    }
}
