use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::HarvestError;

/// Local directory that receives retrieved objects.
#[derive(Debug, Clone)]
pub struct TargetDir {
    root: Utf8PathBuf,
}

impl TargetDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_path_buf(root: PathBuf) -> Result<Self, HarvestError> {
        let root = Utf8PathBuf::from_path_buf(root)
            .map_err(|_| HarvestError::Filesystem("non-utf8 target directory".to_string()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Idempotent; must succeed before any worker opens a file.
    pub fn ensure(&self) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(|err| {
            HarvestError::Filesystem(format!("create {}: {err}", self.root))
        })
    }

    pub fn file_path(&self, file_name: &str) -> Utf8PathBuf {
        self.root.join(file_name)
    }

    /// Creates or truncates `file_name` inside the directory.
    pub fn create_file(&self, file_name: &str) -> Result<fs::File, HarvestError> {
        let path = self.file_path(file_name);
        fs::File::create(path.as_std_path()).map_err(|err| HarvestError::LocalIo {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}
