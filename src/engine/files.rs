//! Virtual file directory
//!
//! Files registered with the engine live in one directory that the engine
//! uses as its `file_search_path`, so SQL can refer to them by bare name
//! (`SELECT * FROM 'sales.csv'`).

use super::error::{EngineError, EngineResult, RegistrationError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Source of a registered file
#[derive(Debug, Clone)]
pub enum FileHandle {
    /// A file already on disk; linked or copied into the directory
    Path(PathBuf),
    /// In-memory contents
    Buffer(Vec<u8>),
}

impl From<PathBuf> for FileHandle {
    fn from(path: PathBuf) -> Self {
        FileHandle::Path(path)
    }
}

impl From<Vec<u8>> for FileHandle {
    fn from(bytes: Vec<u8>) -> Self {
        FileHandle::Buffer(bytes)
    }
}

/// Check a registration name. Names are single path components.
pub fn validate_name(name: &str) -> Result<(), RegistrationError> {
    if name.trim().is_empty() {
        return Err(RegistrationError::EmptyName);
    }
    let bad = name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\')
        || name.chars().any(char::is_control);
    if bad {
        return Err(RegistrationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Names currently registered
#[derive(Debug, Default)]
pub struct FileRegistry {
    names: Mutex<BTreeSet<String>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        FileRegistry::default()
    }

    /// Validate and claim a name in one step
    pub fn reserve(&self, name: &str) -> Result<(), RegistrationError> {
        validate_name(name)?;
        let mut names = self.names.lock();
        if !names.insert(name.to_string()) {
            return Err(RegistrationError::Duplicate(name.to_string()));
        }
        Ok(())
    }

    pub fn release(&self, name: &str) -> bool {
        self.names.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.lock().contains(name)
    }

    /// Registered names in sorted order
    pub fn list(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.names.lock().clear();
    }
}

/// Backing directory for registered and exported files
#[derive(Debug)]
pub enum FilesDir {
    /// Removed when the engine goes away
    Owned(TempDir),
    Configured(PathBuf),
}

impl FilesDir {
    pub async fn prepare(configured: Option<&Path>) -> EngineResult<Self> {
        match configured {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                Ok(FilesDir::Configured(dir.to_path_buf()))
            }
            None => {
                let dir = tempfile::Builder::new().prefix("quackdb-files-").tempdir()?;
                Ok(FilesDir::Owned(dir))
            }
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            FilesDir::Owned(dir) => dir.path(),
            FilesDir::Configured(dir) => dir,
        }
    }

    /// Absolute location of `name` inside the directory
    pub fn resolve(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// Place `handle` in the directory under `name`
    pub async fn materialize(&self, name: &str, handle: FileHandle) -> EngineResult<()> {
        let dest = self.resolve(name);
        match handle {
            FileHandle::Buffer(bytes) => tokio::fs::write(&dest, bytes).await?,
            FileHandle::Path(src) => {
                if !tokio::fs::try_exists(&src).await? {
                    return Err(EngineError::FileNotFound(src.display().to_string()));
                }
                // Hard links fail across filesystems; fall back to a copy
                if tokio::fs::hard_link(&src, &dest).await.is_err() {
                    tokio::fs::copy(&src, &dest).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn read(&self, name: &str) -> EngineResult<Vec<u8>> {
        match tokio::fs::read(self.resolve(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EngineError::FileNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, name: &str) -> EngineResult<bool> {
        match tokio::fs::remove_file(self.resolve(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
