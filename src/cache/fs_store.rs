//! On-disk cache store
//!
//! Layout: `<root>/<namespace>/<key>.json`, one `StoredResponse` per file.
//! Writes land in a temporary file first and are renamed into place, so a
//! reader sees either the old entry or the new one.

use super::error::CacheResult;
use super::store::{CacheStore, StoredResponse};
use crate::key::CacheKey;
use futures_util::future::BoxFuture;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const ENTRY_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

/// Cache store persisting entries as JSON files
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    name: String,
    dir: PathBuf,
}

impl FsCacheStore {
    /// Open (creating if needed) the namespace directory under `root`
    pub async fn open(root: impl AsRef<Path>, name: impl Into<String>) -> CacheResult<Self> {
        let name = name.into();
        let dir = root.as_ref().join(encode_component(&name));
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "opened fs cache store");
        Ok(FsCacheStore { name, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXT}", encode_component(key.as_str())))
    }
}

impl CacheStore for FsCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_key<'a>(
        &'a self,
        key: &'a CacheKey,
    ) -> BoxFuture<'a, CacheResult<Option<StoredResponse>>> {
        Box::pin(async move {
            let path = self.entry_path(key);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let response: StoredResponse = serde_json::from_slice(&bytes)?;
            if response.is_fresh() {
                return Ok(Some(response));
            }
            remove_if_exists(&path).await?;
            Ok(None)
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        response: StoredResponse,
    ) -> BoxFuture<'a, CacheResult<()>> {
        Box::pin(async move {
            let body = serde_json::to_vec(&response)?;
            let tmp = self
                .dir
                .join(format!(".{}.{TEMP_EXT}", uuid::Uuid::new_v4().simple()));
            tokio::fs::write(&tmp, body).await?;
            if let Err(e) = tokio::fs::rename(&tmp, self.entry_path(key)).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, CacheResult<bool>> {
        Box::pin(async move { remove_if_exists(&self.entry_path(key)).await })
    }

    fn clear(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let ours = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == ENTRY_EXT || ext == TEMP_EXT);
                if ours {
                    remove_if_exists(&path).await?;
                }
            }
            Ok(())
        })
    }
}

async fn remove_if_exists(path: &Path) -> CacheResult<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Percent-encode anything outside `[A-Za-z0-9_-]` so a name maps to
/// exactly one path component.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
