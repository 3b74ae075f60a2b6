//! Cache Key Derivation
//!
//! Turns SQL text into a content-addressed cache key:
//! `"query-"` followed by the lowercase hex SHA-256 digest of the UTF-8 bytes.
//!
//! Derivation is pure. The same bytes produce the same key in every process,
//! forever, so keys survive restarts when the cache store is persistent.
//! Queries that embed non-deterministic functions (`random()`, `now()`) get a
//! stable key like any other text; callers that care must bypass the cache.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Namespace prefix separating query keys from unrelated cache entries
pub const KEY_NAMESPACE: &str = "query-";

/// Length of the hex digest part of a key (SHA-256 = 32 bytes)
pub const DIGEST_HEX_LEN: usize = 64;

/// Content hash identifying a cacheable query result
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Parse a previously rendered key, rejecting anything that is not
    /// `query-` + 64 lowercase hex characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let digest = raw.strip_prefix(KEY_NAMESPACE)?;
        let well_formed = digest.len() == DIGEST_HEX_LEN
            && digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| CacheKey(raw.to_string()))
    }

    /// Full key including the namespace
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digest without the namespace
    pub fn digest(&self) -> &str {
        &self.0[KEY_NAMESPACE.len()..]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for raw SQL text. No trimming or normalization.
pub fn derive_key(sql: &str) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    CacheKey(format!("{KEY_NAMESPACE}{:x}", hasher.finalize()))
}

/// Caller-side normalization: strips surrounding whitespace and any
/// trailing semicolons, so `SELECT 1` and `  SELECT 1;\n` share a key.
pub fn normalize_sql(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
