/// Cache entry data model
///
/// A `CacheEntryKey` is the composite fingerprint of one script invocation:
/// the script and its arguments, the selected environment variables, the
/// lockfile checksum, the digests of all input files, and the output digests
/// of every transitive workspace dependency. Two invocations are equivalent
/// iff their keys serialize to the same canonical JSON.
///
/// All maps are `BTreeMap` so that serialization is independent of insertion
/// order, and all relative paths are normalized to `/` separators before
/// they are inserted, so keys built on different operating systems compare
/// equal.
use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;

/// Matched relative file path -> content digest
pub type FileHashes = BTreeMap<String, String>;
/// Glob pattern -> matched file digests
pub type GlobFileHashes = BTreeMap<String, FileHashes>;
/// Matched relative file path -> base64 file content
pub type FileContents = BTreeMap<String, String>;
/// Glob pattern -> matched file contents
pub type GlobFileContents = BTreeMap<String, FileContents>;
/// Environment variable name -> value
pub type EnvVars = BTreeMap<String, String>;
/// Environment variable name pattern -> matched variables
pub type RegexEnvVars = BTreeMap<String, EnvVars>;
/// Cacheable script name -> its output glob digests
pub type ScriptFileHashes = BTreeMap<String, GlobFileHashes>;
/// Dependency workspace locator -> its cacheable scripts' output digests
pub type WorkspaceGlobFileHashes = BTreeMap<String, ScriptFileHashes>;

/// Immutable fingerprint uniquely identifying one script invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryKey {
    pub script: String,
    pub args: Vec<String>,
    pub environment_variables: RegexEnvVars,
    pub lock_file_checksum: Option<String>,
    pub top_level_workspace_locator: String,
    pub workspace_locator: String,
    pub glob_file_hashes: GlobFileHashes,
    pub dependency_workspaces_glob_file_hashes: WorkspaceGlobFileHashes,
}

impl CacheEntryKey {
    /// Canonical serialization: field order is fixed by the struct, map
    /// iteration order by `BTreeMap`. Key equality is byte-equality of this
    /// string.
    pub fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize cache entry key")
    }

    /// Content-addressed file name: `base64url(sha512(canonical_json))`
    /// suffixed with `.json`. Both the local store and the remote store
    /// address entries by this name, giving O(1) lookup without scans.
    pub fn file_name(&self) -> Result<String> {
        let canonical = self.canonical_json()?;
        let digest = Sha512::digest(canonical.as_bytes());
        Ok(format!("{}.json", URL_SAFE_NO_PAD.encode(digest)))
    }
}

/// Captured output of one successful script execution. Immutable once
/// created; entries are deleted by eviction, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntryValue {
    pub glob_file_contents: GlobFileContents,
    /// Epoch millis
    pub created_at: u64,
    /// Originating hostname
    pub created_by: String,
}

/// The unit persisted by a cache store: UTF-8 JSON of shape `{key, value}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheEntryKey,
    pub value: CacheEntryValue,
}
