/// Typed configuration for the scripts cache
///
/// The host build tool owns config-file loading; this crate consumes
/// already-deserialized structs. Every user-facing option resolves with the
/// precedence: environment override > config field > default. The resolver
/// methods below (`is_disabled`, `max_age`, ...) apply that precedence; the
/// raw struct fields hold only the config-file layer.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

// Global toggles
pub const DISABLED_ENV: &str = "SCRIPTCACHE_DISABLED";
pub const READ_DISABLED_ENV: &str = "SCRIPTCACHE_READ_DISABLED";
pub const WRITE_DISABLED_ENV: &str = "SCRIPTCACHE_WRITE_DISABLED";

// Local store
pub const LOCAL_DISABLED_ENV: &str = "SCRIPTCACHE_LOCAL_DISABLED";
pub const LOCAL_READ_DISABLED_ENV: &str = "SCRIPTCACHE_LOCAL_READ_DISABLED";
pub const LOCAL_WRITE_DISABLED_ENV: &str = "SCRIPTCACHE_LOCAL_WRITE_DISABLED";
pub const LOCAL_PATH_ENV: &str = "SCRIPTCACHE_LOCAL_PATH";
pub const LOCAL_FOLDER_NAME_ENV: &str = "SCRIPTCACHE_LOCAL_FOLDER_NAME";
pub const LOCAL_MAX_AGE_ENV: &str = "SCRIPTCACHE_LOCAL_MAX_AGE";
pub const LOCAL_MAX_AMOUNT_ENV: &str = "SCRIPTCACHE_LOCAL_MAX_AMOUNT";
pub const LOCAL_CLEANUP_COOLDOWN_ENV: &str = "SCRIPTCACHE_LOCAL_CLEANUP_COOLDOWN";

// Remote store
pub const REMOTE_DISABLED_ENV: &str = "SCRIPTCACHE_REMOTE_DISABLED";
pub const REMOTE_READ_DISABLED_ENV: &str = "SCRIPTCACHE_REMOTE_READ_DISABLED";
pub const REMOTE_WRITE_DISABLED_ENV: &str = "SCRIPTCACHE_REMOTE_WRITE_DISABLED";
pub const REMOTE_HOST_ENV: &str = "SCRIPTCACHE_REMOTE_HOST";
pub const REMOTE_REPOSITORY_ENV: &str = "SCRIPTCACHE_REMOTE_REPOSITORY";
pub const REMOTE_USERNAME_ENV: &str = "SCRIPTCACHE_REMOTE_USERNAME";
pub const REMOTE_PASSWORD_ENV: &str = "SCRIPTCACHE_REMOTE_PASSWORD";
pub const REMOTE_MAX_RETRIES_ENV: &str = "SCRIPTCACHE_REMOTE_MAX_RETRIES";

const DEFAULT_FOLDER_NAME: &str = "scripts-cache";
const DEFAULT_REPOSITORY: &str = "scripts-cache";
const DEFAULT_MAX_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000; // 30 days
const DEFAULT_MAX_AMOUNT: usize = 1000;
const DEFAULT_CLEANUP_COOLDOWN_MS: u64 = 10 * 60 * 1000; // 10 minutes
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-workspace cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Which scripts of this workspace should be cached
    #[serde(default)]
    pub scripts_to_cache: Vec<ScriptToCache>,

    #[serde(default)]
    pub cache_disabled: bool,

    #[serde(default)]
    pub cache_read_disabled: bool,

    #[serde(default)]
    pub cache_write_disabled: bool,

    #[serde(default)]
    pub local: LocalStoreConfig,

    #[serde(default)]
    pub remote: RemoteStoreConfig,
}

impl CacheConfig {
    pub fn is_cache_disabled(&self) -> bool {
        env_bool(DISABLED_ENV).unwrap_or(self.cache_disabled)
    }

    pub fn is_cache_read_disabled(&self) -> bool {
        env_bool(READ_DISABLED_ENV).unwrap_or(self.cache_read_disabled)
    }

    pub fn is_cache_write_disabled(&self) -> bool {
        env_bool(WRITE_DISABLED_ENV).unwrap_or(self.cache_write_disabled)
    }

    pub fn script_to_cache(&self, script_name: &str) -> Option<&ScriptToCache> {
        self.scripts_to_cache
            .iter()
            .find(|s| s.script_name == script_name)
    }

    /// Reports configuration mistakes before any execution. This is the only
    /// user-visible failure the cache layer itself produces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::BTreeSet::new();
        for script in &self.scripts_to_cache {
            if script.script_name.is_empty() {
                return Err(ConfigError::EmptyScriptName);
            }
            if !seen.insert(&script.script_name) {
                return Err(ConfigError::DuplicateScript(script.script_name.clone()));
            }
            for pattern in &script.environment_variable_includes {
                regex::Regex::new(pattern).map_err(|source| {
                    ConfigError::InvalidEnvironmentPattern {
                        script: script.script_name.clone(),
                        pattern: pattern.clone(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scriptsToCache contains an entry with an empty script name")]
    EmptyScriptName,

    #[error("script {0:?} is configured to be cached more than once")]
    DuplicateScript(String),

    #[error("script {script:?} has an invalid environment variable pattern {pattern:?}")]
    InvalidEnvironmentPattern {
        script: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Declares one cacheable script: which globs are its inputs and outputs,
/// which environment variables matter, which directories to clear before a
/// restore, and how transitive workspace dependencies fold into the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptToCache {
    pub script_name: String,

    #[serde(default)]
    pub input_includes: Vec<String>,
    #[serde(default)]
    pub input_excludes: Vec<String>,

    #[serde(default)]
    pub output_includes: Vec<String>,
    #[serde(default)]
    pub output_excludes: Vec<String>,

    /// Regex patterns matched against environment variable names
    #[serde(default)]
    pub environment_variable_includes: Vec<String>,

    /// Directories deleted before restoring cached outputs
    #[serde(default)]
    pub clear_before_restore: Vec<String>,

    #[serde(default)]
    pub workspace_dependency_config: WorkspaceDependencyConfig,
}

/// How transitive workspace dependencies participate in the fingerprint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDependencyConfig {
    /// Skip dependency fingerprinting entirely for this script
    #[serde(default)]
    pub ignore_all: bool,

    /// Per-dependency overrides. Keys are matched as prefixes of the
    /// dependency's locator string; the first (lexicographically smallest)
    /// matching key wins.
    #[serde(default)]
    pub overrides: BTreeMap<String, DependencyOverride>,
}

impl WorkspaceDependencyConfig {
    pub fn override_for(&self, locator: &str) -> Option<&DependencyOverride> {
        self.overrides
            .iter()
            .find(|(prefix, _)| locator.starts_with(prefix.as_str()))
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyOverride {
    /// Exclude this dependency from the fingerprint entirely
    #[serde(default)]
    pub ignore: bool,

    /// When present, only these of the dependency's scripts are folded in
    #[serde(default)]
    pub included_scripts: Option<Vec<String>>,

    /// Scripts of the dependency to leave out; applied after the include list
    #[serde(default)]
    pub excluded_scripts: Vec<String>,
}

impl DependencyOverride {
    /// Explicit include list wins when present; otherwise the exclude list
    /// applies; the default is "included".
    pub fn includes_script(&self, script_name: &str) -> bool {
        if let Some(included) = &self.included_scripts {
            if !included.iter().any(|s| s == script_name) {
                return false;
            }
        }
        !self.excluded_scripts.iter().any(|s| s == script_name)
    }
}

/// Local disk store options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalStoreConfig {
    #[serde(default)]
    pub cache_disabled: bool,
    #[serde(default)]
    pub cache_read_disabled: bool,
    #[serde(default)]
    pub cache_write_disabled: bool,

    /// Explicit cache directory, absolute or relative to the invocation's
    /// working directory. Takes precedence over `cache_folder_name`.
    pub cache_path: Option<String>,

    /// Folder name under the user's shared cache directory
    pub cache_folder_name: Option<String>,

    /// Maximum entry age in milliseconds
    pub max_age: Option<u64>,

    /// Maximum number of entries to keep
    pub max_amount: Option<usize>,

    /// Minimum milliseconds between two cleanup scans
    pub cleanup_cooldown: Option<u64>,
}

impl LocalStoreConfig {
    pub fn is_disabled(&self) -> bool {
        env_bool(LOCAL_DISABLED_ENV).unwrap_or(self.cache_disabled)
    }

    pub fn is_read_disabled(&self) -> bool {
        env_bool(LOCAL_READ_DISABLED_ENV).unwrap_or(self.cache_read_disabled)
    }

    pub fn is_write_disabled(&self) -> bool {
        env_bool(LOCAL_WRITE_DISABLED_ENV).unwrap_or(self.cache_write_disabled)
    }

    pub fn cache_path(&self) -> Option<String> {
        env_string(LOCAL_PATH_ENV).or_else(|| self.cache_path.clone())
    }

    pub fn cache_folder_name(&self) -> String {
        env_string(LOCAL_FOLDER_NAME_ENV)
            .or_else(|| self.cache_folder_name.clone())
            .unwrap_or_else(|| DEFAULT_FOLDER_NAME.to_string())
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(
            env_u64(LOCAL_MAX_AGE_ENV)
                .or(self.max_age)
                .unwrap_or(DEFAULT_MAX_AGE_MS),
        )
    }

    pub fn max_amount(&self) -> usize {
        env_u64(LOCAL_MAX_AMOUNT_ENV)
            .map(|v| v as usize)
            .or(self.max_amount)
            .unwrap_or(DEFAULT_MAX_AMOUNT)
    }

    pub fn cleanup_cooldown(&self) -> Duration {
        Duration::from_millis(
            env_u64(LOCAL_CLEANUP_COOLDOWN_ENV)
                .or(self.cleanup_cooldown)
                .unwrap_or(DEFAULT_CLEANUP_COOLDOWN_MS),
        )
    }
}

/// Remote artifact store options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStoreConfig {
    #[serde(default)]
    pub cache_disabled: bool,
    #[serde(default)]
    pub cache_read_disabled: bool,
    #[serde(default)]
    pub cache_write_disabled: bool,

    /// Base URL of the artifact repository, e.g. "https://artifacts.example.com".
    /// The whole store is disabled when no host is configured.
    pub host: Option<String>,

    /// Repository name used as the leading path segment
    pub repository: Option<String>,

    /// Credentials are required for uploads only; without them the store is
    /// read-only for this client.
    pub username: Option<String>,
    pub password: Option<String>,

    /// Maximum network attempts per operation
    pub max_retries: Option<u32>,
}

impl RemoteStoreConfig {
    pub fn is_disabled(&self) -> bool {
        env_bool(REMOTE_DISABLED_ENV).unwrap_or(self.cache_disabled)
    }

    pub fn is_read_disabled(&self) -> bool {
        env_bool(REMOTE_READ_DISABLED_ENV).unwrap_or(self.cache_read_disabled)
    }

    pub fn is_write_disabled(&self) -> bool {
        env_bool(REMOTE_WRITE_DISABLED_ENV).unwrap_or(self.cache_write_disabled)
    }

    pub fn host(&self) -> Option<String> {
        env_string(REMOTE_HOST_ENV).or_else(|| self.host.clone())
    }

    pub fn repository(&self) -> String {
        env_string(REMOTE_REPOSITORY_ENV)
            .or_else(|| self.repository.clone())
            .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string())
    }

    pub fn username(&self) -> Option<String> {
        env_string(REMOTE_USERNAME_ENV).or_else(|| self.username.clone())
    }

    pub fn password(&self) -> Option<String> {
        env_string(REMOTE_PASSWORD_ENV).or_else(|| self.password.clone())
    }

    pub fn max_retries(&self) -> u32 {
        env_u64(REMOTE_MAX_RETRIES_ENV)
            .map(|v| v as u32)
            .or(self.max_retries)
            .unwrap_or(DEFAULT_MAX_RETRIES)
            .max(1)
    }
}

/// Supplies per-workspace cache configuration. Owned by the host build tool;
/// `None` means the workspace declares no valid cache config.
pub trait ConfigProvider {
    fn config_for_workspace(&self, workspace_dir: &Path) -> Option<CacheConfig>;
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| v == "true")
}

fn env_u64(name: &str) -> Option<u64> {
    env_string(name).and_then(|v| v.parse().ok())
}
