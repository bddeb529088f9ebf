/// Local disk cache store
///
/// Entries live as individual JSON files in one flat directory, named by the
/// key hash, so lookup is a single open without directory scans. Writes go
/// through a temp file followed by a rename: concurrent processes writing
/// the same entry can race freely without readers ever observing a torn
/// file. Every successful save triggers the eviction coordinator, which is
/// itself amortized by a cooldown sentinel.
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, warn};

use crate::config::LocalStoreConfig;
use crate::eviction::EvictionCoordinator;
use crate::script::entry::{CacheEntry, CacheEntryKey};

use super::{CacheStore, LOCAL_STORE_ORDER};

pub struct LocalStore {
    config: LocalStoreConfig,
    cache_dir: Option<PathBuf>,
    eviction: EvictionCoordinator,
}

impl LocalStore {
    /// `invocation_cwd` anchors a relative configured cache path. When no
    /// explicit path is configured the store lives under the user's shared
    /// cache directory; if that cannot be resolved the store is inert.
    pub fn new(config: LocalStoreConfig, invocation_cwd: &Path) -> Self {
        let cache_dir = resolve_cache_dir(&config, invocation_cwd);
        let eviction = EvictionCoordinator::new(
            config.max_age(),
            config.max_amount(),
            config.cleanup_cooldown(),
        );
        Self {
            config,
            cache_dir,
            eviction,
        }
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    fn try_save(&self, cache_dir: &Path, entry: &CacheEntry) -> Result<()> {
        fs::create_dir_all(cache_dir).with_context(|| {
            format!("failed to create cache directory {}", cache_dir.display())
        })?;

        let file_name = entry.key.file_name()?;
        let json = serde_json::to_string(entry).context("failed to serialize cache entry")?;

        // Unique per process so concurrent writers never share a temp file
        let temp_path = cache_dir.join(format!(".{}.{}.tmp", file_name, process::id()));
        let final_path = cache_dir.join(&file_name);

        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("failed to create temp file {}", temp_path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("failed to write temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync temp file {}", temp_path.display()))?;
        drop(file);

        fs::rename(&temp_path, &final_path).with_context(|| {
            format!("failed to move cache entry into place at {}", final_path.display())
        })?;

        debug!(file = %final_path.display(), "saved cache entry");
        Ok(())
    }

    fn try_load(&self, cache_dir: &Path, key: &CacheEntryKey) -> Result<Option<CacheEntry>> {
        let path = cache_dir.join(key.file_name()?);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read cache entry {}", path.display()))
            }
        };

        let entry: CacheEntry = serde_json::from_str(&content)
            .with_context(|| format!("invalid cache entry file {}", path.display()))?;

        // The file name is only a digest of the key; confirm the full key
        // before trusting the entry
        if entry.key != *key {
            warn!(file = %path.display(), "stored key does not match requested key, treating as miss");
            return Ok(None);
        }
        Ok(Some(entry))
    }
}

impl CacheStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    fn order(&self) -> u32 {
        LOCAL_STORE_ORDER
    }

    fn save(&self, entry: &CacheEntry) {
        if self.config.is_disabled() || self.config.is_write_disabled() {
            return;
        }
        let Some(cache_dir) = &self.cache_dir else {
            warn!(store = self.name(), "no cache directory could be resolved, skipping save");
            return;
        };
        if let Err(err) = self.try_save(cache_dir, entry) {
            warn!(store = self.name(), error = %err, "failed to save cache entry");
            return;
        }
        self.eviction.run(cache_dir);
    }

    fn load(&self, key: &CacheEntryKey) -> Option<CacheEntry> {
        if self.config.is_disabled() || self.config.is_read_disabled() {
            return None;
        }
        let cache_dir = self.cache_dir.as_ref()?;
        match self.try_load(cache_dir, key) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(store = self.name(), error = %err, "failed to load cache entry");
                None
            }
        }
    }
}

fn resolve_cache_dir(config: &LocalStoreConfig, invocation_cwd: &Path) -> Option<PathBuf> {
    if let Some(configured) = config.cache_path() {
        let path = PathBuf::from(configured);
        if path.is_absolute() {
            Some(path)
        } else {
            Some(invocation_cwd.join(path))
        }
    } else {
        dirs::cache_dir().map(|dir| dir.join(config.cache_folder_name()))
    }
}
