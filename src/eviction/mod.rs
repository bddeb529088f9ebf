//! Cache eviction
//!
//! Bounds the local cache directory by entry age and entry count. Both
//! thresholds are enforced on every run: entries older than `max_age`
//! (by file modification time) are deleted, and among the remainder only
//! the `max_amount` most recently modified survive.
//!
//! Runs are triggered opportunistically after every save and amortized by
//! the cooldown sentinel: only the process that wins the sentinel race
//! scans the directory, all others skip silently. Every I/O error degrades
//! to skipping the affected file or the whole run; eviction can never fail
//! the caller's cache write.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

pub mod cooldown;

/// Timestamp file guarding against redundant cleanup scans
pub const SENTINEL_FILE: &str = "last-cleanup.txt";

pub struct EvictionCoordinator {
    max_age: Duration,
    max_amount: usize,
    cleanup_cooldown: Duration,
}

impl EvictionCoordinator {
    pub fn new(max_age: Duration, max_amount: usize, cleanup_cooldown: Duration) -> Self {
        Self {
            max_age,
            max_amount,
            cleanup_cooldown,
        }
    }

    /// Evict if the cooldown has elapsed and this process wins the sentinel
    /// race. Best-effort; errors are logged and swallowed.
    pub fn run(&self, cache_dir: &Path) {
        let sentinel = cache_dir.join(SENTINEL_FILE);
        if !cooldown::ensure_cooldown(&sentinel, self.cleanup_cooldown) {
            return;
        }
        self.cleanup(cache_dir);
    }

    fn cleanup(&self, cache_dir: &Path) {
        let mut entries = collect_entries(cache_dir);
        // Newest first, so the survivors of the count limit are the most
        // recently modified
        entries.sort_by(|a, b| b.modified.cmp(&a.modified));

        let cutoff = SystemTime::now()
            .checked_sub(self.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut kept = 0usize;
        let mut deleted = 0usize;
        for entry in entries {
            let evict = if entry.modified < cutoff {
                true
            } else {
                kept += 1;
                kept > self.max_amount
            };
            if evict && delete_entry(&entry.path) {
                deleted += 1;
            }
        }
        if deleted > 0 {
            debug!(cache_dir = %cache_dir.display(), deleted, "evicted cache entries");
        }
    }
}

struct EntryFile {
    path: PathBuf,
    modified: SystemTime,
}

/// Cache entry files only; the sentinel and temp files are never eviction
/// candidates. Unreadable entries are skipped.
fn collect_entries(cache_dir: &Path) -> Vec<EntryFile> {
    let dir = match fs::read_dir(cache_dir) {
        Ok(dir) => dir,
        Err(err) => {
            warn!(cache_dir = %cache_dir.display(), error = %err, "skipping cleanup, cache directory unreadable");
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    for item in dir {
        let Ok(item) = item else { continue };
        let path = item.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let Ok(metadata) = item.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        entries.push(EntryFile { path, modified });
    }
    entries
}

fn delete_entry(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        // Another process evicted it first
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "failed to evict cache entry");
            false
        }
    }
}
