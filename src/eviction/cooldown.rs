/// Cleanup cooldown sentinel
///
/// The sentinel file holds the epoch-millis timestamp of the last cleanup
/// attempt as a plain decimal integer. Claiming it uses exclusive create:
/// when several processes find the cooldown elapsed at once, the one whose
/// create succeeds runs the cleanup and the rest skip this cycle. No
/// process ever blocks on the sentinel, and every I/O error means "skip".
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::script::digest::now_millis;

enum Sentinel {
    Absent,
    Recorded(u64),
    /// Garbage content counts as due, so a corrupt sentinel cannot block
    /// cleanup forever
    Unparseable,
}

/// Returns true when cleanup is due and this process won the right to
/// perform it.
pub fn ensure_cooldown(sentinel: &Path, cooldown: Duration) -> bool {
    let state = match read_sentinel(sentinel) {
        Ok(state) => state,
        Err(err) => {
            debug!(sentinel = %sentinel.display(), error = %err, "skipping cleanup, sentinel unreadable");
            return false;
        }
    };

    match state {
        Sentinel::Absent => claim(sentinel),
        Sentinel::Recorded(last) if now_millis() < last.saturating_add(cooldown_millis(cooldown)) => {
            false
        }
        Sentinel::Recorded(_) | Sentinel::Unparseable => {
            // Delete then exclusively recreate; losing either race means
            // another process is handling this cycle
            if let Err(err) = fs::remove_file(sentinel) {
                debug!(sentinel = %sentinel.display(), error = %err, "skipping cleanup, sentinel could not be removed");
                return false;
            }
            claim(sentinel)
        }
    }
}

fn cooldown_millis(cooldown: Duration) -> u64 {
    u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX)
}

fn read_sentinel(path: &Path) -> io::Result<Sentinel> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content
            .trim()
            .parse()
            .map(Sentinel::Recorded)
            .unwrap_or(Sentinel::Unparseable)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Sentinel::Absent),
        Err(err) => Err(err),
    }
}

fn claim(sentinel: &Path) -> bool {
    let result = fs::File::options()
        .write(true)
        .create_new(true)
        .open(sentinel)
        .and_then(|mut file| file.write_all(now_millis().to_string().as_bytes()));
    match result {
        Ok(()) => true,
        Err(err) => {
            debug!(sentinel = %sentinel.display(), error = %err, "skipping cleanup, sentinel could not be claimed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn absent_sentinel_is_claimed_and_cleanup_proceeds() {
        let temp = TempDir::new().unwrap();
        let sentinel = temp.path().join(crate::eviction::SENTINEL_FILE);

        assert!(ensure_cooldown(&sentinel, Duration::from_secs(600)));

        let recorded: u64 = fs::read_to_string(&sentinel).unwrap().parse().unwrap();
        assert!(recorded > 0);
    }

    #[test]
    fn fresh_sentinel_blocks_cleanup() {
        let temp = TempDir::new().unwrap();
        let sentinel = temp.path().join(crate::eviction::SENTINEL_FILE);
        fs::write(&sentinel, now_millis().to_string()).unwrap();

        assert!(!ensure_cooldown(&sentinel, Duration::from_secs(600)));
    }

    #[test]
    fn expired_sentinel_is_replaced_and_cleanup_proceeds() {
        let temp = TempDir::new().unwrap();
        let sentinel = temp.path().join(crate::eviction::SENTINEL_FILE);
        fs::write(&sentinel, "1000").unwrap();

        assert!(ensure_cooldown(&sentinel, Duration::from_secs(600)));

        let recorded: u64 = fs::read_to_string(&sentinel).unwrap().parse().unwrap();
        assert!(recorded > 1000);
    }

    #[test]
    fn unparseable_sentinel_counts_as_due() {
        let temp = TempDir::new().unwrap();
        let sentinel = temp.path().join(crate::eviction::SENTINEL_FILE);
        fs::write(&sentinel, "not a number").unwrap();

        assert!(ensure_cooldown(&sentinel, Duration::from_secs(600)));
    }

    #[test]
    fn second_caller_within_cooldown_skips() {
        let temp = TempDir::new().unwrap();
        let sentinel = temp.path().join(crate::eviction::SENTINEL_FILE);

        assert!(ensure_cooldown(&sentinel, Duration::from_secs(600)));
        assert!(!ensure_cooldown(&sentinel, Duration::from_secs(600)));
    }
}
