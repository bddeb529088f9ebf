/// Digest builder
///
/// Expands include/exclude globs against a working directory, hashes the
/// matched files, and captures/restores output file contents. Matched file
/// lists are sorted before hashing so the resulting maps are independent of
/// file system enumeration order.
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use glob::Pattern;
use sha2::{Digest, Sha512};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::entry::{CacheEntryValue, FileContents, FileHashes, GlobFileContents, GlobFileHashes};

/// Hash every file matched by the include globs, keyed by glob and relative
/// path. An empty include list yields an empty mapping: nothing is tracked.
pub fn build_glob_file_hashes(
    cwd: &Path,
    includes: &[String],
    excludes: &[String],
) -> Result<GlobFileHashes> {
    let mut glob_file_hashes = GlobFileHashes::new();
    for include in includes {
        let mut file_hashes = FileHashes::new();
        for relative in matched_relative_files(cwd, include, excludes)? {
            // Files that disappear between match and read are skipped
            if let Some(digest) = hash_file(&cwd.join(&relative))? {
                file_hashes.insert(relative, digest);
            }
        }
        glob_file_hashes.insert(include.clone(), file_hashes);
    }
    Ok(glob_file_hashes)
}

/// Capture the contents of every file matched by the output globs as the
/// value of a new cache entry.
pub fn build_cache_entry_value(
    cwd: &Path,
    output_includes: &[String],
    output_excludes: &[String],
) -> Result<CacheEntryValue> {
    let mut glob_file_contents = GlobFileContents::new();
    for include in output_includes {
        let mut file_contents = FileContents::new();
        for relative in matched_relative_files(cwd, include, output_excludes)? {
            if let Some(content) = read_file_base64(&cwd.join(&relative))? {
                file_contents.insert(relative, content);
            }
        }
        glob_file_contents.insert(include.clone(), file_contents);
    }

    Ok(CacheEntryValue {
        glob_file_contents,
        created_at: now_millis(),
        created_by: local_hostname(),
    })
}

/// Write a cached value back into the working directory. Clear-before-restore
/// directories are removed first so stale files never outlive a restore;
/// existing files are overwritten and parent directories created as needed.
pub fn restore_cache_value(
    cwd: &Path,
    clear_before_restore: &[String],
    value: &CacheEntryValue,
) -> Result<()> {
    for dir in clear_before_restore {
        let path = cwd.join(dir);
        match fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "cleared directory before restore"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to clear directory {}", path.display()))
            }
        }
    }

    for file_contents in value.glob_file_contents.values() {
        for (relative, content) in file_contents {
            let path = cwd.join(Path::new(relative));
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory {}", parent.display())
                })?;
            }
            let bytes = STANDARD
                .decode(content)
                .with_context(|| format!("invalid base64 content for {relative}"))?;
            fs::write(&path, bytes)
                .with_context(|| format!("failed to restore file {}", path.display()))?;
        }
    }
    Ok(())
}

/// Expand one include glob relative to `cwd`, drop excluded and non-file
/// matches, and return sorted `/`-separated relative paths.
fn matched_relative_files(cwd: &Path, include: &str, excludes: &[String]) -> Result<Vec<String>> {
    let exclude_patterns = excludes
        .iter()
        .map(|e| Pattern::new(e).with_context(|| format!("invalid exclude glob: {e}")))
        .collect::<Result<Vec<_>>>()?;

    let full_pattern = cwd.join(include);
    let full_pattern = full_pattern
        .to_str()
        .with_context(|| format!("non-UTF-8 glob path for pattern {include}"))?;

    let mut relative_files = Vec::new();
    for matched in glob::glob(full_pattern).with_context(|| format!("invalid glob: {include}"))? {
        let path = match matched {
            Ok(path) => path,
            // A directory vanished mid-walk; treat its entries as absent
            Err(err) => {
                debug!(pattern = include, error = %err, "skipping unreadable glob match");
                continue;
            }
        };
        if !path.is_file() {
            continue;
        }
        let relative = normalize_relative(&path, cwd)?;
        if exclude_patterns.iter().any(|p| p.matches(&relative)) {
            continue;
        }
        relative_files.push(relative);
    }

    // Normalize order across operating systems
    relative_files.sort();
    Ok(relative_files)
}

/// Path relative to `base` with `/` separators, so keys built on different
/// operating systems compare equal.
fn normalize_relative(path: &Path, base: &Path) -> Result<String> {
    let relative: PathBuf = path
        .strip_prefix(base)
        .with_context(|| format!("glob match {} escapes its base directory", path.display()))?
        .to_path_buf();
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .with_context(|| format!("non-UTF-8 path component in {}", relative.display()))?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// SHA-512 over the raw file bytes, base64-encoded. `Ok(None)` when the file
/// vanished between match and read.
fn hash_file(path: &Path) -> Result<Option<String>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read file {}", path.display()))
        }
    };
    let digest = Sha512::digest(&bytes);
    Ok(Some(STANDARD.encode(digest)))
}

fn read_file_base64(path: &Path) -> Result<Option<String>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read file {}", path.display()))
        }
    };
    Ok(Some(STANDARD.encode(bytes)))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn hashes_are_keyed_by_glob_and_sorted_relative_path() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/nested")).unwrap();
        fs::write(temp.path().join("src/b.rs"), "fn b() {}").unwrap();
        fs::write(temp.path().join("src/a.rs"), "fn a() {}").unwrap();
        fs::write(temp.path().join("src/nested/c.rs"), "fn c() {}").unwrap();

        let hashes =
            build_glob_file_hashes(temp.path(), &strings(&["src/**/*.rs"]), &[]).unwrap();

        let files = &hashes["src/**/*.rs"];
        let paths: Vec<&String> = files.keys().collect();
        assert_eq!(paths, ["src/a.rs", "src/b.rs", "src/nested/c.rs"]);
    }

    #[test]
    fn exclude_globs_remove_matches() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/keep.rs"), "keep").unwrap();
        fs::write(temp.path().join("src/skip.tmp"), "skip").unwrap();

        let hashes = build_glob_file_hashes(
            temp.path(),
            &strings(&["src/**"]),
            &strings(&["**/*.tmp"]),
        )
        .unwrap();

        let files = &hashes["src/**"];
        assert!(files.contains_key("src/keep.rs"));
        assert!(!files.contains_key("src/skip.tmp"));
    }

    #[test]
    fn changing_a_tracked_file_changes_its_digest() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/main.rs"), "v1").unwrap();

        let before =
            build_glob_file_hashes(temp.path(), &strings(&["src/**"]), &[]).unwrap();
        fs::write(temp.path().join("src/main.rs"), "v2").unwrap();
        let after = build_glob_file_hashes(temp.path(), &strings(&["src/**"]), &[]).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn untracked_files_do_not_affect_hashes() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/main.rs"), "v1").unwrap();

        let before =
            build_glob_file_hashes(temp.path(), &strings(&["src/**"]), &[]).unwrap();
        fs::write(temp.path().join("README.md"), "unrelated").unwrap();
        let after = build_glob_file_hashes(temp.path(), &strings(&["src/**"]), &[]).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn empty_include_list_yields_empty_mapping() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("anything.txt"), "data").unwrap();

        let hashes = build_glob_file_hashes(temp.path(), &[], &[]).unwrap();
        assert!(hashes.is_empty());
    }

    #[test]
    fn capture_then_restore_round_trips_file_contents() {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("bin/sub")).unwrap();
        fs::write(source.path().join("bin/app"), b"\x00\x01binary\xff").unwrap();
        fs::write(source.path().join("bin/sub/lib"), "text output").unwrap();

        let value =
            build_cache_entry_value(source.path(), &strings(&["bin/**"]), &[]).unwrap();
        assert_eq!(value.glob_file_contents["bin/**"].len(), 2);

        let target = TempDir::new().unwrap();
        restore_cache_value(target.path(), &[], &value).unwrap();

        assert_eq!(
            fs::read(target.path().join("bin/app")).unwrap(),
            b"\x00\x01binary\xff"
        );
        assert_eq!(
            fs::read_to_string(target.path().join("bin/sub/lib")).unwrap(),
            "text output"
        );
    }

    #[test]
    fn restore_clears_configured_directories_first() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/stale"), "stale").unwrap();

        let mut file_contents = FileContents::new();
        file_contents.insert("bin/fresh".to_string(), STANDARD.encode("fresh"));
        let mut glob_file_contents = BTreeMap::new();
        glob_file_contents.insert("bin/**".to_string(), file_contents);
        let value = CacheEntryValue {
            glob_file_contents,
            created_at: 0,
            created_by: "test".to_string(),
        };

        restore_cache_value(temp.path(), &strings(&["bin"]), &value).unwrap();

        assert!(!temp.path().join("bin/stale").exists());
        assert_eq!(
            fs::read_to_string(temp.path().join("bin/fresh")).unwrap(),
            "fresh"
        );
    }

    #[test]
    fn restore_tolerates_missing_clear_directory() {
        let temp = TempDir::new().unwrap();
        let value = CacheEntryValue {
            glob_file_contents: BTreeMap::new(),
            created_at: 0,
            created_by: "test".to_string(),
        };
        restore_cache_value(temp.path(), &strings(&["does-not-exist"]), &value).unwrap();
    }
}
