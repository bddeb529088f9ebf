/// Remote artifact repository cache store
///
/// Entries are raw JSON assets at
/// `{host}/{repository}/{workspaceLocator}/{fileName}`. A 404 on load is a
/// definitive miss; any other non-success status and any transport error is
/// a retryable failure. Saves check for an existing asset first so a second
/// client finishing the same script run is a no-op rather than an error.
/// Credentials are needed for uploads only: without them the store serves
/// hits but never writes, and without a configured host it is fully inert.
use anyhow::Result;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::RemoteStoreConfig;
use crate::script::entry::{CacheEntry, CacheEntryKey};

use super::{CacheStore, REMOTE_STORE_ORDER};

pub struct RemoteStore {
    config: RemoteStoreConfig,
    client: Client,
}

enum LoadOutcome {
    Hit(Box<CacheEntry>),
    Miss,
    Failed(String),
}

enum SaveOutcome {
    Saved,
    AlreadyPresent,
    Failed(String),
}

impl RemoteStore {
    pub fn new(config: RemoteStoreConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    fn entry_url(&self, host: &str, key: &CacheEntryKey) -> Result<String> {
        Ok(format!(
            "{}/{}/{}/{}",
            host.trim_end_matches('/'),
            self.config.repository(),
            key.workspace_locator,
            key.file_name()?
        ))
    }

    fn try_load_once(&self, url: &str, key: &CacheEntryKey) -> LoadOutcome {
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(err) => return LoadOutcome::Failed(format!("request error: {err}")),
        };
        match response.status() {
            StatusCode::NOT_FOUND => LoadOutcome::Miss,
            status if status.is_success() => match response.json::<CacheEntry>() {
                Ok(entry) if entry.key == *key => LoadOutcome::Hit(Box::new(entry)),
                Ok(_) => {
                    warn!(url, "stored key does not match requested key, treating as miss");
                    LoadOutcome::Miss
                }
                Err(err) => LoadOutcome::Failed(format!("invalid entry payload: {err}")),
            },
            status => LoadOutcome::Failed(format!("unexpected status {status}")),
        }
    }

    fn try_save_once(
        &self,
        url: &str,
        entry: &CacheEntry,
        username: &str,
        password: &str,
    ) -> SaveOutcome {
        // Another client may have finished the same run first; skip the
        // upload instead of redeploying
        match self.client.head(url).send() {
            Ok(response) if response.status().is_success() => return SaveOutcome::AlreadyPresent,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => {
                return SaveOutcome::Failed(format!(
                    "existence check returned status {}",
                    response.status()
                ))
            }
            Err(err) => return SaveOutcome::Failed(format!("existence check error: {err}")),
        }

        let response = match self
            .client
            .put(url)
            .basic_auth(username, Some(password))
            .json(entry)
            .send()
        {
            Ok(response) => response,
            Err(err) => return SaveOutcome::Failed(format!("upload error: {err}")),
        };
        match response.status() {
            status if status.is_success() => SaveOutcome::Saved,
            // The entry appeared between the existence check and the upload
            StatusCode::CONFLICT => SaveOutcome::AlreadyPresent,
            status => SaveOutcome::Failed(format!("upload returned status {status}")),
        }
    }
}

impl CacheStore for RemoteStore {
    fn name(&self) -> &str {
        "remote"
    }

    fn order(&self) -> u32 {
        REMOTE_STORE_ORDER
    }

    fn save(&self, entry: &CacheEntry) {
        if self.config.is_disabled() || self.config.is_write_disabled() {
            return;
        }
        let Some(host) = self.config.host() else {
            return;
        };
        let (Some(username), Some(password)) = (self.config.username(), self.config.password())
        else {
            debug!(store = self.name(), "no credentials configured, skipping upload");
            return;
        };
        let url = match self.entry_url(&host, &entry.key) {
            Ok(url) => url,
            Err(err) => {
                warn!(store = self.name(), error = %err, "failed to build entry URL");
                return;
            }
        };

        let outcome = retry(self.config.max_retries(), "save", || {
            self.try_save_once(&url, entry, &username, &password)
        });
        match outcome {
            SaveOutcome::Saved => debug!(url, "uploaded cache entry"),
            SaveOutcome::AlreadyPresent => debug!(url, "cache entry already present"),
            SaveOutcome::Failed(reason) => {
                warn!(store = self.name(), url, reason, "failed to save cache entry")
            }
        }
    }

    fn load(&self, key: &CacheEntryKey) -> Option<CacheEntry> {
        if self.config.is_disabled() || self.config.is_read_disabled() {
            return None;
        }
        let host = self.config.host()?;
        let url = match self.entry_url(&host, key) {
            Ok(url) => url,
            Err(err) => {
                warn!(store = self.name(), error = %err, "failed to build entry URL");
                return None;
            }
        };

        let outcome = retry(self.config.max_retries(), "load", || {
            self.try_load_once(&url, key)
        });
        match outcome {
            LoadOutcome::Hit(entry) => Some(*entry),
            LoadOutcome::Miss => None,
            LoadOutcome::Failed(reason) => {
                warn!(store = self.name(), url, reason, "failed to load cache entry");
                None
            }
        }
    }
}

trait Retryable {
    fn failure_reason(&self) -> Option<&str>;
}

impl Retryable for LoadOutcome {
    fn failure_reason(&self) -> Option<&str> {
        match self {
            LoadOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Retryable for SaveOutcome {
    fn failure_reason(&self) -> Option<&str> {
        match self {
            SaveOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Runs `attempt` up to `max_attempts` times, retrying only failures, and
/// surfaces the last attempt's outcome.
fn retry<T: Retryable>(max_attempts: u32, operation: &str, mut attempt: impl FnMut() -> T) -> T {
    let mut last = attempt();
    for n in 1..max_attempts {
        let Some(reason) = last.failure_reason() else {
            return last;
        };
        debug!(operation, attempt = n, reason, "retrying remote cache operation");
        last = attempt();
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::entry::CacheEntryValue;
    use std::collections::BTreeMap;

    fn key(script: &str) -> CacheEntryKey {
        CacheEntryKey {
            script: script.to_string(),
            args: vec![],
            environment_variables: BTreeMap::new(),
            lock_file_checksum: None,
            top_level_workspace_locator: "root@workspace:.".to_string(),
            workspace_locator: "pkg@workspace:packages/pkg".to_string(),
            glob_file_hashes: BTreeMap::new(),
            dependency_workspaces_glob_file_hashes: BTreeMap::new(),
        }
    }

    #[test]
    fn entry_url_joins_host_repository_locator_and_file_name() {
        let store = RemoteStore::new(RemoteStoreConfig {
            host: Some("https://artifacts.example.com/".to_string()),
            repository: Some("build-cache".to_string()),
            ..Default::default()
        });
        let key = key("build");
        let url = store.entry_url("https://artifacts.example.com/", &key).unwrap();
        assert_eq!(
            url,
            format!(
                "https://artifacts.example.com/build-cache/pkg@workspace:packages/pkg/{}",
                key.file_name().unwrap()
            )
        );
    }

    #[test]
    fn store_without_host_never_touches_the_network() {
        let store = RemoteStore::new(RemoteStoreConfig::default());
        assert!(store.load(&key("build")).is_none());
        store.save(&CacheEntry {
            key: key("build"),
            value: CacheEntryValue {
                glob_file_contents: BTreeMap::new(),
                created_at: 0,
                created_by: "test".to_string(),
            },
        });
    }

    #[test]
    fn retry_surfaces_the_last_failure_after_the_attempt_budget() {
        let mut calls = 0;
        let outcome = retry(3, "load", || {
            calls += 1;
            LoadOutcome::Failed(format!("attempt {calls}"))
        });
        assert_eq!(calls, 3);
        assert_eq!(outcome.failure_reason(), Some("attempt 3"));
    }

    #[test]
    fn retry_stops_on_first_non_failure() {
        let mut calls = 0;
        let outcome = retry(3, "load", || {
            calls += 1;
            if calls == 2 {
                LoadOutcome::Miss
            } else {
                LoadOutcome::Failed("transient".to_string())
            }
        });
        assert_eq!(calls, 2);
        assert!(outcome.failure_reason().is_none());
        assert!(matches!(outcome, LoadOutcome::Miss));
    }
}
