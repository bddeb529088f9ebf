/// Cache chain orchestrator
///
/// Drives one script invocation through the cache: build the key, probe the
/// store chain in ascending order, and either restore a hit (promoting it
/// to the faster tiers) or execute the script live and save the outputs to
/// every store. Store failures never surface here; the only user-visible
/// failures are configuration validation and the script's own exit code.
use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, ConfigProvider, ScriptToCache};
use crate::stats::{StatisticsRegistry, StatisticsSink};
use crate::store::CacheStore;

use super::dependencies::{DependencyFingerprintResolver, WorkspaceGraph};
use super::digest::{build_cache_entry_value, build_glob_file_hashes, restore_cache_value};
use super::entry::{CacheEntry, CacheEntryKey};
use super::env::build_environment_variables;

/// One already-resolved script run, as handed over by the host build tool
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub script_name: String,
    pub args: Vec<String>,
    /// Working directory of the workspace the script runs in
    pub cwd: PathBuf,
    pub workspace_locator: String,
    pub top_level_workspace_locator: String,
    /// Digest of the project's dependency lockfile, when one exists
    pub lock_file_checksum: Option<String>,
    /// Environment of the invocation; only configured patterns reach the key
    pub environment: Vec<(String, String)>,
}

/// Runs the actual script; only exit code 0 counts as success
pub trait ScriptExecutor {
    fn execute(&mut self) -> Result<i32>;
}

impl<F: FnMut() -> Result<i32>> ScriptExecutor for F {
    fn execute(&mut self) -> Result<i32> {
        self()
    }
}

/// How one invocation concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A cached entry was restored instead of executing the script
    Restored {
        store: String,
        created_at: u64,
        created_by: String,
    },
    /// The script ran live
    Executed { exit_code: i32, entry_saved: bool },
}

pub struct ChainOrchestrator {
    stores: Vec<Box<dyn CacheStore>>,
    stats: StatisticsRegistry,
}

impl ChainOrchestrator {
    /// Stores are probed by ascending `order`; stores sharing an order keep
    /// their registration order (stable sort).
    pub fn new(mut stores: Vec<Box<dyn CacheStore>>) -> Self {
        stores.sort_by_key(|store| store.order());
        Self {
            stores,
            stats: StatisticsRegistry::new(),
        }
    }

    pub fn register_statistics_sink(&mut self, sink: Box<dyn StatisticsSink>) {
        self.stats.register(sink);
    }

    /// Run one script invocation through the cache.
    ///
    /// Errors are limited to configuration validation and failures of the
    /// executor itself; cache trouble of any kind degrades to a live run.
    pub fn run(
        &self,
        invocation: &ScriptInvocation,
        config: &CacheConfig,
        graph: &dyn WorkspaceGraph,
        configs: &dyn ConfigProvider,
        executor: &mut dyn ScriptExecutor,
    ) -> Result<RunOutcome> {
        config.validate()?;

        if config.is_cache_disabled() {
            return self.execute_without_cache(executor);
        }
        let Some(script) = config.script_to_cache(&invocation.script_name) else {
            return self.execute_without_cache(executor);
        };

        // The key is computed once, before execution, and reused for the
        // save: outputs are stored under the inputs that produced them
        let key = match build_cache_entry_key(invocation, script, graph, configs) {
            Ok(Some(key)) => key,
            Ok(None) => {
                info!(
                    script = invocation.script_name,
                    "cache status undeterminable, executing script"
                );
                return self.execute_without_cache(executor);
            }
            Err(err) => {
                warn!(
                    script = invocation.script_name,
                    error = %err,
                    "failed to build cache key, executing script"
                );
                return self.execute_without_cache(executor);
            }
        };

        if !config.is_cache_read_disabled() {
            if let Some(outcome) = self.restore_from_chain(invocation, script, &key) {
                return Ok(outcome);
            }
        }

        let exit_code = executor.execute()?;
        if exit_code != 0 {
            debug!(
                script = invocation.script_name,
                exit_code, "script failed, nothing cached"
            );
            return Ok(RunOutcome::Executed {
                exit_code,
                entry_saved: false,
            });
        }

        if config.is_cache_write_disabled() {
            return Ok(RunOutcome::Executed {
                exit_code,
                entry_saved: false,
            });
        }

        let entry_saved = self.save_to_chain(invocation, script, key);
        Ok(RunOutcome::Executed {
            exit_code,
            entry_saved,
        })
    }

    fn execute_without_cache(&self, executor: &mut dyn ScriptExecutor) -> Result<RunOutcome> {
        let exit_code = executor.execute()?;
        Ok(RunOutcome::Executed {
            exit_code,
            entry_saved: false,
        })
    }

    /// Probe the chain in ascending order; on a hit, restore the outputs and
    /// copy the entry into every strictly-faster tier.
    fn restore_from_chain(
        &self,
        invocation: &ScriptInvocation,
        script: &ScriptToCache,
        key: &CacheEntryKey,
    ) -> Option<RunOutcome> {
        for (index, store) in self.stores.iter().enumerate() {
            let Some(entry) = store.load(key) else {
                continue;
            };

            if let Err(err) =
                restore_cache_value(&invocation.cwd, &script.clear_before_restore, &entry.value)
            {
                warn!(
                    script = invocation.script_name,
                    store = store.name(),
                    error = %err,
                    "failed to restore cached outputs, executing script"
                );
                return None;
            }

            let created_at = chrono::DateTime::from_timestamp_millis(entry.value.created_at as i64)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| entry.value.created_at.to_string());
            info!(
                script = invocation.script_name,
                store = store.name(),
                created_at,
                created_by = entry.value.created_by,
                "restored script outputs from cache"
            );

            for faster in &self.stores[..index] {
                if faster.order() < store.order() {
                    faster.save(&entry);
                }
            }
            self.stats.notify_hit(&entry, store.name());

            return Some(RunOutcome::Restored {
                store: store.name().to_string(),
                created_at: entry.value.created_at,
                created_by: entry.value.created_by,
            });
        }
        None
    }

    fn save_to_chain(
        &self,
        invocation: &ScriptInvocation,
        script: &ScriptToCache,
        key: CacheEntryKey,
    ) -> bool {
        let value = match build_cache_entry_value(
            &invocation.cwd,
            &script.output_includes,
            &script.output_excludes,
        ) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    script = invocation.script_name,
                    error = %err,
                    "failed to capture script outputs, nothing cached"
                );
                return false;
            }
        };

        let entry = CacheEntry { key, value };
        for store in &self.stores {
            store.save(&entry);
        }
        true
    }
}

/// Assemble the full fingerprint of one invocation. `Ok(None)` means the
/// dependency fingerprint could not be completed and the cache status is
/// undeterminable.
pub fn build_cache_entry_key(
    invocation: &ScriptInvocation,
    script: &ScriptToCache,
    graph: &dyn WorkspaceGraph,
    configs: &dyn ConfigProvider,
) -> Result<Option<CacheEntryKey>> {
    let resolver = DependencyFingerprintResolver::new(graph, configs);
    let Some(dependency_hashes) = resolver.resolve(
        &invocation.workspace_locator,
        &script.workspace_dependency_config,
    )?
    else {
        return Ok(None);
    };

    Ok(Some(CacheEntryKey {
        script: invocation.script_name.clone(),
        args: invocation.args.clone(),
        environment_variables: build_environment_variables(
            &script.environment_variable_includes,
            &invocation.environment,
        )?,
        lock_file_checksum: invocation.lock_file_checksum.clone(),
        top_level_workspace_locator: invocation.top_level_workspace_locator.clone(),
        workspace_locator: invocation.workspace_locator.clone(),
        glob_file_hashes: build_glob_file_hashes(
            &invocation.cwd,
            &script.input_includes,
            &script.input_excludes,
        )?,
        dependency_workspaces_glob_file_hashes: dependency_hashes,
    }))
}
