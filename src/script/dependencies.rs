/// Dependency fingerprint resolver
///
/// Folds the output digests of every transitive workspace dependency into
/// the cache key: a change in a library's outputs invalidates every
/// dependent's entry without a separate graph traversal at lookup time. The
/// walk is recursive over the immediate-dependency graph with a visited set,
/// so shared dependencies are fingerprinted once and cycles terminate.
use anyhow::Result;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

use crate::config::{ConfigProvider, WorkspaceDependencyConfig};

use super::digest::build_glob_file_hashes;
use super::entry::{ScriptFileHashes, WorkspaceGlobFileHashes};

/// A workspace as seen by the host build tool's graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRef {
    /// Locator string identifying the workspace, e.g. "lib@workspace:packages/lib"
    pub locator: String,
    /// The workspace's working directory
    pub cwd: PathBuf,
}

/// Yields the immediate workspace dependencies of a workspace. Implemented
/// by the host build tool integration.
pub trait WorkspaceGraph {
    fn dependencies(&self, locator: &str) -> Result<Vec<WorkspaceRef>>;
}

pub struct DependencyFingerprintResolver<'a> {
    graph: &'a dyn WorkspaceGraph,
    configs: &'a dyn ConfigProvider,
}

impl<'a> DependencyFingerprintResolver<'a> {
    pub fn new(graph: &'a dyn WorkspaceGraph, configs: &'a dyn ConfigProvider) -> Self {
        Self { graph, configs }
    }

    /// Computes the dependency part of a cache key for the workspace at
    /// `locator`. Returns `Ok(None)` when any transitive dependency lacks a
    /// valid cache config: the fingerprint would be incomplete, so the
    /// caller must treat the cache status as undeterminable and run live.
    pub fn resolve(
        &self,
        locator: &str,
        dependency_config: &WorkspaceDependencyConfig,
    ) -> Result<Option<WorkspaceGlobFileHashes>> {
        let mut hashes = WorkspaceGlobFileHashes::new();
        if dependency_config.ignore_all {
            return Ok(Some(hashes));
        }

        let mut visited = HashSet::new();
        visited.insert(locator.to_string());
        if self.resolve_recursive(locator, dependency_config, &mut visited, &mut hashes)? {
            Ok(Some(hashes))
        } else {
            Ok(None)
        }
    }

    /// Returns false when the fingerprint cannot be completed.
    fn resolve_recursive(
        &self,
        locator: &str,
        dependency_config: &WorkspaceDependencyConfig,
        visited: &mut HashSet<String>,
        hashes: &mut WorkspaceGlobFileHashes,
    ) -> Result<bool> {
        for dependency in self.graph.dependencies(locator)? {
            if !visited.insert(dependency.locator.clone()) {
                continue;
            }

            let override_config = dependency_config.override_for(&dependency.locator);
            let ignored = override_config.map(|o| o.ignore).unwrap_or(false);

            if !ignored {
                let Some(config) = self.configs.config_for_workspace(&dependency.cwd) else {
                    warn!(
                        dependency = %dependency.locator,
                        "dependency workspace has no valid cache config, cannot \
                         fingerprint its outputs"
                    );
                    return Ok(false);
                };

                let mut script_hashes = ScriptFileHashes::new();
                for script in &config.scripts_to_cache {
                    let relevant = override_config
                        .map(|o| o.includes_script(&script.script_name))
                        .unwrap_or(true);
                    if relevant {
                        script_hashes.insert(
                            script.script_name.clone(),
                            build_glob_file_hashes(
                                &dependency.cwd,
                                &script.output_includes,
                                &script.output_excludes,
                            )?,
                        );
                    }
                }
                hashes.insert(dependency.locator.clone(), script_hashes);
            }

            // An ignored dependency's own dependencies still count: ignoring
            // a workspace removes its outputs from the key, not its subtree.
            if !self.resolve_recursive(&dependency.locator, dependency_config, visited, hashes)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, DependencyOverride, ScriptToCache};
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    struct FakeGraph {
        edges: HashMap<String, Vec<WorkspaceRef>>,
    }

    impl WorkspaceGraph for FakeGraph {
        fn dependencies(&self, locator: &str) -> Result<Vec<WorkspaceRef>> {
            Ok(self.edges.get(locator).cloned().unwrap_or_default())
        }
    }

    struct FakeConfigs {
        configs: HashMap<PathBuf, CacheConfig>,
    }

    impl ConfigProvider for FakeConfigs {
        fn config_for_workspace(&self, workspace_dir: &Path) -> Option<CacheConfig> {
            self.configs.get(workspace_dir).cloned()
        }
    }

    fn cacheable_build_config() -> CacheConfig {
        CacheConfig {
            scripts_to_cache: vec![ScriptToCache {
                script_name: "build".to_string(),
                output_includes: vec!["dist/**".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn workspace(temp: &TempDir, name: &str) -> WorkspaceRef {
        let cwd = temp.path().join(name);
        fs::create_dir_all(cwd.join("dist")).unwrap();
        fs::write(cwd.join("dist/out.js"), format!("{name} output")).unwrap();
        WorkspaceRef {
            locator: format!("{name}@workspace:packages/{name}"),
            cwd,
        }
    }

    #[test]
    fn transitive_dependencies_are_fingerprinted() {
        let temp = TempDir::new().unwrap();
        let lib = workspace(&temp, "lib");
        let util = workspace(&temp, "util");

        let graph = FakeGraph {
            edges: HashMap::from([
                ("app@workspace:.".to_string(), vec![lib.clone()]),
                (lib.locator.clone(), vec![util.clone()]),
            ]),
        };
        let configs = FakeConfigs {
            configs: HashMap::from([
                (lib.cwd.clone(), cacheable_build_config()),
                (util.cwd.clone(), cacheable_build_config()),
            ]),
        };

        let resolver = DependencyFingerprintResolver::new(&graph, &configs);
        let hashes = resolver
            .resolve("app@workspace:.", &WorkspaceDependencyConfig::default())
            .unwrap()
            .unwrap();

        assert_eq!(hashes.len(), 2);
        assert!(hashes[&lib.locator]["build"]["dist/**"].contains_key("dist/out.js"));
        assert!(hashes.contains_key(&util.locator));
    }

    #[test]
    fn ignore_all_short_circuits_to_empty_map() {
        let temp = TempDir::new().unwrap();
        let lib = workspace(&temp, "lib");
        let graph = FakeGraph {
            edges: HashMap::from([("app@workspace:.".to_string(), vec![lib])]),
        };
        // No config registered for lib: the resolve would fail if the walk happened
        let configs = FakeConfigs {
            configs: HashMap::new(),
        };

        let resolver = DependencyFingerprintResolver::new(&graph, &configs);
        let config = WorkspaceDependencyConfig {
            ignore_all: true,
            ..Default::default()
        };
        let hashes = resolver
            .resolve("app@workspace:.", &config)
            .unwrap()
            .unwrap();
        assert!(hashes.is_empty());
    }

    #[test]
    fn missing_dependency_config_fails_the_whole_resolution() {
        let temp = TempDir::new().unwrap();
        let lib = workspace(&temp, "lib");
        let graph = FakeGraph {
            edges: HashMap::from([("app@workspace:.".to_string(), vec![lib])]),
        };
        let configs = FakeConfigs {
            configs: HashMap::new(),
        };

        let resolver = DependencyFingerprintResolver::new(&graph, &configs);
        let result = resolver
            .resolve("app@workspace:.", &WorkspaceDependencyConfig::default())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn ignored_dependency_is_skipped_but_its_subtree_is_not() {
        let temp = TempDir::new().unwrap();
        let lib = workspace(&temp, "lib");
        let util = workspace(&temp, "util");

        let graph = FakeGraph {
            edges: HashMap::from([
                ("app@workspace:.".to_string(), vec![lib.clone()]),
                (lib.locator.clone(), vec![util.clone()]),
            ]),
        };
        // lib has no config registered; ignoring it must not require one
        let configs = FakeConfigs {
            configs: HashMap::from([(util.cwd.clone(), cacheable_build_config())]),
        };

        let mut dependency_config = WorkspaceDependencyConfig::default();
        dependency_config.overrides.insert(
            "lib@".to_string(),
            DependencyOverride {
                ignore: true,
                ..Default::default()
            },
        );

        let resolver = DependencyFingerprintResolver::new(&graph, &configs);
        let hashes = resolver
            .resolve("app@workspace:.", &dependency_config)
            .unwrap()
            .unwrap();

        assert!(!hashes.contains_key(&lib.locator));
        assert!(hashes.contains_key(&util.locator));
    }

    #[test]
    fn script_filter_limits_which_dependency_scripts_count() {
        let temp = TempDir::new().unwrap();
        let lib = workspace(&temp, "lib");

        let mut config = cacheable_build_config();
        config.scripts_to_cache.push(ScriptToCache {
            script_name: "docs".to_string(),
            output_includes: vec!["docs/**".to_string()],
            ..Default::default()
        });

        let graph = FakeGraph {
            edges: HashMap::from([("app@workspace:.".to_string(), vec![lib.clone()])]),
        };
        let configs = FakeConfigs {
            configs: HashMap::from([(lib.cwd.clone(), config)]),
        };

        let mut dependency_config = WorkspaceDependencyConfig::default();
        dependency_config.overrides.insert(
            "lib@".to_string(),
            DependencyOverride {
                included_scripts: Some(vec!["build".to_string()]),
                ..Default::default()
            },
        );

        let resolver = DependencyFingerprintResolver::new(&graph, &configs);
        let hashes = resolver
            .resolve("app@workspace:.", &dependency_config)
            .unwrap()
            .unwrap();

        let scripts = &hashes[&lib.locator];
        assert!(scripts.contains_key("build"));
        assert!(!scripts.contains_key("docs"));
    }

    #[test]
    fn shared_dependency_is_fingerprinted_once_and_cycles_terminate() {
        let temp = TempDir::new().unwrap();
        let a = workspace(&temp, "a");
        let b = workspace(&temp, "b");

        let graph = FakeGraph {
            edges: HashMap::from([
                ("app@workspace:.".to_string(), vec![a.clone(), b.clone()]),
                (a.locator.clone(), vec![b.clone()]),
                (b.locator.clone(), vec![a.clone()]),
            ]),
        };
        let configs = FakeConfigs {
            configs: HashMap::from([
                (a.cwd.clone(), cacheable_build_config()),
                (b.cwd.clone(), cacheable_build_config()),
            ]),
        };

        let resolver = DependencyFingerprintResolver::new(&graph, &configs);
        let hashes = resolver
            .resolve("app@workspace:.", &WorkspaceDependencyConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(hashes.len(), 2);
    }
}
