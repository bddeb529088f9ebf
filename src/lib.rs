// Library interface for the scripts cache
// The host build tool wires its workspace graph, config loading, and script
// executor into these modules

pub mod config;
pub mod eviction;
pub mod logging;
pub mod script;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use config::{CacheConfig, ConfigError, ConfigProvider, ScriptToCache};
pub use script::{
    build_cache_entry_key, CacheEntry, CacheEntryKey, CacheEntryValue, ChainOrchestrator,
    RunOutcome, ScriptExecutor, ScriptInvocation, WorkspaceGraph, WorkspaceRef,
};
pub use stats::{StatisticsRegistry, StatisticsSink};
pub use store::{CacheStore, LocalStore, RemoteStore};
