//! Script cache core
//!
//! Fingerprints one script invocation (inputs, environment, lockfile, and
//! transitive workspace dependency outputs), probes the cache store chain,
//! and either replays cached outputs or executes the script and captures
//! its outputs for next time.

pub mod dependencies;
pub mod digest;
pub mod entry;
pub mod env;
pub mod orchestrator;

pub use dependencies::{DependencyFingerprintResolver, WorkspaceGraph, WorkspaceRef};
pub use entry::{CacheEntry, CacheEntryKey, CacheEntryValue};
pub use orchestrator::{
    build_cache_entry_key, ChainOrchestrator, RunOutcome, ScriptExecutor, ScriptInvocation,
};
