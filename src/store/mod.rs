//! Cache store backends
//!
//! A store persists and retrieves whole cache entries addressed by the
//! key-hash file name. Stores are best-effort by contract: `save` never
//! fails the caller and `load` collapses every internal error to "absent",
//! so a broken disk or an unreachable remote degrades the cache to a no-op
//! instead of breaking the script run.

use crate::script::entry::{CacheEntry, CacheEntryKey};

pub mod local;
pub mod remote;

pub use local::LocalStore;
pub use remote::RemoteStore;

/// Probe order of the local disk store. Lower order is probed first.
pub const LOCAL_STORE_ORDER: u32 = 10;
/// Probe order of the remote artifact store.
pub const REMOTE_STORE_ORDER: u32 = 100;

pub trait CacheStore {
    fn name(&self) -> &str;

    /// Priority among chained stores; lower is probed first and treated as
    /// the faster tier.
    fn order(&self) -> u32;

    /// Persist an entry. Best-effort: failures are logged and swallowed,
    /// and a partial failure must not corrupt previously stored state.
    fn save(&self, entry: &CacheEntry);

    /// Retrieve the entry for a key, or `None` when absent, disabled, or
    /// any error occurred.
    fn load(&self, key: &CacheEntryKey) -> Option<CacheEntry>;
}
