/// Cache hit statistics
///
/// Sinks are notified after a hit has been restored. Notification is
/// fire-and-forget: a sink cannot fail the run or delay the restore result.
use crate::script::digest::{local_hostname, now_millis};
use crate::script::entry::CacheEntry;

/// Receives one event per cache hit
pub trait StatisticsSink {
    fn record_hit(&self, entry: &CacheEntry, store_name: &str, used_at: u64, used_by: &str);
}

#[derive(Default)]
pub struct StatisticsRegistry {
    sinks: Vec<Box<dyn StatisticsSink>>,
}

impl StatisticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: Box<dyn StatisticsSink>) {
        self.sinks.push(sink);
    }

    pub fn notify_hit(&self, entry: &CacheEntry, store_name: &str) {
        let used_at = now_millis();
        let used_by = local_hostname();
        for sink in &self.sinks {
            sink.record_hit(entry, store_name, used_at, &used_by);
        }
    }
}
