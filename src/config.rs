use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for a store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the engine file
    pub dir: PathBuf,

    /// Make every commit durable before it returns (default: false)
    pub transactional: bool,

    /// Run the deletion sweep and the scalar TTL sweep in the background (default: true)
    pub auto_clear: bool,

    /// Number of key segment locks (default: 1024)
    pub lock_segments: usize,

    /// Worker threads of the background scheduler (default: 2)
    pub scheduler_threads: usize,

    /// Sweeper schedule and batch limits
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often pending deletion markers are processed (default: 2s)
    pub deletion_interval: Duration,

    /// How often collection TTLs are expired (default: 1s)
    pub collection_ttl_interval: Duration,

    /// How often scalar TTLs are expired (default: 1s)
    pub scalar_ttl_interval: Duration,

    /// How often idle lock segments are dropped (default: 30s)
    pub segment_reclaim_interval: Duration,

    /// How often store statistics are logged (default: 60s)
    pub metrics_interval: Duration,

    /// Deletion markers read per page (default: 256)
    pub deletion_page: usize,

    /// Data records removed per write batch when purging a generation (default: 1000)
    pub purge_chunk: usize,

    /// Timer batches processed per TTL tick (default: 10)
    pub ttl_batches_per_tick: usize,

    /// Collection timer entries per batch (default: 500)
    pub collection_ttl_batch: usize,

    /// Scalar timer entries per batch (default: 2000)
    pub scalar_ttl_batch: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            deletion_interval: Duration::from_secs(2),
            collection_ttl_interval: Duration::from_secs(1),
            scalar_ttl_interval: Duration::from_secs(1),
            segment_reclaim_interval: Duration::from_secs(30),
            metrics_interval: Duration::from_secs(60),
            deletion_page: 256,
            purge_chunk: 1000,
            ttl_batches_per_tick: 10,
            collection_ttl_batch: 500,
            scalar_ttl_batch: 2000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./plydb"),
            transactional: false,
            auto_clear: true,
            lock_segments: 1024,
            scheduler_threads: 2,
            sweeper: SweeperConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    pub fn auto_clear(mut self, enabled: bool) -> Self {
        self.auto_clear = enabled;
        self
    }

    pub fn lock_segments(mut self, segments: usize) -> Self {
        self.lock_segments = segments;
        self
    }

    pub fn scheduler_threads(mut self, threads: usize) -> Self {
        self.scheduler_threads = threads;
        self
    }

    /// Configure sweeper settings
    pub fn sweeper(mut self, config: SweeperConfig) -> Self {
        self.sweeper = config;
        self
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("lock_segments", self.lock_segments),
            ("scheduler_threads", self.scheduler_threads),
            ("deletion_page", self.sweeper.deletion_page),
            ("purge_chunk", self.sweeper.purge_chunk),
            ("ttl_batches_per_tick", self.sweeper.ttl_batches_per_tick),
            ("collection_ttl_batch", self.sweeper.collection_ttl_batch),
            ("scalar_ttl_batch", self.sweeper.scalar_ttl_batch),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(Error::InvalidArgument(format!("{name} must be at least 1")));
        }

        let intervals = [
            ("deletion_interval", self.sweeper.deletion_interval),
            ("collection_ttl_interval", self.sweeper.collection_ttl_interval),
            ("scalar_ttl_interval", self.sweeper.scalar_ttl_interval),
            ("segment_reclaim_interval", self.sweeper.segment_reclaim_interval),
            ("metrics_interval", self.sweeper.metrics_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| value.is_zero()) {
            return Err(Error::InvalidArgument(format!("{name} must be non-zero")));
        }
        Ok(())
    }
}

impl SweeperConfig {
    pub fn deletion_interval(mut self, interval: Duration) -> Self {
        self.deletion_interval = interval;
        self
    }

    pub fn collection_ttl_interval(mut self, interval: Duration) -> Self {
        self.collection_ttl_interval = interval;
        self
    }

    pub fn scalar_ttl_interval(mut self, interval: Duration) -> Self {
        self.scalar_ttl_interval = interval;
        self
    }

    pub fn segment_reclaim_interval(mut self, interval: Duration) -> Self {
        self.segment_reclaim_interval = interval;
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn deletion_page(mut self, markers: usize) -> Self {
        self.deletion_page = markers;
        self
    }

    pub fn purge_chunk(mut self, records: usize) -> Self {
        self.purge_chunk = records;
        self
    }

    pub fn ttl_batches_per_tick(mut self, batches: usize) -> Self {
        self.ttl_batches_per_tick = batches;
        self
    }

    pub fn collection_ttl_batch(mut self, entries: usize) -> Self {
        self.collection_ttl_batch = entries;
        self
    }

    pub fn scalar_ttl_batch(mut self, entries: usize) -> Self {
        self.scalar_ttl_batch = entries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.dir, PathBuf::from("./plydb"));
        assert!(!config.transactional);
        assert!(config.auto_clear);
        assert_eq!(config.lock_segments, 1024);
        assert_eq!(config.scheduler_threads, 2);

        // Test default sweeper config
        assert_eq!(config.sweeper.deletion_interval, Duration::from_secs(2));
        assert_eq!(config.sweeper.collection_ttl_interval, Duration::from_secs(1));
        assert_eq!(config.sweeper.scalar_ttl_interval, Duration::from_secs(1));
        assert_eq!(config.sweeper.ttl_batches_per_tick, 10);
        assert_eq!(config.sweeper.collection_ttl_batch, 500);
        assert_eq!(config.sweeper.scalar_ttl_batch, 2000);
        assert_eq!(config.sweeper.purge_chunk, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("/tmp/test")
            .transactional(true)
            .auto_clear(false)
            .lock_segments(64)
            .scheduler_threads(1)
            .sweeper(
                SweeperConfig::default()
                    .deletion_interval(Duration::from_millis(500))
                    .collection_ttl_interval(Duration::from_millis(200))
                    .scalar_ttl_interval(Duration::from_millis(300))
                    .purge_chunk(10)
                    .scalar_ttl_batch(5),
            );

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert!(config.transactional);
        assert!(!config.auto_clear);
        assert_eq!(config.lock_segments, 64);
        assert_eq!(config.scheduler_threads, 1);

        // Test sweeper config
        assert_eq!(config.sweeper.deletion_interval, Duration::from_millis(500));
        assert_eq!(config.sweeper.collection_ttl_interval, Duration::from_millis(200));
        assert_eq!(config.sweeper.scalar_ttl_interval, Duration::from_millis(300));
        assert_eq!(config.sweeper.purge_chunk, 10);
        assert_eq!(config.sweeper.scalar_ttl_batch, 5);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = StoreConfig::new("/tmp/test").lock_segments(0);
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));

        let config = StoreConfig::new("/tmp/test")
            .sweeper(SweeperConfig::default().metrics_interval(Duration::ZERO));
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }
}
