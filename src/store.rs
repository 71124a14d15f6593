//! Store lifecycle: open, format check, background sweepers, close.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backup;
use crate::collections::{Kv, List, Map, Set, SortedSet};
use crate::config::StoreConfig;
use crate::encoding::keycode;
use crate::engine::{Engine, Keyspace, Reader};
use crate::error::{Error, Result};
use crate::keyspace::{self, TimerClass};
use crate::lock::KeySegmentLockManager;
use crate::scheduler::Scheduler;
use crate::sequence::VersionSequence;
use crate::snapshot::Snapshot;
use crate::sweeper::{
    self, DeletionReport, DeletionSweepTask, ExpiryReport, MetricsTask, SegmentReclaimTask,
    TtlSweepTask,
};
use crate::timer;

const FORMAT_KEY: &[u8] = b"format-version";

/// Marker persisted by this build. Stores carrying any other marker are refused.
pub const FORMAT_VERSION: &str = "plydb-v1";

/// Counters of pending background work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub pending_deletions: u64,
    pub pending_collection_timers: u64,
    pub pending_scalar_timers: u64,
    pub lock_segments: usize,
}

/// State shared by the front ends and the background tasks.
pub(crate) struct Shared {
    pub(crate) config: StoreConfig,
    pub(crate) engine: Engine,
    pub(crate) sequence: VersionSequence,
    pub(crate) locks: KeySegmentLockManager,
}

impl Shared {
    pub(crate) fn stats(&self) -> Result<StoreStats> {
        let view = self.engine.view()?;
        let count_prefix = |prefix: &[u8]| {
            let end = keycode::prefix_end(prefix);
            view.count(Keyspace::Data, prefix, end.as_deref())
        };

        let markers = keyspace::deletion_marker_prefix();
        let collection_timers = keyspace::timer_class_prefix(TimerClass::Collection);
        let scalar_timers = keyspace::timer_class_prefix(TimerClass::Scalar);

        Ok(StoreStats {
            pending_deletions: count_prefix(&markers[..])?,
            pending_collection_timers: count_prefix(&collection_timers[..])?,
            pending_scalar_timers: count_prefix(&scalar_timers[..])?,
            lock_segments: self.locks.live_segments(),
        })
    }
}

fn check_format(engine: &Engine) -> Result<()> {
    engine.write(|batch| match batch.get(Keyspace::Bookkeeping, FORMAT_KEY)? {
        None => batch.put(Keyspace::Bookkeeping, FORMAT_KEY, FORMAT_VERSION.as_bytes()),
        Some(found) if found == FORMAT_VERSION.as_bytes() => Ok(()),
        Some(found) => Err(Error::FormatMismatch {
            expected: FORMAT_VERSION.to_string(),
            found: String::from_utf8_lossy(&found).into_owned(),
        }),
    })
}

/// Shut the scheduler down, off the caller's thread if that thread is driving
/// an async runtime: blocking on or dropping a runtime there panics.
fn stop_scheduler(scheduler: Scheduler) -> Result<()> {
    if tokio::runtime::Handle::try_current().is_err() {
        return scheduler.shutdown();
    }
    std::thread::Builder::new()
        .name("plydb-close".into())
        .spawn(move || scheduler.shutdown())?
        .join()
        .map_err(|_| Error::Task("scheduler shutdown panicked".into()))?
}

/// An open store.
///
/// All operations are blocking. Background sweepers run on a private runtime
/// owned by the store and stop when it is closed or dropped.
pub struct Store {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<Scheduler>>,
    kv: Kv,
    list: List,
    map: Map,
    set: Set,
    sorted_set: SortedSet,
}

impl Store {
    /// Open the store in `dir` with default settings, creating it if absent.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(StoreConfig::new(dir))
    }

    pub fn open_with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let engine = Engine::open(&config.dir, config.transactional)?;
        check_format(&engine)?;

        let shared = Arc::new(Shared {
            locks: KeySegmentLockManager::new(config.lock_segments),
            sequence: VersionSequence::new(),
            engine,
            config,
        });

        let scheduler = Scheduler::new(shared.config.scheduler_threads)?;
        if shared.config.auto_clear {
            scheduler
                .register(Arc::new(DeletionSweepTask::new(shared.clone())))
                .register(Arc::new(TtlSweepTask::scalars(shared.clone())));
        }
        scheduler
            .register(Arc::new(TtlSweepTask::collections(shared.clone())))
            .register(Arc::new(SegmentReclaimTask::new(shared.clone())))
            .register(Arc::new(MetricsTask::new(shared.clone())));

        tracing::info!(
            file = %shared.engine.path().display(),
            transactional = shared.config.transactional,
            auto_clear = shared.config.auto_clear,
            tasks = scheduler.task_count(),
            "Store opened"
        );

        Ok(Self {
            kv: Kv::new(shared.clone()),
            list: List::new(shared.clone()),
            map: Map::new(shared.clone()),
            set: Set::new(shared.clone()),
            sorted_set: SortedSet::new(shared.clone()),
            scheduler: Mutex::new(Some(scheduler)),
            shared,
        })
    }

    /// Unpack a backup archive into `target_dir`, ready for [`Store::open`].
    pub fn restore(archive: impl AsRef<Path>, target_dir: impl AsRef<Path>) -> Result<()> {
        let (archive, target_dir) = (archive.as_ref(), target_dir.as_ref());
        backup::restore(archive, target_dir)?;
        tracing::info!(
            archive = %archive.display(),
            target = %target_dir.display(),
            "Store restored"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.shared.config.dir
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub fn kv(&self) -> &Kv {
        &self.kv
    }

    pub fn list(&self) -> &List {
        &self.list
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn set(&self) -> &Set {
        &self.set
    }

    pub fn sorted_set(&self) -> &SortedSet {
        &self.sorted_set
    }

    /// Point-in-time read view.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::new(self.shared.engine.view()?))
    }

    /// Write a backup archive into `dest_dir` and return its path.
    pub fn backup(&self, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let archive = backup::backup(&self.shared.engine, dest_dir.as_ref())?;
        tracing::info!(archive = %archive.display(), "Backup written");
        Ok(archive)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.shared.stats()
    }

    /// Run one deletion sweep on the calling thread.
    pub fn sweep_deletions(&self) -> Result<DeletionReport> {
        sweeper::sweep_deletions(&self.shared)
    }

    /// Run one collection TTL sweep on the calling thread.
    pub fn expire_collections(&self) -> Result<ExpiryReport> {
        sweeper::expire_due(&self.shared, TimerClass::Collection, timer::unix_now())
    }

    /// Run one scalar TTL sweep on the calling thread.
    pub fn expire_scalars(&self) -> Result<ExpiryReport> {
        sweeper::expire_due(&self.shared, TimerClass::Scalar, timer::unix_now())
    }

    /// Stop the background tasks, waiting for running ticks, then close the engine.
    ///
    /// Closing twice is a no-op. Every other operation on a closed store fails
    /// with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let stopped = match self.scheduler.lock().take() {
            Some(scheduler) => stop_scheduler(scheduler),
            None => Ok(()),
        };
        let closed = self.shared.engine.close();

        stopped?;
        if closed? {
            tracing::info!(dir = %self.shared.config.dir.display(), "Store closed");
        }
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close store on drop");
        }
    }
}
