//! Background reclamation.
//!
//! Each sweep is a plain blocking function bounded per call; the task types at
//! the bottom wrap them for the [`Scheduler`](crate::scheduler::Scheduler) and
//! run them on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use crate::collections;
use crate::encoding::keycode;
use crate::engine::{Keyspace, Reader};
use crate::error::{Error, Result};
use crate::keyspace::{self, Generation, Kind, TimerClass};
use crate::scheduler::{BackgroundTask, Context};
use crate::store::Shared;
use crate::timer;

/// Outcome of one deletion sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Deletion markers consumed
    pub markers: u64,
    /// Data records purged
    pub records: u64,
}

/// Outcome of one TTL sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReport {
    /// Keys expired by a due timer
    pub expired: u64,
    /// Timers discarded because their key had moved on
    pub stale: u64,
}

impl ExpiryReport {
    pub fn timers(&self) -> u64 {
        self.expired + self.stale
    }
}

/// Decode a deletion marker and check that it points at its own generation.
fn checked_generation(marker: &[u8], target: &[u8]) -> Result<Generation> {
    let generation = keyspace::decode_deletion_marker(marker)?;
    let expected =
        keyspace::encode_data_prefix(generation.kind, &generation.key, generation.version);
    if target != expected.as_slice() {
        return Err(Error::Consistency(format!(
            "deletion marker for {:?} version {} points at a foreign prefix",
            generation.kind, generation.version
        )));
    }
    Ok(generation)
}

/// Keep the first corruption seen in a sweep; the rest only get logged.
fn note_corrupt(first: &mut Option<Error>, what: &'static str, err: Error) {
    tracing::warn!(error = %err, "Skipping corrupt {what}");
    first.get_or_insert(err);
}

/// Purge every orphaned generation with a pending marker.
///
/// Markers are read page by page, each page from a fresh view starting after
/// the last marker handled. No segment lock is taken: orphaned data is
/// unreachable from every live path. A corrupt marker is left in place and
/// skipped; the sweep still drains the markers behind it, then fails with
/// the first corruption it met.
pub(crate) fn sweep_deletions(shared: &Shared) -> Result<DeletionReport> {
    let prefix = keyspace::deletion_marker_prefix();
    let end = keycode::prefix_end(&prefix);
    let page_size = shared.config.sweeper.deletion_page;

    let mut report = DeletionReport::default();
    let mut corrupt = None;
    let mut cursor = prefix.to_vec();
    loop {
        let page = shared
            .engine
            .view()?
            .scan(Keyspace::Data, &cursor, end.as_deref(), page_size)?;

        for (marker, target) in &page {
            let generation = match checked_generation(marker, target) {
                Ok(generation) => generation,
                Err(e) if e.is_consistency() => {
                    note_corrupt(&mut corrupt, "deletion marker", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            report.records += collections::purge_generation(shared, &generation)?;
            shared
                .engine
                .write(|batch| batch.delete(Keyspace::Data, marker))?;
            report.markers += 1;
        }

        match page.last() {
            Some((last, _)) if page.len() == page_size => cursor = keycode::successor(last),
            _ => break,
        }
    }

    match corrupt {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

struct DueTimer {
    timer_key: Vec<u8>,
    deadline: u64,
    kind: Kind,
    key: Vec<u8>,
}

fn decode_due(class: TimerClass, timer_key: Vec<u8>, target: &[u8]) -> Result<DueTimer> {
    let timer = keyspace::decode_timer(&timer_key)?;
    let (kind, key) = keyspace::decode_meta(target)?;
    if timer.class != class || TimerClass::for_kind(kind) != class {
        return Err(Error::Consistency(format!(
            "{:?} timer targets a {kind:?} key",
            timer.class
        )));
    }
    Ok(DueTimer {
        timer_key,
        deadline: timer.expiry,
        kind,
        key,
    })
}

/// Expire the keys of `class` whose timers are due at `now`.
///
/// Runs at most `ttl_batches_per_tick` batches. Each batch locks the segments
/// of all its targets, then re-validates, expires and removes its timers in
/// one write. Undecodable timers are skipped like corrupt deletion markers.
pub(crate) fn expire_due(shared: &Shared, class: TimerClass, now: u64) -> Result<ExpiryReport> {
    let sweeper = &shared.config.sweeper;
    let limit = match class {
        TimerClass::Collection => sweeper.collection_ttl_batch,
        TimerClass::Scalar => sweeper.scalar_ttl_batch,
    };
    let end = keyspace::timer_due_bound(class, now);

    let mut report = ExpiryReport::default();
    let mut corrupt = None;
    let mut cursor = keyspace::timer_class_prefix(class).to_vec();
    for _ in 0..sweeper.ttl_batches_per_tick {
        let due = shared
            .engine
            .view()?
            .scan(Keyspace::Data, &cursor, Some(end.as_slice()), limit)?;
        let fetched = due.len();
        let Some((last, _)) = due.last() else {
            break;
        };
        cursor = keycode::successor(last);

        let mut timers = Vec::with_capacity(fetched);
        for (timer_key, target) in due {
            match decode_due(class, timer_key, &target) {
                Ok(timer) => timers.push(timer),
                Err(e) if e.is_consistency() => note_corrupt(&mut corrupt, "timer entry", e),
                Err(e) => return Err(e),
            }
        }

        let guards = shared
            .locks
            .acquire_many(timers.iter().map(|t| (t.kind, t.key.as_slice())));
        let batch_report = shared.engine.write(|batch| {
            let mut batch_report = ExpiryReport::default();
            for due in &timers {
                if guards.covering(due.kind, &due.key).is_none() {
                    return Err(Error::Consistency(format!(
                        "expiry of {:?} key without holding its segment",
                        due.kind
                    )));
                }
                if collections::expire_if_still_due(batch, due.kind, &due.key, due.deadline)? {
                    batch_report.expired += 1;
                } else {
                    batch_report.stale += 1;
                }
                batch.delete(Keyspace::Data, &due.timer_key)?;
            }
            Ok(batch_report)
        })?;
        drop(guards);

        report.expired += batch_report.expired;
        report.stale += batch_report.stale;
        if fetched < limit {
            break;
        }
    }

    match corrupt {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

async fn run_blocking<T, F>(shared: &Arc<Shared>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Shared) -> Result<T> + Send + 'static,
{
    let shared = shared.clone();
    tokio::task::spawn_blocking(move || f(&shared))
        .await
        .map_err(|e| Error::Task(format!("blocking sweep failed: {}", e)))?
}

pub struct DeletionSweepTask {
    shared: Arc<Shared>,
}

impl DeletionSweepTask {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for DeletionSweepTask {
    fn name(&self) -> &'static str {
        "deletion-sweep"
    }

    fn interval(&self) -> Duration {
        self.shared.config.sweeper.deletion_interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        let report = run_blocking(&self.shared, sweep_deletions).await?;
        if report.markers > 0 {
            tracing::debug!(
                run_id = ctx.run_id,
                markers = report.markers,
                records = report.records,
                "Purged orphaned generations"
            );
        }
        Ok(())
    }
}

/// TTL sweep of one timer class.
pub struct TtlSweepTask {
    shared: Arc<Shared>,
    class: TimerClass,
}

impl TtlSweepTask {
    pub(crate) fn collections(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            class: TimerClass::Collection,
        }
    }

    pub(crate) fn scalars(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            class: TimerClass::Scalar,
        }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for TtlSweepTask {
    fn name(&self) -> &'static str {
        match self.class {
            TimerClass::Collection => "collection-ttl-sweep",
            TimerClass::Scalar => "scalar-ttl-sweep",
        }
    }

    fn interval(&self) -> Duration {
        match self.class {
            TimerClass::Collection => self.shared.config.sweeper.collection_ttl_interval,
            TimerClass::Scalar => self.shared.config.sweeper.scalar_ttl_interval,
        }
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        let class = self.class;
        let report = run_blocking(&self.shared, move |shared| {
            expire_due(shared, class, timer::unix_now())
        })
        .await?;
        if report.timers() > 0 {
            tracing::debug!(
                task = ctx.task_name,
                run_id = ctx.run_id,
                expired = report.expired,
                stale = report.stale,
                "Processed due timers"
            );
        }
        Ok(())
    }
}

pub struct SegmentReclaimTask {
    shared: Arc<Shared>,
}

impl SegmentReclaimTask {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for SegmentReclaimTask {
    fn name(&self) -> &'static str {
        "segment-reclaim"
    }

    fn interval(&self) -> Duration {
        self.shared.config.sweeper.segment_reclaim_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        let reclaimed = self.shared.locks.reclaim_idle();
        if reclaimed > 0 {
            tracing::debug!(reclaimed, "Dropped idle lock segments");
        }
        Ok(())
    }
}

pub struct MetricsTask {
    shared: Arc<Shared>,
}

impl MetricsTask {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "store-metrics"
    }

    fn interval(&self) -> Duration {
        self.shared.config.sweeper.metrics_interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        let stats = run_blocking(&self.shared, |shared| shared.stats()).await?;

        tracing::info!(
            pending_deletions = stats.pending_deletions,
            pending_collection_timers = stats.pending_collection_timers,
            pending_scalar_timers = stats.pending_scalar_timers,
            lock_segments = stats.lock_segments,
            "Store metrics"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::Collection;
    use crate::config::{StoreConfig, SweeperConfig};
    use crate::store::tests::manual_store;
    use crate::store::Store;
    use tempfile::tempdir;

    #[test]
    fn test_deletion_sweep_purges_in_chunks_across_pages() -> Result<()> {
        let dir = tempdir()?;
        let config = StoreConfig::new(dir.path())
            .auto_clear(false)
            .sweeper(SweeperConfig::default().deletion_page(2).purge_chunk(3));
        let store = Store::open_with_config(config)?;

        for key in ["a", "b", "c", "d", "e"] {
            for i in 0..7u8 {
                store.set().add(key.as_bytes(), &[i])?;
            }
            store.set().delete(key.as_bytes())?;
        }
        assert_eq!(store.stats()?.pending_deletions, 5);

        let report = store.sweep_deletions()?;
        assert_eq!(report, DeletionReport { markers: 5, records: 35 });
        assert_eq!(store.stats()?.pending_deletions, 0);

        // Processed markers are gone: a second sweep has nothing to do.
        assert_eq!(store.sweep_deletions()?, DeletionReport::default());
        Ok(())
    }

    #[test]
    fn test_sweep_leaves_live_generation_alone() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let map = store.map();

        map.put(b"m", b"f", b"old")?;
        map.delete(b"m")?;
        map.put(b"m", b"f", b"new")?;

        let report = store.sweep_deletions()?;
        assert_eq!(report, DeletionReport { markers: 1, records: 1 });
        assert_eq!(map.get(b"m", b"f")?, Some(b"new".to_vec()));
        Ok(())
    }

    #[test]
    fn test_collection_expiry_orphans_and_stale_timers_are_dropped() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let list = store.list();
        let now = timer::unix_now();

        list.push_back(b"gone", b"x")?;
        list.expire_at(b"gone", now - 5)?;

        // Re-created after its first deadline passed: the old timer is stale.
        list.push_back(b"again", b"x")?;
        list.expire_at(b"again", now - 5)?;
        list.push_back(b"again", b"y")?;

        let report = store.expire_collections()?;
        assert_eq!(report, ExpiryReport { expired: 1, stale: 1 });
        assert_eq!(store.stats()?.pending_collection_timers, 0);
        assert!(!list.exists(b"gone")?);
        assert_eq!(list.range(b"again", 0, -1)?, vec![b"y".to_vec()]);

        // Both dead generations wait for the deletion sweep.
        assert_eq!(store.sweep_deletions()?.records, 2);
        assert_eq!(store.expire_collections()?, ExpiryReport::default());
        Ok(())
    }

    #[test]
    fn test_ttl_sweep_is_bounded_per_tick() -> Result<()> {
        let dir = tempdir()?;
        let config = StoreConfig::new(dir.path()).auto_clear(false).sweeper(
            SweeperConfig::default()
                .scalar_ttl_batch(4)
                .ttl_batches_per_tick(2),
        );
        let store = Store::open_with_config(config)?;
        let past = timer::unix_now() - 1;

        for i in 0..10u8 {
            store.kv().set(&[i], b"v")?;
            store.kv().expire_at(&[i], past)?;
        }

        assert_eq!(store.expire_scalars()?.expired, 8);
        assert_eq!(store.stats()?.pending_scalar_timers, 2);
        assert_eq!(store.expire_scalars()?.expired, 2);
        assert_eq!(store.expire_scalars()?, ExpiryReport::default());
        Ok(())
    }

    #[test]
    fn test_future_timers_are_not_touched() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;

        store.kv().set_with_ttl(b"k", b"v", Duration::from_secs(3600))?;
        store.set().add(b"s", b"m")?;
        store.set().expire(b"s", Duration::from_secs(3600))?;

        assert_eq!(store.expire_scalars()?, ExpiryReport::default());
        assert_eq!(store.expire_collections()?, ExpiryReport::default());
        assert_eq!(store.kv().get(b"k")?, Some(b"v".to_vec()));
        assert!(store.set().contains(b"s", b"m")?);
        Ok(())
    }

    #[test]
    fn test_corrupt_marker_fails_the_sweep() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;

        store.shared().engine.write(|batch| {
            batch.put(
                Keyspace::Data,
                &keyspace::encode_deletion_marker(Kind::List, b"l", 1),
                b"not a data prefix",
            )
        })?;

        let err = store.sweep_deletions().unwrap_err();
        assert!(err.is_consistency());
        Ok(())
    }

    #[test]
    fn test_refreshed_scalar_keeps_value_when_old_timer_fires() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let kv = store.kv();

        kv.set(b"k", b"v1")?;
        kv.expire_at(b"k", timer::unix_now() - 1)?;
        kv.set_with_ttl(b"k", b"v2", Duration::from_secs(3600))?;

        assert_eq!(store.expire_scalars()?, ExpiryReport { expired: 0, stale: 1 });
        assert_eq!(kv.get(b"k")?, Some(b"v2".to_vec()));
        // Only the timer of the refreshed deadline is left.
        assert_eq!(store.stats()?.pending_scalar_timers, 1);
        Ok(())
    }

    #[test]
    fn test_persisted_scalar_survives_its_old_deadline() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let kv = store.kv();
        let now = timer::unix_now();

        kv.set(b"k", b"v")?;
        assert!(kv.expire_at(b"k", now + 2)?);
        assert!(kv.persist(b"k")?);

        let report = expire_due(store.shared(), TimerClass::Scalar, now + 10)?;
        assert_eq!(report, ExpiryReport { expired: 0, stale: 1 });
        assert_eq!(kv.get(b"k")?, Some(b"v".to_vec()));
        assert_eq!(kv.ttl(b"k")?, None);
        assert_eq!(store.stats()?.pending_scalar_timers, 0);
        Ok(())
    }

    #[test]
    fn test_corrupt_marker_does_not_block_later_markers() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;

        store.shared().engine.write(|batch| {
            batch.put(
                Keyspace::Data,
                &keyspace::encode_deletion_marker(Kind::Kv, b"", 1),
                b"garbage",
            )
        })?;
        for member in [b"x", b"y", b"z"] {
            store.set().add(b"s", member)?;
        }
        store.set().delete(b"s")?;
        assert_eq!(store.stats()?.pending_deletions, 2);

        assert!(store.sweep_deletions().unwrap_err().is_consistency());

        // The valid generation was purged; only the corrupt marker is left.
        assert_eq!(store.stats()?.pending_deletions, 1);
        let prefix = keyspace::encode_data_prefix(Kind::Set, b"s", 1);
        let end = keycode::prefix_end(&prefix);
        let left = store
            .shared()
            .engine
            .view()?
            .count(Keyspace::Data, &prefix, end.as_deref())?;
        assert_eq!(left, 0);
        Ok(())
    }

    #[test]
    fn test_corrupt_timer_does_not_block_later_timers() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;

        store.shared().engine.write(|batch| {
            batch.put(
                Keyspace::Data,
                &keyspace::encode_timer(TimerClass::Scalar, 1, u64::MAX),
                b"not a meta key",
            )
        })?;
        store.kv().set(b"k", b"v")?;
        store.kv().expire_at(b"k", timer::unix_now() - 1)?;
        assert_eq!(store.stats()?.pending_scalar_timers, 2);

        assert!(store.expire_scalars().unwrap_err().is_consistency());
        assert_eq!(store.stats()?.pending_scalar_timers, 1);
        assert_eq!(store.kv().get(b"k")?, None);
        Ok(())
    }
}
