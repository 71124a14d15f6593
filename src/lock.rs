//! Key segment locks.
//!
//! Logical keys hash onto a fixed number of segments. Each segment owns a mutex
//! that is allocated on first use and dropped again by [`KeySegmentLockManager::reclaim_idle`]
//! once nobody references it. Two keys in the same segment serialize against each
//! other; correctness only needs the same key to always land on the same segment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crc::{Crc, CRC_64_ECMA_182};
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::keyspace::Kind;

static KEY_HASH: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

fn segment_of(segment_count: usize, kind: Kind, key: &[u8]) -> usize {
    let mut digest = KEY_HASH.digest();
    digest.update(&[kind.tag()]);
    digest.update(key);
    (digest.finalize() % segment_count as u64) as usize
}

pub struct KeySegmentLockManager {
    segment_count: usize,
    segments: Mutex<HashMap<usize, Arc<Mutex<()>>>>,
}

impl KeySegmentLockManager {
    pub fn new(segment_count: usize) -> Self {
        Self {
            segment_count: segment_count.max(1),
            segments: Mutex::new(HashMap::new()),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segment_count
    }

    pub fn segment_for(&self, kind: Kind, key: &[u8]) -> usize {
        segment_of(self.segment_count, kind, key)
    }

    fn segment_lock(&self, segment: usize) -> Arc<Mutex<()>> {
        // Cloned under the map lock, so reclaim_idle sees the extra reference
        // before this caller starts waiting.
        self.segments
            .lock()
            .entry(segment)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lock_segment(&self, segment: usize) -> SegmentGuard {
        let lock = self.segment_lock(segment);
        SegmentGuard {
            segment,
            segment_count: self.segment_count,
            _guard: lock.lock_arc(),
        }
    }

    /// Block until the segment of `kind`/`key` is free and take it.
    pub fn acquire(&self, kind: Kind, key: &[u8]) -> SegmentGuard {
        self.lock_segment(self.segment_for(kind, key))
    }

    /// Take the segments of every key at once.
    ///
    /// Segments are locked in ascending order and each only once, so concurrent
    /// callers with overlapping key sets cannot deadlock.
    pub fn acquire_many<'a, I>(&self, keys: I) -> SegmentGuards
    where
        I: IntoIterator<Item = (Kind, &'a [u8])>,
    {
        let mut segments: Vec<usize> = keys
            .into_iter()
            .map(|(kind, key)| self.segment_for(kind, key))
            .collect();
        segments.sort_unstable();
        segments.dedup();

        SegmentGuards {
            guards: segments.into_iter().map(|s| self.lock_segment(s)).collect(),
        }
    }

    /// Drop segments nobody holds or waits on. Returns how many were removed.
    pub fn reclaim_idle(&self) -> usize {
        let mut segments = self.segments.lock();
        let before = segments.len();
        segments.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - segments.len()
    }

    /// Segments currently allocated.
    pub fn live_segments(&self) -> usize {
        self.segments.lock().len()
    }
}

/// Exclusive hold on one segment, released on drop.
pub struct SegmentGuard {
    segment: usize,
    segment_count: usize,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl SegmentGuard {
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Whether holding this guard serializes mutations of `kind`/`key`.
    pub fn covers(&self, kind: Kind, key: &[u8]) -> bool {
        segment_of(self.segment_count, kind, key) == self.segment
    }
}

impl fmt::Debug for SegmentGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentGuard")
            .field("segment", &self.segment)
            .finish()
    }
}

/// Guards taken together by [`KeySegmentLockManager::acquire_many`].
#[derive(Debug)]
pub struct SegmentGuards {
    guards: Vec<SegmentGuard>,
}

impl SegmentGuards {
    pub fn covering(&self, kind: Kind, key: &[u8]) -> Option<&SegmentGuard> {
        self.guards.iter().find(|guard| guard.covers(kind, key))
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
