//! Collection front ends and the generation bookkeeping they share.
//!
//! Every collection key has one meta record holding its current version. Data
//! records carry that version in their key, so deleting a collection only has to
//! remove the meta record and leave a deletion marker pointing at the old
//! generation; the deletion sweeper purges the data later.

pub mod kv;
pub mod list;
pub mod map;
pub mod set;
pub mod sorted_set;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::Value;
use crate::engine::{Batch, Keyspace, Reader, View};
use crate::error::Result;
use crate::keyspace::{self, Generation, Kind, TimerClass};
use crate::lock::SegmentGuard;
use crate::store::Shared;
use crate::timer;

pub use kv::Kv;
pub use list::List;
pub use map::Map;
pub use set::Set;
pub use sorted_set::SortedSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Meta {
    pub version: u64,
    pub len: u64,
    pub expires_at: Option<u64>,
    /// List bounds, `[head, tail)`. Zero for other kinds.
    pub head: i64,
    pub tail: i64,
}

impl Meta {
    fn empty(version: u64) -> Self {
        Self {
            version,
            len: 0,
            expires_at: None,
            head: 0,
            tail: 0,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }

    pub fn data_key(&self, kind: Kind, key: &[u8], selector: &[u8]) -> Vec<u8> {
        keyspace::encode_data(kind, key, self.version, selector)
    }

    pub fn data_prefix(&self, kind: Kind, key: &[u8]) -> Vec<u8> {
        keyspace::encode_data_prefix(kind, key, self.version)
    }
}

/// Public view of a collection's meta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaInfo {
    pub version: u64,
    pub len: u64,
    pub expires_at: Option<u64>,
}

impl From<&Meta> for MetaInfo {
    fn from(meta: &Meta) -> Self {
        Self {
            version: meta.version,
            len: meta.len,
            expires_at: meta.expires_at,
        }
    }
}

/// Stored meta record of `kind`/`key`, expired or not.
pub(crate) fn read_meta(reader: &impl Reader, kind: Kind, key: &[u8]) -> Result<Option<Meta>> {
    match reader.get(Keyspace::Data, &keyspace::encode_meta(kind, key))? {
        Some(bytes) => Ok(Some(Meta::decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Meta record of `kind`/`key` as readers see it: absent once its deadline passed.
pub(crate) fn live_meta(
    reader: &impl Reader,
    kind: Kind,
    key: &[u8],
    now: u64,
) -> Result<Option<Meta>> {
    Ok(read_meta(reader, kind, key)?.filter(|meta| !meta.is_expired(now)))
}

fn put_meta(batch: &mut Batch<'_>, kind: Kind, key: &[u8], meta: &Meta) -> Result<()> {
    batch.put(Keyspace::Data, &keyspace::encode_meta(kind, key), &meta.encode()?)
}

/// Remove the meta record and hand its generation to the deletion sweeper.
pub(crate) fn orphan(batch: &mut Batch<'_>, kind: Kind, key: &[u8], meta: &Meta) -> Result<()> {
    batch.delete(Keyspace::Data, &keyspace::encode_meta(kind, key))?;
    batch.put(
        Keyspace::Data,
        &keyspace::encode_deletion_marker(kind, key, meta.version),
        &meta.data_prefix(kind, key),
    )
}

/// Remove every data record of `generation`, one chunk per write batch.
pub(crate) fn purge_generation(shared: &Shared, generation: &Generation) -> Result<u64> {
    let prefix =
        keyspace::encode_data_prefix(generation.kind, &generation.key, generation.version);
    let chunk = shared.config.sweeper.purge_chunk.max(1);

    let mut purged = 0u64;
    loop {
        let removed = shared
            .engine
            .write(|batch| batch.delete_prefix(Keyspace::Data, &prefix, chunk))?;
        purged += removed as u64;
        if removed < chunk {
            return Ok(purged);
        }
    }
}

/// Expire `kind`/`key` if its current record still carries `deadline`.
///
/// Returns `false` for a stale timer: the key was deleted, re-created, refreshed
/// or persisted after the timer was registered.
pub(crate) fn expire_if_still_due(
    batch: &mut Batch<'_>,
    kind: Kind,
    key: &[u8],
    deadline: u64,
) -> Result<bool> {
    match kind {
        Kind::Kv => kv::expire_if_still_due(batch, key, deadline),
        Kind::List | Kind::Map | Kind::Set | Kind::SortedSet => {
            match read_meta(batch, kind, key)? {
                Some(meta) if meta.expires_at == Some(deadline) => {
                    orphan(batch, kind, key, &meta)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }
}

/// Handle shared by the collection front ends: the store plus the kind it serves.
pub struct CollectionCore {
    kind: Kind,
    shared: Arc<Shared>,
}

impl CollectionCore {
    pub(crate) fn new(kind: Kind, shared: Arc<Shared>) -> Self {
        Self { kind, shared }
    }

    /// Live meta inside a write batch. An expired meta found here is orphaned.
    fn live_in_batch(&self, batch: &mut Batch<'_>, key: &[u8]) -> Result<Option<Meta>> {
        match read_meta(batch, self.kind, key)? {
            Some(meta) if meta.is_expired(timer::unix_now()) => {
                orphan(batch, self.kind, key, &meta)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn create_in_batch(
        &self,
        guard: &SegmentGuard,
        batch: &mut Batch<'_>,
        key: &[u8],
    ) -> Result<Meta> {
        let version = self
            .shared
            .sequence
            .next_version(guard, batch, self.kind, key)?;
        let meta = Meta::empty(version);
        put_meta(batch, self.kind, key, &meta)?;
        Ok(meta)
    }

    /// Run `f` against the key's live meta, creating a fresh generation if the
    /// key does not exist. The updated meta is written back in the same batch.
    pub(crate) fn mutate<T>(
        &self,
        key: &[u8],
        f: impl FnOnce(&mut Batch<'_>, &mut Meta) -> Result<T>,
    ) -> Result<T> {
        let guard = self.shared.locks.acquire(self.kind, key);
        self.shared.engine.write(|batch| {
            let mut meta = match self.live_in_batch(batch, key)? {
                Some(meta) => meta,
                None => self.create_in_batch(&guard, batch, key)?,
            };
            let out = f(batch, &mut meta)?;
            put_meta(batch, self.kind, key, &meta)?;
            Ok(out)
        })
    }

    /// Like [`CollectionCore::mutate`] but leaves a missing key missing.
    pub(crate) fn mutate_existing<T>(
        &self,
        key: &[u8],
        f: impl FnOnce(&mut Batch<'_>, &mut Meta) -> Result<T>,
    ) -> Result<Option<T>> {
        let _guard = self.shared.locks.acquire(self.kind, key);
        self.shared.engine.write(|batch| {
            let Some(mut meta) = self.live_in_batch(batch, key)? else {
                return Ok(None);
            };
            let out = f(batch, &mut meta)?;
            put_meta(batch, self.kind, key, &meta)?;
            Ok(Some(out))
        })
    }

    /// Run a read against the latest committed state.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&View, u64) -> Result<T>) -> Result<T> {
        let view = self.shared.engine.view()?;
        f(&view, timer::unix_now())
    }

    pub fn meta(&self, key: &[u8]) -> Result<Option<MetaInfo>> {
        self.read(|view, now| {
            let meta = live_meta(view, self.kind, key, now)?;
            Ok(meta.as_ref().map(MetaInfo::from))
        })
    }

    pub fn create(&self, key: &[u8]) -> Result<u64> {
        self.mutate(key, |_, meta| Ok(meta.version))
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let _guard = self.shared.locks.acquire(self.kind, key);
        self.shared.engine.write(|batch| match self.live_in_batch(batch, key)? {
            Some(meta) => {
                orphan(batch, self.kind, key, &meta)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    pub fn expire_at(&self, key: &[u8], deadline: u64) -> Result<bool> {
        let class = TimerClass::for_kind(self.kind);
        let meta_key = keyspace::encode_meta(self.kind, key);
        let updated = self.mutate_existing(key, |batch, meta| {
            if meta.expires_at != Some(deadline) {
                meta.expires_at = Some(deadline);
                timer::schedule(batch, class, deadline, &meta_key)?;
            }
            Ok(())
        })?;
        Ok(updated.is_some())
    }

    pub fn persist(&self, key: &[u8]) -> Result<bool> {
        let cleared = self.mutate_existing(key, |_, meta| Ok(meta.expires_at.take().is_some()))?;
        Ok(cleared.unwrap_or(false))
    }
}

/// Operations every versioned collection supports.
pub trait Collection {
    #[doc(hidden)]
    fn core(&self) -> &CollectionCore;

    fn meta(&self, key: &[u8]) -> Result<Option<MetaInfo>> {
        self.core().meta(key)
    }

    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.meta(key)?.is_some())
    }

    fn len(&self, key: &[u8]) -> Result<u64> {
        Ok(self.meta(key)?.map_or(0, |meta| meta.len))
    }

    /// Create an empty generation unless the key already exists. Returns the live version.
    fn create(&self, key: &[u8]) -> Result<u64> {
        self.core().create(key)
    }

    /// Delete the key. Its data is reclaimed by the deletion sweeper.
    fn delete(&self, key: &[u8]) -> Result<bool> {
        self.core().delete(key)
    }

    fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        self.core().expire_at(key, timer::deadline_after(ttl))
    }

    fn expire_at(&self, key: &[u8], unix_secs: u64) -> Result<bool> {
        self.core().expire_at(key, unix_secs)
    }

    /// Remove the key's TTL. Returns `false` if it had none.
    fn persist(&self, key: &[u8]) -> Result<bool> {
        self.core().persist(key)
    }

    /// Time left before the key expires, `None` for a missing or persistent key.
    fn ttl(&self, key: &[u8]) -> Result<Option<Duration>> {
        Ok(self
            .meta(key)?
            .and_then(|meta| meta.expires_at)
            .and_then(timer::remaining))
    }
}
