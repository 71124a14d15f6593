use crate::collections::{self, kv, list, map, set, sorted_set, MetaInfo};
use crate::engine::View;
use crate::error::Result;
use crate::keyspace::Kind;
use crate::timer;

/// Read-only view of the store as of its creation.
///
/// Writes committed after the snapshot was taken are never visible through it.
/// TTLs are judged against the snapshot's creation time, so a key that was live
/// when the snapshot was taken stays readable for its whole lifetime.
pub struct Snapshot {
    view: View,
    taken_at: u64,
}

impl Snapshot {
    pub(crate) fn new(view: View) -> Self {
        Self {
            view,
            taken_at: timer::unix_now(),
        }
    }

    /// Unix time the snapshot was taken at.
    pub fn taken_at(&self) -> u64 {
        self.taken_at
    }

    pub fn meta(&self, kind: Kind, key: &[u8]) -> Result<Option<MetaInfo>> {
        let meta = collections::live_meta(&self.view, kind, key, self.taken_at)?;
        Ok(meta.as_ref().map(MetaInfo::from))
    }

    pub fn kv_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        kv::get_in(&self.view, key, self.taken_at)
    }

    pub fn list_len(&self, key: &[u8]) -> Result<u64> {
        Ok(self.meta(Kind::List, key)?.map_or(0, |meta| meta.len))
    }

    pub fn list_get(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        list::get_in(&self.view, key, index, self.taken_at)
    }

    pub fn list_range(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        list::range_in(&self.view, key, start, stop, self.taken_at)
    }

    pub fn map_get(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        map::get_in(&self.view, key, field, self.taken_at)
    }

    pub fn map_entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        map::entries_in(&self.view, key, self.taken_at)
    }

    pub fn set_contains(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        set::contains_in(&self.view, key, member, self.taken_at)
    }

    pub fn set_members(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        set::members_in(&self.view, key, self.taken_at)
    }

    pub fn zset_score(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        sorted_set::score_in(&self.view, key, member, self.taken_at)
    }

    pub fn zset_range_by_score(
        &self,
        key: &[u8],
        min: f64,
        max: f64,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        sorted_set::range_by_score_in(&self.view, key, min, max, self.taken_at)
    }

    /// Release the snapshot. Dropping it has the same effect.
    pub fn release(self) {}
}
