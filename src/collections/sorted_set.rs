//! Sorted sets: members ranked by an `f64` score.
//!
//! Each member has two data records in its generation:
//!
//! ```text
//! m | esc(member)                 -> score
//! s | ordered(score) | esc(member) -> (empty)
//! ```
//!
//! The first answers point lookups, the second serves score ranges in order.

use std::sync::Arc;

use super::{live_meta, Collection, CollectionCore, Meta};
use crate::encoding::keycode;
use crate::engine::{Batch, Keyspace, Reader};
use crate::error::{Error, Result};
use crate::keyspace::Kind;
use crate::store::Shared;

const MEMBER_INDEX: u8 = b'm';
const SCORE_INDEX: u8 = b's';

fn member_key(meta: &Meta, key: &[u8], member: &[u8]) -> Vec<u8> {
    let mut selector = Vec::with_capacity(member.len() + 3);
    selector.push(MEMBER_INDEX);
    keycode::escape_into(&mut selector, member);
    meta.data_key(Kind::SortedSet, key, &selector)
}

fn score_prefix(meta: &Meta, key: &[u8], score: f64) -> Vec<u8> {
    let mut selector = Vec::with_capacity(9);
    selector.push(SCORE_INDEX);
    selector.extend_from_slice(&keycode::encode_f64(score));
    meta.data_key(Kind::SortedSet, key, &selector)
}

fn score_key(meta: &Meta, key: &[u8], score: f64, member: &[u8]) -> Vec<u8> {
    let mut out = score_prefix(meta, key, score);
    keycode::escape_into(&mut out, member);
    out
}

fn decode_score(bytes: &[u8]) -> Result<f64> {
    let (score, rest) = keycode::decode_f64(bytes)?;
    if !rest.is_empty() {
        return Err(Error::Consistency("sorted set score has trailing bytes".into()));
    }
    Ok(score)
}

/// Reject NaN and fold `-0.0` onto `0.0` so equal scores encode equally.
fn check_score(score: f64) -> Result<f64> {
    if score.is_nan() {
        return Err(Error::InvalidArgument("sorted set score is NaN".into()));
    }
    Ok(if score == 0.0 { 0.0 } else { score })
}

fn stored_score(
    reader: &impl Reader,
    meta: &Meta,
    key: &[u8],
    member: &[u8],
) -> Result<Option<f64>> {
    match reader.get(Keyspace::Data, &member_key(meta, key, member))? {
        Some(bytes) => Ok(Some(decode_score(&bytes)?)),
        None => Ok(None),
    }
}

pub(crate) fn score_in(
    reader: &impl Reader,
    key: &[u8],
    member: &[u8],
    now: u64,
) -> Result<Option<f64>> {
    match live_meta(reader, Kind::SortedSet, key, now)? {
        Some(meta) => stored_score(reader, &meta, key, member),
        None => Ok(None),
    }
}

/// Members with `min <= score <= max`, by ascending score then member.
pub(crate) fn range_by_score_in(
    reader: &impl Reader,
    key: &[u8],
    min: f64,
    max: f64,
    now: u64,
) -> Result<Vec<(Vec<u8>, f64)>> {
    let min = check_score(min)?;
    let max = check_score(max)?;
    let Some(meta) = live_meta(reader, Kind::SortedSet, key, now)? else {
        return Ok(Vec::new());
    };
    if min > max {
        return Ok(Vec::new());
    }

    let from = score_prefix(&meta, key, min);
    let to = keycode::prefix_end(&score_prefix(&meta, key, max));
    let index_start = score_prefix(&meta, key, f64::NEG_INFINITY).len() - 8;

    reader
        .scan(Keyspace::Data, &from, to.as_deref(), usize::MAX)?
        .into_iter()
        .map(|(data_key, _)| -> Result<(Vec<u8>, f64)> {
            let (score, rest) = keycode::decode_f64(&data_key[index_start..])?;
            let (member, _) = keycode::unescape(rest)?;
            Ok((member, score))
        })
        .collect()
}

fn unlink(batch: &mut Batch<'_>, meta: &Meta, key: &[u8], member: &[u8], score: f64) -> Result<()> {
    batch.delete(Keyspace::Data, &member_key(meta, key, member))?;
    if !batch.delete(Keyspace::Data, &score_key(meta, key, score, member))? {
        return Err(Error::Consistency(format!(
            "sorted set member {:?} has no score index entry",
            String::from_utf8_lossy(member)
        )));
    }
    Ok(())
}

pub struct SortedSet {
    core: CollectionCore,
}

impl SortedSet {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            core: CollectionCore::new(Kind::SortedSet, shared),
        }
    }

    /// Add `member` or update its score. Returns `true` if the member is new.
    pub fn add(&self, key: &[u8], member: &[u8], score: f64) -> Result<bool> {
        let score = check_score(score)?;
        self.core.mutate(key, |batch, meta| {
            let previous = stored_score(batch, meta, key, member)?;
            if let Some(previous) = previous {
                unlink(batch, meta, key, member, previous)?;
            }

            batch.put(
                Keyspace::Data,
                &member_key(meta, key, member),
                &keycode::encode_f64(score),
            )?;
            batch.put(Keyspace::Data, &score_key(meta, key, score, member), &[])?;

            if previous.is_none() {
                meta.len += 1;
            }
            Ok(previous.is_none())
        })
    }

    pub fn score(&self, key: &[u8], member: &[u8]) -> Result<Option<f64>> {
        self.core.read(|view, now| score_in(view, key, member, now))
    }

    pub fn remove(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let removed = self.core.mutate_existing(key, |batch, meta| {
            let Some(score) = stored_score(batch, meta, key, member)? else {
                return Ok(false);
            };
            unlink(batch, meta, key, member, score)?;
            meta.len -= 1;
            Ok(true)
        })?;
        Ok(removed.unwrap_or(false))
    }

    pub fn range_by_score(&self, key: &[u8], min: f64, max: f64) -> Result<Vec<(Vec<u8>, f64)>> {
        self.core
            .read(|view, now| range_by_score_in(view, key, min, max, now))
    }
}

impl Collection for SortedSet {
    fn core(&self) -> &CollectionCore {
        &self.core
    }
}
