//! Per-key generation numbers.
//!
//! The last version issued for a logical key lives in the bookkeeping keyspace
//! under `v | meta-key`. It is bumped inside the same write batch as the
//! mutation that consumes it and survives deletion of the key, so a deleted and
//! re-created collection never reuses a version.

use crate::encoding::keycode;
use crate::engine::{Batch, Keyspace, Reader};
use crate::error::{Error, Result};
use crate::keyspace::{self, Kind};
use crate::lock::SegmentGuard;

const COUNTER_TAG: u8 = b'v';

fn counter_key(kind: Kind, key: &[u8]) -> Vec<u8> {
    let meta_key = keyspace::encode_meta(kind, key);
    let mut out = Vec::with_capacity(1 + meta_key.len());
    out.push(COUNTER_TAG);
    out.extend_from_slice(&meta_key);
    out
}

fn decode_counter(bytes: &[u8]) -> Result<u64> {
    let (version, rest) = keycode::decode_u64(bytes)?;
    if !rest.is_empty() {
        return Err(Error::Consistency(format!(
            "version counter has {} trailing bytes",
            rest.len()
        )));
    }
    Ok(version)
}

#[derive(Debug, Default)]
pub struct VersionSequence;

impl VersionSequence {
    pub fn new() -> Self {
        Self
    }

    /// Mint the next version of `kind`/`key` inside `batch`.
    ///
    /// `guard` must be the caller's hold on the key's segment; the counter is
    /// only consistent if bumps of one key never interleave.
    pub fn next_version(
        &self,
        guard: &SegmentGuard,
        batch: &mut Batch<'_>,
        kind: Kind,
        key: &[u8],
    ) -> Result<u64> {
        if !guard.covers(kind, key) {
            return Err(Error::Consistency(format!(
                "version bump of {kind:?} key without holding its segment {}",
                guard.segment()
            )));
        }

        let counter = counter_key(kind, key);
        let last = match batch.get(Keyspace::Bookkeeping, &counter)? {
            Some(bytes) => decode_counter(&bytes)?,
            None => 0,
        };
        let next = last
            .checked_add(1)
            .ok_or_else(|| Error::Consistency("version counter exhausted".into()))?;

        batch.put(Keyspace::Bookkeeping, &counter, &keycode::encode_u64(next))?;
        Ok(next)
    }

    /// Last version issued for `kind`/`key`, zero if none.
    pub fn current(&self, reader: &impl Reader, kind: Kind, key: &[u8]) -> Result<u64> {
        match reader.get(Keyspace::Bookkeeping, &counter_key(kind, key))? {
            Some(bytes) => decode_counter(&bytes),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::lock::KeySegmentLockManager;
    use tempfile::tempdir;

    #[test]
    fn test_versions_are_per_key_and_monotonic() -> Result<()> {
        let dir = tempdir()?;
        let engine = Engine::open(dir.path(), false)?;
        let locks = KeySegmentLockManager::new(16);
        let sequence = VersionSequence::new();

        for expected in 1..=3 {
            let guard = locks.acquire(Kind::List, b"a");
            let version =
                engine.write(|batch| sequence.next_version(&guard, batch, Kind::List, b"a"))?;
            assert_eq!(version, expected);
        }

        let guard = locks.acquire(Kind::Map, b"a");
        let version = engine.write(|batch| sequence.next_version(&guard, batch, Kind::Map, b"a"))?;
        assert_eq!(version, 1);

        let view = engine.view()?;
        assert_eq!(sequence.current(&view, Kind::List, b"a")?, 3);
        assert_eq!(sequence.current(&view, Kind::Set, b"a")?, 0);
        Ok(())
    }

    #[test]
    fn test_aborted_batch_does_not_consume_a_version() -> Result<()> {
        let dir = tempdir()?;
        let engine = Engine::open(dir.path(), true)?;
        let locks = KeySegmentLockManager::new(16);
        let sequence = VersionSequence::new();
        let guard = locks.acquire(Kind::Set, b"s");

        let aborted: Result<u64> = engine.write(|batch| {
            sequence.next_version(&guard, batch, Kind::Set, b"s")?;
            Err(Error::InvalidArgument("abort".into()))
        });
        assert!(aborted.is_err());

        let version = engine.write(|batch| sequence.next_version(&guard, batch, Kind::Set, b"s"))?;
        assert_eq!(version, 1);
        Ok(())
    }

    #[test]
    fn test_versions_survive_reopen() -> Result<()> {
        let dir = tempdir()?;
        let locks = KeySegmentLockManager::new(16);
        let sequence = VersionSequence::new();

        {
            let engine = Engine::open(dir.path(), false)?;
            let guard = locks.acquire(Kind::SortedSet, b"z");
            engine.write(|batch| sequence.next_version(&guard, batch, Kind::SortedSet, b"z"))?;
            engine.close()?;
        }

        let engine = Engine::open(dir.path(), false)?;
        let guard = locks.acquire(Kind::SortedSet, b"z");
        let version =
            engine.write(|batch| sequence.next_version(&guard, batch, Kind::SortedSet, b"z"))?;
        assert_eq!(version, 2);
        Ok(())
    }

    #[test]
    fn test_bump_requires_the_keys_segment() -> Result<()> {
        let dir = tempdir()?;
        let engine = Engine::open(dir.path(), false)?;
        let locks = KeySegmentLockManager::new(1024);
        let sequence = VersionSequence::new();

        let guard = locks.acquire(Kind::List, b"mine");
        let foreign = (0..100u32)
            .map(|i| format!("other:{i}"))
            .find(|key| !guard.covers(Kind::List, key.as_bytes()))
            .unwrap();

        let result = engine.write(|batch| {
            sequence.next_version(&guard, batch, Kind::List, foreign.as_bytes())
        });
        assert!(matches!(result, Err(Error::Consistency(_))));
        Ok(())
    }
}
