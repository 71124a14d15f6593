//! Unordered sets of byte members, iterated in member order.

use std::sync::Arc;

use super::{live_meta, Collection, CollectionCore, Meta};
use crate::encoding::keycode;
use crate::engine::{Keyspace, Reader};
use crate::error::Result;
use crate::keyspace::Kind;
use crate::store::Shared;

fn member_key(meta: &Meta, key: &[u8], member: &[u8]) -> Vec<u8> {
    let mut selector = Vec::with_capacity(member.len() + 2);
    keycode::escape_into(&mut selector, member);
    meta.data_key(Kind::Set, key, &selector)
}

pub(crate) fn contains_in(
    reader: &impl Reader,
    key: &[u8],
    member: &[u8],
    now: u64,
) -> Result<bool> {
    match live_meta(reader, Kind::Set, key, now)? {
        Some(meta) => Ok(reader
            .get(Keyspace::Data, &member_key(&meta, key, member))?
            .is_some()),
        None => Ok(false),
    }
}

pub(crate) fn members_in(reader: &impl Reader, key: &[u8], now: u64) -> Result<Vec<Vec<u8>>> {
    let Some(meta) = live_meta(reader, Kind::Set, key, now)? else {
        return Ok(Vec::new());
    };
    let prefix = meta.data_prefix(Kind::Set, key);

    reader
        .scan_prefix(Keyspace::Data, &prefix, usize::MAX)?
        .into_iter()
        .map(|(data_key, _)| -> Result<Vec<u8>> {
            Ok(keycode::unescape(&data_key[prefix.len()..])?.0)
        })
        .collect()
}

pub struct Set {
    core: CollectionCore,
}

impl Set {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            core: CollectionCore::new(Kind::Set, shared),
        }
    }

    /// Add `member`. Returns `true` if it was not already present.
    pub fn add(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.core.mutate(key, |batch, meta| {
            let data_key = member_key(meta, key, member);
            if batch.get(Keyspace::Data, &data_key)?.is_some() {
                return Ok(false);
            }
            batch.put(Keyspace::Data, &data_key, &[])?;
            meta.len += 1;
            Ok(true)
        })
    }

    pub fn remove(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let removed = self.core.mutate_existing(key, |batch, meta| {
            let removed = batch.delete(Keyspace::Data, &member_key(meta, key, member))?;
            if removed {
                meta.len -= 1;
            }
            Ok(removed)
        })?;
        Ok(removed.unwrap_or(false))
    }

    pub fn contains(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.core.read(|view, now| contains_in(view, key, member, now))
    }

    pub fn members(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.core.read(|view, now| members_in(view, key, now))
    }
}

impl Collection for Set {
    fn core(&self) -> &CollectionCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use crate::collections::Collection;
    use crate::error::Result;
    use crate::store::tests::manual_store;
    use tempfile::tempdir;

    #[test]
    fn test_membership() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let set = store.set();

        assert!(set.add(b"tags", b"rust")?);
        assert!(set.add(b"tags", b"db")?);
        assert!(!set.add(b"tags", b"rust")?);
        assert_eq!(set.len(b"tags")?, 2);
        assert_eq!(set.members(b"tags")?, vec![b"db".to_vec(), b"rust".to_vec()]);

        assert!(set.remove(b"tags", b"db")?);
        assert!(!set.remove(b"tags", b"db")?);
        assert!(set.contains(b"tags", b"rust")?);
        assert!(!set.contains(b"tags", b"db")?);
        assert!(!set.contains(b"none", b"rust")?);
        Ok(())
    }

    #[test]
    fn test_create_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let set = store.set();

        assert_eq!(set.create(b"s")?, 1);
        assert_eq!(set.create(b"s")?, 1);
        assert!(set.exists(b"s")?);
        assert_eq!(set.len(b"s")?, 0);
        Ok(())
    }
}
