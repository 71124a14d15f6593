//! Hash maps of byte fields to byte values.

use std::sync::Arc;

use super::{live_meta, Collection, CollectionCore, Meta};
use crate::encoding::keycode;
use crate::engine::{Keyspace, Reader};
use crate::error::Result;
use crate::keyspace::Kind;
use crate::store::Shared;

fn field_key(meta: &Meta, key: &[u8], field: &[u8]) -> Vec<u8> {
    let mut selector = Vec::with_capacity(field.len() + 2);
    keycode::escape_into(&mut selector, field);
    meta.data_key(Kind::Map, key, &selector)
}

pub(crate) fn get_in(
    reader: &impl Reader,
    key: &[u8],
    field: &[u8],
    now: u64,
) -> Result<Option<Vec<u8>>> {
    match live_meta(reader, Kind::Map, key, now)? {
        Some(meta) => reader.get(Keyspace::Data, &field_key(&meta, key, field)),
        None => Ok(None),
    }
}

/// Every field and value, in field order.
pub(crate) fn entries_in(
    reader: &impl Reader,
    key: &[u8],
    now: u64,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let Some(meta) = live_meta(reader, Kind::Map, key, now)? else {
        return Ok(Vec::new());
    };
    let prefix = meta.data_prefix(Kind::Map, key);

    reader
        .scan_prefix(Keyspace::Data, &prefix, usize::MAX)?
        .into_iter()
        .map(|(data_key, value)| -> Result<(Vec<u8>, Vec<u8>)> {
            let (field, _) = keycode::unescape(&data_key[prefix.len()..])?;
            Ok((field, value))
        })
        .collect()
}

pub struct Map {
    core: CollectionCore,
}

impl Map {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            core: CollectionCore::new(Kind::Map, shared),
        }
    }

    /// Set `field` to `value`. Returns `true` if the field is new.
    pub fn put(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.core.mutate(key, |batch, meta| {
            let data_key = field_key(meta, key, field);
            let added = batch.get(Keyspace::Data, &data_key)?.is_none();
            batch.put(Keyspace::Data, &data_key, value)?;
            if added {
                meta.len += 1;
            }
            Ok(added)
        })
    }

    pub fn get(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        self.core.read(|view, now| get_in(view, key, field, now))
    }

    pub fn contains(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        Ok(self.get(key, field)?.is_some())
    }

    /// Remove `field`. Returns `true` if it was present.
    pub fn remove(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let removed = self.core.mutate_existing(key, |batch, meta| {
            let removed = batch.delete(Keyspace::Data, &field_key(meta, key, field))?;
            if removed {
                meta.len -= 1;
            }
            Ok(removed)
        })?;
        Ok(removed.unwrap_or(false))
    }

    pub fn entries(&self, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.core.read(|view, now| entries_in(view, key, now))
    }
}

impl Collection for Map {
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
    fn test_put_get_remove() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let map = store.map();

        assert!(map.put(b"user", b"name", b"ada")?);
        assert!(!map.put(b"user", b"name", b"grace")?);
        assert!(map.put(b"user", b"lang", b"cobol")?);
        assert_eq!(map.len(b"user")?, 2);
        assert_eq!(map.get(b"user", b"name")?, Some(b"grace".to_vec()));

        assert!(map.remove(b"user", b"lang")?);
        assert!(!map.remove(b"user", b"lang")?);
        assert!(!map.remove(b"ghost", b"lang")?);
        assert!(!map.contains(b"user", b"lang")?);
        assert_eq!(map.len(b"user")?, 1);
        Ok(())
    }

    #[test]
    fn test_entries_are_field_ordered_and_scoped_to_the_key() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let map = store.map();

        map.put(b"m", b"b", b"2")?;
        map.put(b"m", b"a\x00z", b"1")?;
        map.put(b"m", b"c", b"3")?;
        map.put(b"m2", b"a", b"other")?;

        let fields: Vec<Vec<u8>> = map.entries(b"m")?.into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec![b"a\x00z".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(map.entries(b"m2")?.len(), 1);
        assert!(map.entries(b"none")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_recreated_map_does_not_see_old_fields() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let map = store.map();

        map.put(b"m", b"old", b"1")?;
        map.delete(b"m")?;
        assert!(map.put(b"m", b"new", b"2")?);
        assert_eq!(map.get(b"m", b"old")?, None);
        assert_eq!(map.entries(b"m")?.len(), 1);
        Ok(())
    }
}
