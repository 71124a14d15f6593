//! Double-ended lists.
//!
//! Elements live at `[head, tail)` of the generation, keyed by their absolute
//! position as an order-preserving `i64`. Pushing to the front moves `head`
//! below zero, which still sorts first.

use std::sync::Arc;

use super::{live_meta, Collection, CollectionCore, Meta};
use crate::encoding::keycode;
use crate::engine::{Batch, Keyspace, Reader};
use crate::error::{Error, Result};
use crate::keyspace::Kind;
use crate::store::Shared;

fn element_key(meta: &Meta, key: &[u8], position: i64) -> Vec<u8> {
    meta.data_key(Kind::List, key, &keycode::encode_i64(position))
}

/// Absolute position of `index`, counting from the end when negative.
fn position(meta: &Meta, index: i64) -> Option<i64> {
    let len = meta.len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then(|| meta.head + index)
}

fn missing_element(key: &[u8], position: i64) -> Error {
    Error::Consistency(format!(
        "list {:?} has no element at position {position}",
        String::from_utf8_lossy(key)
    ))
}

pub(crate) fn get_in(
    reader: &impl Reader,
    key: &[u8],
    index: i64,
    now: u64,
) -> Result<Option<Vec<u8>>> {
    let Some(meta) = live_meta(reader, Kind::List, key, now)? else {
        return Ok(None);
    };
    let Some(position) = position(&meta, index) else {
        return Ok(None);
    };
    reader
        .get(Keyspace::Data, &element_key(&meta, key, position))?
        .map(Some)
        .ok_or_else(|| missing_element(key, position))
}

/// Elements `start..=stop`, both counted from the end when negative.
pub(crate) fn range_in(
    reader: &impl Reader,
    key: &[u8],
    start: i64,
    stop: i64,
    now: u64,
) -> Result<Vec<Vec<u8>>> {
    let Some(meta) = live_meta(reader, Kind::List, key, now)? else {
        return Ok(Vec::new());
    };
    let len = meta.len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if start >= len || start > stop {
        return Ok(Vec::new());
    }

    let from = element_key(&meta, key, meta.head + start);
    let to = element_key(&meta, key, meta.head + stop + 1);
    let rows = reader.scan(Keyspace::Data, &from, Some(to.as_slice()), usize::MAX)?;

    let expected = (stop - start + 1) as usize;
    if rows.len() != expected {
        return Err(Error::Consistency(format!(
            "list {:?} range holds {} of {expected} elements",
            String::from_utf8_lossy(key),
            rows.len()
        )));
    }
    Ok(rows.into_iter().map(|(_, value)| value).collect())
}

fn pop_at(
    batch: &mut Batch<'_>,
    meta: &mut Meta,
    key: &[u8],
    front: bool,
) -> Result<Option<Vec<u8>>> {
    if meta.len == 0 {
        return Ok(None);
    }

    let position = if front { meta.head } else { meta.tail - 1 };
    let element = element_key(meta, key, position);
    let value = batch
        .get(Keyspace::Data, &element)?
        .ok_or_else(|| missing_element(key, position))?;
    batch.delete(Keyspace::Data, &element)?;

    if front {
        meta.head += 1;
    } else {
        meta.tail -= 1;
    }
    meta.len -= 1;
    if meta.len == 0 {
        meta.head = 0;
        meta.tail = 0;
    }
    Ok(Some(value))
}

pub struct List {
    core: CollectionCore,
}

impl List {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            core: CollectionCore::new(Kind::List, shared),
        }
    }

    /// Append `value`, returning the new length.
    pub fn push_back(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.core.mutate(key, |batch, meta| {
            batch.put(Keyspace::Data, &element_key(meta, key, meta.tail), value)?;
            meta.tail += 1;
            meta.len += 1;
            Ok(meta.len)
        })
    }

    /// Prepend `value`, returning the new length.
    pub fn push_front(&self, key: &[u8], value: &[u8]) -> Result<u64> {
        self.core.mutate(key, |batch, meta| {
            meta.head -= 1;
            batch.put(Keyspace::Data, &element_key(meta, key, meta.head), value)?;
            meta.len += 1;
            Ok(meta.len)
        })
    }

    pub fn pop_front(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let popped = self
            .core
            .mutate_existing(key, |batch, meta| pop_at(batch, meta, key, true))?;
        Ok(popped.flatten())
    }

    pub fn pop_back(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let popped = self
            .core
            .mutate_existing(key, |batch, meta| pop_at(batch, meta, key, false))?;
        Ok(popped.flatten())
    }

    pub fn get(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        self.core.read(|view, now| get_in(view, key, index, now))
    }

    pub fn range(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        self.core.read(|view, now| range_in(view, key, start, stop, now))
    }
}

impl Collection for List {
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

    fn values(items: &[&str]) -> Vec<Vec<u8>> {
        items.iter().map(|item| item.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_push_pop_both_ends() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let list = store.list();

        assert_eq!(list.push_back(b"q", b"b")?, 1);
        assert_eq!(list.push_back(b"q", b"c")?, 2);
        assert_eq!(list.push_front(b"q", b"a")?, 3);
        assert_eq!(list.range(b"q", 0, -1)?, values(&["a", "b", "c"]));

        assert_eq!(list.pop_front(b"q")?, Some(b"a".to_vec()));
        assert_eq!(list.pop_back(b"q")?, Some(b"c".to_vec()));
        assert_eq!(list.pop_back(b"q")?, Some(b"b".to_vec()));
        assert_eq!(list.pop_back(b"q")?, None);

        // An emptied list keeps its generation until deleted.
        assert!(list.exists(b"q")?);
        assert_eq!(list.len(b"q")?, 0);
        assert_eq!(list.pop_front(b"missing")?, None);
        assert!(!list.exists(b"missing")?);
        Ok(())
    }

    #[test]
    fn test_indexing_and_ranges() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let list = store.list();

        for item in ["c", "d", "e"] {
            list.push_back(b"l", item.as_bytes())?;
        }
        for item in ["b", "a"] {
            list.push_front(b"l", item.as_bytes())?;
        }

        assert_eq!(list.get(b"l", 0)?, Some(b"a".to_vec()));
        assert_eq!(list.get(b"l", -1)?, Some(b"e".to_vec()));
        assert_eq!(list.get(b"l", 5)?, None);
        assert_eq!(list.get(b"l", -6)?, None);

        assert_eq!(list.range(b"l", 1, 3)?, values(&["b", "c", "d"]));
        assert_eq!(list.range(b"l", -2, 100)?, values(&["d", "e"]));
        assert_eq!(list.range(b"l", -100, 0)?, values(&["a"]));
        assert!(list.range(b"l", 3, 1)?.is_empty());
        assert!(list.range(b"l", 9, 12)?.is_empty());
        assert!(list.range(b"nope", 0, -1)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_delete_starts_a_new_generation() -> Result<()> {
        let dir = tempdir()?;
        let store = manual_store(dir.path())?;
        let list = store.list();

        list.push_back(b"q", b"old")?;
        assert_eq!(list.meta(b"q")?.map(|meta| meta.version), Some(1));

        assert!(list.delete(b"q")?);
        assert!(!list.delete(b"q")?);
        assert!(list.range(b"q", 0, -1)?.is_empty());

        // Re-created before the sweeper ran: old records stay invisible.
        list.push_back(b"q", b"new")?;
        assert_eq!(list.meta(b"q")?.map(|meta| meta.version), Some(2));
        assert_eq!(list.range(b"q", 0, -1)?, values(&["new"]));
        Ok(())
    }
}
