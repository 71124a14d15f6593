//! Thin wrapper around the ordered key-value engine.
//!
//! The store uses two keyspaces (redb tables) in one file:
//! - `bookkeeping`: format marker, version counters, timer sequence
//! - `default`: meta records, data records, deletion markers, timer entries
//!
//! Writes go through [`Engine::write`], which runs a closure against a [`Batch`]
//! and commits it atomically. Reads go through a [`View`], a read transaction
//! pinned to the state at the moment it was opened.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use redb::{
    Database, Durability, ReadOnlyTable, ReadTransaction, ReadableTable, Table, TableDefinition,
};

use crate::encoding::keycode;
use crate::error::{Error, Result};

/// Engine file inside the store directory.
pub const ENGINE_FILE: &str = "plydb.redb";

const BOOKKEEPING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("bookkeeping");
const DATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("default");

/// Rows copied per write transaction when building a checkpoint.
const CHECKPOINT_CHUNK: usize = 4096;

type Row = (Vec<u8>, Vec<u8>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyspace {
    Bookkeeping,
    Data,
}

/// Read access shared by write batches and read views.
pub trait Reader {
    fn get(&self, ks: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Rows with `start <= key < end` (or unbounded above), at most `limit` of them.
    fn scan(
        &self,
        ks: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Row>>;

    /// Rows whose key starts with `prefix`, at most `limit` of them.
    fn scan_prefix(&self, ks: Keyspace, prefix: &[u8], limit: usize) -> Result<Vec<Row>> {
        let end = keycode::prefix_end(prefix);
        self.scan(ks, prefix, end.as_deref(), limit)
    }
}

fn collect_range<T>(table: &T, start: &[u8], end: Option<&[u8]>, limit: usize) -> Result<Vec<Row>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut rows = Vec::new();
    if limit == 0 {
        return Ok(rows);
    }

    let iter = match end {
        Some(end) => table.range(start..end)?,
        None => table.range(start..)?,
    };
    for item in iter {
        let (key, value) = item?;
        rows.push((key.value().to_vec(), value.value().to_vec()));
        if rows.len() >= limit {
            break;
        }
    }
    Ok(rows)
}

/// Handle to the engine file. Shared by foreground callers and sweepers.
pub struct Engine {
    path: PathBuf,
    transactional: bool,
    db: RwLock<Option<Database>>,
}

impl Engine {
    /// Open (or create) the engine inside `dir`, creating both keyspaces.
    pub fn open(dir: &Path, transactional: bool) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(ENGINE_FILE);
        let db = Database::create(&path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(BOOKKEEPING)?;
            txn.open_table(DATA)?;
        }
        txn.commit()?;

        Ok(Self {
            path,
            transactional,
            db: RwLock::new(Some(db)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.db.read().is_none()
    }

    /// Run `f` inside one write transaction.
    ///
    /// The transaction commits only when `f` returns `Ok`; on error it is
    /// aborted and nothing `f` wrote becomes visible.
    pub fn write<T>(&self, f: impl FnOnce(&mut Batch<'_>) -> Result<T>) -> Result<T> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(Error::Closed)?;

        let mut txn = db.begin_write()?;
        if !self.transactional {
            txn.set_durability(Durability::Eventual);
        }

        let out = {
            let mut batch = Batch {
                bookkeeping: txn.open_table(BOOKKEEPING)?,
                data: txn.open_table(DATA)?,
            };
            f(&mut batch)?
        };
        txn.commit()?;
        Ok(out)
    }

    /// Open a read view pinned to the latest committed state.
    pub fn view(&self) -> Result<View> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(Error::Closed)?;
        View::new(db.begin_read()?)
    }

    /// Write a consistent copy of both keyspaces to `dir/plydb.redb`.
    ///
    /// The copy is taken from a single read view, so writers committing while
    /// the checkpoint is built are neither blocked nor included.
    pub fn checkpoint(&self, dir: &Path) -> Result<PathBuf> {
        let view = self.view()?;
        fs::create_dir_all(dir)?;
        let target_path = dir.join(ENGINE_FILE);
        let target = Database::create(&target_path)?;

        for (ks, definition) in [(Keyspace::Bookkeeping, BOOKKEEPING), (Keyspace::Data, DATA)] {
            let txn = target.begin_write()?;
            txn.open_table(definition)?;
            txn.commit()?;

            let mut cursor: Vec<u8> = Vec::new();
            loop {
                let rows = view.scan(ks, &cursor, None, CHECKPOINT_CHUNK)?;
                let Some((last, _)) = rows.last() else {
                    break;
                };
                cursor = keycode::successor(last);

                let txn = target.begin_write()?;
                {
                    let mut table = txn.open_table(definition)?;
                    for (key, value) in &rows {
                        table.insert(key.as_slice(), value.as_slice())?;
                    }
                }
                txn.commit()?;

                if rows.len() < CHECKPOINT_CHUNK {
                    break;
                }
            }
        }

        Ok(target_path)
    }

    /// Flush pending commits and release the engine file.
    ///
    /// Waits for in-flight reads and writes holding the handle. Returns `false`
    /// if the engine was already closed.
    pub fn close(&self) -> Result<bool> {
        let Some(db) = self.db.write().take() else {
            return Ok(false);
        };

        if !self.transactional {
            // An immediate commit persists every earlier eventual commit.
            let txn = db.begin_write()?;
            txn.commit()?;
        }
        drop(db);
        Ok(true)
    }
}

/// Mutable access to both keyspaces inside one write transaction.
pub struct Batch<'txn> {
    bookkeeping: Table<'txn, &'static [u8], &'static [u8]>,
    data: Table<'txn, &'static [u8], &'static [u8]>,
}

impl<'txn> Batch<'txn> {
    fn table(&self, ks: Keyspace) -> &Table<'txn, &'static [u8], &'static [u8]> {
        match ks {
            Keyspace::Bookkeeping => &self.bookkeeping,
            Keyspace::Data => &self.data,
        }
    }

    fn table_mut(&mut self, ks: Keyspace) -> &mut Table<'txn, &'static [u8], &'static [u8]> {
        match ks {
            Keyspace::Bookkeeping => &mut self.bookkeeping,
            Keyspace::Data => &mut self.data,
        }
    }

    pub fn put(&mut self, ks: Keyspace, key: &[u8], value: &[u8]) -> Result<()> {
        self.table_mut(ks).insert(key, value)?;
        Ok(())
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&mut self, ks: Keyspace, key: &[u8]) -> Result<bool> {
        let existed = self.table_mut(ks).remove(key)?.is_some();
        Ok(existed)
    }

    /// Remove up to `limit` keys starting with `prefix`, returning how many were removed.
    pub fn delete_prefix(&mut self, ks: Keyspace, prefix: &[u8], limit: usize) -> Result<usize> {
        let rows = self.scan_prefix(ks, prefix, limit)?;
        for (key, _) in &rows {
            self.delete(ks, key)?;
        }
        Ok(rows.len())
    }
}

impl Reader for Batch<'_> {
    fn get(&self, ks: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.table(ks).get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan(
        &self,
        ks: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Row>> {
        collect_range(self.table(ks), start, end, limit)
    }
}

/// Read-only, point-in-time access to both keyspaces.
pub struct View {
    bookkeeping: ReadOnlyTable<&'static [u8], &'static [u8]>,
    data: ReadOnlyTable<&'static [u8], &'static [u8]>,
    _txn: ReadTransaction,
}

impl View {
    fn new(txn: ReadTransaction) -> Result<Self> {
        Ok(Self {
            bookkeeping: txn.open_table(BOOKKEEPING)?,
            data: txn.open_table(DATA)?,
            _txn: txn,
        })
    }

    fn table(&self, ks: Keyspace) -> &ReadOnlyTable<&'static [u8], &'static [u8]> {
        match ks {
            Keyspace::Bookkeeping => &self.bookkeeping,
            Keyspace::Data => &self.data,
        }
    }

    /// Count the keys in `[start, end)` without materialising them.
    pub fn count(&self, ks: Keyspace, start: &[u8], end: Option<&[u8]>) -> Result<u64> {
        let table = self.table(ks);
        let iter = match end {
            Some(end) => table.range(start..end)?,
            None => table.range(start..)?,
        };
        let mut count = 0;
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

impl Reader for View {
    fn get(&self, ks: Keyspace, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let value = self.table(ks).get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn scan(
        &self,
        ks: Keyspace,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<Row>> {
        collect_range(self.table(ks), start, end, limit)
    }
}
