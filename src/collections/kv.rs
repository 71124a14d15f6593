//! Scalar key-value entries.
//!
//! A scalar has no generations: its value and deadline live together in the
//! record at its meta key, so overwriting or deleting it never leaves data
//! behind for the deletion sweeper.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::Value;
use crate::engine::{Batch, Keyspace, Reader};
use crate::error::Result;
use crate::keyspace::{self, Kind, TimerClass};
use crate::store::Shared;
use crate::timer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KvRecord {
    value: Vec<u8>,
    expires_at: Option<u64>,
}

impl KvRecord {
    fn is_expired(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

fn read_record(reader: &impl Reader, key: &[u8]) -> Result<Option<KvRecord>> {
    match reader.get(Keyspace::Data, &keyspace::encode_meta(Kind::Kv, key))? {
        Some(bytes) => Ok(Some(KvRecord::decode(&bytes)?)),
        None => Ok(None),
    }
}

fn live_record(reader: &impl Reader, key: &[u8], now: u64) -> Result<Option<KvRecord>> {
    Ok(read_record(reader, key)?.filter(|record| !record.is_expired(now)))
}

fn put_record(batch: &mut Batch<'_>, key: &[u8], record: &KvRecord) -> Result<()> {
    batch.put(
        Keyspace::Data,
        &keyspace::encode_meta(Kind::Kv, key),
        &record.encode()?,
    )
}

pub(crate) fn get_in(reader: &impl Reader, key: &[u8], now: u64) -> Result<Option<Vec<u8>>> {
    Ok(live_record(reader, key, now)?.map(|record| record.value))
}

pub(crate) fn expire_if_still_due(
    batch: &mut Batch<'_>,
    key: &[u8],
    deadline: u64,
) -> Result<bool> {
    match read_record(batch, key)? {
        Some(record) if record.expires_at == Some(deadline) => {
            batch.delete(Keyspace::Data, &keyspace::encode_meta(Kind::Kv, key))?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Scalar front end. Values are opaque bytes.
pub struct Kv {
    shared: Arc<Shared>,
}

impl Kv {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    fn write<T>(
        &self,
        key: &[u8],
        f: impl FnOnce(&mut Batch<'_>, Option<KvRecord>) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.shared.locks.acquire(Kind::Kv, key);
        self.shared.engine.write(|batch| {
            let record = live_record(batch, key, timer::unix_now())?;
            f(batch, record)
        })
    }

    /// Store `value`, clearing any TTL the key had.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(key, |batch, _| {
            put_record(
                batch,
                key,
                &KvRecord {
                    value: value.to_vec(),
                    expires_at: None,
                },
            )
        })
    }

    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let deadline = timer::deadline_after(ttl);
        let meta_key = keyspace::encode_meta(Kind::Kv, key);
        self.write(key, |batch, _| {
            put_record(
                batch,
                key,
                &KvRecord {
                    value: value.to_vec(),
                    expires_at: Some(deadline),
                },
            )?;
            timer::schedule(batch, TimerClass::Scalar, deadline, &meta_key)
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let view = self.shared.engine.view()?;
        get_in(&view, key, timer::unix_now())
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let meta_key = keyspace::encode_meta(Kind::Kv, key);
        let _guard = self.shared.locks.acquire(Kind::Kv, key);
        self.shared.engine.write(|batch| {
            let live = live_record(batch, key, timer::unix_now())?.is_some();
            // An expired record is removed too; it is simply not reported.
            batch.delete(Keyspace::Data, &meta_key)?;
            Ok(live)
        })
    }

    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<bool> {
        self.expire_at(key, timer::deadline_after(ttl))
    }

    pub fn expire_at(&self, key: &[u8], deadline: u64) -> Result<bool> {
        let meta_key = keyspace::encode_meta(Kind::Kv, key);
        self.write(key, |batch, record| {
            let Some(mut record) = record else {
                return Ok(false);
            };
            if record.expires_at != Some(deadline) {
                record.expires_at = Some(deadline);
                put_record(batch, key, &record)?;
                timer::schedule(batch, TimerClass::Scalar, deadline, &meta_key)?;
            }
            Ok(true)
        })
    }

    pub fn persist(&self, key: &[u8]) -> Result<bool> {
        self.write(key, |batch, record| match record {
            Some(mut record) if record.expires_at.is_some() => {
                record.expires_at = None;
                put_record(batch, key, &record)?;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    /// Time left before the key expires, `None` for a missing or persistent key.
    pub fn ttl(&self, key: &[u8]) -> Result<Option<Duration>> {
        let view = self.shared.engine.view()?;
        let record = live_record(&view, key, timer::unix_now())?;
        Ok(record
            .and_then(|record| record.expires_at)
            .and_then(timer::remaining))
    }
}
