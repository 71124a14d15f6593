//! Timer entry registration and wall-clock helpers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::encoding::keycode;
use crate::engine::{Batch, Keyspace, Reader};
use crate::error::{Error, Result};
use crate::keyspace::{self, TimerClass};

const TIMER_SEQ_KEY: &[u8] = b"timer-seq";

/// Current Unix time in whole seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Deadline `ttl` from now, rounded up to the next whole second.
pub fn deadline_after(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    unix_now().saturating_add(secs)
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining(deadline: u64) -> Option<Duration> {
    let now = unix_now();
    (deadline > now).then(|| Duration::from_secs(deadline - now))
}

/// Register a timer entry for `meta_key` due at `deadline`.
///
/// Entries are never rewritten in place: changing a deadline registers a new
/// entry and leaves the old one for the sweeper to discard as stale.
pub fn schedule(
    batch: &mut Batch<'_>,
    class: TimerClass,
    deadline: u64,
    meta_key: &[u8],
) -> Result<()> {
    let seq = match batch.get(Keyspace::Bookkeeping, TIMER_SEQ_KEY)? {
        Some(bytes) => keycode::decode_u64(&bytes)?.0 + 1,
        None => 1,
    };
    batch.put(Keyspace::Bookkeeping, TIMER_SEQ_KEY, &keycode::encode_u64(seq))?;

    let timer_key = keyspace::encode_timer(class, deadline, seq);
    if batch.get(Keyspace::Data, &timer_key)?.is_some() {
        return Err(Error::Consistency(format!(
            "timer sequence {seq} already in use"
        )));
    }
    batch.put(Keyspace::Data, &timer_key, meta_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use tempfile::tempdir;

    #[test]
    fn test_deadline_rounds_up() {
        let now = unix_now();
        let deadline = deadline_after(Duration::from_millis(1500));
        assert!(deadline >= now + 2 && deadline <= now + 3);
        assert!(remaining(unix_now().saturating_sub(1)).is_none());
        assert!(remaining(unix_now() + 60).is_some());
    }

    #[test]
    fn test_entries_with_one_deadline_stay_distinct() -> Result<()> {
        let dir = tempdir()?;
        let engine = Engine::open(dir.path(), false)?;

        engine.write(|batch| {
            schedule(batch, TimerClass::Scalar, 100, b"a")?;
            schedule(batch, TimerClass::Scalar, 100, b"b")?;
            schedule(batch, TimerClass::Collection, 50, b"c")
        })?;

        let view = engine.view()?;
        let due = view.scan(
            Keyspace::Data,
            &keyspace::timer_class_prefix(TimerClass::Scalar),
            Some(keyspace::timer_due_bound(TimerClass::Scalar, 100).as_slice()),
            usize::MAX,
        )?;
        let targets: Vec<_> = due.iter().map(|(_, target)| target.as_slice()).collect();
        assert_eq!(targets, vec![&b"a"[..], &b"b"[..]]);

        let not_yet = view.scan(
            Keyspace::Data,
            &keyspace::timer_class_prefix(TimerClass::Scalar),
            Some(keyspace::timer_due_bound(TimerClass::Scalar, 99).as_slice()),
            usize::MAX,
        )?;
        assert!(not_yet.is_empty());
        Ok(())
    }
}
