//! Physical key layout of the data keyspace.
//!
//! ```text
//! meta record      0x01 | kind | esc(key)
//! data record      0x02 | kind | esc(key) | version | selector
//! deletion marker  0x03 | kind | esc(key) | version
//! timer entry      0x04 | class | expiry | seq
//! ```
//!
//! `esc` is the prefix-free escaping from [`keycode`]; integers are big-endian.
//! All data records of one generation share the prefix
//! `0x02 | kind | esc(key) | version`, which is what the deletion sweeper purges.

use crate::encoding::keycode;
use crate::encoding::EncodingError;
use crate::error::Result;

pub const META_TAG: u8 = 0x01;
pub const DATA_TAG: u8 = 0x02;
pub const MARKER_TAG: u8 = 0x03;
pub const TIMER_TAG: u8 = 0x04;

/// Collection type of a logical key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Kv,
    List,
    Map,
    Set,
    SortedSet,
}

impl Kind {
    pub const ALL: [Kind; 5] = [Kind::Kv, Kind::List, Kind::Map, Kind::Set, Kind::SortedSet];

    pub fn tag(self) -> u8 {
        match self {
            Kind::Kv => b'k',
            Kind::List => b'l',
            Kind::Map => b'h',
            Kind::Set => b's',
            Kind::SortedSet => b'z',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'k' => Ok(Kind::Kv),
            b'l' => Ok(Kind::List),
            b'h' => Ok(Kind::Map),
            b's' => Ok(Kind::Set),
            b'z' => Ok(Kind::SortedSet),
            other => Err(EncodingError::UnknownTag(other).into()),
        }
    }

    /// Kinds that own versioned data records. Scalars live entirely in their meta record.
    pub fn is_collection(self) -> bool {
        self != Kind::Kv
    }
}

/// Independent timer index of the TTL sweepers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerClass {
    Collection,
    Scalar,
}

impl TimerClass {
    pub fn tag(self) -> u8 {
        match self {
            TimerClass::Collection => b'c',
            TimerClass::Scalar => b'v',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'c' => Ok(TimerClass::Collection),
            b'v' => Ok(TimerClass::Scalar),
            other => Err(EncodingError::UnknownTag(other).into()),
        }
    }

    pub fn for_kind(kind: Kind) -> Self {
        if kind.is_collection() {
            TimerClass::Collection
        } else {
            TimerClass::Scalar
        }
    }
}

/// A decoded data record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataKey {
    pub kind: Kind,
    pub key: Vec<u8>,
    pub version: u64,
    pub selector: Vec<u8>,
}

/// One generation of a logical key, as referenced by a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub kind: Kind,
    pub key: Vec<u8>,
    pub version: u64,
}

/// A decoded timer entry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerKey {
    pub class: TimerClass,
    pub expiry: u64,
    pub seq: u64,
}

fn header(tag: u8, kind: Kind, key: &[u8], extra: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + key.len() + 2 + extra);
    out.push(tag);
    out.push(kind.tag());
    keycode::escape_into(&mut out, key);
    out
}

fn expect_tag(bytes: &[u8], tag: u8) -> Result<&[u8]> {
    match bytes.first() {
        Some(&t) if t == tag => Ok(&bytes[1..]),
        Some(&other) => Err(EncodingError::UnknownTag(other).into()),
        None => Err(EncodingError::TruncatedData.into()),
    }
}

fn split_kind(bytes: &[u8]) -> Result<(Kind, &[u8])> {
    let (&tag, rest) = bytes.split_first().ok_or(EncodingError::TruncatedData)?;
    Ok((Kind::from_tag(tag)?, rest))
}

fn expect_end(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(EncodingError::InvalidFormat(format!("{} trailing bytes", rest.len())).into())
    }
}

pub fn encode_meta(kind: Kind, key: &[u8]) -> Vec<u8> {
    header(META_TAG, kind, key, 0)
}

pub fn decode_meta(bytes: &[u8]) -> Result<(Kind, Vec<u8>)> {
    let (kind, rest) = split_kind(expect_tag(bytes, META_TAG)?)?;
    let (key, rest) = keycode::unescape(rest)?;
    expect_end(rest)?;
    Ok((kind, key))
}

/// Prefix shared by every data record of one generation.
pub fn encode_data_prefix(kind: Kind, key: &[u8], version: u64) -> Vec<u8> {
    let mut out = header(DATA_TAG, kind, key, 8);
    out.extend_from_slice(&keycode::encode_u64(version));
    out
}

pub fn encode_data(kind: Kind, key: &[u8], version: u64, selector: &[u8]) -> Vec<u8> {
    let mut out = encode_data_prefix(kind, key, version);
    out.extend_from_slice(selector);
    out
}

pub fn decode_data(bytes: &[u8]) -> Result<DataKey> {
    let (kind, rest) = split_kind(expect_tag(bytes, DATA_TAG)?)?;
    let (key, rest) = keycode::unescape(rest)?;
    let (version, selector) = keycode::decode_u64(rest)?;
    Ok(DataKey {
        kind,
        key,
        version,
        selector: selector.to_vec(),
    })
}

pub fn encode_deletion_marker(kind: Kind, key: &[u8], version: u64) -> Vec<u8> {
    let mut out = header(MARKER_TAG, kind, key, 8);
    out.extend_from_slice(&keycode::encode_u64(version));
    out
}

pub fn decode_deletion_marker(bytes: &[u8]) -> Result<Generation> {
    let (kind, rest) = split_kind(expect_tag(bytes, MARKER_TAG)?)?;
    let (key, rest) = keycode::unescape(rest)?;
    let (version, rest) = keycode::decode_u64(rest)?;
    expect_end(rest)?;
    Ok(Generation { kind, key, version })
}

/// Prefix shared by every deletion marker.
pub fn deletion_marker_prefix() -> [u8; 1] {
    [MARKER_TAG]
}

pub fn encode_timer(class: TimerClass, expiry: u64, seq: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(18);
    out.push(TIMER_TAG);
    out.push(class.tag());
    out.extend_from_slice(&keycode::encode_u64(expiry));
    out.extend_from_slice(&keycode::encode_u64(seq));
    out
}

pub fn decode_timer(bytes: &[u8]) -> Result<TimerKey> {
    let rest = expect_tag(bytes, TIMER_TAG)?;
    let (&class, rest) = rest.split_first().ok_or(EncodingError::TruncatedData)?;
    let class = TimerClass::from_tag(class)?;
    let (expiry, rest) = keycode::decode_u64(rest)?;
    let (seq, rest) = keycode::decode_u64(rest)?;
    expect_end(rest)?;
    Ok(TimerKey { class, expiry, seq })
}

/// Prefix shared by every timer entry of `class`.
pub fn timer_class_prefix(class: TimerClass) -> [u8; 2] {
    [TIMER_TAG, class.tag()]
}

/// Exclusive upper bound of the timer entries of `class` due at or before `now`.
pub fn timer_due_bound(class: TimerClass, now: u64) -> Vec<u8> {
    match now.checked_add(1) {
        Some(next) => encode_timer(class, next, 0),
        None => vec![TIMER_TAG, class.tag() + 1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = Kind> {
        prop::sample::select(Kind::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn data_keys_round_trip(
            kind in kind_strategy(),
            key in prop::collection::vec(any::<u8>(), 0..32),
            version in any::<u64>(),
            selector in prop::collection::vec(any::<u8>(), 0..32),
        ) {
            let decoded = decode_data(&encode_data(kind, &key, version, &selector)).unwrap();
            prop_assert_eq!(decoded, DataKey { kind, key: key.clone(), version, selector });

            prop_assert_eq!(decode_meta(&encode_meta(kind, &key)).unwrap(), (kind, key.clone()));

            let marker = encode_deletion_marker(kind, &key, version);
            let generation = decode_deletion_marker(&marker).unwrap();
            prop_assert_eq!(generation, Generation { kind, key, version });
        }

        #[test]
        fn timer_keys_round_trip(expiry in any::<u64>(), seq in any::<u64>()) {
            for class in [TimerClass::Collection, TimerClass::Scalar] {
                let decoded = decode_timer(&encode_timer(class, expiry, seq)).unwrap();
                prop_assert_eq!(decoded, TimerKey { class, expiry, seq });
            }
        }
    }

    #[test]
    fn test_generations_share_a_prefix_that_excludes_other_keys() {
        let prefix = encode_data_prefix(Kind::List, b"queue", 3);
        assert!(encode_data(Kind::List, b"queue", 3, b"x").starts_with(&prefix));
        assert!(!encode_data(Kind::List, b"queue", 4, b"x").starts_with(&prefix));
        assert!(!encode_data(Kind::List, b"queue2", 3, b"x").starts_with(&prefix));
        assert!(!encode_data(Kind::Map, b"queue", 3, b"x").starts_with(&prefix));
    }

    #[test]
    fn test_timers_sort_by_expiry() {
        let early = encode_timer(TimerClass::Scalar, 100, u64::MAX);
        let late = encode_timer(TimerClass::Scalar, 101, 0);
        assert!(early < late);

        let bound = timer_due_bound(TimerClass::Scalar, 100);
        assert!(early < bound);
        assert!(late >= bound);
        assert!(timer_class_prefix(TimerClass::Scalar).as_slice() < early.as_slice());
    }

    #[test]
    fn test_decoders_reject_foreign_keys() {
        let meta = encode_meta(Kind::Set, b"s");
        assert!(decode_data(&meta).is_err());
        assert!(decode_deletion_marker(&meta).is_err());
        assert!(decode_timer(&meta).is_err());
        assert!(decode_meta(&[META_TAG, b'?', 0, 0]).is_err());
        assert!(decode_meta(&[]).is_err());
    }
}
