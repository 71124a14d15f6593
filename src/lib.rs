//! Embedded multi-model store.
//!
//! Scalars, lists, maps, sets and sorted sets share one ordered keyspace. Each
//! collection key has a meta record naming its live generation; deleting or
//! expiring a key only retires the meta and leaves a marker, and background
//! sweepers reclaim the orphaned data later.
//!
//! ```no_run
//! use plydb::{Collection, Store};
//!
//! # fn main() -> plydb::Result<()> {
//! let store = Store::open("/tmp/plydb")?;
//! store.kv().set(b"greeting", b"hello")?;
//! store.list().push_back(b"queue", b"job-1")?;
//! store.list().delete(b"queue")?;
//! store.close()?;
//! # Ok(())
//! # }
//! ```

mod backup;
pub mod collections;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod keyspace;
pub mod lock;
pub mod scheduler;
pub mod sequence;
pub mod snapshot;
pub mod store;
pub mod sweeper;
pub mod timer;

pub use backup::ARCHIVE_EXTENSION;
pub use collections::{Collection, Kv, List, Map, MetaInfo, Set, SortedSet};
pub use config::{StoreConfig, SweeperConfig};
pub use error::{Error, Result};
pub use keyspace::Kind;
pub use snapshot::Snapshot;
pub use store::{Store, StoreStats, FORMAT_VERSION};
pub use sweeper::{DeletionReport, ExpiryReport};
