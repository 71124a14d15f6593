//! Backup archives: a checkpoint of the engine packed as a gzip-compressed tar.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::engine::{Engine, ENGINE_FILE};
use crate::error::{Error, Result};

pub const ARCHIVE_EXTENSION: &str = "plybak";

static ARCHIVE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique name stem for one backup: wall-clock millis plus a process counter.
fn archive_stamp() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0);
    let seq = ARCHIVE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{millis}-{seq}")
}

fn pack(source: &Path, archive: &Path) -> Result<()> {
    let file = File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", source)?;
    let encoder = builder.into_inner()?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Checkpoint `engine` under `dest`, pack the checkpoint into one archive and
/// remove the checkpoint directory. Returns the archive path.
pub(crate) fn backup(engine: &Engine, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;
    let stamp = archive_stamp();
    let checkpoint_dir = dest.join(format!("checkpoint-{stamp}"));
    let archive = dest.join(format!("{stamp}.{ARCHIVE_EXTENSION}"));

    let packed = engine
        .checkpoint(&checkpoint_dir)
        .and_then(|_| pack(&checkpoint_dir, &archive));

    if checkpoint_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&checkpoint_dir) {
            tracing::warn!(
                path = %checkpoint_dir.display(),
                error = %e,
                "Failed to remove checkpoint directory"
            );
        }
    }
    if packed.is_err() && archive.exists() {
        fs::remove_file(&archive).ok();
    }
    packed?;

    Ok(archive)
}

/// Unpack `archive` into `target`, which must not already hold a store.
pub(crate) fn restore(archive: &Path, target: &Path) -> Result<()> {
    if target.join(ENGINE_FILE).exists() {
        return Err(Error::InvalidArgument(format!(
            "{} already contains a store",
            target.display()
        )));
    }
    fs::create_dir_all(target)?;

    let file = File::open(archive)?;
    let mut unpacker = tar::Archive::new(GzDecoder::new(file));
    unpacker.unpack(target)?;

    if !target.join(ENGINE_FILE).exists() {
        return Err(Error::Consistency(format!(
            "archive {} does not contain {ENGINE_FILE}",
            archive.display()
        )));
    }
    Ok(())
}
