// src/core/storage/persistence.rs

//! On-disk (de)serialization of a `Tablet`, using a big-endian
//! length-prefixed record format. `original_source/backend_server/include/
//! tablet.h` notes that row locks never need persisting, since a fresh
//! `RwLock` is constructed for each row on load; we follow the same rule.
//!
//! Layout: a `u32` row count, then for each row its key, a `u32` column
//! count, and for each column its key and a length-prefixed value. The
//! tablet's range is not part of the file — `load_all` already knows it
//! from the node's configuration, and `tablet_filename` encodes it in the
//! file name besides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};

use crate::core::errors::KvError;
use crate::core::storage::tablet::Tablet;
use crate::core::storage::tablet_set::TabletSet;

async fn write_string(w: &mut (impl AsyncWriteExt + Unpin), s: &str) -> Result<(), KvError> {
    w.write_u32(s.len() as u32).await?;
    w.write_all(s.as_bytes()).await?;
    Ok(())
}

async fn write_bytes(w: &mut (impl AsyncWriteExt + Unpin), b: &[u8]) -> Result<(), KvError> {
    w.write_u32(b.len() as u32).await?;
    w.write_all(b).await?;
    Ok(())
}

async fn read_string(r: &mut (impl AsyncReadExt + Unpin)) -> Result<String, KvError> {
    let len = r.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(KvError::from)
}

async fn read_bytes(r: &mut (impl AsyncReadExt + Unpin)) -> Result<Bytes, KvError> {
    let len = r.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

pub async fn save(tablet: &Tablet, path: impl AsRef<Path>) -> Result<(), KvError> {
    let snapshot = tablet.snapshot().await;
    let file = File::create(path).await?;
    let mut w = BufWriter::new(file);

    w.write_u32(snapshot.len() as u32).await?;
    for (row, cols) in &snapshot {
        write_string(&mut w, row).await?;
        w.write_u32(cols.len() as u32).await?;
        for (col, val) in cols {
            write_string(&mut w, col).await?;
            write_bytes(&mut w, val).await?;
        }
    }
    w.flush().await?;
    Ok(())
}

pub async fn load(
    path: impl AsRef<Path>,
    range_start: impl Into<String>,
    range_end: impl Into<String>,
) -> Result<Tablet, KvError> {
    let file = File::open(path).await?;
    let mut r = BufReader::new(file);
    let tablet = Tablet::new(range_start, range_end);

    let row_count = r.read_u32().await?;
    let mut snapshot = BTreeMap::new();
    for _ in 0..row_count {
        let row = read_string(&mut r).await?;
        let col_count = r.read_u32().await?;
        let mut cols = Vec::with_capacity(col_count as usize);
        for _ in 0..col_count {
            let col = read_string(&mut r).await?;
            let val = read_bytes(&mut r).await?;
            cols.push((col, val));
        }
        snapshot.insert(row, cols);
    }
    tablet.load_snapshot(snapshot).await;
    Ok(tablet)
}

/// A node may own several tablets; each gets its own file
/// inside `dir`, named after the key range it owns.
fn tablet_filename(dir: &Path, range_start: &str, range_end: &str) -> PathBuf {
    dir.join(format!("{range_start}-{range_end}.tablet"))
}

pub async fn save_all(tablets: &TabletSet, dir: impl AsRef<Path>) -> Result<(), KvError> {
    tokio::fs::create_dir_all(&dir).await?;
    for tablet in tablets.iter() {
        let path = tablet_filename(dir.as_ref(), &tablet.range_start, &tablet.range_end);
        save(tablet, path).await?;
    }
    Ok(())
}

/// Loads every tablet in `ranges` from `dir`, falling back to an empty
/// tablet for any range that has no persisted file yet (first startup).
pub async fn load_all(
    ranges: &[(String, String)],
    dir: impl AsRef<Path>,
) -> Result<TabletSet, KvError> {
    let mut tablets = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        let path = tablet_filename(dir.as_ref(), start, end);
        let tablet = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            load(path, start.clone(), end.clone()).await?
        } else {
            Tablet::new(start.clone(), end.clone())
        };
        tablets.push(tablet);
    }
    Ok(TabletSet::from_tablets(tablets))
}
