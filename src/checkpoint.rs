//! Per-file load progress stored alongside the data.
//!
//! A checkpoint counts the source records of a file committed so far, so a
//! resumed run can use a different chunk size. Rows are keyed by
//! (table, path) and carry a fingerprint so a replaced file starts over
//! instead of resuming at a stale offset.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};

const FINGERPRINT_PREFIX: u64 = 64 * 1024;

/// SHA-256 over the file length and its first 64 KiB, hex encoded.
pub fn fingerprint(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Opening {path:?} for fingerprint"))?;
    let length = file
        .metadata()
        .with_context(|| format!("Reading metadata of {path:?}"))?
        .len();
    let mut prefix = Vec::with_capacity(FINGERPRINT_PREFIX as usize);
    BufReader::new(file)
        .take(FINGERPRINT_PREFIX)
        .read_to_end(&mut prefix)
        .with_context(|| format!("Reading {path:?} for fingerprint"))?;
    let mut hasher = Sha256::new();
    hasher.update(length.to_le_bytes());
    hasher.update(&prefix);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub rows_committed: u64,
    pub finished: bool,
}

/// Returns the stored checkpoint, or `None` when absent or when the file
/// changed since it was recorded.
pub fn load(
    conn: &Connection,
    table: &str,
    source: &str,
    fingerprint: &str,
) -> rusqlite::Result<Option<Checkpoint>> {
    let row = conn
        .query_row(
            "SELECT fingerprint, rows_committed, finished FROM import_progress WHERE table_name = ?1 AND source_path = ?2",
            params![table, source],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, bool>(2)?,
                ))
            },
        )
        .optional()?;
    Ok(row.and_then(|(stored, rows_committed, finished)| {
        (stored == fingerprint).then(|| Checkpoint {
            rows_committed: rows_committed.and_then(|n| u64::try_from(n).ok()).unwrap_or(0),
            finished,
        })
    }))
}

pub fn mark_chunk(
    conn: &Connection,
    table: &str,
    source: &str,
    fingerprint: &str,
    rows_committed: u64,
) -> rusqlite::Result<()> {
    conn.prepare_cached(
        "INSERT INTO import_progress (table_name, source_path, fingerprint, rows_committed, finished, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)
         ON CONFLICT (table_name, source_path) DO UPDATE SET
             fingerprint = excluded.fingerprint,
             rows_committed = excluded.rows_committed,
             finished = 0,
             updated_at = excluded.updated_at",
    )?
    .execute(params![
        table,
        source,
        fingerprint,
        i64::try_from(rows_committed).unwrap_or(i64::MAX),
        Utc::now().to_rfc3339()
    ])?;
    Ok(())
}

pub fn mark_finished(
    conn: &Connection,
    table: &str,
    source: &str,
    fingerprint: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO import_progress (table_name, source_path, fingerprint, rows_committed, finished, updated_at)
         VALUES (?1, ?2, ?3, NULL, 1, ?4)
         ON CONFLICT (table_name, source_path) DO UPDATE SET
             fingerprint = excluded.fingerprint,
             finished = 1,
             updated_at = excluded.updated_at",
        params![table, source, fingerprint, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}
