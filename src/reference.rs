//! Wholesale replacement of the code/description dictionaries.
//!
//! Only the newest published file for a dictionary matters: its rows are
//! read, deduplicated by code, and swapped in within one transaction.

use std::path::Path;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use log::{debug, info};
use rusqlite::params;

use crate::{
    dedup::keep_last, error::RowError, io_utils::open_registry_reader, kind::SourceKind,
    record::is_blank, store::Store,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub code: String,
    pub description: String,
}

impl ReferenceRow {
    pub fn from_raw(raw: &[String]) -> Result<Self, RowError> {
        if raw.len() != 2 {
            return Err(RowError::ColumnCount {
                expected: 2,
                found: raw.len(),
            });
        }
        if is_blank(&raw[0]) {
            return Err(RowError::BlankKey("codigo"));
        }
        Ok(Self {
            code: raw[0].trim().to_string(),
            description: raw[1].trim().to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub struct ReferenceLoad {
    pub rows_read: usize,
    pub written: usize,
    pub duplicates_removed: usize,
    pub row_errors: Vec<(u64, RowError)>,
}

pub fn read_reference_rows(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<(Vec<ReferenceRow>, Vec<(u64, RowError)>)> {
    let mut reader = open_registry_reader(path, delimiter, encoding)?;
    let mut rows = Vec::new();
    let mut errors = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let line = idx as u64 + 1;
        match record {
            Ok(record) => {
                let raw = record.iter().map(str::to_string).collect::<Vec<_>>();
                match ReferenceRow::from_raw(&raw) {
                    Ok(row) => rows.push(row),
                    Err(err) => errors.push((line, err)),
                }
            }
            Err(err) if err.is_io_error() => {
                return Err(err).with_context(|| format!("Reading {path:?}"));
            }
            Err(err) => errors.push((line, RowError::Unreadable(err.to_string()))),
        }
    }
    Ok((rows, errors))
}

/// Deletes every row of the dictionary table and inserts `rows`, atomically.
pub fn replace_rows(store: &mut Store, kind: SourceKind, rows: &[ReferenceRow]) -> Result<usize> {
    let table = kind.table_name();
    let tx = store
        .begin()
        .with_context(|| format!("Starting replacement of {table}"))?;
    tx.execute(&format!("DELETE FROM {table}"), [])
        .with_context(|| format!("Clearing {table}"))?;
    {
        let mut insert = tx
            .prepare(&format!(
                "INSERT INTO {table} (codigo, descricao) VALUES (?1, ?2)"
            ))
            .with_context(|| format!("Preparing insert into {table}"))?;
        for row in rows {
            insert
                .execute(params![row.code, row.description])
                .with_context(|| format!("Inserting code '{}' into {table}", row.code))?;
        }
    }
    tx.commit()
        .with_context(|| format!("Committing replacement of {table}"))?;
    Ok(rows.len())
}

pub fn load_reference(
    store: &mut Store,
    kind: SourceKind,
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<ReferenceLoad> {
    let (rows, row_errors) = read_reference_rows(path, delimiter, encoding)?;
    let rows_read = rows.len() + row_errors.len();
    let unique = keep_last(rows, |row| row.code.clone());
    if !row_errors.is_empty() {
        debug!("{kind}: {} malformed row(s) in {path:?}", row_errors.len());
    }
    let written = replace_rows(store, kind, &unique.rows)?;
    info!("{kind}: replaced with {written} row(s) from {path:?}");
    Ok(ReferenceLoad {
        rows_read,
        written,
        duplicates_removed: unique.removed,
        row_errors,
    })
}
