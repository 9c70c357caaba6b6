//! Chunked reading and the two-tier chunk writer.
//!
//! A source file is consumed as a lazy sequence of bounded chunks. Each
//! chunk is one commit unit: the [`BulkTier`] applies every record inside a
//! single transaction, and if that transaction fails on a store error the
//! [`PerRowTier`] replays the same records one transaction at a time, so a
//! single bad row cannot void the rest of the chunk. Both tiers drive the
//! same [`MergeEngine`].

use std::io::Read;

use log::warn;
use rusqlite::Connection;

use crate::{
    merge::{MergeEngine, MergeOutcome},
    period::Period,
    record::Record,
    store::Store,
};

pub const DEFAULT_CHUNK_SIZE: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based record number within the file.
    pub line: u64,
    pub fields: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RawChunk {
    pub index: usize,
    pub rows: Vec<RawRow>,
    /// Records the parser could not produce: (record number, message).
    pub unreadable: Vec<(u64, String)>,
    /// Source records consumed from the start of the file through this chunk.
    pub consumed: u64,
}

impl RawChunk {
    pub fn len(&self) -> usize {
        self.rows.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct ChunkedReader<R: Read> {
    reader: csv::Reader<R>,
    chunk_size: usize,
    next_index: usize,
    line: u64,
    skip: u64,
    finished: bool,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(reader: csv::Reader<R>, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            line: 0,
            skip: 0,
            finished: false,
        }
    }

    /// Discards the first `rows` source records before the first chunk.
    pub fn resume_after(mut self, rows: u64) -> Self {
        self.skip = rows;
        self
    }

    fn skip_committed(&mut self) -> Result<(), csv::Error> {
        let mut record = csv::StringRecord::new();
        while self.line < self.skip {
            match self.reader.read_record(&mut record) {
                Ok(true) => self.line += 1,
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(err) if err.is_io_error() => return Err(err),
                Err(_) => self.line += 1,
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    /// An I/O failure ends the file; it is reported once and iteration stops.
    type Item = Result<RawChunk, csv::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Err(err) = self.skip_committed() {
            self.finished = true;
            return Some(Err(err));
        }
        let mut chunk = RawChunk {
            index: self.next_index,
            ..RawChunk::default()
        };
        let mut record = csv::StringRecord::new();
        while !self.finished && chunk.len() < self.chunk_size {
            let line = self.line + 1;
            match self.reader.read_record(&mut record) {
                Ok(true) => chunk.rows.push(RawRow {
                    line,
                    fields: record.iter().map(str::to_string).collect(),
                }),
                Ok(false) => {
                    self.finished = true;
                    break;
                }
                Err(err) if err.is_io_error() => {
                    self.finished = true;
                    return Some(Err(err));
                }
                Err(err) => chunk.unreadable.push((line, err.to_string())),
            }
            self.line = line;
        }
        if chunk.is_empty() {
            return None;
        }
        chunk.consumed = self.line;
        self.next_index += 1;
        Some(Ok(chunk))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTally {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ChunkTally {
    pub fn record(&mut self, outcome: &MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated(_) => self.updated += 1,
            MergeOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Per-row failures recorded by a tier: (natural key, message).
pub type RowFailures = Vec<(String, String)>;

/// Executed inside the chunk's commit unit (bulk tier) or right after the
/// last row commits (per-row tier); used for checkpoints.
pub type CommitHook<'h> = &'h dyn Fn(&Connection) -> rusqlite::Result<()>;

pub trait WriteTier {
    fn label(&self) -> &'static str;

    fn write(
        &self,
        store: &mut Store,
        engine: &MergeEngine,
        records: &[Record],
        period: Period,
        on_commit: CommitHook<'_>,
        failures: &mut RowFailures,
    ) -> rusqlite::Result<ChunkTally>;
}

pub struct BulkTier;

impl WriteTier for BulkTier {
    fn label(&self) -> &'static str {
        "bulk"
    }

    fn write(
        &self,
        store: &mut Store,
        engine: &MergeEngine,
        records: &[Record],
        period: Period,
        on_commit: CommitHook<'_>,
        _failures: &mut RowFailures,
    ) -> rusqlite::Result<ChunkTally> {
        let tx = store.begin()?;
        let mut tally = ChunkTally::default();
        for record in records {
            tally.record(&engine.apply(&tx, record, period)?);
        }
        on_commit(&tx)?;
        tx.commit()?;
        Ok(tally)
    }
}

pub struct PerRowTier;

impl WriteTier for PerRowTier {
    fn label(&self) -> &'static str {
        "per-row"
    }

    fn write(
        &self,
        store: &mut Store,
        engine: &MergeEngine,
        records: &[Record],
        period: Period,
        on_commit: CommitHook<'_>,
        failures: &mut RowFailures,
    ) -> rusqlite::Result<ChunkTally> {
        let mut tally = ChunkTally::default();
        for record in records {
            let tx = store.begin()?;
            match engine.apply(&tx, record, period) {
                Ok(outcome) => {
                    tx.commit()?;
                    tally.record(&outcome);
                }
                Err(err) => {
                    tally.failed += 1;
                    failures.push((record.key().to_string(), err.to_string()));
                }
            }
        }
        let tx = store.begin()?;
        on_commit(&tx)?;
        tx.commit()?;
        Ok(tally)
    }
}

#[derive(Debug)]
pub struct ChunkWrite {
    pub tally: ChunkTally,
    pub tier: &'static str,
    pub fell_back: bool,
    pub failures: RowFailures,
}

pub type BoxedTier = Box<dyn WriteTier + Send + Sync>;

/// Ordered list of write strategies; the first one that completes wins.
pub struct ChunkWriter {
    tiers: Vec<BoxedTier>,
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::two_tier()
    }
}

impl ChunkWriter {
    pub fn two_tier() -> Self {
        Self {
            tiers: vec![Box::new(BulkTier) as BoxedTier, Box::new(PerRowTier)],
        }
    }

    pub fn with_tiers(tiers: Vec<BoxedTier>) -> Self {
        Self { tiers }
    }

    pub fn write(
        &self,
        store: &mut Store,
        engine: &MergeEngine,
        records: &[Record],
        period: Period,
        on_commit: CommitHook<'_>,
    ) -> rusqlite::Result<ChunkWrite> {
        let mut last_error = None;
        for (position, tier) in self.tiers.iter().enumerate() {
            let mut failures = RowFailures::new();
            match tier.write(store, engine, records, period, on_commit, &mut failures) {
                Ok(tally) => {
                    return Ok(ChunkWrite {
                        tally,
                        tier: tier.label(),
                        fell_back: position > 0,
                        failures,
                    });
                }
                Err(err) => {
                    warn!(
                        "{} tier failed for {} record(s) of {}: {err}",
                        tier.label(),
                        records.len(),
                        engine.policy().table
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or(rusqlite::Error::InvalidQuery))
    }
}
