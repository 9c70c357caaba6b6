//! Run statistics, rendered as a text table and optionally saved as JSON.

use std::{collections::BTreeMap, fs::File, io::BufWriter, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    chunk::ChunkTally,
    kind::SourceKind,
    table::{Align, render_table},
};

/// Cap on the row/file failures kept per table for the report.
pub const ERROR_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSample {
    pub source: String,
    pub location: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct TableStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub rows_read: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub duplicates_removed: usize,
    pub row_errors: usize,
    pub fallback_chunks: usize,
    pub error_samples: Vec<ErrorSample>,
}

impl TableStats {
    pub fn add_tally(&mut self, tally: &ChunkTally) {
        self.inserted += tally.inserted;
        self.updated += tally.updated;
        self.skipped += tally.skipped;
        self.row_errors += tally.failed;
    }

    pub fn sample_error(&mut self, source: &Path, location: impl Into<String>, message: impl Into<String>) {
        if self.error_samples.len() < ERROR_SAMPLE_LIMIT {
            self.error_samples.push(ErrorSample {
                source: source.display().to_string(),
                location: location.into(),
                message: message.into(),
            });
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: BTreeMap<SourceKind, TableStats>,
    pub database_counts: Vec<(String, u64)>,
}

impl ImportReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            tables: BTreeMap::new(),
            database_counts: Vec::new(),
        }
    }

    pub fn stats(&self, kind: SourceKind) -> Option<&TableStats> {
        self.tables.get(&kind)
    }

    pub fn files_failed(&self) -> usize {
        self.tables.values().map(|s| s.files_failed).sum()
    }

    pub fn render(&self) -> String {
        let headers = [
            "table", "files", "skipped_files", "failed_files", "rows", "inserted", "updated",
            "unchanged", "duplicates", "row_errors", "fallbacks",
        ]
        .map(String::from);
        let mut aligns = vec![Align::Right; headers.len()];
        aligns[0] = Align::Left;
        let rows = SourceKind::LOAD_ORDER
            .iter()
            .filter_map(|kind| self.tables.get(kind).map(|stats| (kind, stats)))
            .map(|(kind, s)| {
                vec![
                    kind.table_name().to_string(),
                    s.files_processed.to_string(),
                    s.files_skipped.to_string(),
                    s.files_failed.to_string(),
                    s.rows_read.to_string(),
                    s.inserted.to_string(),
                    s.updated.to_string(),
                    s.skipped.to_string(),
                    s.duplicates_removed.to_string(),
                    s.row_errors.to_string(),
                    s.fallback_chunks.to_string(),
                ]
            })
            .collect::<Vec<_>>();
        let mut output = render_table(&headers, &rows, &aligns);

        if !self.database_counts.is_empty() {
            output.push('\n');
            output.push_str(&render_counts(&self.database_counts));
        }
        let elapsed = self.finished_at - self.started_at;
        output.push_str(&format!(
            "\nFinished in {:.1}s\n",
            elapsed.num_milliseconds() as f64 / 1000.0
        ));
        output
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Writing report to {path:?}"))
    }
}

pub fn render_counts(counts: &[(String, u64)]) -> String {
    let headers = ["table", "rows"].map(String::from);
    let rows = counts
        .iter()
        .map(|(table, count)| vec![table.clone(), count.to_string()])
        .collect::<Vec<_>>();
    render_table(&headers, &rows, &[Align::Left, Align::Right])
}
