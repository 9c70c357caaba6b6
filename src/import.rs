//! Import orchestration: discovery, sequencing, and one job per source kind.
//!
//! Jobs run in [`SourceKind::LOAD_ORDER`], or concurrently on scoped threads
//! with one store connection each. Files of a kind are always processed in
//! period order. A failing file is logged and counted; only discovery,
//! sequencing and opening the store abort the run.

use std::{path::Path, thread};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use rusqlite::Connection;

use crate::{
    checkpoint,
    chunk::{ChunkWriter, ChunkedReader},
    cli::ImportArgs,
    config::ImportOptions,
    dedup::deduplicate,
    discovery::{Classifier, discover},
    io_utils::{open_registry_reader, printable_delimiter},
    kind::SourceKind,
    merge::MergeEngine,
    record::Record,
    reference::load_reference,
    report::{ImportReport, TableStats},
    sequencer::{LoadPlan, SequencedFile, newest, sequence},
    store::Store,
};

pub fn execute(args: &ImportArgs) -> Result<()> {
    let options = ImportOptions::resolve(args)?;
    info!(
        "Importing '{}' into '{}' (chunk size {}, encoding {}, delimiter '{}'{})",
        args.root.display(),
        args.database.display(),
        options.chunk_size,
        options.encoding.name(),
        printable_delimiter(options.delimiter),
        if options.parallel { ", parallel" } else { "" }
    );
    let report = run_import(&args.root, &args.database, &options)?;
    print!("{}", report.render());
    if let Some(path) = &args.report_json {
        report.save_json(path)?;
        info!("Report written to {path:?}");
    }
    let failed = report.files_failed();
    if failed > 0 {
        warn!("{failed} file(s) failed; rerun to resume them");
    }
    Ok(())
}

/// Discovers and sequences every file under `root`.
pub fn plan(root: &Path, classifier: &Classifier) -> Result<LoadPlan> {
    let files = discover(root, classifier)?;
    let plan = sequence(files).context("Sequencing discovered files")?;
    debug!(
        "Load plan covers {} kind(s), {} file(s)",
        plan.len(),
        plan.values().map(Vec::len).sum::<usize>()
    );
    Ok(plan)
}

pub fn run_import(root: &Path, database: &Path, options: &ImportOptions) -> Result<ImportReport> {
    let mut report = ImportReport::new(Utc::now());
    let plan = plan(root, &options.classifier)?;
    let mut store = Store::open(database, options.busy_timeout)?;
    store.create_tables()?;

    let jobs = SourceKind::LOAD_ORDER
        .iter()
        .filter_map(|kind| plan.get(kind).map(|files| (*kind, files.as_slice())))
        .collect::<Vec<_>>();

    if options.parallel {
        let results = thread::scope(|scope| {
            let handles = jobs
                .iter()
                .map(|&(kind, files)| {
                    let handle = scope.spawn(move || -> Result<TableStats> {
                        let mut store = Store::open(database, options.busy_timeout)?;
                        Ok(run_job(&mut store, kind, files, options))
                    });
                    (kind, files.len(), handle)
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|(kind, file_count, handle)| (kind, file_count, handle.join()))
                .collect::<Vec<_>>()
        });
        for (kind, file_count, result) in results {
            let stats = match result {
                Ok(Ok(stats)) => stats,
                Ok(Err(err)) => {
                    error!("{kind}: worker could not start: {err:#}");
                    failed_job(file_count)
                }
                Err(_) => {
                    error!("{kind}: worker panicked");
                    failed_job(file_count)
                }
            };
            report.tables.insert(kind, stats);
        }
    } else {
        for &(kind, files) in &jobs {
            let stats = run_job(&mut store, kind, files, options);
            report.tables.insert(kind, stats);
        }
    }

    if options.create_indexes {
        store.create_indexes()?;
    }
    report.database_counts = store.table_counts()?;
    report.finished_at = Utc::now();
    info!("Import finished");
    Ok(report)
}

fn failed_job(file_count: usize) -> TableStats {
    TableStats {
        files_failed: file_count,
        ..TableStats::default()
    }
}

pub fn run_job(
    store: &mut Store,
    kind: SourceKind,
    files: &[SequencedFile],
    options: &ImportOptions,
) -> TableStats {
    let mut stats = TableStats::default();
    if kind.is_reference() {
        load_reference_job(store, kind, files, options, &mut stats);
        return stats;
    }
    let Some(engine) = MergeEngine::for_kind(kind) else {
        return stats;
    };
    let writer = ChunkWriter::two_tier();
    // After any file of this kind is loaded, later periods are replayed so
    // they land on top of it in period order.
    let mut replaying = false;
    for file in files {
        info!("{kind}: processing {:?} (period {})", file.path, file.period);
        match import_file(store, &engine, &writer, file, options, replaying, &mut stats) {
            Ok(FileRun::AlreadyImported) => {}
            Ok(FileRun::Loaded) => replaying = true,
            Err(err) => {
                replaying = true;
                error!("{kind}: file {:?} failed: {err:#}", file.path);
                stats.files_failed += 1;
                stats.sample_error(&file.path, "file", format!("{err:#}"));
            }
        }
    }
    stats
}

fn load_reference_job(
    store: &mut Store,
    kind: SourceKind,
    files: &[SequencedFile],
    options: &ImportOptions,
    stats: &mut TableStats,
) {
    let Some(file) = newest(files) else {
        return;
    };
    stats.files_skipped = files.len() - 1;
    match load_reference(store, kind, &file.path, options.delimiter, options.encoding) {
        Ok(load) => {
            stats.files_processed += 1;
            stats.rows_read += load.rows_read;
            stats.inserted += load.written;
            stats.duplicates_removed += load.duplicates_removed;
            stats.row_errors += load.row_errors.len();
            for (line, err) in load.row_errors {
                stats.sample_error(&file.path, format!("row {line}"), err.to_string());
            }
        }
        Err(err) => {
            error!("{kind}: reference file {:?} failed: {err:#}", file.path);
            stats.files_failed += 1;
            stats.sample_error(&file.path, "file", format!("{err:#}"));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileRun {
    AlreadyImported,
    Loaded,
}

fn import_file(
    store: &mut Store,
    engine: &MergeEngine,
    writer: &ChunkWriter,
    file: &SequencedFile,
    options: &ImportOptions,
    replaying: bool,
    stats: &mut TableStats,
) -> Result<FileRun> {
    let table = engine.policy().table;
    let source = file.path.display().to_string();
    let fingerprint = checkpoint::fingerprint(&file.path)?;

    let mut resume_after = 0;
    if options.resume && replaying {
        info!("{table}: replaying {source} after an earlier period was loaded");
    } else if options.resume {
        match checkpoint::load(store.connection(), table, &source, &fingerprint)
            .context("Reading checkpoint")?
        {
            Some(checkpoint) if checkpoint.finished => {
                info!("{table}: {source} already imported, skipping");
                stats.files_skipped += 1;
                return Ok(FileRun::AlreadyImported);
            }
            Some(checkpoint) => {
                resume_after = checkpoint.rows_committed;
                info!("{table}: resuming {source} after row {resume_after}");
            }
            None => {}
        }
    }

    let reader = open_registry_reader(&file.path, options.delimiter, options.encoding)?;
    let errors_before = stats.row_errors;
    for chunk in ChunkedReader::new(reader, options.chunk_size).resume_after(resume_after) {
        let chunk = chunk.with_context(|| format!("Reading {source}"))?;
        stats.rows_read += chunk.len();

        for (line, message) in &chunk.unreadable {
            debug!("{source} row {line}: {message}");
            stats.row_errors += 1;
            stats.sample_error(&file.path, format!("row {line}"), message.clone());
        }
        let mut records = Vec::with_capacity(chunk.rows.len());
        for row in &chunk.rows {
            match Record::from_raw(engine.policy(), &row.fields) {
                Ok(record) => records.push(record),
                Err(err) => {
                    debug!("{source} row {}: {err}", row.line);
                    stats.row_errors += 1;
                    stats.sample_error(&file.path, format!("row {}", row.line), err.to_string());
                }
            }
        }

        let unique = deduplicate(records);
        stats.duplicates_removed += unique.removed;

        let index = chunk.index;
        let consumed = chunk.consumed;
        let mark = |conn: &Connection| {
            checkpoint::mark_chunk(conn, table, &source, &fingerprint, consumed)
        };
        let written = writer
            .write(store, engine, &unique.rows, file.period, &mark)
            .with_context(|| format!("Writing chunk {index} of {source}"))?;
        stats.add_tally(&written.tally);
        if written.fell_back {
            stats.fallback_chunks += 1;
            warn!(
                "{table}: chunk {index} of {source} written by the {} tier, {} row(s) rejected",
                written.tier, written.tally.failed
            );
        }
        for (key, message) in written.failures {
            stats.sample_error(&file.path, format!("key {key}"), message);
        }
        debug!(
            "{table}: chunk {index} committed ({} inserted, {} updated, {} unchanged)",
            written.tally.inserted, written.tally.updated, written.tally.skipped
        );
    }
    let file_row_errors = stats.row_errors - errors_before;
    if file_row_errors > 0 {
        warn!("{table}: {file_row_errors} malformed row(s) skipped in {source}");
    }

    checkpoint::mark_finished(store.connection(), table, &source, &fingerprint)
        .context("Recording finished file")?;
    stats.files_processed += 1;
    Ok(FileRun::Loaded)
}
