pub mod checkpoint;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod import;
pub mod io_utils;
pub mod kind;
pub mod merge;
pub mod period;
pub mod policy;
pub mod record;
pub mod reference;
pub mod report;
pub mod sequencer;
pub mod store;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands},
    kind::SourceKind,
    store::Store,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("cnpj_consolidator", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => import::execute(&args),
        Commands::Scan(args) => handle_scan(&args),
        Commands::Stats(args) => handle_stats(&args),
    }
}

fn handle_scan(args: &cli::ScanArgs) -> Result<()> {
    info!("Scanning '{}'", args.root.display());
    let classifier = config::load_classifier(args.config.as_ref())?;
    let plan = import::plan(&args.root, &classifier)?;
    let headers = ["kind", "table", "period", "file"].map(String::from);
    let rows = SourceKind::LOAD_ORDER
        .iter()
        .filter_map(|kind| plan.get(kind))
        .flat_map(|files| {
            let newest = files.len().saturating_sub(1);
            files.iter().enumerate().map(move |(idx, file)| {
                let mut name = file.path.display().to_string();
                if file.kind.is_reference() && idx != newest {
                    name.push_str(" (superseded)");
                }
                vec![
                    format!("{:?}", file.kind),
                    file.kind.table_name().to_string(),
                    file.period.to_string(),
                    name,
                ]
            })
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows, &[]);
    info!("{} file(s) would be loaded", rows.len());
    Ok(())
}

fn handle_stats(args: &cli::StatsArgs) -> Result<()> {
    if !args.database.is_file() {
        bail!("Database {:?} does not exist", args.database);
    }
    let store = Store::open(&args.database, store::DEFAULT_BUSY_TIMEOUT)?;
    let counts = store
        .table_counts()
        .with_context(|| format!("Reading row counts from {:?}", args.database))?;
    print!("{}", report::render_counts(&counts));
    Ok(())
}
