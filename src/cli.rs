use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Consolidate CNPJ registry snapshots into one SQLite database",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Merge every period folder under a root into the database
    Import(ImportArgs),
    /// List the classified files in load order without touching a database
    Scan(ScanArgs),
    /// Print row counts for every registry table
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Directory holding one YYYY-MM folder per snapshot
    #[arg(short, long)]
    pub root: PathBuf,
    /// SQLite database file (created if missing)
    #[arg(short, long)]
    pub database: PathBuf,
    /// Rows per commit unit (defaults to 50000)
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Character encoding of the source files (defaults to windows-1252)
    #[arg(long)]
    pub encoding: Option<String>,
    /// Field delimiter (supports ';', ',', 'tab', '|'; defaults to ';')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Load each source kind on its own worker and connection
    #[arg(long)]
    pub parallel: bool,
    /// Ignore checkpoints and reprocess every file
    #[arg(long)]
    pub no_resume: bool,
    /// Do not build secondary indexes after the load
    #[arg(long)]
    pub skip_indexes: bool,
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Also write the run report as JSON to this path
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory holding one YYYY-MM folder per snapshot
    #[arg(short, long)]
    pub root: PathBuf,
    /// YAML configuration file with extra classification patterns
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// SQLite database file to inspect
    #[arg(short, long)]
    pub database: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_resolve() {
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn import_flags_parse() {
        let cli = Cli::try_parse_from([
            "cnpj-consolidator",
            "import",
            "--root",
            "dados",
            "--database",
            "cnpj.db",
            "--chunk-size",
            "1000",
            "--parallel",
            "--no-resume",
        ])
        .unwrap();
        let Commands::Import(args) = cli.command else {
            panic!("expected import");
        };
        assert_eq!(args.chunk_size, Some(1000));
        assert!(args.parallel && args.no_resume && !args.skip_indexes);
    }
}
