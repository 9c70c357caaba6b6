//! Optional YAML configuration and the resolved import options.
//!
//! Precedence is command line, then file, then built-in defaults.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    chunk::DEFAULT_CHUNK_SIZE,
    cli::{ImportArgs, parse_delimiter},
    discovery::{Classifier, PatternRule},
    io_utils::{DEFAULT_DELIMITER, resolve_encoding},
    store::DEFAULT_BUSY_TIMEOUT,
};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub chunk_size: Option<usize>,
    pub encoding: Option<String>,
    pub delimiter: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub parallel: Option<bool>,
    pub patterns: Vec<PatternRule>,
}

fn read_to_string(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Opening YAML file {path:?}"))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)
        .with_context(|| format!("Reading YAML file {path:?}"))?;
    Ok(buf)
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = read_to_string(path)?;
        Self::parse(&raw).with_context(|| format!("Parsing configuration {path:?}"))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load_optional(path: Option<&PathBuf>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), |p| Self::load(p))
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::with_overrides(&self.patterns)
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub chunk_size: usize,
    pub encoding: &'static Encoding,
    pub delimiter: u8,
    pub busy_timeout: Duration,
    pub parallel: bool,
    pub resume: bool,
    pub create_indexes: bool,
    pub classifier: Classifier,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            encoding: encoding_rs::WINDOWS_1252,
            delimiter: DEFAULT_DELIMITER,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            parallel: false,
            resume: true,
            create_indexes: true,
            classifier: Classifier::builtin(),
        }
    }
}

impl ImportOptions {
    pub fn resolve(args: &ImportArgs) -> Result<Self> {
        let file = FileConfig::load_optional(args.config.as_ref())?;
        Self::merge(args, &file)
    }

    pub fn merge(args: &ImportArgs, file: &FileConfig) -> Result<Self> {
        let delimiter = match (args.delimiter, file.delimiter.as_deref()) {
            (Some(delimiter), _) => delimiter,
            (None, Some(value)) => parse_delimiter(value)
                .map_err(|err| anyhow::anyhow!("Invalid delimiter in configuration: {err}"))?,
            (None, None) => DEFAULT_DELIMITER,
        };
        let encoding =
            resolve_encoding(args.encoding.as_deref().or(file.encoding.as_deref()))?;
        let chunk_size = args
            .chunk_size
            .or(file.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        anyhow::ensure!(chunk_size > 0, "Chunk size must be at least 1");
        Ok(Self {
            chunk_size,
            encoding,
            delimiter,
            busy_timeout: file
                .busy_timeout_ms
                .map_or(DEFAULT_BUSY_TIMEOUT, Duration::from_millis),
            parallel: args.parallel || file.parallel.unwrap_or(false),
            resume: !args.no_resume,
            create_indexes: !args.skip_indexes,
            classifier: file.classifier(),
        })
    }
}

/// Classifier for commands that only take `--config`.
pub fn load_classifier(path: Option<&PathBuf>) -> Result<Classifier> {
    Ok(FileConfig::load_optional(path)?.classifier())
}
