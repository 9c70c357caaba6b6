#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use encoding_rs::WINDOWS_1252;
use tempfile::{TempDir, tempdir};

/// Scratch registry root with `YYYY-MM` period folders, cleaned up on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let workspace = Self {
            temp_dir: tempdir().expect("temp dir"),
        };
        fs::create_dir(workspace.root()).expect("create registry root");
        workspace
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory scanned by the importer.
    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().join("dados")
    }

    pub fn database(&self) -> PathBuf {
        self.temp_dir.path().join("cnpj.db")
    }

    /// Writes registry rows into `period/name`, encoded as windows-1252.
    pub fn write_period_file(&self, period: &str, name: &str, rows: &[Vec<&str>]) -> PathBuf {
        let folder = self.root().join(period);
        fs::create_dir_all(&folder).expect("create period folder");
        let path = folder.join(name);
        let text = rows
            .iter()
            .map(|fields| registry_line(fields))
            .collect::<String>();
        let (bytes, _, unmappable) = WINDOWS_1252.encode(&text);
        assert!(!unmappable, "fixture text must be representable in windows-1252");
        fs::write(&path, bytes).expect("write period file");
        path
    }

    pub fn write_raw(&self, period: &str, name: &str, bytes: &[u8]) -> PathBuf {
        let folder = self.root().join(period);
        fs::create_dir_all(&folder).expect("create period folder");
        let path = folder.join(name);
        fs::write(&path, bytes).expect("write raw file");
        path
    }
}

/// One quoted, semicolon-separated registry line.
pub fn registry_line(fields: &[&str]) -> String {
    let quoted = fields
        .iter()
        .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
        .collect::<Vec<_>>();
    format!("{}\n", quoted.join(";"))
}

pub fn company<'a>(cnpj: &'a str, name: &'a str, nature: &'a str, capital: &'a str, size: &'a str) -> Vec<&'a str> {
    vec![cnpj, name, nature, "49", capital, size, ""]
}

/// Establishment row with the given trade name, state and remaining fields blank.
pub fn establishment<'a>(cnpj: &'a str, order: &'a str, dv: &'a str, trade_name: &'a str, uf: &'a str) -> Vec<&'a str> {
    let mut row = vec![""; 30];
    row[0] = cnpj;
    row[1] = order;
    row[2] = dv;
    row[3] = "1";
    row[4] = trade_name;
    row[19] = uf;
    row
}

pub fn partner<'a>(cnpj: &'a str, name: &'a str, document: &'a str, qualification: &'a str) -> Vec<&'a str> {
    vec![cnpj, "2", name, document, qualification, "20200101", "", "", "", "", "4"]
}

pub fn query_text(database: &Path, sql: &str) -> Option<String> {
    let conn = rusqlite::Connection::open(database).expect("open database");
    conn.query_row(sql, [], |row| row.get(0)).expect("query")
}

pub fn count(database: &Path, table: &str) -> i64 {
    let conn = rusqlite::Connection::open(database).expect("open database");
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count rows")
}
