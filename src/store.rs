//! SQLite destination: connection setup, DDL, and row lookups.
//!
//! Every worker owns one [`Store`]. Writes go through [`Store::begin`], an
//! immediate transaction that rolls back when dropped uncommitted, so a
//! chunk either lands completely or not at all.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use log::{debug, info};
use rusqlite::{
    Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior, params_from_iter,
    types::Value,
};

use crate::{
    kind::SourceKind,
    policy::{self, ColumnRole, MergePolicy, STAMP_COLUMN},
};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SECONDARY_INDEXES: &[(&str, &str, &str)] = &[
    ("idx_empresa_cnpj", "empresa", "cnpj_basico"),
    ("idx_estab_cnpj", "estabelecimento", "cnpj_basico"),
    ("idx_estab_cnae", "estabelecimento", "cnae_fiscal_principal"),
    ("idx_estab_uf", "estabelecimento", "uf"),
    ("idx_estab_municipio", "estabelecimento", "municipio"),
    ("idx_socio_cnpj", "socio", "cnpj_basico"),
];

const PROGRESS_DDL: &str = "CREATE TABLE IF NOT EXISTS import_progress (
    table_name TEXT NOT NULL,
    source_path TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    rows_committed INTEGER,
    finished INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (table_name, source_path)
)";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Opening database {path:?}"))?;
        conn.busy_timeout(busy_timeout)
            .context("Setting database busy timeout")?;
        let journal: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .with_context(|| format!("Enabling WAL journal on {path:?}"))?;
        conn.pragma_update(None, "synchronous", "OFF")
            .and_then(|_| conn.pragma_update(None, "cache_size", -100_000))
            .with_context(|| format!("Configuring database {path:?}"))?;
        debug!("Opened database {path:?} (journal mode {journal})");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Opening in-memory database")?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Starts a write transaction; dropping it without `commit` rolls back.
    pub fn begin(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
    }

    pub fn create_tables(&self) -> Result<()> {
        let mut ddl = String::new();
        for kind in SourceKind::reference_kinds() {
            ddl.push_str(&reference_table_ddl(kind.table_name()));
            ddl.push_str(";\n");
        }
        for policy in policy::all_policies() {
            ddl.push_str(&entity_table_ddl(policy));
            ddl.push_str(";\n");
        }
        ddl.push_str(PROGRESS_DDL);
        ddl.push(';');
        self.conn
            .execute_batch(&ddl)
            .context("Creating registry tables")?;
        info!("Registry tables created or verified");
        Ok(())
    }

    /// Builds the lookup indexes; run once the bulk load is over.
    pub fn create_indexes(&self) -> Result<()> {
        for (name, table, column) in SECONDARY_INDEXES {
            self.conn
                .execute(
                    &format!("CREATE INDEX IF NOT EXISTS {name} ON {table}({column})"),
                    [],
                )
                .with_context(|| format!("Creating index {name}"))?;
        }
        info!("Created {} secondary index(es)", SECONDARY_INDEXES.len());
        Ok(())
    }

    pub fn index_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn table_counts(&self) -> Result<Vec<(String, u64)>> {
        SourceKind::LOAD_ORDER
            .iter()
            .map(|kind| {
                let table = kind.table_name();
                let count: i64 = self
                    .conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                    .with_context(|| format!("Counting rows of {table}"))?;
                Ok((table.to_string(), count.max(0) as u64))
            })
            .collect()
    }

    pub fn fetch(&self, policy: &'static MergePolicy, key: &[&str]) -> Result<Option<StoredRecord>> {
        let key = key.iter().map(|part| part.to_string()).collect::<Vec<_>>();
        fetch_stored(&self.conn, policy, &key).context("Fetching stored record")
    }
}

fn reference_table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    codigo TEXT PRIMARY KEY,\n    descricao TEXT NOT NULL\n)"
    )
}

fn entity_table_ddl(policy: &MergePolicy) -> String {
    let mut lines = policy
        .columns
        .iter()
        .map(|column| match column.role {
            ColumnRole::Key { .. } => format!("    {} TEXT NOT NULL", column.name),
            ColumnRole::Field(rule) if rule.is_numeric() => format!("    {} REAL", column.name),
            ColumnRole::Field(_) => format!("    {} TEXT", column.name),
        })
        .collect::<Vec<_>>();
    lines.push(format!("    {STAMP_COLUMN} TEXT"));
    let keys = policy.key_columns().map(|c| c.name).collect::<Vec<_>>();
    lines.push(format!("    PRIMARY KEY ({})", keys.join(", ")));
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        policy.table,
        lines.join(",\n")
    )
}

pub(crate) fn key_predicate(policy: &MergePolicy, first_placeholder: usize) -> String {
    policy
        .key_columns()
        .enumerate()
        .map(|(offset, column)| format!("{} = ?{}", column.name, first_placeholder + offset))
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub(crate) fn select_sql(policy: &MergePolicy) -> String {
    let columns = policy
        .columns
        .iter()
        .map(|c| c.name)
        .chain(std::iter::once(STAMP_COLUMN))
        .collect::<Vec<_>>();
    format!(
        "SELECT {} FROM {} WHERE {}",
        columns.join(", "),
        policy.table,
        key_predicate(policy, 1)
    )
}

/// A stored row read back in policy column order plus its stamp.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    policy: &'static MergePolicy,
    values: Vec<Value>,
    stamp: Option<String>,
}

impl StoredRecord {
    pub(crate) fn new(
        policy: &'static MergePolicy,
        values: Vec<Value>,
        stamp: Option<String>,
    ) -> Self {
        Self {
            policy,
            values,
            stamp,
        }
    }

    pub fn value(&self, idx: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(idx).unwrap_or(&NULL)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn stamp(&self) -> Option<&str> {
        self.stamp.as_deref()
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        let idx = self.policy.column_index(column)?;
        match self.value(idx) {
            Value::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        let idx = self.policy.column_index(column)?;
        match self.value(idx) {
            Value::Real(n) => Some(*n),
            Value::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Blank in storage: NULL, or text that is empty after trimming.
    pub fn is_blank(&self, idx: usize) -> bool {
        match self.value(idx) {
            Value::Null => true,
            Value::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }
}

pub(crate) fn fetch_stored(
    conn: &Connection,
    policy: &'static MergePolicy,
    key: &[String],
) -> rusqlite::Result<Option<StoredRecord>> {
    let mut stmt = conn.prepare_cached(&select_sql(policy))?;
    let width = policy.columns.len();
    stmt.query_row(params_from_iter(key.iter()), |row| {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            let value: Value = row.get(idx)?;
            values.push(match value {
                Value::Integer(n) if policy.columns[idx].rule().is_some_and(|r| r.is_numeric()) => {
                    Value::Real(n as f64)
                }
                other => other,
            });
        }
        let stamp: Option<String> = row.get(width)?;
        Ok(StoredRecord {
            policy,
            values,
            stamp,
        })
    })
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ESTABLISHMENT, PARTNER};

    #[test]
    fn entity_ddl_declares_natural_primary_key() {
        let ddl = entity_table_ddl(&PARTNER);
        assert!(ddl.contains("PRIMARY KEY (cnpj_basico, nome_socio_razao_social, cpf_cnpj_socio)"));
        assert!(ddl.contains("data_atualizacao TEXT"));
    }

    #[test]
    fn select_uses_numbered_key_placeholders() {
        let sql = select_sql(&ESTABLISHMENT);
        assert!(sql.ends_with("WHERE cnpj_basico = ?1 AND cnpj_ordem = ?2 AND cnpj_dv = ?3"));
    }

    #[test]
    fn tables_and_indexes_are_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.create_tables().unwrap();
        store.create_tables().unwrap();
        store.create_indexes().unwrap();
        store.create_indexes().unwrap();
        assert_eq!(store.index_names().unwrap().len(), SECONDARY_INDEXES.len());
        let counts = store.table_counts().unwrap();
        assert_eq!(counts.len(), 9);
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }
}
