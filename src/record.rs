//! Incoming entity rows, validated against a [`MergePolicy`].

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;

use crate::{
    error::RowError,
    policy::{ColumnRole, MergePolicy},
};

pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Parses a registry amount such as `25000,50` (comma decimal separator).
pub fn parse_amount(field: &'static str, value: &str) -> Result<Decimal, RowError> {
    let normalized = value.trim().replace(',', ".");
    Decimal::from_str(&normalized).map_err(|_| RowError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(Decimal),
}

impl Cell {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(text) => Some(text),
            Cell::Number(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NaturalKey(pub Vec<String>);

impl NaturalKey {
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// One row aligned with its policy's column list; blank fields are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    cells: Vec<Option<Cell>>,
    key: NaturalKey,
}

impl Record {
    /// Builds a record from a raw source row in file column order.
    pub fn from_raw(policy: &MergePolicy, raw: &[String]) -> Result<Self, RowError> {
        if raw.len() != policy.columns.len() {
            return Err(RowError::ColumnCount {
                expected: policy.columns.len(),
                found: raw.len(),
            });
        }
        let mut cells = Vec::with_capacity(raw.len());
        let mut key = Vec::with_capacity(policy.key_width());
        for (column, value) in policy.columns.iter().zip(raw) {
            let cell = match column.role {
                ColumnRole::Key { required } => {
                    if is_blank(value) {
                        if required {
                            return Err(RowError::BlankKey(column.name));
                        }
                        key.push(String::new());
                        Some(Cell::Text(String::new()))
                    } else {
                        let part = value.trim().to_string();
                        key.push(part.clone());
                        Some(Cell::Text(part))
                    }
                }
                ColumnRole::Field(_) if is_blank(value) => None,
                ColumnRole::Field(rule) if rule.is_numeric() => {
                    Some(Cell::Number(parse_amount(column.name, value)?))
                }
                ColumnRole::Field(_) => Some(Cell::Text(value.trim().to_string())),
            };
            cells.push(cell);
        }
        Ok(Self {
            cells,
            key: NaturalKey(key),
        })
    }

    /// Builds a record from `(column, value)` pairs; unnamed columns are blank.
    pub fn from_fields(policy: &MergePolicy, fields: &[(&str, &str)]) -> Result<Self, RowError> {
        let mut raw = vec![String::new(); policy.columns.len()];
        for (name, value) in fields {
            let idx = policy
                .column_index(name)
                .ok_or_else(|| RowError::UnknownField((*name).to_string()))?;
            raw[idx] = (*value).to_string();
        }
        Self::from_raw(policy, &raw)
    }

    pub fn key(&self) -> &NaturalKey {
        &self.key
    }

    pub fn cell(&self, idx: usize) -> Option<&Cell> {
        self.cells.get(idx).and_then(Option::as_ref)
    }

    pub fn cells(&self) -> &[Option<Cell>] {
        &self.cells
    }

    pub fn is_blank_field(&self, idx: usize) -> bool {
        match self.cell(idx) {
            None => true,
            Some(Cell::Text(text)) => is_blank(text),
            Some(Cell::Number(_)) => false,
        }
    }
}
