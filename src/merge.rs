//! Entity-agnostic merge engine.
//!
//! For one incoming record the engine looks the natural key up, and either
//! inserts (subject to the policy's insert rule) or computes an
//! [`UpdatePlan`] from the per-field rules. An UPDATE is only sent when the
//! plan changes something, so replaying a row is a no-op.

use log::trace;
use rusqlite::{Connection, params_from_iter, types::Value};
use rust_decimal::{Decimal, prelude::ToPrimitive};

use crate::{
    kind::SourceKind,
    period::Period,
    policy::{self, ColumnRole, FieldRule, InsertRule, MergePolicy, STAMP_COLUMN},
    record::{Cell, Record, is_blank},
    store::{StoredRecord, fetch_stored, key_predicate},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    /// Names of the columns that changed, stamp column included.
    Updated(Vec<&'static str>),
    Skipped,
}

/// Field values to write back, in `field_columns()` order.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub values: Vec<Value>,
    pub stamp: Option<String>,
    pub changed: Vec<&'static str>,
}

impl UpdatePlan {
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

pub struct MergeEngine {
    policy: &'static MergePolicy,
    insert_sql: String,
    update_sql: String,
}

impl MergeEngine {
    pub fn new(policy: &'static MergePolicy) -> Self {
        let all = policy
            .columns
            .iter()
            .map(|c| c.name)
            .chain(std::iter::once(STAMP_COLUMN))
            .collect::<Vec<_>>();
        let placeholders = (1..=all.len()).map(|i| format!("?{i}")).collect::<Vec<_>>();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            policy.table,
            all.join(", "),
            placeholders.join(", ")
        );

        let assignments = policy
            .field_columns()
            .map(|c| c.name)
            .chain(std::iter::once(STAMP_COLUMN))
            .enumerate()
            .map(|(idx, name)| format!("{name} = ?{}", idx + 1))
            .collect::<Vec<_>>();
        let update_sql = format!(
            "UPDATE {} SET {} WHERE {}",
            policy.table,
            assignments.join(", "),
            key_predicate(policy, assignments.len() + 1)
        );
        Self {
            policy,
            insert_sql,
            update_sql,
        }
    }

    pub fn for_kind(kind: SourceKind) -> Option<Self> {
        policy::policy_for(kind).map(Self::new)
    }

    pub fn policy(&self) -> &'static MergePolicy {
        self.policy
    }

    pub fn apply(
        &self,
        conn: &Connection,
        record: &Record,
        period: Period,
    ) -> rusqlite::Result<MergeOutcome> {
        match fetch_stored(conn, self.policy, record.key().parts())? {
            None => self.insert(conn, record, period),
            Some(stored) => self.update(conn, &stored, record, period),
        }
    }

    fn insert(
        &self,
        conn: &Connection,
        record: &Record,
        period: Period,
    ) -> rusqlite::Result<MergeOutcome> {
        if !insert_eligible(self.policy, record) {
            trace!("{}: not inserting {} (insert rule)", self.policy.table, record.key());
            return Ok(MergeOutcome::Skipped);
        }
        let mut values = insert_values(self.policy, record);
        values.push(Value::Text(period.stamp()));
        conn.prepare_cached(&self.insert_sql)?
            .execute(params_from_iter(values))?;
        Ok(MergeOutcome::Inserted)
    }

    fn update(
        &self,
        conn: &Connection,
        stored: &StoredRecord,
        record: &Record,
        period: Period,
    ) -> rusqlite::Result<MergeOutcome> {
        let plan = plan_update(self.policy, stored, record, period);
        if plan.is_noop() {
            return Ok(MergeOutcome::Skipped);
        }
        let stamp = match plan.stamp {
            Some(stamp) => Value::Text(stamp),
            None => stored
                .stamp()
                .map(|s| Value::Text(s.to_string()))
                .unwrap_or(Value::Null),
        };
        let params = plan
            .values
            .into_iter()
            .chain(std::iter::once(stamp))
            .chain(record.key().parts().iter().cloned().map(Value::Text));
        let rows = conn
            .prepare_cached(&self.update_sql)?
            .execute(params_from_iter(params))?;
        if rows == 0 {
            Ok(MergeOutcome::Skipped)
        } else {
            Ok(MergeOutcome::Updated(plan.changed))
        }
    }
}

pub fn insert_eligible(policy: &MergePolicy, record: &Record) -> bool {
    match policy.insert_rule {
        InsertRule::RequireNonBlank(field) => policy
            .column_index(field)
            .is_some_and(|idx| !record.is_blank_field(idx)),
        InsertRule::Always => true,
    }
}

fn decimal_value(amount: &Decimal) -> Value {
    Value::Real(amount.to_f64().unwrap_or_default())
}

fn cell_value(cell: &Cell) -> Value {
    match cell {
        Cell::Text(text) => Value::Text(text.clone()),
        Cell::Number(amount) => decimal_value(amount),
    }
}

/// Column values for a first insert; blank numerics become zero.
pub fn insert_values(policy: &MergePolicy, record: &Record) -> Vec<Value> {
    policy
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| match (column.role, record.cell(idx)) {
            (ColumnRole::Key { .. }, cell) => {
                Value::Text(cell.and_then(Cell::as_text).unwrap_or_default().to_string())
            }
            (ColumnRole::Field(rule), None) if rule.is_numeric() => Value::Real(0.0),
            (ColumnRole::Field(_), None) => Value::Null,
            (ColumnRole::Field(_), Some(cell)) => cell_value(cell),
        })
        .collect()
}

/// Stored values that an older period may still fill.
fn vacant(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(text) => is_blank(text),
        Value::Real(n) => *n == 0.0,
        Value::Integer(n) => *n == 0,
        Value::Blob(_) => false,
    }
}

fn merge_field(rule: FieldRule, current: &Value, incoming: Option<&Cell>, backfill: bool) -> Value {
    if backfill && !vacant(current) {
        return current.clone();
    }
    match (rule, incoming) {
        (FieldRule::Coalesce, Some(Cell::Text(text))) if !is_blank(text) => {
            Value::Text(text.clone())
        }
        (FieldRule::Coalesce, Some(Cell::Number(amount))) => decimal_value(amount),
        (FieldRule::NumericPreferNonZero, Some(Cell::Number(amount))) if !amount.is_zero() => {
            decimal_value(amount)
        }
        (FieldRule::AlwaysReplace, incoming) => incoming.map(cell_value).unwrap_or(Value::Null),
        _ => current.clone(),
    }
}

/// Applies the policy's field rules and stamp rule to a stored row.
///
/// A row from a period older than the stored stamp only fills vacant
/// fields; values that came from a newer period are kept.
pub fn plan_update(
    policy: &MergePolicy,
    stored: &StoredRecord,
    record: &Record,
    period: Period,
) -> UpdatePlan {
    let incoming = period.stamp();
    let backfill = stored
        .stamp()
        .is_some_and(|stamp| !is_blank(stamp) && incoming.as_str() < stamp);
    let mut values = Vec::with_capacity(policy.columns.len());
    let mut changed = Vec::new();
    for (idx, column) in policy.columns.iter().enumerate() {
        let Some(rule) = column.rule() else {
            continue;
        };
        let current = stored.value(idx);
        let next = merge_field(rule, current, record.cell(idx), backfill);
        if &next != current {
            changed.push(column.name);
        }
        values.push(next);
    }

    let newer = stored
        .stamp()
        .is_none_or(|stamp| is_blank(stamp) || incoming.as_str() > stamp);
    let incomplete = policy
        .stamp_triggers
        .iter()
        .filter_map(|field| policy.column_index(field))
        .any(|idx| stored.is_blank(idx));
    let stamp = if (newer || incomplete) && stored.stamp() != Some(incoming.as_str()) {
        changed.push(STAMP_COLUMN);
        Some(incoming)
    } else {
        None
    };

    UpdatePlan {
        values,
        stamp,
        changed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{COMPANY, ColumnSpec, ESTABLISHMENT};

    fn period(token: &str) -> Period {
        token.parse().unwrap()
    }

    fn stored(policy: &'static MergePolicy, values: &[Option<&str>], stamp: &str) -> StoredRecord {
        let values = values
            .iter()
            .map(|v| match v {
                Some(text) => Value::Text(text.to_string()),
                None => Value::Null,
            })
            .collect();
        StoredRecord::new(policy, values, Some(stamp.to_string()))
    }

    #[test]
    fn coalesce_never_takes_blank_values() {
        let current = stored(
            &COMPANY,
            &[Some("12345678"), Some("ACME"), Some("2062"), Some("49"), None, Some("03"), None],
            "2023-05",
        );
        let incoming = Record::from_fields(
            &COMPANY,
            &[("cnpj_basico", "12345678"), ("porte_empresa", "05")],
        )
        .unwrap();
        let plan = plan_update(&COMPANY, &current, &incoming, period("2023-05"));
        assert_eq!(plan.changed, vec!["porte_empresa"]);
        assert_eq!(plan.values[0], Value::Text("ACME".into()));
        assert_eq!(plan.values[4], Value::Text("05".into()));
        assert_eq!(plan.stamp, None);
    }

    #[test]
    fn incomplete_company_takes_incoming_stamp_even_when_older() {
        let current = stored(
            &COMPANY,
            &[Some("12345678"), Some("ACME"), None, None, None, None, None],
            "2024-01",
        );
        let incoming = Record::from_fields(&COMPANY, &[("cnpj_basico", "12345678")]).unwrap();
        let plan = plan_update(&COMPANY, &current, &incoming, period("2023-05"));
        assert_eq!(plan.stamp.as_deref(), Some("2023-05"));
        assert_eq!(plan.changed, vec![STAMP_COLUMN]);
    }

    #[test]
    fn establishment_stamp_only_moves_forward() {
        let mut values = vec![Some("11222333"), Some("0001"), Some("81")];
        values.extend(std::iter::repeat_n(None, 27));
        let current = stored(&ESTABLISHMENT, &values, "2024-01");
        let incoming = Record::from_fields(
            &ESTABLISHMENT,
            &[("cnpj_basico", "11222333"), ("cnpj_ordem", "0001"), ("cnpj_dv", "81")],
        )
        .unwrap();
        let older = plan_update(&ESTABLISHMENT, &current, &incoming, period("2023-05"));
        assert!(older.is_noop());
        let newer = plan_update(&ESTABLISHMENT, &current, &incoming, period("2024-02"));
        assert_eq!(newer.stamp.as_deref(), Some("2024-02"));
    }

    #[test]
    fn older_period_only_fills_vacant_fields() {
        let mut values = vec![Some("11222333"), Some("0001"), Some("81"), Some("1"), Some("")];
        values.extend(std::iter::repeat_n(None, 25));
        let current = stored(&ESTABLISHMENT, &values, "2024-01");
        let incoming = Record::from_fields(
            &ESTABLISHMENT,
            &[
                ("cnpj_basico", "11222333"),
                ("cnpj_ordem", "0001"),
                ("cnpj_dv", "81"),
                ("identificador_matriz_filial", "2"),
                ("nome_fantasia", "NOME ANTIGO"),
            ],
        )
        .unwrap();
        let plan = plan_update(&ESTABLISHMENT, &current, &incoming, period("2023-05"));
        assert_eq!(plan.changed, vec!["nome_fantasia"]);
        assert_eq!(plan.values[0], Value::Text("1".into()));
        assert_eq!(plan.values[1], Value::Text("NOME ANTIGO".into()));
        assert_eq!(plan.stamp, None);
    }

    static NOTES: MergePolicy = MergePolicy {
        kind: SourceKind::Company,
        table: "notes",
        columns: &[
            ColumnSpec {
                name: "id",
                role: ColumnRole::Key { required: true },
            },
            ColumnSpec {
                name: "body",
                role: ColumnRole::Field(FieldRule::AlwaysReplace),
            },
        ],
        insert_rule: InsertRule::Always,
        stamp_triggers: &[],
    };

    #[test]
    fn always_replace_takes_blank_values() {
        let current = stored(&NOTES, &[Some("1"), Some("old text")], "2023-05");
        let incoming = Record::from_fields(&NOTES, &[("id", "1")]).unwrap();
        let plan = plan_update(&NOTES, &current, &incoming, period("2023-05"));
        assert_eq!(plan.values, vec![Value::Null]);
        assert_eq!(plan.changed, vec!["body"]);
    }

    #[test]
    fn insert_normalizes_blank_capital_to_zero() {
        let record = Record::from_fields(
            &COMPANY,
            &[("cnpj_basico", "12345678"), ("razao_social", "ACME")],
        )
        .unwrap();
        let values = insert_values(&COMPANY, &record);
        assert_eq!(values[4], Value::Real(0.0));
        assert_eq!(values[2], Value::Null);
    }

    #[test]
    fn engine_sql_targets_policy_columns() {
        let engine = MergeEngine::new(&COMPANY);
        assert!(engine.insert_sql.starts_with("INSERT INTO empresa (cnpj_basico, razao_social"));
        assert!(engine.update_sql.contains("data_atualizacao = ?7 WHERE cnpj_basico = ?8"));
    }
}
