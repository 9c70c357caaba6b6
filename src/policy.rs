//! Declarative merge policies for the three mutable registry entities.
//!
//! Each policy lists the entity's columns in source-file order. A column is
//! either part of the natural key or a mergeable field carrying its own
//! [`FieldRule`]. The merge engine and the DDL both derive from these
//! tables, so adding a column means touching only this module.

use crate::kind::SourceKind;

/// Column holding the `YYYY-MM` period stamp on every entity table.
pub const STAMP_COLUMN: &str = "data_atualizacao";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Replace only when the incoming value is non-blank.
    Coalesce,
    /// Numeric column; replace only when the incoming value is non-blank and
    /// non-zero. Blank is normalized to zero on insert.
    NumericPreferNonZero,
    /// Always take the incoming value, blank included.
    AlwaysReplace,
}

impl FieldRule {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldRule::NumericPreferNonZero)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    /// Natural-key part. Optional parts are stored as the empty string.
    Key { required: bool },
    Field(FieldRule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub role: ColumnRole,
}

impl ColumnSpec {
    pub fn is_key(&self) -> bool {
        matches!(self.role, ColumnRole::Key { .. })
    }

    pub fn rule(&self) -> Option<FieldRule> {
        match self.role {
            ColumnRole::Field(rule) => Some(rule),
            ColumnRole::Key { .. } => None,
        }
    }
}

/// Whether a record seen for the first time may be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRule {
    /// The named field must be non-blank.
    RequireNonBlank(&'static str),
    /// Key presence is enough.
    Always,
}

#[derive(Debug)]
pub struct MergePolicy {
    pub kind: SourceKind,
    pub table: &'static str,
    pub columns: &'static [ColumnSpec],
    pub insert_rule: InsertRule,
    /// Fields whose blankness in storage forces the stamp to the incoming
    /// period even when that period is not newer.
    pub stamp_triggers: &'static [&'static str],
}

impl MergePolicy {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn key_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| c.is_key())
    }

    pub fn field_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(|c| !c.is_key())
    }

    pub fn key_width(&self) -> usize {
        self.key_columns().count()
    }
}

const fn key(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        role: ColumnRole::Key { required: true },
    }
}

const fn optional_key(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        role: ColumnRole::Key { required: false },
    }
}

const fn coalesce(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        role: ColumnRole::Field(FieldRule::Coalesce),
    }
}

const fn numeric(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        role: ColumnRole::Field(FieldRule::NumericPreferNonZero),
    }
}

pub static COMPANY: MergePolicy = MergePolicy {
    kind: SourceKind::Company,
    table: "empresa",
    columns: &[
        key("cnpj_basico"),
        coalesce("razao_social"),
        coalesce("natureza_juridica"),
        coalesce("qualificacao_responsavel"),
        numeric("capital_social"),
        coalesce("porte_empresa"),
        coalesce("ente_federativo_responsavel"),
    ],
    insert_rule: InsertRule::RequireNonBlank("razao_social"),
    stamp_triggers: &["razao_social", "natureza_juridica"],
};

pub static ESTABLISHMENT: MergePolicy = MergePolicy {
    kind: SourceKind::Establishment,
    table: "estabelecimento",
    columns: &[
        key("cnpj_basico"),
        key("cnpj_ordem"),
        key("cnpj_dv"),
        coalesce("identificador_matriz_filial"),
        coalesce("nome_fantasia"),
        coalesce("situacao_cadastral"),
        coalesce("data_situacao_cadastral"),
        coalesce("motivo_situacao_cadastral"),
        coalesce("nome_cidade_exterior"),
        coalesce("pais"),
        coalesce("data_inicio_atividade"),
        coalesce("cnae_fiscal_principal"),
        coalesce("cnae_fiscal_secundaria"),
        coalesce("tipo_logradouro"),
        coalesce("logradouro"),
        coalesce("numero"),
        coalesce("complemento"),
        coalesce("bairro"),
        coalesce("cep"),
        coalesce("uf"),
        coalesce("municipio"),
        coalesce("ddd1"),
        coalesce("telefone1"),
        coalesce("ddd2"),
        coalesce("telefone2"),
        coalesce("ddd_fax"),
        coalesce("fax"),
        coalesce("email"),
        coalesce("situacao_especial"),
        coalesce("data_situacao_especial"),
    ],
    insert_rule: InsertRule::Always,
    stamp_triggers: &[],
};

pub static PARTNER: MergePolicy = MergePolicy {
    kind: SourceKind::Partner,
    table: "socio",
    columns: &[
        key("cnpj_basico"),
        coalesce("identificador_socio"),
        key("nome_socio_razao_social"),
        optional_key("cpf_cnpj_socio"),
        coalesce("qualificacao_socio"),
        coalesce("data_entrada_sociedade"),
        coalesce("pais"),
        coalesce("representante_legal"),
        coalesce("nome_representante_legal"),
        coalesce("qualificacao_representante_legal"),
        coalesce("faixa_etaria"),
    ],
    insert_rule: InsertRule::Always,
    stamp_triggers: &[],
};

pub fn policy_for(kind: SourceKind) -> Option<&'static MergePolicy> {
    match kind {
        SourceKind::Company => Some(&COMPANY),
        SourceKind::Establishment => Some(&ESTABLISHMENT),
        SourceKind::Partner => Some(&PARTNER),
        _ => None,
    }
}

pub fn all_policies() -> [&'static MergePolicy; 3] {
    [&COMPANY, &ESTABLISHMENT, &PARTNER]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policies_match_registry_layouts() {
        assert_eq!(COMPANY.columns.len(), 7);
        assert_eq!(ESTABLISHMENT.columns.len(), 30);
        assert_eq!(PARTNER.columns.len(), 11);
        assert_eq!(COMPANY.key_width(), 1);
        assert_eq!(ESTABLISHMENT.key_width(), 3);
        assert_eq!(PARTNER.key_width(), 3);
    }

    #[test]
    fn stamp_triggers_and_insert_fields_exist() {
        for policy in all_policies() {
            for trigger in policy.stamp_triggers {
                let idx = policy.column_index(trigger).expect("trigger column");
                assert!(!policy.columns[idx].is_key());
            }
            if let InsertRule::RequireNonBlank(field) = policy.insert_rule {
                assert!(policy.column_index(field).is_some());
            }
        }
    }

    #[test]
    fn only_company_capital_is_numeric() {
        let numeric = all_policies()
            .iter()
            .flat_map(|p| p.field_columns())
            .filter(|c| c.rule().is_some_and(FieldRule::is_numeric))
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(numeric, vec!["capital_social"]);
    }
}
