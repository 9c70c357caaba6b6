use std::fmt;

use serde::{Deserialize, Serialize};

/// Every file category the registry publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Company,
    Establishment,
    Partner,
    Activity,
    Municipality,
    LegalNature,
    Country,
    PartnerQualification,
    SituationReason,
}

impl SourceKind {
    /// Dictionaries first so lookups exist before the entity tables fill up.
    pub const LOAD_ORDER: [SourceKind; 9] = [
        SourceKind::Activity,
        SourceKind::Municipality,
        SourceKind::LegalNature,
        SourceKind::Country,
        SourceKind::PartnerQualification,
        SourceKind::SituationReason,
        SourceKind::Company,
        SourceKind::Establishment,
        SourceKind::Partner,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            SourceKind::Company => "empresa",
            SourceKind::Establishment => "estabelecimento",
            SourceKind::Partner => "socio",
            SourceKind::Activity => "cnae",
            SourceKind::Municipality => "municipio",
            SourceKind::LegalNature => "natureza_juridica",
            SourceKind::Country => "pais",
            SourceKind::PartnerQualification => "qualificacao_socio",
            SourceKind::SituationReason => "motivo_situacao",
        }
    }

    pub fn is_reference(self) -> bool {
        !matches!(
            self,
            SourceKind::Company | SourceKind::Establishment | SourceKind::Partner
        )
    }

    pub fn reference_kinds() -> impl Iterator<Item = SourceKind> {
        Self::LOAD_ORDER.into_iter().filter(|kind| kind.is_reference())
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
