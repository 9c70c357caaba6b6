//! Source folder discovery and file classification.
//!
//! The registry publishes one folder per snapshot period (`YYYY-MM`). Every
//! file inside is classified by matching its upper-cased name against an
//! ordered list of substring patterns; the first match wins. Compressed
//! archives and unrecognized names are ignored.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::kind::SourceKind;

const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

/// Built-in priority list: exact registry suffixes before looser fragments.
const BUILTIN_PATTERNS: &[(&str, SourceKind)] = &[
    ("EMPRECSV", SourceKind::Company),
    ("ESTABLELE", SourceKind::Establishment),
    ("ESTABELE", SourceKind::Establishment),
    ("ESTABEL", SourceKind::Establishment),
    ("SOCIOCSV", SourceKind::Partner),
    ("CNAECSV", SourceKind::Activity),
    ("MUNICCSV", SourceKind::Municipality),
    ("NATJUCSV", SourceKind::LegalNature),
    ("PAISCSV", SourceKind::Country),
    ("QUALSCSV", SourceKind::PartnerQualification),
    ("MOTICSV", SourceKind::SituationReason),
    ("EMPRE", SourceKind::Company),
    ("ESTAB", SourceKind::Establishment),
    ("FILIAL", SourceKind::Establishment),
    ("SOCIO", SourceKind::Partner),
    ("CNAE", SourceKind::Activity),
    ("MUNIC", SourceKind::Municipality),
    ("NATJ", SourceKind::LegalNature),
    ("PAIS", SourceKind::Country),
    ("QUAL", SourceKind::PartnerQualification),
    ("MOTIC", SourceKind::SituationReason),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<PatternRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Classifier {
    pub fn builtin() -> Self {
        Self::with_overrides(&[])
    }

    /// Extra rules are evaluated ahead of the built-in list.
    pub fn with_overrides(extra: &[PatternRule]) -> Self {
        let rules = extra
            .iter()
            .filter(|rule| !rule.pattern.trim().is_empty())
            .map(|rule| PatternRule {
                pattern: rule.pattern.trim().to_ascii_uppercase(),
                kind: rule.kind,
            })
            .chain(BUILTIN_PATTERNS.iter().map(|(pattern, kind)| PatternRule {
                pattern: (*pattern).to_string(),
                kind: *kind,
            }))
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn classify(&self, file_name: &str) -> Option<SourceKind> {
        let upper = file_name.to_ascii_uppercase();
        self.rules
            .iter()
            .find(|rule| upper.contains(rule.pattern.as_str()))
            .map(|rule| rule.kind)
    }
}

/// A classified file together with the raw period token of its folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub kind: SourceKind,
    pub period_token: String,
    pub path: PathBuf,
}

fn period_folder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}-\d{2}$").expect("static period regex"))
}

pub fn is_period_folder_name(name: &str) -> bool {
    period_folder_pattern().is_match(name)
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Listing directory {dir:?}"))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Reading entries of {dir:?}"))?;
    entries.sort();
    Ok(entries)
}

/// Walks `root` and classifies every file found in its period folders.
pub fn discover(root: &Path, classifier: &Classifier) -> Result<Vec<DiscoveredFile>> {
    if !root.is_dir() {
        bail!("Source root {root:?} does not exist or is not a directory");
    }
    let mut discovered = Vec::new();
    for folder in sorted_entries(root)? {
        let Some(token) = folder.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !folder.is_dir() || !is_period_folder_name(token) {
            continue;
        }
        let token = token.to_string();
        let files = match sorted_entries(&folder) {
            Ok(files) => files,
            Err(err) => {
                warn!("Skipping unreadable period folder {folder:?}: {err:#}");
                continue;
            }
        };
        let before = discovered.len();
        for path in files {
            if !path.is_file() || is_archive(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match classifier.classify(name) {
                Some(kind) => discovered.push(DiscoveredFile {
                    kind,
                    period_token: token.clone(),
                    path,
                }),
                None => debug!("Ignoring unrecognized file {path:?}"),
            }
        }
        info!(
            "Period folder {token}: {} classified file(s)",
            discovered.len() - before
        );
    }
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_suffixes_classify_by_first_match() {
        let classifier = Classifier::builtin();
        assert_eq!(
            classifier.classify("K3241.K03200Y0.D30513.EMPRECSV"),
            Some(SourceKind::Company)
        );
        assert_eq!(
            classifier.classify("k3241.k03200y1.d30513.estabele"),
            Some(SourceKind::Establishment)
        );
        assert_eq!(
            classifier.classify("F.K03200$Z.D30513.QUALSCSV"),
            Some(SourceKind::PartnerQualification)
        );
        assert_eq!(classifier.classify("Socios7.csv"), Some(SourceKind::Partner));
        assert_eq!(classifier.classify("filial_2023.txt"), Some(SourceKind::Establishment));
        assert_eq!(classifier.classify("readme.txt"), None);
    }

    #[test]
    fn overrides_take_priority_over_builtins() {
        let classifier = Classifier::with_overrides(&[PatternRule {
            pattern: "rfb_cad".into(),
            kind: SourceKind::Company,
        }]);
        assert_eq!(
            Classifier::builtin().classify("RFB_CADASTRO_SOCIOS.csv"),
            Some(SourceKind::Partner)
        );
        assert_eq!(
            classifier.classify("RFB_CADASTRO_SOCIOS.csv"),
            Some(SourceKind::Company)
        );
        assert_eq!(classifier.rules()[0].pattern, "RFB_CAD");
    }

    #[test]
    fn period_folder_names_require_year_dash_month() {
        assert!(is_period_folder_name("2024-01"));
        assert!(!is_period_folder_name("2024-1"));
        assert!(!is_period_folder_name("backup"));
    }

    #[test]
    fn archive_detection_is_case_insensitive() {
        assert!(is_archive(Path::new("Empresas0.ZIP")));
        assert!(is_archive(Path::new("Empresas0.zip")));
        assert!(!is_archive(Path::new("K3241.EMPRECSV")));
    }
}
