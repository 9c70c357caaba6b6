//! Chronological ordering of discovered files per source kind.

use std::{collections::BTreeMap, path::PathBuf};

use itertools::Itertools;

use crate::{discovery::DiscoveredFile, error::PeriodError, kind::SourceKind, period::Period};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedFile {
    pub kind: SourceKind,
    pub period: Period,
    pub path: PathBuf,
}

pub type LoadPlan = BTreeMap<SourceKind, Vec<SequencedFile>>;

/// Groups files by kind and orders each group oldest period first.
///
/// Fails on the first period token that does not parse; a misordered merge
/// cannot be undone, so nothing is sequenced unless every token is valid.
pub fn sequence(files: Vec<DiscoveredFile>) -> Result<LoadPlan, PeriodError> {
    let mut parsed = files
        .into_iter()
        .map(|file| {
            Ok(SequencedFile {
                period: file.period_token.parse()?,
                kind: file.kind,
                path: file.path,
            })
        })
        .collect::<Result<Vec<_>, PeriodError>>()?;
    parsed.sort_by(|a, b| a.period.cmp(&b.period).then_with(|| a.path.cmp(&b.path)));
    Ok(parsed
        .into_iter()
        .map(|file| (file.kind, file))
        .into_group_map()
        .into_iter()
        .collect())
}

/// The most recent file of a group, used for wholesale reference reloads.
pub fn newest(files: &[SequencedFile]) -> Option<&SequencedFile> {
    files.last()
}
