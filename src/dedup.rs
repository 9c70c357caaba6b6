use std::{collections::HashMap, hash::Hash};

use log::debug;

use crate::record::Record;

#[derive(Debug, Default)]
pub struct Deduplicated<T> {
    pub rows: Vec<T>,
    pub removed: usize,
}

/// Keeps the last occurrence of every key, in the order those last
/// occurrences appear.
pub fn keep_last<T, K, F>(rows: Vec<T>, key_of: F) -> Deduplicated<T>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut last_seen: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        last_seen.insert(key_of(row), idx);
    }
    let total = rows.len();
    let kept = rows
        .into_iter()
        .enumerate()
        .filter(|(idx, row)| last_seen.get(&key_of(row)) == Some(idx))
        .map(|(_, row)| row)
        .collect::<Vec<_>>();
    let removed = total - kept.len();
    if removed > 0 {
        debug!("Removed {removed} duplicate row(s) from batch of {total}");
    }
    Deduplicated {
        rows: kept,
        removed,
    }
}

pub fn deduplicate(records: Vec<Record>) -> Deduplicated<Record> {
    keep_last(records, |record| record.key().clone())
}
