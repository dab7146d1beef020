//! Per-field statistics over a dataset

use crate::dataset::Record;
use crate::template::validate::{is_blank, value_as_string};
use crate::template::Template;
use std::collections::BTreeSet;

/// Fill and distinct-value statistics for one template field
#[derive(Debug, Clone)]
pub struct FieldStats {
    pub field: String,
    pub kind: String,
    pub filled: usize,
    pub empty: usize,
    /// Percentage of records with a non-blank value
    pub fill_rate: f64,
    pub distinct_count: usize,
    /// Distinct non-blank values, sorted for deterministic output
    pub distinct_values: Vec<String>,
}

/// Compute statistics for every template field across a dataset.
///
/// Fields are reported in template declaration order; records may omit any
/// field. Blank values (null or whitespace-only strings) count as empty.
pub fn dataset_statistics(template: &Template, records: &[Record]) -> Vec<FieldStats> {
    let total = records.len();
    let mut stats = Vec::with_capacity(template.fields.len());

    for (key, spec) in template.fields.iter() {
        let mut filled = 0usize;
        let mut distinct: BTreeSet<String> = BTreeSet::new();

        for record in records {
            match record.get(key) {
                Some(value) if !is_blank(value) => {
                    filled += 1;
                    distinct.insert(value_as_string(value));
                }
                _ => {}
            }
        }

        let fill_rate = if total > 0 {
            filled as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        stats.push(FieldStats {
            field: key.to_string(),
            kind: spec.kind.as_str().to_string(),
            filled,
            empty: total - filled,
            fill_rate,
            distinct_count: distinct.len(),
            distinct_values: distinct.into_iter().collect(),
        });
    }

    stats
}
