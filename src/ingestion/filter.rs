//! Region/ownership row filter and text normalization for the raw extract.

use crate::error::{CensusError, CensusResult};
use crate::execution::ExecutionEngine;
use crate::types::{DataSet, DataType, Value};

/// Keeps rows of one region whose ownership category is below the private threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFilter {
    /// Column holding the region code (e.g. `SG_UF`).
    pub region_column: String,
    /// Region code to keep (e.g. `AL`).
    pub region: String,
    /// Column holding the ownership category (e.g. `TP_DEPENDENCIA`).
    pub ownership_column: String,
    /// Rows with ownership `>=` this value (private schools) are dropped.
    pub private_threshold: i64,
}

impl RegionFilter {
    /// Column indexes of the region and ownership columns.
    fn indexes(&self, dataset: &DataSet) -> CensusResult<(usize, usize)> {
        let idx = |name: &str| {
            dataset
                .schema
                .index_of(name)
                .ok_or_else(|| CensusError::MissingColumn {
                    column: name.to_string(),
                    headers: dataset.schema.field_names().map(str::to_string).collect(),
                })
        };
        Ok((idx(&self.region_column)?, idx(&self.ownership_column)?))
    }

    /// Whether a row passes the filter. A null ownership category never passes.
    fn keeps(&self, row: &[Value], region_idx: usize, ownership_idx: usize) -> bool {
        let region_ok = row[region_idx].to_text().trim() == self.region;
        let ownership_ok = row[ownership_idx]
            .as_i64()
            .is_some_and(|v| v < self.private_threshold);
        region_ok && ownership_ok
    }
}

/// Apply `filter` to `dataset` on the engine's thread pool. Row order is preserved.
pub fn apply_region_filter(
    dataset: &DataSet,
    filter: &RegionFilter,
    engine: &ExecutionEngine,
) -> CensusResult<DataSet> {
    let (region_idx, ownership_idx) = filter.indexes(dataset)?;
    Ok(engine.filter_parallel(dataset, |row| filter.keeps(row, region_idx, ownership_idx)))
}

/// Trim every text column; a value that is empty after trimming becomes `Null`.
///
/// This is one-way: "was null" and "was empty" are not distinguishable afterwards.
pub fn normalize_text(dataset: &DataSet) -> DataSet {
    let text_idxs: Vec<usize> = dataset
        .schema
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.data_type == DataType::Text)
        .map(|(i, _)| i)
        .collect();

    dataset.map_rows(|row| {
        let mut out = row.to_vec();
        for &i in &text_idxs {
            if let Value::Text(s) = &out[i] {
                let trimmed = s.trim();
                out[i] = if trimmed.is_empty() {
                    Value::Null
                } else {
                    Value::Text(trimmed.to_string())
                };
            }
        }
        out
    })
}
