//! Raw extract ingestion.
//!
//! Most callers should use [`ingest`], which:
//!
//! - reads the extract under the resolved schema ([`csv::ingest_census_extract`])
//! - keeps only the target region's non-private schools ([`filter::apply_region_filter`])
//! - trims text columns, turning blanks into nulls ([`filter::normalize_text`])

pub mod csv;
pub mod filter;

use std::path::Path;

use log::info;

use crate::error::CensusResult;
use crate::execution::ExecutionEngine;
use crate::types::{DataSet, Schema};

pub use self::csv::{
    encoding_for_label, ingest_census_extract, ingest_census_from_reader, ExtractOptions, ParsePolicy,
};
pub use filter::{apply_region_filter, normalize_text, RegionFilter};

/// Read, filter and normalize the census extract.
pub fn ingest(
    path: impl AsRef<Path>,
    schema: &Schema,
    options: &ExtractOptions,
    region: &RegionFilter,
    engine: &ExecutionEngine,
) -> CensusResult<DataSet> {
    let path = path.as_ref();
    let raw = ingest_census_extract(path, schema, options)?;
    let filtered = apply_region_filter(&raw, region, engine)?;
    info!(
        "ingested {} rows from {}, {} kept for {} (ownership < {})",
        raw.row_count(),
        path.display(),
        filtered.row_count(),
        region.region,
        region.private_threshold
    );
    Ok(normalize_text(&filtered))
}
