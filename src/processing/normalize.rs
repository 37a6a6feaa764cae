//! Zero-as-missing recoding for quantitative columns.
//!
//! A count of 0 in the census extract means "nothing to report". Recoding it to `Null` keeps the
//! long fact tables from carrying one row per zero count. Boolean-coded and text columns are never
//! recoded: a boolean 0 is a reported "no".

use log::debug;

use crate::dictionary::AttributeDictionary;
use crate::types::{DataSet, DataType, Value};

/// Columns to recode: quantitative per the dictionary, present in `dataset`, and `Int64`-typed.
///
/// Returned in dictionary order.
pub fn quantitative_columns(dictionary: &AttributeDictionary, dataset: &DataSet) -> Vec<String> {
    dictionary
        .descriptors()
        .iter()
        .filter(|d| d.is_quantitative())
        .filter(|d| {
            dataset
                .schema
                .field(&d.variable)
                .is_some_and(|f| f.data_type == DataType::Int64)
        })
        .map(|d| d.variable.clone())
        .collect()
}

/// Replace `Int64(0)` by `Null` in exactly `columns`. Idempotent.
pub fn zero_as_missing(dataset: &DataSet, columns: &[String]) -> DataSet {
    let idxs: Vec<usize> = columns
        .iter()
        .filter_map(|c| dataset.schema.index_of(c))
        .collect();

    dataset.map_rows(|row| {
        let mut out = row.to_vec();
        for &i in &idxs {
            if out[i] == Value::Int64(0) {
                out[i] = Value::Null;
            }
        }
        out
    })
}

/// [`quantitative_columns`] followed by [`zero_as_missing`].
pub fn normalize_quantities(dataset: &DataSet, dictionary: &AttributeDictionary) -> DataSet {
    let columns = quantitative_columns(dictionary, dataset);
    debug!("recoding zero as missing in {} quantitative columns", columns.len());
    zero_as_missing(dataset, &columns)
}
