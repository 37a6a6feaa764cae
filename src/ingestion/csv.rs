//! Census extract reader.
//!
//! The extract is a delimited text file (semicolon-separated, Latin-1 by default) whose header
//! carries the census variable names. Only the columns declared in the [`Schema`] are read;
//! any other source column is ignored.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use encoding_rs::Encoding;
use log::{debug, warn};
use serde::Deserialize;

use crate::error::{CensusError, CensusResult};
use crate::types::{DataSet, DataType, Schema, Value};

/// What to do with a value that does not parse under its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParsePolicy {
    /// Abort ingestion with [`CensusError::ParseError`].
    #[default]
    Strict,
    /// Store `Null` and keep going; coerced cells are counted and logged.
    CoerceToNull,
}

/// Options for [`ingest_census_extract`].
#[derive(Debug, Clone, Copy)]
pub struct ExtractOptions {
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Text encoding of the file.
    pub encoding: &'static Encoding,
    pub parse_policy: ParsePolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            encoding: encoding_rs::WINDOWS_1252,
            parse_policy: ParsePolicy::Strict,
        }
    }
}

/// Resolve an encoding label such as `ISO-8859-1` or `utf-8`.
///
/// Latin-1 labels resolve to windows-1252, its superset.
pub fn encoding_for_label(label: &str) -> CensusResult<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| CensusError::Encoding {
        label: label.to_string(),
    })
}

/// Ingest the census extract at `path` into a [`DataSet`] typed by `schema`.
///
/// Rules:
///
/// - the file must have a header row;
/// - the header must contain every schema field (order may differ);
/// - every record must have as many fields as the header; a short or long row is a
///   [`CensusError::Csv`] error, whatever the parse policy;
/// - each value is parsed according to its field type, per `options.parse_policy`;
/// - a completely empty field is `Null`. Text is stored untrimmed; see
///   [`super::filter::normalize_text`].
pub fn ingest_census_extract(
    path: impl AsRef<Path>,
    schema: &Schema,
    options: &ExtractOptions,
) -> CensusResult<DataSet> {
    let file = File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .from_reader(file);
    ingest_census_from_reader(&mut rdr, schema, options)
}

/// Ingest the census extract from an existing CSV reader.
pub fn ingest_census_from_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    schema: &Schema,
    options: &ExtractOptions,
) -> CensusResult<DataSet> {
    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .map(|h| decode(h, options.encoding).trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    // Map schema fields -> source column indexes (allows re-ordered columns).
    let mut col_idxs = Vec::with_capacity(schema.fields.len());
    for field in &schema.fields {
        match headers.iter().position(|h| *h == field.name) {
            Some(idx) => col_idxs.push(idx),
            None => {
                return Err(CensusError::MissingColumn {
                    column: field.name.clone(),
                    headers,
                });
            }
        }
    }
    debug!(
        "extract header has {} columns, reading {}",
        headers.len(),
        col_idxs.len()
    );

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut coerced = 0usize;
    let mut record = csv::ByteRecord::new();
    let mut row_idx0 = 0usize;
    while rdr.read_byte_record(&mut record)? {
        // 1-based row number for users; +1 again because the header is row 1.
        let user_row = row_idx0 + 2;
        row_idx0 += 1;

        let mut row: Vec<Value> = Vec::with_capacity(schema.fields.len());
        for (field, &src_idx) in schema.fields.iter().zip(col_idxs.iter()) {
            let raw = record
                .get(src_idx)
                .map(|b| decode(b, options.encoding))
                .unwrap_or_default();
            match parse_typed_value(user_row, &field.name, field.data_type, &raw) {
                Ok(v) => row.push(v),
                Err(e) if options.parse_policy == ParsePolicy::CoerceToNull => {
                    debug!("{e}; stored as null");
                    coerced += 1;
                    row.push(Value::Null);
                }
                Err(e) => return Err(e),
            }
        }
        rows.push(row);
    }

    if coerced > 0 {
        warn!("{coerced} unparseable value(s) coerced to null");
    }

    Ok(DataSet::new(schema.clone(), rows))
}

fn decode(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

fn parse_typed_value(
    row: usize,
    column: &str,
    data_type: DataType,
    raw: &str,
) -> CensusResult<Value> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }

    let parse_err = |message: String| CensusError::ParseError {
        row,
        column: column.to_owned(),
        raw: raw.to_owned(),
        message,
    };

    match data_type {
        DataType::Text => Ok(Value::Text(raw.to_owned())),
        DataType::SmallInt | DataType::Int64 => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            if data_type == DataType::SmallInt {
                trimmed
                    .parse::<i16>()
                    .map(Value::SmallInt)
                    .map_err(|e| parse_err(e.to_string()))
            } else {
                trimmed
                    .parse::<i64>()
                    .map(Value::Int64)
                    .map_err(|e| parse_err(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{encoding_for_label, parse_typed_value};
    use crate::error::CensusError;
    use crate::types::{DataType, Value};

    #[test]
    fn latin1_labels_resolve() {
        assert!(encoding_for_label("ISO-8859-1").is_ok());
        assert!(encoding_for_label("latin1").is_ok());
        assert!(matches!(
            encoding_for_label("klingon"),
            Err(CensusError::Encoding { .. })
        ));
    }

    #[test]
    fn numeric_values_are_trimmed_and_typed() {
        assert_eq!(parse_typed_value(2, "IN_X", DataType::SmallInt, " 1 ").unwrap(), Value::SmallInt(1));
        assert_eq!(parse_typed_value(2, "QT_X", DataType::Int64, "   ").unwrap(), Value::Null);
        assert_eq!(
            parse_typed_value(2, "NO_X", DataType::Text, "  Escola ").unwrap(),
            Value::Text("  Escola ".to_string())
        );
    }

    #[test]
    fn small_int_out_of_range_is_parse_error() {
        let err = parse_typed_value(7, "IN_X", DataType::SmallInt, "70000").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("row 7"));
        assert!(msg.contains("column 'IN_X'"));
    }
}
