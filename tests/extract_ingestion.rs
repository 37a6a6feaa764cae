use std::time::{SystemTime, UNIX_EPOCH};

use censo_escolar::execution::{ExecutionEngine, ExecutionOptions};
use censo_escolar::ingestion::{
    apply_region_filter, ingest_census_extract, ingest_census_from_reader, normalize_text, ExtractOptions,
    ParsePolicy, RegionFilter,
};
use censo_escolar::types::{DataType, Field, Schema, Value};
use censo_escolar::CensusError;

fn school_schema() -> Schema {
    Schema::new(vec![
        Field::new("CO_ENTIDADE", DataType::Int64),
        Field::new("SG_UF", DataType::Text),
        Field::new("NO_ENTIDADE", DataType::Text),
        Field::new("TP_DEPENDENCIA", DataType::SmallInt),
    ])
}

fn reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b';')
        .from_reader(bytes)
}

fn engine() -> ExecutionEngine {
    ExecutionEngine::new(ExecutionOptions {
        num_threads: Some(2),
        chunk_size: 1,
        max_in_flight_chunks: 2,
    })
    .unwrap()
}

#[test]
fn latin1_extract_with_reordered_and_extra_columns() {
    let input = b"NO_ENTIDADE;IN_IGNORADA;TP_DEPENDENCIA;SG_UF;CO_ENTIDADE\n\
        ESCOLA S\xC3O JO\xC3O ;9;2;AL;27000001\n";
    let ds = ingest_census_from_reader(&mut reader(input), &school_schema(), &ExtractOptions::default()).unwrap();

    assert_eq!(ds.row_count(), 1);
    assert_eq!(
        ds.rows[0],
        vec![
            Value::Int64(27000001),
            Value::Text("AL".to_string()),
            Value::Text("ESCOLA SÃO JOÃO ".to_string()),
            Value::SmallInt(2),
        ]
    );
}

#[test]
fn missing_schema_column_is_reported_with_headers() {
    let input = b"CO_ENTIDADE;SG_UF;NO_ENTIDADE\n1;AL;X\n";
    let err = ingest_census_from_reader(&mut reader(input), &school_schema(), &ExtractOptions::default())
        .unwrap_err();
    assert!(matches!(err, CensusError::MissingColumn { ref column, ref headers }
        if column == "TP_DEPENDENCIA" && headers.len() == 3));
    assert_eq!(err.exit_code(), 4);
}

fn is_unequal_lengths(err: &CensusError) -> bool {
    matches!(err, CensusError::Csv(e) if matches!(e.kind(), csv::ErrorKind::UnequalLengths { .. }))
}

#[test]
fn short_row_in_extract_file_is_rejected() {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let path = std::env::temp_dir().join(format!("censo-escolar-short-row-{nanos}.csv"));
    std::fs::write(&path, "CO_ENTIDADE;SG_UF;NO_ENTIDADE;TP_DEPENDENCIA
1;AL;A;2
2;AL
").unwrap();

    for policy in [ParsePolicy::Strict, ParsePolicy::CoerceToNull] {
        let options = ExtractOptions {
            parse_policy: policy,
            ..ExtractOptions::default()
        };
        let err = ingest_census_extract(&path, &school_schema(), &options).unwrap_err();
        assert!(is_unequal_lengths(&err), "{policy:?}: {err}");
        assert_eq!(err.exit_code(), 4);
    }
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn long_row_is_rejected() {
    let input = b"CO_ENTIDADE;SG_UF;NO_ENTIDADE;TP_DEPENDENCIA
1;AL;A;2;EXTRA
";
    let err = ingest_census_from_reader(&mut reader(input), &school_schema(), &ExtractOptions::default())
        .unwrap_err();
    assert!(is_unequal_lengths(&err), "{err}");
}

#[test]
fn strict_policy_names_row_column_and_raw_value() {
    let input = b"CO_ENTIDADE;SG_UF;NO_ENTIDADE;TP_DEPENDENCIA\n1;AL;A;2\n2;AL;B;dois\n";
    let err = ingest_census_from_reader(&mut reader(input), &school_schema(), &ExtractOptions::default())
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("row 3"));
    assert!(msg.contains("column 'TP_DEPENDENCIA'"));
    assert!(msg.contains("raw='dois'"));
}

#[test]
fn coerce_policy_nulls_bad_values() {
    let input = b"CO_ENTIDADE;SG_UF;NO_ENTIDADE;TP_DEPENDENCIA\nx1;AL;A;2\n";
    let options = ExtractOptions {
        parse_policy: ParsePolicy::CoerceToNull,
        ..ExtractOptions::default()
    };
    let ds = ingest_census_from_reader(&mut reader(input), &school_schema(), &options).unwrap();
    assert_eq!(ds.rows[0][0], Value::Null);
    assert_eq!(ds.rows[0][3], Value::SmallInt(2));
}

#[test]
fn region_filter_then_text_normalization() {
    let input = b"CO_ENTIDADE;SG_UF;NO_ENTIDADE;TP_DEPENDENCIA\n\
        1;AL; A ;1\n\
        2;AL;B;4\n\
        3;PE;C;2\n\
        4;AL;   ;3\n\
        5;AL;E;\n";
    let ds = ingest_census_from_reader(&mut reader(input), &school_schema(), &ExtractOptions::default()).unwrap();
    let filter = RegionFilter {
        region_column: "SG_UF".to_string(),
        region: "AL".to_string(),
        ownership_column: "TP_DEPENDENCIA".to_string(),
        private_threshold: 4,
    };
    let kept = normalize_text(&apply_region_filter(&ds, &filter, &engine()).unwrap());

    let ids: Vec<_> = kept.rows.iter().map(|r| r[0].clone()).collect();
    assert_eq!(ids, vec![Value::Int64(1), Value::Int64(4)]);
    assert_eq!(kept.rows[0][2], Value::Text("A".to_string()));
    assert_eq!(kept.rows[1][2], Value::Null);
}
