//! Flat-file persistence of pipeline artifacts.
//!
//! Every output table is comma-separated UTF-8 with a leading byte-order mark, and always carries
//! a header row, even when empty. Readers strip the mark so tables can be re-read by later stages.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use crate::error::CensusResult;
use crate::types::{DataSet, DataType, Field, Schema, Value};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Create `path` (and its parent directories), write the BOM and the header row.
pub fn create_csv_writer(
    path: &Path,
    headers: &[&str],
) -> CensusResult<csv::Writer<BufWriter<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(UTF8_BOM)?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    wtr.write_record(headers)?;
    Ok(wtr)
}

/// Open a UTF-8 delimited file with headers, ignoring a leading BOM.
pub fn open_csv_reader(path: &Path, delimiter: u8) -> CensusResult<csv::Reader<Cursor<Vec<u8>>>> {
    let mut bytes = fs::read(path)?;
    if bytes.starts_with(UTF8_BOM) {
        let _ = bytes.drain(..UTF8_BOM.len());
    }
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .from_reader(Cursor::new(bytes)))
}

/// Write a dataset with its schema field names as header. `Null` cells are written empty.
pub fn write_dataset(dataset: &DataSet, path: &Path) -> CensusResult<()> {
    let headers: Vec<&str> = dataset.schema.field_names().collect();
    let mut wtr = create_csv_writer(path, &headers)?;
    for row in &dataset.rows {
        wtr.write_record(row.iter().map(Value::to_text))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a table written by [`write_dataset`] with every column typed as text.
///
/// Empty cells become `Null`; other cells are kept verbatim.
pub fn read_text_table(path: &Path) -> CensusResult<DataSet> {
    let mut rdr = open_csv_reader(path, b',')?;
    read_text_table_from_reader(&mut rdr)
}

/// Read an all-text table from an existing CSV reader.
pub fn read_text_table_from_reader<R: std::io::Read>(
    rdr: &mut csv::Reader<R>,
) -> CensusResult<DataSet> {
    let schema = Schema::new(
        rdr.headers()?
            .iter()
            .map(|h| Field::new(h.trim(), DataType::Text))
            .collect(),
    );
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = (0..schema.fields.len())
            .map(|i| match record.get(i) {
                None | Some("") => Value::Null,
                Some(s) => Value::Text(s.to_string()),
            })
            .collect();
        rows.push(row);
    }
    Ok(DataSet::new(schema, rows))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{read_text_table, write_dataset};
    use crate::types::{DataSet, DataType, Field, Schema, Value};

    #[test]
    fn dataset_round_trips_through_bom_file() {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let path = std::env::temp_dir()
            .join(format!("censo-escolar-persist-{nanos}"))
            .join("table.csv");

        let ds = DataSet::new(
            Schema::new(vec![
                Field::new("id_escola", DataType::Int64),
                Field::new("nome_escola", DataType::Text),
            ]),
            vec![
                vec![Value::Int64(27000001), Value::Text("Escola São José".to_string())],
                vec![Value::Int64(27000002), Value::Null],
            ],
        );
        write_dataset(&ds, &path).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(b"\xEF\xBB\xBF"));

        let back = read_text_table(&path).unwrap();
        assert_eq!(back.schema.field_names().collect::<Vec<_>>(), vec!["id_escola", "nome_escola"]);
        assert_eq!(back.rows[0][1], Value::Text("Escola São José".to_string()));
        assert_eq!(back.rows[1][1], Value::Null);
    }
}
