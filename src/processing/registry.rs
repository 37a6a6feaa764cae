//! School registry extraction from the GERAL slice.

use std::path::Path;

use log::debug;

use crate::dictionary::{AttributeDictionary, DomainArea};
use crate::error::CensusResult;
use crate::persist;
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Columns joined (in this order) into `endereco`.
pub const ADDRESS_COLUMNS: [&str; 5] = ["DS_ENDERECO", "NU_ENDERECO", "DS_COMPLEMENTO", "NO_BAIRRO", "CO_CEP"];

/// Columns concatenated (in this order) into `telefone`.
pub const PHONE_COLUMNS: [&str; 2] = ["NU_DDD", "NU_TELEFONE"];

const ADDRESS_SEPARATOR: &str = ", ";

/// Raw variable name → registry column name.
pub const REGISTRY_RENAMES: [(&str, &str); 12] = [
    ("NO_ENTIDADE", "nome_escola"),
    ("CO_ENTIDADE", "id_escola"),
    ("NO_MUNICIPIO", "nome_municipio"),
    ("CO_MUNICIPIO", "id_municipio"),
    ("NO_MESORREGIAO", "nome_mesorregiao"),
    ("CO_MESORREGIAO", "id_mesorregiao"),
    ("TP_DEPENDENCIA", "dependencia"),
    ("TP_LOCALIZACAO", "localizacao"),
    ("TP_SITUACAO_FUNCIONAMENTO", "funcionamento"),
    ("CO_ESCOLA_SEDE_VINCULADA", "sede"),
    ("IN_LOCAL_FUNC_PREDIO_ESCOLAR", "alocacao"),
    ("TP_OCUPACAO_PREDIO_ESCOLAR", "ocupacao"),
];

fn registry_name(variable: &str) -> &str {
    REGISTRY_RENAMES
        .iter()
        .find(|(from, _)| *from == variable)
        .map_or(variable, |(_, to)| *to)
}

/// Build the registry table: one row per school with the GERAL columns present in `dataset`.
///
/// The 12 registry columns are renamed, `endereco` and `telefone` are appended as text, and their
/// constituent columns are dropped. A missing constituent contributes `""`; an all-empty address
/// is kept as `", , , , "` while an empty phone becomes `Null`.
pub fn extract_registry(dataset: &DataSet, dictionary: &AttributeDictionary) -> DataSet {
    let is_part = |name: &str| ADDRESS_COLUMNS.contains(&name) || PHONE_COLUMNS.contains(&name);

    let mut kept: Vec<usize> = Vec::new();
    let mut fields: Vec<Field> = Vec::new();
    for descriptor in dictionary.rows_for_area(&DomainArea::Geral) {
        let Some(idx) = dataset.schema.index_of(&descriptor.variable) else {
            debug!("registry column '{}' not in extract, skipped", descriptor.variable);
            continue;
        };
        if is_part(&descriptor.variable) {
            continue;
        }
        kept.push(idx);
        let source = &dataset.schema.fields[idx];
        fields.push(Field::new(registry_name(&source.name), source.data_type));
    }
    fields.push(Field::new("endereco", DataType::Text));
    fields.push(Field::new("telefone", DataType::Text));

    let address_idx: Vec<Option<usize>> = ADDRESS_COLUMNS.iter().map(|c| dataset.schema.index_of(c)).collect();
    let phone_idx: Vec<Option<usize>> = PHONE_COLUMNS.iter().map(|c| dataset.schema.index_of(c)).collect();
    let text_of = |row: &[Value], idx: Option<usize>| idx.map(|i| row[i].to_text()).unwrap_or_default();

    let rows = dataset
        .rows
        .iter()
        .map(|row| {
            let mut out: Vec<Value> = kept.iter().map(|&i| row[i].clone()).collect();

            let endereco = address_idx
                .iter()
                .map(|&i| text_of(row, i))
                .collect::<Vec<_>>()
                .join(ADDRESS_SEPARATOR);
            out.push(Value::Text(endereco));

            let telefone: String = phone_idx.iter().map(|&i| text_of(row, i)).collect();
            out.push(if telefone.is_empty() {
                Value::Null
            } else {
                Value::Text(telefone)
            });
            out
        })
        .collect();

    DataSet::new(Schema::new(fields), rows)
}

/// Re-read a persisted registry table; every column comes back as text.
pub fn read_registry_table(path: impl AsRef<Path>) -> CensusResult<DataSet> {
    persist::read_text_table(path.as_ref())
}
