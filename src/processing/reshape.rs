//! Wide ↔ long reshaping of domain attribute slices.
//!
//! [`melt`] turns the wide census rows into [`FactRecord`]s for one domain;
//! [`WideTable::pivot`] turns facts back into one row per school.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::dictionary::{DeclaredType, DomainDictionary};
use crate::error::{CensusError, CensusResult};
use crate::persist;
use crate::types::{DataSet, Value};

/// Header of the persisted fact tables.
pub const FACT_HEADERS: [&str; 6] = ["id", "ano", "id_escola", "id_atributo", "tipo_atributo", "valor"];

/// Names of the census-year and school-id columns in the raw extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdColumns {
    pub year: String,
    pub school: String,
}

impl Default for IdColumns {
    fn default() -> Self {
        Self {
            year: "NU_ANO_CENSO".to_string(),
            school: "CO_ENTIDADE".to_string(),
        }
    }
}

/// One reported attribute value of one school in one census year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRecord {
    /// Sequential id, unique within a fact table.
    pub id: u64,
    pub ano: i64,
    pub id_escola: i64,
    /// Domain-local attribute id.
    pub id_atributo: u32,
    pub tipo_atributo: DeclaredType,
    /// Never `Null`.
    pub valor: Value,
}

/// Unpivot the `domain` attributes of `dataset` into facts.
///
/// Attributes of the domain that the dataset does not carry are skipped. Null values are not
/// emitted: they mean "not reported", not zero. Rows are school-major, then in dictionary order,
/// and numbered `1..=M`.
pub fn melt(
    dataset: &DataSet,
    ids: &IdColumns,
    domain: &DomainDictionary,
) -> CensusResult<Vec<FactRecord>> {
    let id_idx = |name: &str| {
        dataset
            .schema
            .index_of(name)
            .ok_or_else(|| CensusError::MissingColumn {
                column: name.to_string(),
                headers: dataset.schema.field_names().map(str::to_string).collect(),
            })
    };
    let year_idx = id_idx(&ids.year)?;
    let school_idx = id_idx(&ids.school)?;

    let mut value_cols = Vec::with_capacity(domain.len());
    for attr in domain.attributes() {
        match dataset.schema.index_of(&attr.descriptor.variable) {
            Some(idx) => value_cols.push((idx, attr)),
            None => debug!(
                "{} attribute '{}' not in extract, skipped",
                domain.area(),
                attr.descriptor.variable
            ),
        }
    }

    let mut facts = Vec::new();
    let mut skipped_rows = 0usize;
    for row in &dataset.rows {
        let (Some(ano), Some(id_escola)) = (row[year_idx].as_i64(), row[school_idx].as_i64()) else {
            skipped_rows += 1;
            continue;
        };
        for &(idx, attr) in &value_cols {
            if row[idx].is_null() {
                continue;
            }
            facts.push(FactRecord {
                id: 0,
                ano,
                id_escola,
                id_atributo: attr.id,
                tipo_atributo: attr.descriptor.declared_type,
                valor: row[idx].clone(),
            });
        }
    }
    if skipped_rows > 0 {
        warn!(
            "{skipped_rows} row(s) without {} or {} skipped while melting {}",
            ids.year,
            ids.school,
            domain.area()
        );
    }

    for (fact, id) in facts.iter_mut().zip(1u64..) {
        fact.id = id;
    }
    Ok(facts)
}

#[derive(Debug, Serialize, Deserialize)]
struct FactRow {
    id: u64,
    ano: i64,
    id_escola: i64,
    id_atributo: u32,
    tipo_atributo: String,
    valor: String,
}

/// Write a fact table (`id, ano, id_escola, id_atributo, tipo_atributo, valor`).
pub fn write_facts(facts: &[FactRecord], path: impl AsRef<Path>) -> CensusResult<()> {
    let mut wtr = persist::create_csv_writer(path.as_ref(), &FACT_HEADERS)?;
    for f in facts {
        wtr.serialize(FactRow {
            id: f.id,
            ano: f.ano,
            id_escola: f.id_escola,
            id_atributo: f.id_atributo,
            tipo_atributo: f.tipo_atributo.as_str().to_string(),
            valor: f.valor.to_text(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a fact table written by [`write_facts`]; `valor` is typed by `tipo_atributo`.
pub fn read_facts(path: impl AsRef<Path>) -> CensusResult<Vec<FactRecord>> {
    let mut rdr = persist::open_csv_reader(path.as_ref(), b',')?;
    read_facts_from_reader(&mut rdr)
}

/// Read a fact table from an existing CSV reader.
pub fn read_facts_from_reader<R: Read>(rdr: &mut csv::Reader<R>) -> CensusResult<Vec<FactRecord>> {
    let mut facts = Vec::new();
    for (row_idx0, result) in rdr.deserialize::<FactRow>().enumerate() {
        let row = result?;
        let user_row = row_idx0 + 2;
        let parse_err = |message: String| CensusError::ParseError {
            row: user_row,
            column: "valor".to_string(),
            raw: row.valor.clone(),
            message,
        };
        let tipo = DeclaredType::from_label(&row.tipo_atributo).ok_or_else(|| CensusError::ParseError {
            row: user_row,
            column: "tipo_atributo".to_string(),
            raw: row.tipo_atributo.clone(),
            message: "unknown attribute type".to_string(),
        })?;
        let raw = row.valor.trim();
        let valor = match tipo {
            DeclaredType::Char => Value::Text(raw.to_string()),
            DeclaredType::Bool => raw
                .parse::<i16>()
                .map(Value::SmallInt)
                .map_err(|e| parse_err(e.to_string()))?,
            DeclaredType::Num => raw
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|e| parse_err(e.to_string()))?,
        };
        facts.push(FactRecord {
            id: row.id,
            ano: row.ano,
            id_escola: row.id_escola,
            id_atributo: row.id_atributo,
            tipo_atributo: tipo,
            valor,
        });
    }
    Ok(facts)
}

/// A wide cell after re-pivoting.
///
/// `Unset` means no fact exists for this school and attribute; the rating stage scores it as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Unset,
    Reported(Value),
}

/// One row per school, one column per domain attribute name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideTable {
    columns: Vec<String>,
    column_index: HashMap<String, usize>,
    schools: Vec<i64>,
    row_index: HashMap<i64, usize>,
    cells: Vec<Vec<Cell>>,
}

impl WideTable {
    /// Pivot `facts` onto the rows `schools` (in that order, duplicates collapsed) and the columns
    /// of `domain` (in dictionary order).
    ///
    /// Facts for other schools are ignored. Facts whose attribute id is unknown to `domain` are
    /// logged and ignored. Two facts for the same school and attribute are an error.
    pub fn pivot<'a>(
        facts: impl IntoIterator<Item = &'a FactRecord>,
        domain: &DomainDictionary,
        schools: &[i64],
    ) -> CensusResult<Self> {
        let columns: Vec<String> = domain.names().map(str::to_string).collect();
        let column_index: HashMap<String, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();

        let mut row_index = HashMap::with_capacity(schools.len());
        let mut ordered = Vec::with_capacity(schools.len());
        for &s in schools {
            if let std::collections::hash_map::Entry::Vacant(e) = row_index.entry(s) {
                let _ = e.insert(ordered.len());
                ordered.push(s);
            }
        }

        let mut cells = vec![vec![Cell::Unset; columns.len()]; ordered.len()];
        let mut unknown_ids = 0usize;
        for fact in facts {
            let Some(&row) = row_index.get(&fact.id_escola) else {
                continue;
            };
            let Some(attr) = domain.by_id(fact.id_atributo) else {
                unknown_ids += 1;
                continue;
            };
            let col = column_index[attr.descriptor.variable.as_str()];
            let cell = &mut cells[row][col];
            if *cell != Cell::Unset {
                return Err(CensusError::DuplicateFact {
                    school_id: fact.id_escola,
                    attribute: attr.descriptor.variable.clone(),
                });
            }
            *cell = Cell::Reported(fact.valor.clone());
        }
        if unknown_ids > 0 {
            warn!(
                "{unknown_ids} {} fact(s) reference attribute ids missing from the dictionary",
                domain.area()
            );
        }

        Ok(Self {
            columns,
            column_index,
            schools: ordered,
            row_index,
            cells,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    /// Row index, in pivot order.
    pub fn schools(&self) -> &[i64] {
        &self.schools
    }

    pub fn row(&self, school_id: i64) -> Option<&[Cell]> {
        self.row_index
            .get(&school_id)
            .map(|&i| self.cells[i].as_slice())
    }

    pub fn cell(&self, school_id: i64, column: &str) -> Option<&Cell> {
        let col = self.column_index(column)?;
        self.row(school_id).map(|r| &r[col])
    }
}

#[cfg(test)]
mod tests {
    use super::{melt, read_facts_from_reader, Cell, FactRecord, IdColumns, WideTable, FACT_HEADERS};
    use crate::dictionary::{AttributeDescriptor, AttributeDictionary, DeclaredType, DomainArea};
    use crate::error::CensusError;
    use crate::schema::resolve;
    use crate::types::{DataSet, Schema, Value};

    fn domain_abc() -> (crate::dictionary::DomainDictionary, Schema) {
        let dict = AttributeDictionary::new(vec![
            AttributeDescriptor::new("NU_ANO_CENSO", DeclaredType::Num, Some(4), DomainArea::Geral),
            AttributeDescriptor::new("CO_ENTIDADE", DeclaredType::Num, Some(8), DomainArea::Geral),
            AttributeDescriptor::new("QT_A", DeclaredType::Num, Some(4), DomainArea::Infraestrutura),
            AttributeDescriptor::new("IN_B", DeclaredType::Num, Some(1), DomainArea::Infraestrutura),
            AttributeDescriptor::new("QT_C", DeclaredType::Num, Some(4), DomainArea::Infraestrutura),
        ])
        .unwrap();
        let resolved = resolve(&dict).unwrap();
        (resolved.dictionary.domain(&DomainArea::Infraestrutura), resolved.schema)
    }

    #[test]
    fn melt_drops_nulls_and_keeps_boolean_zero() {
        let (domain, schema) = domain_abc();
        let ds = DataSet::new(
            schema,
            vec![vec![
                Value::Int64(2024),
                Value::Int64(27000001),
                Value::Int64(5),
                Value::SmallInt(0),
                Value::Null,
            ]],
        );
        let facts = melt(&ds, &IdColumns::default(), &domain).unwrap();
        assert_eq!(
            facts,
            vec![
                FactRecord {
                    id: 1,
                    ano: 2024,
                    id_escola: 27000001,
                    id_atributo: 1,
                    tipo_atributo: DeclaredType::Num,
                    valor: Value::Int64(5),
                },
                FactRecord {
                    id: 2,
                    ano: 2024,
                    id_escola: 27000001,
                    id_atributo: 2,
                    tipo_atributo: DeclaredType::Bool,
                    valor: Value::SmallInt(0),
                },
            ]
        );
    }

    #[test]
    fn melt_is_school_major_with_dense_ids() {
        let (domain, schema) = domain_abc();
        let ds = DataSet::new(
            schema,
            vec![
                vec![Value::Int64(2024), Value::Int64(1), Value::Int64(3), Value::Null, Value::Int64(4)],
                vec![Value::Int64(2024), Value::Int64(2), Value::Null, Value::SmallInt(1), Value::Int64(9)],
            ],
        );
        let facts = melt(&ds, &IdColumns::default(), &domain).unwrap();
        let keys: Vec<_> = facts.iter().map(|f| (f.id, f.id_escola, f.id_atributo)).collect();
        assert_eq!(keys, vec![(1, 1, 1), (2, 1, 3), (3, 2, 2), (4, 2, 3)]);
    }

    #[test]
    fn melt_requires_id_columns() {
        let (domain, schema) = domain_abc();
        let ds = DataSet::new(schema, vec![]).select(["CO_ENTIDADE", "QT_A"]);
        let err = melt(&ds, &IdColumns::default(), &domain).unwrap_err();
        assert!(matches!(err, CensusError::MissingColumn { ref column, .. } if column == "NU_ANO_CENSO"));
    }

    #[test]
    fn melt_then_pivot_reproduces_non_null_values() {
        let (domain, schema) = domain_abc();
        let ds = DataSet::new(
            schema,
            vec![
                vec![Value::Int64(2024), Value::Int64(1), Value::Int64(3), Value::SmallInt(0), Value::Null],
                vec![Value::Int64(2024), Value::Int64(2), Value::Null, Value::SmallInt(1), Value::Int64(9)],
                vec![Value::Int64(2024), Value::Int64(3), Value::Null, Value::Null, Value::Null],
            ],
        );
        let facts = melt(&ds, &IdColumns::default(), &domain).unwrap();
        let wide = WideTable::pivot(&facts, &domain, &[1, 2, 3]).unwrap();

        for row in &ds.rows {
            let school = row[1].as_i64().unwrap();
            for (offset, name) in ["QT_A", "IN_B", "QT_C"].iter().enumerate() {
                let expected = match &row[2 + offset] {
                    Value::Null => Cell::Unset,
                    v => Cell::Reported(v.clone()),
                };
                assert_eq!(wide.cell(school, name), Some(&expected), "school {school} {name}");
            }
        }
    }

    #[test]
    fn pivot_reindexes_onto_requested_schools() {
        let (domain, _) = domain_abc();
        let facts = vec![FactRecord {
            id: 1,
            ano: 2024,
            id_escola: 99,
            id_atributo: 1,
            tipo_atributo: DeclaredType::Num,
            valor: Value::Int64(2),
        }];
        let wide = WideTable::pivot(&facts, &domain, &[5, 5, 6]).unwrap();
        assert_eq!(wide.schools(), &[5, 6]);
        assert!(wide.row(99).is_none());
        assert_eq!(wide.cell(5, "QT_A"), Some(&Cell::Unset));
        assert_eq!(wide.columns().len(), 3);
    }

    #[test]
    fn pivot_rejects_duplicate_facts() {
        let (domain, _) = domain_abc();
        let fact = FactRecord {
            id: 1,
            ano: 2024,
            id_escola: 5,
            id_atributo: 2,
            tipo_atributo: DeclaredType::Bool,
            valor: Value::SmallInt(1),
        };
        let err = WideTable::pivot(&[fact.clone(), FactRecord { id: 2, ..fact }], &domain, &[5]).unwrap_err();
        assert!(matches!(err, CensusError::DuplicateFact { school_id: 5, ref attribute } if attribute == "IN_B"));
    }

    #[test]
    fn fact_table_values_are_typed_by_tipo() {
        let input = format!(
            "{}\n1,2024,7,1,Num,12\n2,2024,7,2,Bool,0\n3,2024,7,3,Char,Rua A\n",
            FACT_HEADERS.join(",")
        );
        let mut rdr = csv::Reader::from_reader(input.as_bytes());
        let facts = read_facts_from_reader(&mut rdr).unwrap();
        let values: Vec<_> = facts.iter().map(|f| f.valor.clone()).collect();
        assert_eq!(
            values,
            vec![Value::Int64(12), Value::SmallInt(0), Value::Text("Rua A".to_string())]
        );
    }

    #[test]
    fn fact_table_with_bad_number_is_parse_error() {
        let input = format!("{}\n1,2024,7,1,Num,doze\n", FACT_HEADERS.join(","));
        let mut rdr = csv::Reader::from_reader(input.as_bytes());
        let err = read_facts_from_reader(&mut rdr).unwrap_err();
        assert!(err.to_string().contains("row 2 column 'valor'"));
    }
}
