//! Core in-memory table types.
//!
//! The census extract is ingested into a [`DataSet`] whose column set and primitive types are
//! described by a [`Schema`] derived from the attribute dictionary (see [`crate::schema`]).

use std::fmt;

/// Primitive storage type of an ingested column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Free text (`Char` attributes).
    Text,
    /// Small nullable integer, used for boolean-coded and small categorical attributes.
    SmallInt,
    /// Nullable 64-bit integer, used for quantities and identifiers.
    Int64,
}

/// A single named, typed column in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name (the census variable name).
    pub name: String,
    /// Column storage type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the shape of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns the field with the given name, if present.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A single typed cell value.
///
/// `Null` is the "not reported" state. It is distinct from a reported zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Missing / not reported.
    Null,
    /// Small integer (boolean-coded or categorical).
    SmallInt(i16),
    /// 64-bit integer.
    Int64(i64),
    /// Trimmed, non-empty text.
    Text(String),
}

impl Value {
    /// Whether this is the `Null` state.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view of the value. Text is parsed when it holds an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Null => None,
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Floating point view of the value, used by the rating evaluator.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::SmallInt(v) => Some(f64::from(*v)),
            Self::Int64(v) => Some(*v as f64),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Text rendering used when stringifying cells for concatenation; `Null` renders as `""`.
    pub fn to_text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::SmallInt(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Create a new dataset by applying `mapper` to every row.
    ///
    /// The returned dataset preserves the original schema.
    ///
    /// # Panics
    ///
    /// Panics if `mapper` returns a row with a different length than the schema field count.
    pub fn map_rows<F>(&self, mut mapper: F) -> Self
    where
        F: FnMut(&[Value]) -> Vec<Value>,
    {
        let expected_len = self.schema.fields.len();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let out = mapper(row.as_slice());
                assert!(
                    out.len() == expected_len,
                    "mapped row length {} does not match schema length {}",
                    out.len(),
                    expected_len
                );
                out
            })
            .collect();

        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Project the dataset onto `names`, in the given order. Names not in the schema are skipped.
    pub fn select<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let idxs: Vec<usize> = names
            .into_iter()
            .filter_map(|n| self.schema.index_of(n))
            .collect();
        let schema = Schema::new(idxs.iter().map(|&i| self.schema.fields[i].clone()).collect());
        let rows = self
            .rows
            .iter()
            .map(|row| idxs.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Self { schema, rows }
    }
}
