//! Attribute dictionary: the catalog of census variables, their declared types and domain areas.
//!
//! The catalog is the source of truth for which columns exist in the extract and how they are
//! typed. Each domain area gets its own id space through [`DomainDictionary::assign_ids`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CensusError, CensusResult};
use crate::persist;

/// Declared attribute type, as written in the catalog's `tipo` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclaredType {
    /// Character data.
    Char,
    /// Numeric data; `tamanho = 1` means boolean-coded.
    Num,
    /// Boolean-coded numeric, produced by [`crate::schema::resolve`].
    Bool,
}

impl DeclaredType {
    /// Parse a catalog type label (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "char" => Some(Self::Char),
            "num" => Some(Self::Num),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Label written to dictionary tables and fact `tipo_atributo` columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Char => "Char",
            Self::Num => "Num",
            Self::Bool => "Bool",
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partition of the catalog an attribute belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DomainArea {
    /// School registry attributes.
    Geral,
    /// Facilities.
    Infraestrutura,
    /// Enrollment and staffing.
    Matricula,
    /// Any other area label present in the catalog.
    Other(String),
}

impl DomainArea {
    /// Parse an area label. Unknown labels are kept verbatim.
    pub fn from_label(label: &str) -> Self {
        let trimmed = label.trim();
        match trimmed.to_ascii_uppercase().as_str() {
            "GERAL" => Self::Geral,
            "INFRAESTRUTURA" => Self::Infraestrutura,
            "MATRICULA" => Self::Matricula,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Geral => "GERAL",
            Self::Infraestrutura => "INFRAESTRUTURA",
            Self::Matricula => "MATRICULA",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for DomainArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// Variable name; matches the raw extract's column header.
    pub variable: String,
    pub description: String,
    pub declared_type: DeclaredType,
    /// Declared byte width. Optional for `Char`.
    pub size: Option<i64>,
    pub area: DomainArea,
    /// Free-form sub-group label; defaults to the area on output.
    pub group: Option<String>,
}

impl AttributeDescriptor {
    /// Create a descriptor with no description or group.
    pub fn new(
        variable: impl Into<String>,
        declared_type: DeclaredType,
        size: Option<i64>,
        area: DomainArea,
    ) -> Self {
        Self {
            variable: variable.into(),
            description: String::new(),
            declared_type,
            size,
            area,
            group: None,
        }
    }

    /// Whether this is a boolean-coded numeric (`Num` of size 1, or already rewritten to `Bool`).
    pub fn is_boolean_coded(&self) -> bool {
        match self.declared_type {
            DeclaredType::Bool => true,
            DeclaredType::Num => self.size == Some(1),
            DeclaredType::Char => false,
        }
    }

    /// Whether this attribute holds a quantity: name starts with `QT`, or `Num` wider than 1.
    pub fn is_quantitative(&self) -> bool {
        self.variable.starts_with("QT")
            || (self.declared_type == DeclaredType::Num && self.size.is_some_and(|s| s > 1))
    }

    /// Reject type/size combinations outside `{Char; Num+1; Num+>1}` (and `Bool+1`).
    pub fn validate(&self) -> CensusResult<()> {
        let ok = match self.declared_type {
            DeclaredType::Char => true,
            DeclaredType::Num => self.size.is_some_and(|s| s >= 1),
            DeclaredType::Bool => self.size.is_none_or(|s| s == 1),
        };
        if ok {
            Ok(())
        } else {
            Err(CensusError::Schema {
                variable: self.variable.clone(),
                message: format!(
                    "unsupported type/size combination {}/{}",
                    self.declared_type,
                    self.size.map_or_else(|| "<none>".to_string(), |s| s.to_string())
                ),
            })
        }
    }

    /// Output `grupo` value.
    pub fn group_label(&self) -> &str {
        self.group.as_deref().unwrap_or_else(|| self.area.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    variavel: String,
    #[serde(default)]
    descricao: String,
    tipo: String,
    #[serde(default)]
    tamanho: Option<i64>,
    area: String,
    #[serde(default)]
    grupo: Option<String>,
}

/// The full attribute catalog, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDictionary {
    descriptors: Vec<AttributeDescriptor>,
}

impl AttributeDictionary {
    /// Build a dictionary, validating every descriptor and rejecting duplicate variable names.
    pub fn new(descriptors: Vec<AttributeDescriptor>) -> CensusResult<Self> {
        let mut seen = HashSet::with_capacity(descriptors.len());
        for d in &descriptors {
            d.validate()?;
            if !seen.insert(d.variable.as_str()) {
                return Err(CensusError::Schema {
                    variable: d.variable.clone(),
                    message: "variable declared more than once".to_string(),
                });
            }
        }
        Ok(Self { descriptors })
    }

    /// Load the catalog from a delimited file with headers
    /// `variavel, descricao, tipo, tamanho, area[, grupo]`.
    pub fn from_path(path: impl AsRef<Path>, delimiter: u8) -> CensusResult<Self> {
        let mut rdr = persist::open_csv_reader(path.as_ref(), delimiter)?;
        Self::from_reader(&mut rdr)
    }

    /// Load the catalog from an existing CSV reader.
    pub fn from_reader<R: Read>(rdr: &mut csv::Reader<R>) -> CensusResult<Self> {
        let mut descriptors = Vec::new();
        for result in rdr.deserialize::<CatalogRow>() {
            let row = result?;
            let declared_type =
                DeclaredType::from_label(&row.tipo).ok_or_else(|| CensusError::Schema {
                    variable: row.variavel.clone(),
                    message: format!("unknown type '{}'", row.tipo),
                })?;
            descriptors.push(AttributeDescriptor {
                variable: row.variavel.trim().to_string(),
                description: row.descricao,
                declared_type,
                size: row.tamanho,
                area: DomainArea::from_label(&row.area),
                group: row.grupo.filter(|g| !g.trim().is_empty()),
            });
        }
        Self::new(descriptors)
    }

    pub fn descriptors(&self) -> &[AttributeDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, variable: &str) -> Option<&AttributeDescriptor> {
        self.descriptors.iter().find(|d| d.variable == variable)
    }

    /// Ordered subset of descriptors in `area`, preserving catalog order.
    pub fn rows_for_area(&self, area: &DomainArea) -> Vec<AttributeDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| &d.area == area)
            .cloned()
            .collect()
    }

    /// Convenience for `DomainDictionary::assign_ids(area, self.rows_for_area(area))`.
    pub fn domain(&self, area: &DomainArea) -> DomainDictionary {
        DomainDictionary::assign_ids(area.clone(), self.rows_for_area(area))
    }
}

/// A descriptor with its domain-local attribute id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainAttribute {
    pub id: u32,
    pub descriptor: AttributeDescriptor,
}

/// The id-assigned attribute subset of one domain area.
///
/// Ids are dense `1..=N` in subset order and are not comparable across domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainDictionary {
    area: DomainArea,
    attributes: Vec<DomainAttribute>,
    by_name: HashMap<String, usize>,
}

impl DomainDictionary {
    /// Number the subset densely from 1, in the order given.
    pub fn assign_ids(area: DomainArea, subset: Vec<AttributeDescriptor>) -> Self {
        let attributes = subset
            .into_iter()
            .zip(1u32..)
            .map(|(descriptor, id)| DomainAttribute { id, descriptor })
            .collect();
        Self::from_attributes(area, attributes)
    }

    fn from_attributes(area: DomainArea, attributes: Vec<DomainAttribute>) -> Self {
        let by_name = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.descriptor.variable.clone(), i))
            .collect();
        Self {
            area,
            attributes,
            by_name,
        }
    }

    pub fn area(&self) -> &DomainArea {
        &self.area
    }

    pub fn attributes(&self) -> &[DomainAttribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn by_name(&self, variable: &str) -> Option<&DomainAttribute> {
        self.by_name.get(variable).map(|&i| &self.attributes[i])
    }

    pub fn by_id(&self, id: u32) -> Option<&DomainAttribute> {
        // Ids are dense from 1 unless the table was hand-edited; fall back to a scan.
        usize::try_from(id)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.attributes.get(i))
            .filter(|a| a.id == id)
            .or_else(|| self.attributes.iter().find(|a| a.id == id))
    }

    /// Variable names in id order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.descriptor.variable.as_str())
    }

    /// Write the dictionary table (`id_atributo, variavel, descricao, tipo, tamanho, grupo`).
    pub fn write_csv(&self, path: impl AsRef<Path>) -> CensusResult<()> {
        let mut wtr = persist::create_csv_writer(path.as_ref(), &DICTIONARY_HEADERS)?;
        for a in &self.attributes {
            wtr.serialize(DictionaryRow::from(a))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Read a dictionary table previously written by [`Self::write_csv`].
    pub fn read_csv(path: impl AsRef<Path>, area: DomainArea) -> CensusResult<Self> {
        let mut rdr = persist::open_csv_reader(path.as_ref(), b',')?;
        Self::from_table_reader(&mut rdr, area)
    }

    /// Read a dictionary table from an existing CSV reader.
    pub fn from_table_reader<R: Read>(
        rdr: &mut csv::Reader<R>,
        area: DomainArea,
    ) -> CensusResult<Self> {
        let mut attributes = Vec::new();
        for result in rdr.deserialize::<DictionaryRow>() {
            let row = result?;
            let declared_type =
                DeclaredType::from_label(&row.tipo).ok_or_else(|| CensusError::Schema {
                    variable: row.variavel.clone(),
                    message: format!("unknown type '{}'", row.tipo),
                })?;
            let descriptor = AttributeDescriptor {
                variable: row.variavel,
                description: row.descricao,
                declared_type,
                size: row.tamanho,
                area: area.clone(),
                group: Some(row.grupo),
            };
            descriptor.validate()?;
            attributes.push(DomainAttribute {
                id: row.id_atributo,
                descriptor,
            });
        }
        Ok(Self::from_attributes(area, attributes))
    }
}

/// Header of the persisted per-domain dictionary table.
pub const DICTIONARY_HEADERS: [&str; 6] =
    ["id_atributo", "variavel", "descricao", "tipo", "tamanho", "grupo"];

/// Row shape of the persisted per-domain dictionary table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryRow {
    pub id_atributo: u32,
    pub variavel: String,
    #[serde(default)]
    pub descricao: String,
    pub tipo: String,
    #[serde(default)]
    pub tamanho: Option<i64>,
    #[serde(default)]
    pub grupo: String,
}

impl From<&DomainAttribute> for DictionaryRow {
    fn from(a: &DomainAttribute) -> Self {
        Self {
            id_atributo: a.id,
            variavel: a.descriptor.variable.clone(),
            descricao: a.descriptor.description.clone(),
            tipo: a.descriptor.declared_type.as_str().to_string(),
            tamanho: a.descriptor.size,
            grupo: a.descriptor.group_label().to_string(),
        }
    }
}
