//! Derive the ingestion [`Schema`] from the attribute catalog.

use log::debug;

use crate::dictionary::{AttributeDescriptor, AttributeDictionary, DeclaredType};
use crate::error::CensusResult;
use crate::types::{DataType, Field, Schema};

/// Output of [`resolve`]: the ingestion schema plus the rewritten descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSchema {
    /// One field per descriptor, in catalog order.
    pub schema: Schema,
    /// Copy of the catalog with `Num` size-1 attributes retyped as [`DeclaredType::Bool`].
    pub dictionary: AttributeDictionary,
}

/// Map one descriptor to its primitive storage type.
///
/// `Char` → `Text`, boolean-coded → `SmallInt`, any other `Num` → `Int64`.
pub fn data_type_for(descriptor: &AttributeDescriptor) -> DataType {
    match descriptor.declared_type {
        DeclaredType::Char => DataType::Text,
        _ if descriptor.is_boolean_coded() => DataType::SmallInt,
        _ => DataType::Int64,
    }
}

/// Resolve the catalog into an ingestion schema.
///
/// Pure and idempotent: resolving an already resolved dictionary yields the same result.
pub fn resolve(dictionary: &AttributeDictionary) -> CensusResult<ResolvedSchema> {
    let mut fields = Vec::with_capacity(dictionary.len());
    let mut rewritten = Vec::with_capacity(dictionary.len());

    for descriptor in dictionary.descriptors() {
        descriptor.validate()?;
        let data_type = data_type_for(descriptor);
        fields.push(Field::new(descriptor.variable.clone(), data_type));

        let mut d = descriptor.clone();
        if d.declared_type == DeclaredType::Num && d.is_boolean_coded() {
            d.declared_type = DeclaredType::Bool;
        }
        rewritten.push(d);
    }

    let bools = rewritten
        .iter()
        .filter(|d| d.declared_type == DeclaredType::Bool)
        .count();
    debug!(
        "resolved schema: {} columns, {} boolean-coded",
        fields.len(),
        bools
    );

    Ok(ResolvedSchema {
        schema: Schema::new(fields),
        dictionary: AttributeDictionary::new(rewritten)?,
    })
}
