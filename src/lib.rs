//! `censo-escolar` turns a school-census microdata extract into normalized fact tables, a school
//! registry and per-school composite ratings.
//!
//! The extract is a wide, semicolon-separated Latin-1 file with one row per school and hundreds of
//! attribute columns. An attribute dictionary ([`dictionary::AttributeDictionary`]) declares each
//! column's type and domain area; from it the crate derives the ingestion schema and splits the
//! attributes into the facilities (`INFRAESTRUTURA`) and enrollment (`MATRICULA`) domains.
//!
//! Most callers run the whole thing through [`pipeline::Pipeline`]:
//!
//! ```no_run
//! use censo_escolar::config::PipelineConfig;
//! use censo_escolar::pipeline::Pipeline;
//!
//! # fn main() -> Result<(), censo_escolar::CensusError> {
//! let config = PipelineConfig::from_path("censo.toml")?;
//! let report = Pipeline::new(config)?.run()?;
//! println!("rated {} schools", report.schools_rated);
//! # Ok(())
//! # }
//! ```
//!
//! Each stage is also usable on its own:
//!
//! ```rust
//! use censo_escolar::dictionary::{AttributeDescriptor, AttributeDictionary, DeclaredType, DomainArea};
//! use censo_escolar::processing::{melt, IdColumns};
//! use censo_escolar::schema::resolve;
//! use censo_escolar::types::{DataSet, Value};
//!
//! let dictionary = AttributeDictionary::new(vec![
//!     AttributeDescriptor::new("NU_ANO_CENSO", DeclaredType::Num, Some(4), DomainArea::Geral),
//!     AttributeDescriptor::new("CO_ENTIDADE", DeclaredType::Num, Some(8), DomainArea::Geral),
//!     AttributeDescriptor::new("IN_PISCINA", DeclaredType::Num, Some(1), DomainArea::Infraestrutura),
//! ])
//! .unwrap();
//! let resolved = resolve(&dictionary).unwrap();
//! let census = DataSet::new(
//!     resolved.schema,
//!     vec![vec![Value::Int64(2024), Value::Int64(27000001), Value::SmallInt(1)]],
//! );
//!
//! let infra = resolved.dictionary.domain(&DomainArea::Infraestrutura);
//! let facts = melt(&census, &IdColumns::default(), &infra).unwrap();
//! assert_eq!(facts.len(), 1);
//! assert_eq!(facts[0].valor, Value::SmallInt(1));
//! ```
//!
//! ## Modules
//!
//! - [`dictionary`], [`schema`]: the attribute catalog and the schema derived from it
//! - [`ingestion`]: extract reading, region filter, text normalization
//! - [`processing`]: zero-as-missing recoding, wide/long reshaping, registry extraction
//! - [`rating`]: the seven per-school metrics
//! - [`persist`]: CSV output tables
//! - [`execution`]: the parallel engine used by the filter and the rating stage
//! - [`observability`]: stage observers
//! - [`config`], [`pipeline`]: run configuration and stage sequencing
//! - [`error`]: the crate error type

pub mod config;
pub mod dictionary;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod observability;
pub mod persist;
pub mod pipeline;
pub mod processing;
pub mod rating;
pub mod schema;
pub mod types;

pub use error::{CensusError, CensusResult};
