//! In-memory transformations of the ingested census table.
//!
//! - [`normalize`]: zero-as-missing recoding of quantitative columns
//! - [`reshape`]: melt domain slices into long fact tables, and pivot them back to wide
//! - [`registry`]: the per-school registry table with derived address and phone
//!
//! Every function takes its input by reference and returns a new table.

pub mod normalize;
pub mod registry;
pub mod reshape;

pub use normalize::{normalize_quantities, quantitative_columns, zero_as_missing};
pub use registry::{extract_registry, read_registry_table};
pub use reshape::{melt, read_facts, write_facts, Cell, FactRecord, IdColumns, WideTable};
