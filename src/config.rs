//! Run configuration.
//!
//! Loaded from an optional TOML file; every key has a default, so an empty file (or no file)
//! describes the standard run over `dicionario.csv` and `microdados.csv` in the working directory.
//!
//! ```toml
//! [paths]
//! dictionary = "dicionario.csv"
//! extract = "microdados.csv"
//! output_dir = "."
//!
//! [input]
//! encoding = "latin1"
//! extract_delimiter = ";"
//! parse_policy = "strict"
//!
//! [filter]
//! region = "AL"
//! private_threshold = 4
//!
//! [rating]
//! census_year = 2024
//! zero_denominator = "zero"
//!
//! [execution]
//! chunk_size = 4096
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CensusError, CensusResult};
use crate::execution::ExecutionOptions;
use crate::ingestion::{encoding_for_label, ExtractOptions, ParsePolicy, RegionFilter};
use crate::rating::{RatingOptions, ZeroDenominator};

/// Where inputs are read from and outputs written to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub dictionary: PathBuf,
    pub extract: PathBuf,
    /// Root of the `Geral/`, `Infraestrutura/`, `Matricula/` and `Rating/` output directories.
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dictionary: PathBuf::from("dicionario.csv"),
            extract: PathBuf::from("microdados.csv"),
            output_dir: PathBuf::from("."),
        }
    }
}

/// How the raw inputs are decoded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// WHATWG encoding label of the extract.
    pub encoding: String,
    pub extract_delimiter: char,
    pub dictionary_delimiter: char,
    pub parse_policy: ParsePolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            encoding: "latin1".to_string(),
            extract_delimiter: ';',
            dictionary_delimiter: ',',
            parse_policy: ParsePolicy::Strict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub region_column: String,
    pub region: String,
    pub ownership_column: String,
    /// Ownership codes at or above this are private and dropped.
    pub private_threshold: i64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            region_column: "SG_UF".to_string(),
            region: "AL".to_string(),
            ownership_column: "TP_DEPENDENCIA".to_string(),
            private_threshold: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatingConfig {
    pub census_year: i64,
    pub active_code: i64,
    pub zero_denominator: ZeroDenominator,
    pub preview_rows: usize,
}

impl Default for RatingConfig {
    fn default() -> Self {
        let defaults = RatingOptions::default();
        Self {
            census_year: defaults.census_year,
            active_code: defaults.active_code,
            zero_denominator: defaults.zero_denominator,
            preview_rows: defaults.preview_rows,
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub input: InputConfig,
    pub filter: FilterConfig,
    pub rating: RatingConfig,
    pub execution: ExecutionOptions,
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> CensusResult<Self> {
        toml::from_str(text).map_err(|e| CensusError::Config {
            message: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> CensusResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text).map_err(|e| match e {
            CensusError::Config { message } => CensusError::Config {
                message: format!("{}: {message}", path.display()),
            },
            other => other,
        })
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> CensusResult<()> {
        let fail = |message: String| Err(CensusError::Config { message });
        if self.filter.region.trim().is_empty() {
            return fail("filter.region must not be empty".to_string());
        }
        if encoding_for_label(&self.input.encoding).is_err() {
            return fail(format!("unknown input.encoding '{}'", self.input.encoding));
        }
        for (key, c) in [
            ("input.extract_delimiter", self.input.extract_delimiter),
            ("input.dictionary_delimiter", self.input.dictionary_delimiter),
        ] {
            if !c.is_ascii() {
                return fail(format!("{key} must be a single ASCII character, got '{c}'"));
            }
        }
        self.execution.validate()
    }

    /// Options for reading the extract.
    pub fn extract_options(&self) -> CensusResult<ExtractOptions> {
        Ok(ExtractOptions {
            delimiter: ascii_byte(self.input.extract_delimiter)?,
            encoding: encoding_for_label(&self.input.encoding)?,
            parse_policy: self.input.parse_policy,
        })
    }

    pub fn dictionary_delimiter(&self) -> CensusResult<u8> {
        ascii_byte(self.input.dictionary_delimiter)
    }

    pub fn region_filter(&self) -> RegionFilter {
        RegionFilter {
            region_column: self.filter.region_column.clone(),
            region: self.filter.region.clone(),
            ownership_column: self.filter.ownership_column.clone(),
            private_threshold: self.filter.private_threshold,
        }
    }

    pub fn rating_options(&self) -> RatingOptions {
        RatingOptions {
            census_year: self.rating.census_year,
            active_code: self.rating.active_code,
            zero_denominator: self.rating.zero_denominator,
            preview_rows: self.rating.preview_rows,
        }
    }
}

fn ascii_byte(c: char) -> CensusResult<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| CensusError::Config {
            message: format!("delimiter must be a single ASCII character, got '{c}'"),
        })
}
