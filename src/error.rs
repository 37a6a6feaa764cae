use thiserror::Error;

use crate::pipeline::Stage;

/// Convenience result type for pipeline operations.
pub type CensusResult<T> = Result<T, CensusError>;

/// Error type returned by every stage of the pipeline.
///
/// Schema and ingestion errors abort a run. Rating problems that concern a single school are not
/// errors; they are reported as [`crate::rating::RatingDiagnostic`]s instead.
#[derive(Debug, Error)]
pub enum CensusError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding or encoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Invalid run configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The attribute dictionary declares something the pipeline cannot type.
    #[error("schema error for variable '{variable}': {message}")]
    Schema { variable: String, message: String },

    /// A column the schema requires is absent from the source header.
    #[error("missing required column '{column}'. headers={headers:?}")]
    MissingColumn { column: String, headers: Vec<String> },

    /// A value could not be parsed into its declared [`crate::types::DataType`].
    #[error("failed to parse value at row {row} column '{column}': {message} (raw='{raw}')")]
    ParseError {
        row: usize,
        column: String,
        raw: String,
        message: String,
    },

    /// The configured text encoding label is not known.
    #[error("unknown text encoding '{label}'")]
    Encoding { label: String },

    /// A rating metric references an attribute that its domain's wide table does not have.
    #[error("attribute '{attribute}' is not part of the {domain} domain")]
    Lookup { domain: String, attribute: String },

    /// The fact table holds two values for the same school and attribute.
    #[error("duplicate fact for school {school_id} attribute '{attribute}'")]
    DuplicateFact { school_id: i64, attribute: String },

    /// The run was aborted before `stage` started.
    #[error("run aborted before stage {stage}")]
    Aborted { stage: Stage },

    /// A failure tagged with the pipeline stage that produced it.
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<CensusError>,
    },
}

impl CensusError {
    /// Tag this error with the stage it happened in. Already tagged errors are kept as-is.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            e @ (Self::Stage { .. } | Self::Aborted { .. }) => e,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with stage tagging removed.
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Process exit code for this error.
    ///
    /// - `2`: configuration error
    /// - `3`: schema error
    /// - `4`: ingestion error (I/O, CSV, header, parse, encoding)
    /// - `5`: rating error (lookup, duplicate fact)
    /// - `6`: aborted
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            Self::Config { .. } => 2,
            Self::Schema { .. } => 3,
            Self::Io(_)
            | Self::Csv(_)
            | Self::MissingColumn { .. }
            | Self::ParseError { .. }
            | Self::Encoding { .. } => 4,
            Self::Lookup { .. } | Self::DuplicateFact { .. } => 5,
            Self::Aborted { .. } => 6,
            Self::Stage { .. } => 1,
        }
    }
}
