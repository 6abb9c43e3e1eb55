use std::fmt;

use polars::error::PolarsError;
use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ResolveLink,
    Fetch,
    Normalize,
    DeriveKeys,
    Join,
    Dissolve,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::ResolveLink => "resolve-link",
            Stage::Fetch => "fetch",
            Stage::Normalize => "normalize",
            Stage::DeriveKeys => "derive-keys",
            Stage::Join => "join",
            Stage::Dissolve => "dissolve",
            Stage::Render => "render",
        })
    }
}

/// The scraped page no longer looks the way the resolver expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("no line contains the marker {marker:?}; the page structure changed")]
    NotFound { marker: String },

    #[error("marker line has no workbook href; the markup changed: {line:?}")]
    PatternMismatch { line: String },
}

/// Every failure aborts the run; each one names the stage and table it hit.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[resolve-link] table {table:?}: link resolution failed: {source}")]
    LinkResolution {
        table: String,
        #[source]
        source: LinkError,
    },

    #[error("[{stage}] table {table:?} is missing required column {column:?}")]
    Schema { stage: Stage, table: String, column: String },

    #[error("[{stage}] table {table:?} has unmapped {column:?} values: {values:?}")]
    Vocabulary { stage: Stage, table: String, column: String, values: Vec<String> },

    #[error("[derive-keys] table {table:?}: code {code:?} is shorter than prefix length {len}")]
    MalformedKey { table: String, code: String, len: usize },

    #[error("[join] join {join:?}: key column {column:?} is absent from table {table:?}")]
    JoinKey { join: String, table: String, column: String },

    #[error("[dissolve] group {group:?}: invalid geometry for unit {unit:?}: {reason}")]
    Geometry { group: String, unit: String, reason: String },

    #[error("[fetch] source {table:?} could not be fetched or decoded")]
    SourceFetch {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("[render] table {table:?}: rendering {level:?} failed")]
    Render {
        table: String,
        level: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("[{stage}] table {table:?}: frame operation failed")]
    Frame {
        stage: Stage,
        table: String,
        #[source]
        source: PolarsError,
    },
}

impl PipelineError {
    /// The stage the run was in when this error was raised.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::LinkResolution { .. } => Stage::ResolveLink,
            PipelineError::Schema { stage, .. }
            | PipelineError::Vocabulary { stage, .. }
            | PipelineError::Frame { stage, .. } => *stage,
            PipelineError::MalformedKey { .. } => Stage::DeriveKeys,
            PipelineError::JoinKey { .. } => Stage::Join,
            PipelineError::Geometry { .. } => Stage::Dissolve,
            PipelineError::SourceFetch { .. } => Stage::Fetch,
            PipelineError::Render { .. } => Stage::Render,
        }
    }

    pub(crate) fn schema(stage: Stage, table: &str, column: &str) -> Self {
        PipelineError::Schema { stage, table: table.to_string(), column: column.to_string() }
    }

    pub(crate) fn link(table: &str, source: LinkError) -> Self {
        PipelineError::LinkResolution { table: table.to_string(), source }
    }

    pub(crate) fn fetch(table: &str, source: anyhow::Error) -> Self {
        PipelineError::SourceFetch { table: table.to_string(), source }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Attach stage and table context to polars failures.
pub(crate) trait FrameContext<T> {
    fn frame_ctx(self, stage: Stage, table: &str) -> Result<T>;
}

impl<T> FrameContext<T> for std::result::Result<T, PolarsError> {
    fn frame_ctx(self, stage: Stage, table: &str) -> Result<T> {
        self.map_err(|source| PipelineError::Frame { stage, table: table.to_string(), source })
    }
}
