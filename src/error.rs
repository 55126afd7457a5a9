use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Load errors
// ---------------------------------------------------------------------------

/// Everything that can go wrong while turning the source files into an
/// enriched table. Every variant names the file it concerns so the message
/// can be shown to the user verbatim.
#[derive(Debug, Error)]
pub enum LoadError {
    /// No partition file matched the chunk pattern. Fatal: there is no
    /// meaningful empty dataset.
    #[error("no chunk files matching `{pattern}` in {}", dir.display())]
    Discovery { dir: PathBuf, pattern: String },

    /// A partition lacks a required column.
    #[error(
        "{}: missing required column(s) {} (reference schema from {reference})",
        file.display(),
        missing.join(", ")
    )]
    SchemaMismatch {
        file: PathBuf,
        missing: Vec<String>,
        reference: String,
    },

    /// The metadata table cannot be used (unreadable layout, no join key).
    #[error("metadata {}: {reason}", file.display())]
    MetadataFormat { file: PathBuf, reason: String },

    /// A cell that must be numeric holds something else.
    #[error(
        "{}: line {line}, column `{column}`: cannot read {value:?} as {expected}",
        file.display()
    )]
    TypeCoercion {
        file: PathBuf,
        line: u64,
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("invalid chunk pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("config {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        LoadError::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn metadata(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LoadError::MetadataFormat {
            file: path.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-friendly label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Discovery { .. } => "discovery",
            LoadError::SchemaMismatch { .. } => "schema_mismatch",
            LoadError::MetadataFormat { .. } => "metadata_format",
            LoadError::TypeCoercion { .. } => "type_coercion",
            LoadError::Pattern { .. } => "pattern",
            LoadError::Io { .. } => "io",
            LoadError::Csv { .. } => "csv",
            LoadError::Config { .. } => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, LoadError>;
