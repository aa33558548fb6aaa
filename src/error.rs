use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PlateError {
    #[error("invalid parameters: {0}")]
    Configuration(String),

    #[error("failed to read parameter file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON parameters: {0}")]
    ConfigParse(String),

    #[error("Error: could not find 'Well' in image: {image}")]
    #[diagnostic(help("image names must start like 'WellB3_...'"))]
    NamingConvention { image: String },

    #[error("Error: not all wells seem to have the same number of FOV")]
    InconsistentFov,

    #[error("invalid well identifier: {0}")]
    InvalidWellId(String),

    #[error("row letter out of supported range in well {0} (A-Y)")]
    RowOutOfRange(String),

    #[error("Error: wells {first} and {second} both map to plate position {position}")]
    DuplicateWellPosition {
        first: String,
        second: String,
        position: String,
    },

    #[error("no link permission on {kind} {id}")]
    Permission { kind: &'static str, id: u64 },

    #[error("dataset not found: {0}")]
    DatasetNotFound(u64),

    #[error("failed to create well at row {row}, column {column}: {message}")]
    WellCreation {
        row: u32,
        column: u32,
        message: String,
    },

    #[error("store request failed: {0}")]
    Store(String),

    #[error("failed to read store snapshot at {0}")]
    SnapshotRead(Utf8PathBuf),

    #[error("failed to parse store snapshot: {0}")]
    SnapshotParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl PlateError {
    /// Errors that abort a dataset during planning. A run reports these as
    /// its message instead of failing.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PlateError::NamingConvention { .. }
                | PlateError::InconsistentFov
                | PlateError::InvalidWellId(_)
                | PlateError::RowOutOfRange(_)
                | PlateError::DuplicateWellPosition { .. }
        )
    }
}
