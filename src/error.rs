// src/error.rs
//! Error types, grouped by concern and flattened into a single crate error.

use thiserror::Error;

/// Errors raised when constructing or converting emitter data.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("xyz must have 2 or 3 columns, got {0}")]
    XyzColumns(usize),

    #[error("column length mismatch: {field} has {got} rows, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("coordinate unit is not set")]
    UnknownUnit,

    #[error("pixel size is required to convert between px and nm")]
    MissingPixelSize,

    #[error("field {0} is not present on this emitter set")]
    MissingField(&'static str),

    #[error("got {got} frame offsets for {expected} emitter sets")]
    OffsetCount { got: usize, expected: usize },

    #[error("invalid {what}: {reason}")]
    InvalidValue { what: &'static str, reason: String },

    #[error("operation needs at least one emitter")]
    EmptySet,
}

/// Errors raised while loading or validating run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors raised reading or writing frame stacks and emitter tables.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad number at row {row}, column {col}: {value:?}")]
    Parse {
        row: usize,
        col: usize,
        value: String,
    },

    #[error("row {row} has {got} values, expected {expected}")]
    RowWidth {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("emitter table is missing column {0:?}")]
    MissingHeader(String),
}

/// Crate-wide error, a flat union of the per-concern errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),
}

pub type Result<T> = std::result::Result<T, Error>;
