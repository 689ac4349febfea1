use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

/// SchemaError
///
/// A required input column is missing or holds a value of the wrong primitive type.
/// Always fatal: the run aborts before any transformation starts.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("{table} table is missing required column `{column}`")]
    MissingColumn { table: &'static str, column: &'static str },

    #[error("{table} table column `{column}` row {row}: expected {expected}, got `{value}`")]
    WrongType {
        table: &'static str,
        column: &'static str,
        row: usize,
        expected: &'static str,
        value: String,
    },

    #[error("{table} table column `{column}` could not be read as text: {source}")]
    Unreadable {
        table: &'static str,
        column: &'static str,
        #[source]
        source: PolarsError,
    },
}

/// ParseError
///
/// A single transaction row could not be normalized. Recoverable: the row is dropped
/// and counted under its `ParseErrorKind`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("malformed timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("malformed value `{0}`")]
    InvalidValue(String),

    #[error("value `{0}` is too large to convert exactly")]
    ValueOutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParseErrorKind {
    MissingField,
    InvalidTimestamp,
    InvalidValue,
    ValueOutOfRange,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrorKind::MissingField => write!(f, "missing field"),
            ParseErrorKind::InvalidTimestamp => write!(f, "invalid timestamp"),
            ParseErrorKind::InvalidValue => write!(f, "invalid value"),
            ParseErrorKind::ValueOutOfRange => write!(f, "value out of range"),
        }
    }
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            ParseError::MissingField(_) => ParseErrorKind::MissingField,
            ParseError::InvalidTimestamp(_) => ParseErrorKind::InvalidTimestamp,
            ParseError::InvalidValue(_) => ParseErrorKind::InvalidValue,
            ParseError::ValueOutOfRange(_) => ParseErrorKind::ValueOutOfRange,
        }
    }
}

/// IntegrityError
///
/// The derived dataset contradicts one of its own invariants. This means a stage ran
/// out of order or has a bug, so nothing is written.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("row {row}: address `{address}` has no node id")]
    UnindexedAddress { row: usize, address: String },

    #[error("edge at position {position} has id {edge_id}")]
    NonContiguousEdgeId { position: usize, edge_id: i64 },

    #[error("edge {edge_id} is earlier than the edge before it")]
    OutOfOrder { edge_id: i64 },

    #[error("edge {edge_id} has negative timestamp {timestamp}")]
    NegativeTimestamp { edge_id: i64, timestamp: i64 },

    #[error("edge {edge_id} references node {node_id}, but only {node_count} nodes exist")]
    NodeOutOfRange {
        edge_id: i64,
        node_id: i64,
        node_count: usize,
    },

    #[error("{labels} node labels for {nodes} indexed addresses")]
    NodeLabelMismatch { labels: usize, nodes: usize },

    #[error("split is not a chronological partition: {0}")]
    SplitMismatch(String),
}

/// WriteError
///
/// Serializing or moving an output artifact failed. Any artifacts already produced by
/// the run are removed before this is returned.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize table {path}: {source}")]
    Table {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error("failed to serialize split descriptor {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that aborts a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
