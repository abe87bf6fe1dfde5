use thiserror::Error;

/// A table whose rows do not line up with its header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("row {row} has {found} values but the table has {expected} columns")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Failures while decoding an uploaded file into a [`crate::table::Dataset`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported file type: {0} (expected .csv or .xlsx)")]
    UnsupportedFormat(String),

    #[error("the file contains no columns to parse")]
    Empty,

    #[error("malformed data on line {line}: {message}")]
    Malformed { line: u64, message: String },

    #[error("file is not valid UTF-8 text: {0}")]
    Encoding(String),

    #[error("could not read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("could not read workbook: {0}")]
    Workbook(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("could not read file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the optional relay hop.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay service is unreachable: {0}")]
    Unreachable(String),

    #[error("could not build relay request: {0}")]
    Request(String),

    #[error("relay service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("relay service sent an unexpected response: {0}")]
    InvalidResponse(String),

    #[error("relay is disabled")]
    Disabled,
}

/// Failures while preparing a dataset for the explorer widget.
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("the dataset has no columns to explore")]
    NoColumns,

    #[error("the dataset has {rows} rows, the explorer accepts at most {limit}")]
    TooManyRows { rows: usize, limit: usize },

    #[error("could not serialize the dataset: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors returned by the session flow controller.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("no dataset has been loaded yet")]
    NoDataset,

    #[error("action not available while {0}")]
    WrongState(&'static str),
}
