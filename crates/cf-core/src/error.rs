//! Error types for cutflow

use thiserror::Error;

/// cutflow error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pipeline or run configuration error (unknown dataset, bad binning, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Numerical failure (singular system, empty sample, ...)
    #[error("computation error: {0}")]
    Computation(String),

    /// Two accumulators for the same histogram disagree on name or binning.
    #[error("merge mismatch for histogram '{name}': {reason}")]
    MergeMismatch {
        /// Histogram name.
        name: String,
        /// What differed.
        reason: String,
    },

    /// A partition kept failing after all retries.
    #[error("partition '{partition}' failed after {attempts} attempt(s): {message}")]
    Partition {
        /// Partition label.
        partition: String,
        /// Number of attempts made.
        attempts: usize,
        /// Last failure.
        message: String,
    },

    /// A dataset run failed.
    #[error("dataset '{dataset}': {source}")]
    Dataset {
        /// Dataset (process) name.
        dataset: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the dataset name to an error.
    pub fn for_dataset(self, dataset: impl Into<String>) -> Self {
        Error::Dataset { dataset: dataset.into(), source: Box::new(self) }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Per-event evaluation failure.
///
/// Recoverable: the event is dropped from every accumulator and processing
/// continues with the next event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Reference to a column that is neither defined nor an input field.
    #[error("undefined column '{0}'")]
    UndefinedColumn(String),

    /// Indexing past the end of a sequence column.
    #[error("index {index} out of range for column '{column}' (len {len})")]
    IndexOutOfRange {
        /// Column name.
        column: String,
        /// Requested index.
        index: usize,
        /// Sequence length.
        len: usize,
    },

    /// Index expression is negative, fractional or not finite.
    #[error("invalid index {index} for column '{column}'")]
    InvalidIndex {
        /// Column name.
        column: String,
        /// Offending index value.
        index: f64,
    },

    /// Column has the wrong shape for the operation.
    #[error("column '{column}' is {found}, expected {expected}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Expected kind.
        expected: &'static str,
        /// Actual kind.
        found: &'static str,
    },

    /// Failure inside a user-supplied derivation.
    #[error("{0}")]
    Derivation(String),
}

/// Result alias for per-event evaluation.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
