use std::path::PathBuf;

use thiserror::Error;

use crate::mr::function::matmul::{CellKey, Side};
use crate::mr::matrix::Shape;

/// Errors raised while loading, distributing, reducing or validating matrices.
#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ragged or unparsable input, fatal for the whole run
    #[error("malformed input {} at line {line}: {message}", .path.display())]
    MalformedInput {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// The operands cannot be multiplied, raised before any distribution happens
    #[error("dimension mismatch: {message} (A is {a}, B is {b})")]
    DimensionMismatch { a: Shape, b: Shape, message: String },

    /// One output cell received a partial or corrupted bucket
    #[error("incomplete bucket for cell {key}: {defect}")]
    IncompleteBucket { key: CellKey, defect: BucketDefect },

    #[error("malformed result record at line {line}: {content:?}")]
    MalformedRecord { line: usize, content: String },

    #[error("result cell {0} appears more than once")]
    DuplicateCell(CellKey),

    #[error("result cell {0} is missing")]
    MissingCell(CellKey),

    #[error("result cell {key} lies outside the {shape} result")]
    UnexpectedCell { key: CellKey, shape: Shape },
}

/// What exactly is wrong with a reducer bucket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BucketDefect {
    #[error("inner index {index} from {side} appears more than once")]
    Duplicate { side: Side, index: usize },
    #[error("inner index {index} from {side} is out of range")]
    OutOfRange { side: Side, index: usize },
    #[error("inner index {index} from {side} is missing")]
    Missing { side: Side, index: usize },
}

pub type Result<T> = std::result::Result<T, MatrixError>;
