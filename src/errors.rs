use thiserror::Error;

/// Errors raised while building or persisting a tabulation.
///
/// Query-path operations (`retrieve`, `add`, `update`) never return these;
/// they are limited to construction, validation and I/O.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TabulationError
{
    #[error("tolerance must be strictly positive, got {0}")]
    InvalidTolerance(f64),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The state must hold at least temperature and pressure.
    #[error("a tabulated state needs at least {0} dimensions")]
    TooFewDimensions(usize),

    #[error("scale factor {index} must be strictly positive, got {value}")]
    InvalidScaleFactor { index: usize, value: f64 },

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("matrix is singular")]
    SingularMatrix,

    #[error("serialization failed")]
    SerializationFailed,

    #[error("deserialization failed")]
    DeserializationFailed,

    #[error("LZ4 decompression failed")]
    Lz4DecompressionFailed,

    #[error("file I/O error: {0}")]
    FileIo(String),
}

impl From<std::io::Error> for TabulationError
{
    fn from(e: std::io::Error) -> Self
    {
        Self::FileIo(e.to_string())
    }
}
