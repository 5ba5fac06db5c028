use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed header: {0}")]
    MalformedHeader(#[from] HeaderError),

    #[error(
        "{chunk} chunk length mismatch: offset table records {table_length:#x}, \
         chunk declares {declared_length:#x}"
    )]
    ChunkLengthMismatch { chunk: &'static str, table_length: usize, declared_length: usize },

    #[error("unsupported codec {0:#04x}, only 4-bit GC-ADPCM is supported")]
    UnsupportedCodec(u8),

    #[error("unknown chunk {0:?}")]
    UnknownChunk(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("{name} = {value} is out of range: {reason}")]
    ConfigurationOutOfRange { name: &'static str, value: i64, reason: &'static str },

    #[error("interleaved data is {actual} bytes, expected {expected}")]
    InterleaveLength { expected: usize, actual: usize },

    #[error("unexpected end of data: needed {needed} bytes at offset {offset:#x}")]
    UnexpectedEof { offset: usize, needed: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("expected magic {expected:?}, found {found:?}")]
    BadMagic { expected: String, found: String },

    #[error("file declares {declared} bytes but is {actual} bytes long")]
    FileLengthMismatch { declared: usize, actual: usize },

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: i64 },

    #[error("missing {chunk} chunk")]
    MissingChunk { chunk: &'static str },
}

impl HeaderError {
    pub(crate) fn bad_magic(expected: &[u8], found: &[u8]) -> Self {
        HeaderError::BadMagic {
            expected: String::from_utf8_lossy(expected).into_owned(),
            found: String::from_utf8_lossy(found).into_owned(),
        }
    }
}

impl Error {
    pub(crate) fn out_of_range(name: &'static str, value: usize, reason: &'static str) -> Self {
        Error::ConfigurationOutOfRange { name, value: value as i64, reason }
    }

    pub(crate) fn invalid_field(field: &'static str, value: i64) -> Self {
        Error::MalformedHeader(HeaderError::InvalidField { field, value })
    }
}
