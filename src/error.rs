use std::io;

use thiserror::Error;

/// Coarse classification of a [`PackError`], this is what the handle latches
/// in its sticky error flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Illegal call sequence, nothing was written or read
    Usage,
    /// The underlying stream failed
    Io,
    /// Chunk sizes or container tags do not add up
    Corrupt,
    /// The codec could not decode a chunk
    Decode,
    /// The codec could not encode a chunk
    Encode,
    /// A header could not be backpatched
    Unseekable,
    /// A size does not fit in a chunk header
    Overflow,
}

#[derive(Error, Debug)]
pub enum PackError {
    #[error(transparent)]
    IO(#[from] io::Error),
    #[error("invalid mode {mode:?}: {reason}")]
    Mode { mode: String, reason: &'static str },
    #[error("invalid call: {0}")]
    Usage(&'static str),
    #[error("{0} chunk(s) still open")]
    ChunksOpen(usize),
    #[error("offset {target} is outside of 0..={limit}")]
    OutOfRange { target: u64, limit: u64 },
    #[error("corrupt chunk at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: &'static str },
    #[error("wanted {wanted} chunk(s) but only {found} remain")]
    MissingChunks { wanted: usize, found: usize },
    #[error("codec failed to decode: {0}")]
    Decode(io::Error),
    #[error("codec failed to encode: {0}")]
    Encode(io::Error),
    #[error("header backpatch failed: {0}")]
    Unseekable(io::Error),
    #[error("{0} bytes do not fit in a chunk header")]
    HeaderOverflow(u64),
    #[error("unknown container magic {0:#010x}, wrong password?")]
    BadMagic(u32),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("an earlier {0:?} error was latched on this handle")]
    Latched(ErrorKind),
}

pub type Result<T> = std::result::Result<T, PackError>;

impl PackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PackError::IO(_) => ErrorKind::Io,
            PackError::Mode { .. }
            | PackError::Usage(_)
            | PackError::ChunksOpen(_)
            | PackError::OutOfRange { .. }
            | PackError::Config(_) => ErrorKind::Usage,
            PackError::Corrupt { .. } | PackError::MissingChunks { .. } | PackError::BadMagic(_) => {
                ErrorKind::Corrupt
            }
            PackError::Decode(_) => ErrorKind::Decode,
            PackError::Encode(_) => ErrorKind::Encode,
            PackError::Unseekable(_) => ErrorKind::Unseekable,
            PackError::HeaderOverflow(_) => ErrorKind::Overflow,
            PackError::Latched(kind) => *kind,
        }
    }
}

impl From<PackError> for io::Error {
    fn from(err: PackError) -> io::Error {
        let kind = match err.kind() {
            ErrorKind::Usage => io::ErrorKind::InvalidInput,
            ErrorKind::Corrupt | ErrorKind::Decode => io::ErrorKind::InvalidData,
            ErrorKind::Unseekable => io::ErrorKind::Unsupported,
            ErrorKind::Overflow => io::ErrorKind::InvalidInput,
            ErrorKind::Io | ErrorKind::Encode => io::ErrorKind::Other,
        };

        match err {
            PackError::IO(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

#[cfg(test)]
mod test_error_kind {
    use super::*;

    #[test]
    fn latched_keeps_kind() {
        assert_eq!(PackError::Latched(ErrorKind::Decode).kind(), ErrorKind::Decode);
    }

    #[test]
    fn io_error_passes_through() {
        let err: io::Error = PackError::IO(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn encode_and_decode_are_distinct() {
        let fail = || io::Error::other("codec");

        assert_eq!(PackError::Encode(fail()).kind(), ErrorKind::Encode);
        assert_eq!(PackError::Decode(fail()).kind(), ErrorKind::Decode);

        let err: io::Error = PackError::Decode(fail()).into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let err: io::Error = PackError::Encode(fail()).into();
        assert_eq!(err.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn corrupt_maps_to_invalid_data() {
        let err: io::Error = PackError::Corrupt {
            offset: 8,
            reason: "negative size",
        }
        .into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
