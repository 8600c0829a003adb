use thiserror::Error;

/// I/O errors raised by a [`ByteSource`](crate::io::ByteSource).
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Fewer bytes were available than the caller required
    #[error("Truncated read: requested {requested} bytes at offset {offset}, size is {size}")]
    Truncated {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// A seek would move the cursor before the start or past the end
    #[error("Seek out of bounds: target {target}, size is {size}")]
    SeekOutOfBounds { target: i128, size: u64 },

    /// Underlying operating-system error
    #[error("I/O error: {0}")]
    Io(String),

    /// The scan was cancelled before the operation was issued
    #[error("Scan cancelled")]
    Cancelled,
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        IoError::Io(err.to_string())
    }
}

/// Errors produced by the GIF LZW decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LzwError {
    /// Minimum code size outside 1..=11
    #[error("Invalid LZW minimum code size: {0}")]
    InvalidCodeSize(u8),

    /// Code refers past the next table slot
    #[error("LZW code {code} out of range (next slot is {next})")]
    CodeOutOfRange { code: u16, next: u16 },

    /// Self-referential code seen with no previous sequence
    #[error("LZW code {0} references an empty previous sequence")]
    MissingPrefix(u16),

    /// Data ended before the stop code
    #[error("LZW data ended before the stop code")]
    UnexpectedEnd,

    /// The stop code was not followed by a zero-length block terminator
    #[error("LZW stop code not followed by a block terminator")]
    MissingTerminator,
}

/// Errors returned by format walkers and metadata decoders.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Signature or magic mismatch; no regions were emitted
    #[error("Not a {format} stream: {reason}")]
    NotThisFormat {
        format: &'static str,
        reason: String,
    },

    /// Short read from the source; regions emitted so far are kept
    #[error("Truncated: requested {requested} bytes at offset {offset}, size is {size}")]
    Truncated {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// I/O failure in the source
    #[error("I/O error: {0}")]
    Io(String),

    /// Cooperative cancellation
    #[error("Scan cancelled")]
    Cancelled,

    /// Structural inconsistency that makes later offsets meaningless
    #[error("Malformed {format}: {reason}")]
    Malformed {
        format: &'static str,
        reason: String,
    },

    /// A fixed-width field read past the end of an in-memory block
    #[error("Field of {width} bytes at offset {offset} exceeds block of {len} bytes")]
    FieldOutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// GIF LZW decode failure
    #[error("LZW error: {0}")]
    Lzw(#[from] LzwError),
}

impl ScanError {
    /// Shorthand for a [`ScanError::NotThisFormat`].
    pub fn not_this_format(format: &'static str, reason: impl Into<String>) -> Self {
        ScanError::NotThisFormat {
            format,
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`ScanError::Malformed`].
    pub fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        ScanError::Malformed {
            format,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }

    pub fn is_not_this_format(&self) -> bool {
        matches!(self, ScanError::NotThisFormat { .. })
    }

    /// True for failures caused by bad data rather than the source or the caller.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ScanError::Malformed { .. } | ScanError::FieldOutOfBounds { .. } | ScanError::Lzw(_)
        )
    }
}

impl From<IoError> for ScanError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Truncated {
                offset,
                requested,
                size,
            } => ScanError::Truncated {
                offset,
                requested,
                size,
            },
            IoError::SeekOutOfBounds { target, size } => ScanError::Truncated {
                offset: target.clamp(0, u64::MAX as i128) as u64,
                requested: 0,
                size,
            },
            IoError::Io(msg) => ScanError::Io(msg),
            IoError::Cancelled => ScanError::Cancelled,
        }
    }
}
