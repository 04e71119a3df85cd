use core::fmt;

/// Errors returned by the router's packet and radio plumbing.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A packet declared a length that is shorter than its header or longer
    /// than the buffer that carries it.
    InvalidLength,

    /// A field carried a value outside its allowed range.
    InvalidValue,

    /// Ran out of buffer space while reading or writing data.
    Eof,

    /// A received frame failed its checksum.
    Crc,

    /// A radio interface rejected an open, tune or write request.
    Hardware,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Error::InvalidLength => "invalid packet length",
            Error::InvalidValue => "invalid value for field",
            Error::Eof => "end of buffer",
            Error::Crc => "checksum mismatch",
            Error::Hardware => "radio hardware request failed",
        })
    }
}

/// Failures that prevent the router from starting at all.
///
/// These map to a process exit code of `-1`; everything less severe is
/// reported as an alarm to Central and the router keeps running degraded.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum InitError {
    /// The paired vehicle uses an encrypted model but no key is installed.
    MissingEncryptionKey,

    /// No radio interface could be opened for receiving.
    NoRxInterfaces,

    /// No radio interface could be opened for transmitting.
    NoTxInterfaces,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitError::MissingEncryptionKey => "vehicle model is encrypted and no key is installed",
            InitError::NoRxInterfaces => "no radio interface could be opened for read",
            InitError::NoTxInterfaces => "no radio interface could be opened for write",
        })
    }
}
