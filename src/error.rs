use std::fmt;
use std::io;

use crate::io::compressor::CompressorType;
use crate::layout::Bid;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// The superblock or the index block could not be decoded at open time.
    InvalidImage(String),
    /// A block read back from disk failed its checksum or inflated to the
    /// wrong size.
    Corruption(String),
    /// The compression codec recorded on disk disagrees with the configured
    /// one.
    ConfigMismatch {
        configured: CompressorType,
        stored: CompressorType,
    },
    /// An existing data file is shorter than the two superblock copies.
    FileTooShort { length: u64 },
    BlockNotFound(Bid),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "{}", e),
            Error::InvalidImage(reason) | Error::Corruption(reason) => write!(f, "{}", reason),
            Error::ConfigMismatch { configured, stored } => write!(
                f,
                "compression mismatch: configured {:?} but the data file records {:?}",
                configured, stored
            ),
            Error::FileTooShort { length } => {
                write!(f, "data file is too short ({} bytes)", length)
            }
            Error::BlockNotFound(bid) => write!(f, "block {:#x} not found", bid),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
