use std::path::PathBuf;

use thiserror::Error;

/// Every fatal condition this crate can raise. Fatal is the only kind there
/// is: ingestion, build, and search all stop the run on the first error
/// rather than retrying or recovering.
#[derive(Error, Debug)]
pub enum Error {
    #[error("could not open {path}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    ParseFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{path}: exceeds capacity cap of {cap} entries")]
    CapacityExceeded { path: PathBuf, cap: usize },

    #[error("{path}:{line}: unsupported protocol mask 0x{mask:02x}, only 0x00 and 0xff are accepted")]
    UnsupportedMask {
        path: PathBuf,
        line: usize,
        mask: u8,
    },

    #[error("failed to build index: {0}")]
    BuildFailure(String),

    #[error(
        "search mismatch at packet {packet_index}: expected {expected:?}, got {got:?}"
    )]
    SearchMismatch {
        packet_index: usize,
        expected: Option<u32>,
        got: Option<u32>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
