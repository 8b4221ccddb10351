use std::path::PathBuf;
use thiserror::Error;

use crate::dataset::TokenWidth;

// Everything that can go wrong while preparing a dataset. All of these are
// terminal for a run; `main` just logs them and exits non-zero.
#[derive(Error, Debug)]
pub enum PrepareError {
    #[error("The source file specified doesn't exist: {0:?}")]
    SourceNotFound(PathBuf),

    #[error("Failed to read the source file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Fetching {url} failed with HTTP status {status}")]
    FetchFailed { url: String, status: u16 },

    #[error("Fetching {url} failed")]
    Transport {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    #[error("Failed to read the response body from {url}")]
    BodyRead {
        url: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source text from {origin} is not valid UTF-8")]
    Decode {
        origin: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Character {ch:?} at position {position} is not in the vocabulary")]
    UnknownChar { ch: char, position: usize },

    #[error("Token id {id} at position {position} is not in the vocabulary")]
    UnknownId { id: u32, position: usize },

    #[error("Vocabulary size {vocab_size} doesn't fit in {width} token ids")]
    VocabTooLarge { vocab_size: usize, width: TokenWidth },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid vocabulary metadata: {0}")]
    InvalidMetadata(String),

    #[error("Vocabulary metadata serialization failed")]
    Metadata(#[from] serde_json::Error),

    #[error("Token file {path:?} has {len} bytes which isn't a multiple of {width}")]
    CorruptTokenFile {
        path: PathBuf,
        len: usize,
        width: TokenWidth,
    },

    #[error("Failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Verification of {0:?} failed: decoded tokens don't match the source text")]
    VerifyFailed(PathBuf),
}

pub type Result<T> = std::result::Result<T, PrepareError>;
