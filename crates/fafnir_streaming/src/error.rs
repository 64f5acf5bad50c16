//! # Streaming Error Types
//!
//! Configuration problems are the only hard errors here: the residency
//! state machine itself signals failure through resource states
//! (`Failed`) and boolean refusals, never through `Err`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur loading streaming configuration.
#[derive(Error, Debug)]
pub enum StreamingError {
    /// The config file could not be read.
    #[error("cannot read streaming config {path:?}")]
    ConfigRead {
        /// The file that was requested.
        path: PathBuf,
        /// The IO cause.
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("invalid streaming config")]
    ConfigParse {
        /// The parse cause.
        #[from]
        source: toml::de::Error,
    },
}

/// Result type for streaming configuration operations.
pub type StreamingResult<T> = Result<T, StreamingError>;
