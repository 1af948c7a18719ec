//! Error types shared across the generator pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal failures raised while loading the question source.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The CSV file does not exist.
    #[error("CSV file not found: {0}")]
    MissingFile(PathBuf),
    /// The CSV file has no header row.
    #[error("CSV file is empty or has no headers")]
    MissingHeaders,
    /// One or more required columns are absent from the header row.
    #[error("CSV missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    /// The CSV reader rejected the file contents.
    #[error("error reading CSV file: {0}")]
    Csv(#[from] csv::Error),
    /// The file could not be read.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Failures while reading or writing one of the persisted documents or output files.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("filesystem error at {path:?}: {source}")]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A document existed but did not contain valid JSON of the expected shape.
    #[error("invalid JSON document {path:?}: {source}")]
    Json {
        /// Document path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Classified failure of the two-stage generation pipeline.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The text capability call failed.
    #[error("prompt generation failed: {0:#}")]
    PromptRequest(#[source] anyhow::Error),
    /// The text capability answered with nothing usable.
    #[error("prompt generation returned an empty response")]
    EmptyPrompt,
    /// The image capability call failed.
    #[error("image generation failed: {0:#}")]
    ImageRequest(#[source] anyhow::Error),
    /// The image capability answered without an encoded payload.
    #[error("image API returned no data")]
    MissingImageData,
    /// The encoded payload was not valid base64.
    #[error("failed to decode image payload: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Why a semantic-grouping response could not be interpreted.
#[derive(Debug, Error)]
pub enum ClusterResponseError {
    /// The capability returned nothing.
    #[error("empty response from API")]
    Empty,
    /// The text was not JSON of the expected structure.
    #[error("failed to parse clustering response: {0}")]
    Malformed(#[from] serde_json::Error),
}
