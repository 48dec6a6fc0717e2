//! Error taxonomy shared by every stage of the reweighting pipeline.
//!
//! Most variants are recoverable at the level of a single bin, window or
//! system size; the [`Error::is_fatal_for_size`] helper tells the driver
//! which ones abort the current size.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Too few or degenerate samples to estimate a quantity.
    #[error("insufficient data: {0}")]
    DataInsufficient(String),

    /// Two adjacent windows do not share enough abscissa values.
    #[error("insufficient overlap between {left} and {right}: {reason}")]
    InsufficientOverlap {
        left: String,
        right: String,
        reason: String,
    },

    /// An expected raw file is absent.
    #[error("missing input file {}", .0.display())]
    MissingInput(PathBuf),

    /// The simulator flagged the run as not equilibrated.
    #[error("run {} did not equilibrate", .0.display())]
    NotEquilibrated(PathBuf),

    /// Unknown sampling code, malformed binning request and similar.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a window-level error must abort processing of the whole
    /// system size instead of just dropping the window.
    pub fn is_fatal_for_size(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Csv(_) | Error::Toml(_))
    }
}
