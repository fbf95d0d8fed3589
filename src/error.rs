//! Errors surfaced by the library.
use crate::protocol as proto;

/// Represents all errors a caller of the library can see.
///
/// [`crate::bl0940::Bl0940::drain`] drops invalid packets itself and counts
/// them in [`crate::bl0940::FrameStats`]; only
/// [`crate::bl0940::Bl0940::process_packet`] hands them out as `Protocol`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wraps `proto::Error`.
    #[error(transparent)]
    Protocol(#[from] proto::Error),

    /// The byte link failed.
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed.
    #[cfg(feature = "serde")]
    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_yaml::Error),
}

/// The result type of the library.
pub type Result<T> = std::result::Result<T, Error>;
