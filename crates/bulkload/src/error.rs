//! Loader error types.

use std::fmt;
use std::io;

/// Errors surfaced by [`Loader::init`](crate::Loader::init).
///
/// Everything after a successful init is reported through diagnostics and
/// the non-blocking worker API; only initialization is fallible at the type
/// level.
#[derive(Debug)]
pub enum LoaderError {
    /// A configuration parameter is unusable.
    InvalidConfig(&'static str),
    /// The shared arena could not be mapped.
    ArenaSetup(io::Error),
    /// io_uring could not be initialized.
    RingSetup(io::Error),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid loader config: {msg}"),
            Self::ArenaSetup(e) => write!(f, "shared arena setup failed: {e}"),
            Self::RingSetup(e) => write!(f, "io_uring setup failed: {e}"),
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::ArenaSetup(e) | Self::RingSetup(e) => Some(e),
        }
    }
}
