//! Error types for the audio session manager.
//!
//! Every failure is returned to the immediate caller. None of them leaves a
//! registry half-updated: an operation either happens or it does not.

use thiserror::Error;

/// Main error type for the audio session manager.
#[derive(Error, Debug)]
pub enum AudioError {
   #[error("Not found")]
   NotFound,

   #[error("Invalid argument: {0}")]
   InvalidArgument(&'static str),

   #[error("Out of capacity")]
   NoMemory,

   #[error("Already done")]
   Already,

   #[error("Not initialised")]
   NotReady,

   #[error("Session is still stopping")]
   Busy,

   #[error("Operation not supported on this link")]
   Unsupported,

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),

   #[error("Audio service has been shut down")]
   ServiceShutdown,
}

impl AudioError {
   /// True for errors caused by the caller's input rather than manager state.
   pub const fn is_caller_error(&self) -> bool {
      matches!(
         self,
         Self::NotFound | Self::InvalidArgument(_) | Self::Unsupported
      )
   }
}

/// Convenience type alias for Results with `AudioError`.
pub type Result<T> = std::result::Result<T, AudioError>;
