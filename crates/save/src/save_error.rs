//! Typed errors for savegame operations.

use std::fmt;

#[derive(Debug)]
pub enum SaveError {
    /// File could not be read or written.
    Io(std::io::Error),
    /// Serialization failed.
    Encode(String),
    /// The file is not a valid savegame.
    Decode(String),
    /// The savegame was written by a newer build; loading is refused.
    VersionMismatch { expected_max: u32, found: u32 },
    /// Structurally valid but internally inconsistent (wrong array
    /// length, out-of-range lot coordinates).
    Corrupt(String),
}

impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "I/O error: {e}"),
            SaveError::Encode(msg) => write!(f, "encoding error: {msg}"),
            SaveError::Decode(msg) => write!(f, "decoding error: {msg}"),
            SaveError::VersionMismatch {
                expected_max,
                found,
            } => write!(
                f,
                "savegame is v{found}, but this build supports up to v{expected_max}"
            ),
            SaveError::Corrupt(msg) => write!(f, "corrupt savegame: {msg}"),
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}
