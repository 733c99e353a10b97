//! Crash-safe file writes: write to a sibling temp file, then rename over
//! the target, so an interrupted save never truncates an existing one.

use std::fs;
use std::path::Path;

use crate::save_error::SaveError;

pub fn write_atomic(path: &Path, contents: &str) -> Result<(), SaveError> {
    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
