//! Small filesystem helpers.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::WardenError;

/// Replace `path` with `bytes` so that readers only ever see the old or the
/// new content: write a sibling temp file, fsync it, then rename over.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), WardenError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| WardenError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("snapshot");
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut f = File::create(&tmp).map_err(|e| WardenError::io(&tmp, e))?;
        f.write_all(bytes).map_err(|e| WardenError::io(&tmp, e))?;
        f.sync_all().map_err(|e| WardenError::io(&tmp, e))?;
    }

    fs::rename(&tmp, path).map_err(|e| WardenError::io(path, e))
}
