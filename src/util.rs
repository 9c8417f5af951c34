use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Read a file, optionally trimming surrounding whitespace
pub fn read_file(path: impl AsRef<Path>, trim: bool) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    if trim {
        Ok(bytes.trim_ascii().to_vec())
    } else {
        Ok(bytes)
    }
}

/// Read a UTF-8 file into a string, optionally trimming surrounding whitespace
pub fn read_file_to_string(path: impl AsRef<Path>, trim: bool) -> Result<String> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    if trim {
        Ok(contents.trim().to_string())
    } else {
        Ok(contents)
    }
}

/// Create a temp file in `dir` whose name starts with `prefix`, holding `contents`.
///
/// The file is removed when the returned handle is dropped.
pub fn create_temp_with_contents(
    dir: impl AsRef<Path>,
    prefix: &str,
    contents: &[u8],
) -> Result<NamedTempFile> {
    let dir = dir.as_ref();
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .tempfile_in(dir)
        .map_err(|e| Error::io(dir, e))?;
    if !contents.is_empty() {
        file.write_all(contents)
            .and_then(|_| file.flush())
            .map_err(|e| Error::io(file.path(), e))?;
    }
    Ok(file)
}

/// Check that `path` exists and is not a directory
pub fn file_exists(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return false;
    }
    std::fs::metadata(path).map(|m| !m.is_dir()).unwrap_or(false)
}

/// Check that `path` exists, whether file or directory
pub fn path_exists(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).is_ok()
}

/// Check that `path` exists and is a directory
pub fn is_directory(path: impl AsRef<Path>) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

/// Trim every value, dropping those left empty
pub fn trim_all<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .filter_map(|value| {
            let trimmed = value.as_ref().trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}
