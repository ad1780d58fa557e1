//! Path resolution for file references inside documents
//!
//! File references are tried as given first (absolute paths or paths relative
//! to the working directory), then relative to the document's base directory.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve a document file reference to an existing path.
pub fn resolve(base: &Path, path: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(path);
    if direct.exists() {
        return Ok(direct);
    }
    let relative = base.join(path);
    if relative.exists() {
        return Ok(relative);
    }
    Err(Error::PathNotFound(direct))
}

/// Read the full contents of a resolved file reference.
pub fn read(base: &Path, path: &str) -> Result<Vec<u8>> {
    let full = resolve(base, path)?;
    std::fs::read(&full).map_err(|source| Error::Io { path: full, source })
}

/// Read a resolved file reference as UTF-8 text.
pub fn read_text(base: &Path, path: &str) -> Result<String> {
    let full = resolve(base, path)?;
    std::fs::read_to_string(&full).map_err(|source| Error::Io { path: full, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_resolve_relative_to_base() {
        let dir = std::env::temp_dir().join("smxboot-paths-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("blob.bin"), b"xyz").unwrap();

        let found = resolve(&dir, "blob.bin").unwrap();
        assert_eq!(std::fs::read(found).unwrap(), b"xyz");

        let missing = resolve(&dir, "nope.bin").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::Io);
    }
}
