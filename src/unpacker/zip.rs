// SPDX-License-Identifier: GPL-3.0-only
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Archive entry escapes the destination: {0}")]
    UnsafePath(String),

    #[error("Failed to read archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract every entry of a zip archive below `dest`.
///
/// Blocking; runs on the install worker.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
    debug!(archive = %archive_path.display(), dest = %dest.display(), "Extracting package");

    std::fs::create_dir_all(dest)?;

    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let outpath = match entry.enclosed_name() {
            Some(path) => dest.join(path),
            None => return Err(ExtractError::UnsafePath(entry.name().to_string())),
        };

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_zip;
    use tempfile::TempDir;

    #[test]
    fn test_extract_nested_entries() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("pkg.zip");
        write_zip(&archive, &[("manifest.json", "{}"), ("lib/data.bin", "abc")]);

        let dest = temp_dir.path().join("out");
        extract_zip(&archive, &dest).unwrap();

        assert_eq!(std::fs::read_to_string(dest.join("manifest.json")).unwrap(), "{}");
        assert_eq!(std::fs::read_to_string(dest.join("lib/data.bin")).unwrap(), "abc");
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.txt", "x")]);

        let err = extract_zip(&archive, &temp_dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::UnsafePath(_)));
        assert!(!temp_dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_extract_rejects_non_zip() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("junk.zip");
        std::fs::write(&archive, "not a zip").unwrap();

        let err = extract_zip(&archive, &temp_dir.path().join("out")).unwrap_err();
        assert!(matches!(err, ExtractError::Archive(_)));
    }
}
