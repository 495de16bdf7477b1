// SPDX-License-Identifier: GPL-3.0-only
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Calculate the SHA-256 of a file as lowercase hex.
///
/// Blocking; call from a blocking worker.
pub fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for checksum: {}", path.display()))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let count = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for checksum: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against an expected hex digest, ignoring case.
pub fn sha256_matches(path: &Path, expected: &str) -> anyhow::Result<bool> {
    Ok(file_sha256(path)?.eq_ignore_ascii_case(expected.trim()))
}
