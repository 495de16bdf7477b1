// SPDX-License-Identifier: GPL-3.0-only
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::installer::{CrxInstaller, FINGERPRINT_FILE, InstallError, InstallManifest, MANIFEST_FILE};
use crate::unpacker::patcher::{PatchError, apply_diff};
use crate::unpacker::zip::{ExtractError, extract_zip};
use crate::utils::sha256_matches;

#[derive(thiserror::Error, Debug)]
pub enum UnpackError {
    #[error("Invalid unpack parameters: {0}")]
    InvalidParams(String),

    #[error("Package failed hash verification")]
    InvalidFile,

    #[error("Package contains an unsafe path: {0}")]
    UnzipPathError(String),

    #[error("Failed to unzip package: {0}")]
    UnzipFailed(String),

    #[error("Package has no manifest")]
    NoManifest,

    #[error("Package manifest is malformed: {0}")]
    BadManifest(String),

    #[error("Installer failed: {0}")]
    Installer(#[from] InstallError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Differential output failed verification: {0}")]
    DeltaVerificationFailure(String),

    #[error("{0}")]
    DeltaBadCommands(String),

    #[error("{0}")]
    DeltaUnsupportedCommand(String),

    #[error("{0}")]
    DeltaOperationFailure(String),

    #[error("{0}")]
    DeltaMissingExistingFile(String),

    #[error("Failed to write fingerprint: {0}")]
    FingerprintWriteFailed(#[source] std::io::Error),
}

impl UnpackError {
    /// Error code recorded on the item.
    pub fn code(&self) -> i32 {
        match self {
            UnpackError::InvalidParams(_) => 1,
            UnpackError::InvalidFile => 2,
            UnpackError::UnzipPathError(_) => 3,
            UnpackError::UnzipFailed(_) => 4,
            UnpackError::NoManifest => 5,
            UnpackError::BadManifest(_) => 6,
            UnpackError::Installer(_) => 9,
            UnpackError::Io(_) => 10,
            UnpackError::DeltaVerificationFailure(_) => 11,
            UnpackError::DeltaBadCommands(_) => 12,
            UnpackError::DeltaUnsupportedCommand(_) => 13,
            UnpackError::DeltaOperationFailure(_) => 14,
            UnpackError::DeltaMissingExistingFile(_) => 16,
            UnpackError::FingerprintWriteFailed(_) => 17,
        }
    }

    /// Secondary code, the installer's own code for installer failures.
    pub fn extra_code(&self) -> i32 {
        match self {
            UnpackError::Installer(e) => e.code(),
            _ => 0,
        }
    }

    pub fn is_installer_error(&self) -> bool {
        matches!(self, UnpackError::Installer(_))
    }
}

impl From<ExtractError> for UnpackError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsafePath(path) => UnpackError::UnzipPathError(path),
            other => UnpackError::UnzipFailed(other.to_string()),
        }
    }
}

impl From<PatchError> for UnpackError {
    fn from(e: PatchError) -> Self {
        let message = e.to_string();
        match e {
            PatchError::BadCommands(_) => UnpackError::DeltaBadCommands(message),
            PatchError::UnsupportedCommand(_) => UnpackError::DeltaUnsupportedCommand(message),
            PatchError::MissingExistingFile(_) => UnpackError::DeltaMissingExistingFile(message),
            PatchError::OperationFailure(_) => UnpackError::DeltaOperationFailure(message),
            PatchError::VerificationFailure(_) => UnpackError::DeltaVerificationFailure(message),
        }
    }
}

/// One downloaded package waiting to be installed.
#[derive(Debug, Clone)]
pub struct UnpackJob {
    pub crx_path: PathBuf,
    /// Hex SHA-256 from the update response, if the server sent one
    pub expected_hash: Option<String>,
    pub is_delta: bool,
    /// Fingerprint the installed tree will carry
    pub fingerprint: String,
}

/// Verifies, extracts and hands packages to their installer.
///
/// Everything here blocks; the engine runs it on a blocking worker. The
/// scratch directories and the downloaded file are removed whatever the
/// outcome.
#[derive(Debug, Clone)]
pub struct ComponentUnpacker {
    scratch_root: PathBuf,
}

impl ComponentUnpacker {
    pub fn new(scratch_root: PathBuf) -> Self {
        Self { scratch_root }
    }

    pub fn unpack(&self, job: &UnpackJob, installer: &dyn CrxInstaller) -> Result<(), UnpackError> {
        let unpack_dir = self.scratch_root.join(format!("unpack-{}", Uuid::new_v4()));
        let patch_dir = self.scratch_root.join(format!("patch-{}", Uuid::new_v4()));

        let result = self.unpack_into(job, installer, &unpack_dir, &patch_dir);

        for dir in [&unpack_dir, &patch_dir] {
            remove_dir_quietly(dir);
        }
        if let Err(e) = fs::remove_file(&job.crx_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %job.crx_path.display(), error = %e, "Failed to remove package file");
            }
        }

        match &result {
            Ok(()) => info!(path = %job.crx_path.display(), delta = job.is_delta, "Package installed"),
            Err(e) => warn!(path = %job.crx_path.display(), delta = job.is_delta, error = %e, "Package install failed"),
        }
        result
    }

    fn unpack_into(
        &self,
        job: &UnpackJob,
        installer: &dyn CrxInstaller,
        unpack_dir: &Path,
        patch_dir: &Path,
    ) -> Result<(), UnpackError> {
        if !job.crx_path.is_file() {
            return Err(UnpackError::InvalidParams(format!(
                "package {} does not exist",
                job.crx_path.display()
            )));
        }

        if let Some(expected) = job.expected_hash.as_deref().filter(|hash| !hash.is_empty()) {
            let matches = sha256_matches(&job.crx_path, expected)
                .map_err(|e| UnpackError::InvalidParams(e.to_string()))?;
            if !matches {
                return Err(UnpackError::InvalidFile);
            }
        }

        extract_zip(&job.crx_path, unpack_dir)?;

        let tree = if job.is_delta {
            apply_diff(unpack_dir, patch_dir, installer)?;
            patch_dir
        } else {
            unpack_dir
        };

        let manifest = read_manifest(tree)?;

        fs::write(tree.join(FINGERPRINT_FILE), &job.fingerprint)
            .map_err(UnpackError::FingerprintWriteFailed)?;

        installer.install(&manifest, tree)?;
        Ok(())
    }
}

fn read_manifest(dir: &Path) -> Result<InstallManifest, UnpackError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(UnpackError::NoManifest);
    }

    let raw = fs::read_to_string(&path)?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(UnpackError::BadManifest("not a JSON object".to_string())),
        Err(e) => Err(UnpackError::BadManifest(e.to_string())),
    }
}

fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}
