// SPDX-License-Identifier: GPL-3.0-only
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::version::Version;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const FINGERPRINT_FILE: &str = "manifest.fingerprint";

/// Parsed `manifest.json` of a package.
pub type InstallManifest = Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum InstallError {
    #[error("Manifest has no valid version: {0}")]
    BadManifest(String),

    #[error("Refusing to install {offered}, {current} is already installed")]
    VersionRegression { current: Version, offered: Version },

    #[error("Failed to move files into place: {0}")]
    MoveFiles(#[source] std::io::Error),

    #[error("Custom install step failed")]
    CustomInstall,

    #[error("Installation failed verification")]
    Verification,

    #[error("Uninstall hook refused")]
    Uninstall,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    pub fn code(&self) -> i32 {
        match self {
            InstallError::BadManifest(_) => 1,
            InstallError::VersionRegression { .. } => 2,
            InstallError::MoveFiles(_) => 3,
            InstallError::CustomInstall => 4,
            InstallError::Verification => 5,
            InstallError::Uninstall => 6,
            InstallError::Io(_) => 7,
        }
    }
}

/// Everything specific to one kind of component.
///
/// The default installer drives these hooks; none of them should block for
/// long since they run on the install worker.
pub trait InstallerTraits: Send + Sync {
    /// Check that `install_dir` holds a usable copy of the component.
    fn verify_installation(&self, manifest: &InstallManifest, install_dir: &Path) -> bool;

    /// `false` keeps the component at its installed version.
    fn can_auto_update(&self) -> bool;

    /// Extra work after the files are in place. Returning `false` rolls the
    /// install back.
    fn on_custom_install(&self, manifest: &InstallManifest, install_dir: &Path) -> bool;

    fn on_component_ready(&self, version: &Version, install_dir: &Path, manifest: &InstallManifest);

    /// Directory holding one subdirectory per installed version
    fn base_directory(&self) -> PathBuf;

    fn public_key_hash(&self) -> Vec<u8>;

    fn name(&self) -> String;

    /// Called once when the component is unregistered, before its files go.
    fn uninstall(&self) -> bool;

    /// Static attributes sent along with every update check
    fn installer_attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn allow_background_download(&self) -> bool {
        false
    }
}

/// What the engine and unpacker talk to.
pub trait CrxInstaller: Send + Sync {
    /// Take ownership of the unpacked tree at `unpack_path`.
    fn install(&self, manifest: &InstallManifest, unpack_path: &Path) -> Result<(), InstallError>;

    /// Path of a file in the current installation, used as input for
    /// differential updates.
    fn installed_file(&self, relative: &str) -> Option<PathBuf>;

    fn uninstall(&self) -> Result<(), InstallError>;
}

/// Version declared by a manifest.
pub fn manifest_version(manifest: &InstallManifest) -> Result<Version, InstallError> {
    let raw = manifest
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| InstallError::BadManifest("missing version".to_string()))?;

    Version::parse(raw).ok_or_else(|| InstallError::BadManifest(raw.to_string()))
}
