// SPDX-License-Identifier: GPL-3.0-only
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::crx::CrxComponent;
use crate::installer::traits::{
    CrxInstaller, FINGERPRINT_FILE, InstallError, InstallManifest, InstallerTraits, MANIFEST_FILE,
    manifest_version,
};
use crate::utils::{safe_relative_path, validate_path_within_base};
use crate::version::Version;

/// The installation picked by a startup scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledComponent {
    pub version: Version,
    pub fingerprint: String,
    pub install_dir: PathBuf,
}

#[derive(Debug, Default)]
struct CurrentInstall {
    version: Version,
    fingerprint: String,
    install_dir: Option<PathBuf>,
}

/// Installs versioned copies of a component under its base directory,
/// `<base>/<version>/`, delegating component specifics to its traits.
pub struct DefaultComponentInstaller {
    traits: Arc<dyn InstallerTraits>,
    current: Mutex<CurrentInstall>,
}

impl DefaultComponentInstaller {
    pub fn new(traits: Arc<dyn InstallerTraits>) -> Self {
        Self {
            traits,
            current: Mutex::new(CurrentInstall::default()),
        }
    }

    fn current(&self) -> MutexGuard<'_, CurrentInstall> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_version(&self) -> Version {
        self.current().version.clone()
    }

    /// Scan the base directory for installed versions.
    ///
    /// The newest version directory whose manifest matches its name and that
    /// passes verification becomes current; every other version directory is
    /// deleted. Directories whose names aren't versions are left alone.
    pub fn load_installed(&self) -> Result<Option<InstalledComponent>, InstallError> {
        let base = self.traits.base_directory();
        if !base.exists() {
            debug!(component = %self.traits.name(), base = %base.display(), "No installation found");
            return Ok(None);
        }

        let mut best: Option<(Version, PathBuf, InstallManifest)> = None;
        let mut stale = Vec::new();

        for entry in fs::read_dir(&base)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }

            let Some(version) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(Version::parse)
            else {
                continue;
            };

            let manifest = match read_manifest(&path) {
                Some(manifest) => manifest,
                None => {
                    stale.push(path);
                    continue;
                }
            };

            let declared = manifest_version(&manifest).ok();
            if declared.as_ref() != Some(&version)
                || !self.traits.verify_installation(&manifest, &path)
            {
                warn!(path = %path.display(), "Installed version failed verification");
                stale.push(path);
                continue;
            }

            let newer = best
                .as_ref()
                .is_none_or(|(best_version, _, _)| version > *best_version);
            if !newer {
                stale.push(path);
            } else if let Some((_, previous, _)) = best.replace((version, path, manifest)) {
                stale.push(previous);
            }
        }

        for dir in stale {
            info!(path = %dir.display(), "Removing stale component version");
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "Failed to remove stale version");
            }
        }

        let Some((version, install_dir, manifest)) = best else {
            return Ok(None);
        };

        let fingerprint = read_fingerprint(&install_dir);
        {
            let mut current = self.current();
            current.version = version.clone();
            current.fingerprint = fingerprint.clone();
            current.install_dir = Some(install_dir.clone());
        }

        info!(
            component = %self.traits.name(),
            version = %version,
            path = %install_dir.display(),
            "Found installed component"
        );
        self.traits
            .on_component_ready(&version, &install_dir, &manifest);

        Ok(Some(InstalledComponent {
            version,
            fingerprint,
            install_dir,
        }))
    }

    /// Registration record reflecting whatever is installed right now.
    pub fn crx_component(self: &Arc<Self>) -> CrxComponent {
        let current = self.current();
        let installer: Arc<dyn CrxInstaller> = Arc::clone(self) as Arc<dyn CrxInstaller>;

        let mut component = CrxComponent::new(
            self.traits.name(),
            self.traits.public_key_hash(),
            current.version.clone(),
            installer,
        );
        component.fingerprint = current.fingerprint.clone();
        component.installer_attributes = self.traits.installer_attributes();
        component.allow_background_download = self.traits.allow_background_download();
        component.updates_enabled = self.traits.can_auto_update();
        component
    }

    fn rollback(&self, install_dir: &Path) {
        if let Err(e) = fs::remove_dir_all(install_dir) {
            warn!(path = %install_dir.display(), error = %e, "Failed to roll back install directory");
        }
    }
}

impl CrxInstaller for DefaultComponentInstaller {
    fn install(&self, manifest: &InstallManifest, unpack_path: &Path) -> Result<(), InstallError> {
        let version = manifest_version(manifest)?;

        let current_version = self.current_version();
        if version < current_version {
            return Err(InstallError::VersionRegression {
                current: current_version,
                offered: version,
            });
        }

        let base = self.traits.base_directory();
        fs::create_dir_all(&base)?;

        let install_dir = base.join(version.to_string());
        if install_dir.exists() {
            fs::remove_dir_all(&install_dir).map_err(InstallError::MoveFiles)?;
        }

        if let Err(e) = move_tree(unpack_path, &install_dir) {
            if install_dir.exists() {
                self.rollback(&install_dir);
            }
            return Err(InstallError::MoveFiles(e));
        }

        if !self.traits.on_custom_install(manifest, &install_dir) {
            self.rollback(&install_dir);
            return Err(InstallError::CustomInstall);
        }

        if !self.traits.verify_installation(manifest, &install_dir) {
            self.rollback(&install_dir);
            return Err(InstallError::Verification);
        }

        let fingerprint = read_fingerprint(&install_dir);
        {
            let mut current = self.current();
            current.version = version.clone();
            current.fingerprint = fingerprint;
            current.install_dir = Some(install_dir.clone());
        }

        info!(
            component = %self.traits.name(),
            version = %version,
            path = %install_dir.display(),
            "Component installed"
        );
        self.traits
            .on_component_ready(&version, &install_dir, manifest);

        Ok(())
    }

    fn installed_file(&self, relative: &str) -> Option<PathBuf> {
        let install_dir = self.current().install_dir.clone()?;
        let path = install_dir.join(safe_relative_path(relative).ok()?);

        if path.is_file() && validate_path_within_base(&path, &install_dir).is_ok() {
            Some(path)
        } else {
            None
        }
    }

    fn uninstall(&self) -> Result<(), InstallError> {
        if !self.traits.uninstall() {
            return Err(InstallError::Uninstall);
        }

        let base = self.traits.base_directory();
        if base.exists() {
            fs::remove_dir_all(&base)?;
        }

        *self.current() = CurrentInstall::default();
        info!(component = %self.traits.name(), "Component uninstalled");
        Ok(())
    }
}

fn read_manifest(dir: &Path) -> Option<InstallManifest> {
    let raw = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
    match serde_json::from_str::<serde_json::Value>(&raw).ok()? {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    }
}

fn read_fingerprint(dir: &Path) -> String {
    fs::read_to_string(dir.join(FINGERPRINT_FILE))
        .map(|fp| fp.trim().to_string())
        .unwrap_or_default()
}

/// Rename `from` to `to`, copying when they sit on different filesystems.
fn move_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    copy_dir_all(from, to)?;
    fs::remove_dir_all(from)
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
