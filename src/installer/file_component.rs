// SPDX-License-Identifier: GPL-3.0-only
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ComponentConfig;
use crate::installer::traits::{InstallManifest, InstallerTraits};
use crate::utils::{safe_relative_path, sanitize_dir_name};
use crate::version::Version;

/// A component that is nothing but a directory of files declared in config.
#[derive(Debug, Clone)]
pub struct FileComponentTraits {
    name: String,
    pk_hash: Vec<u8>,
    base_dir: PathBuf,
    required_files: Vec<String>,
    allow_background_download: bool,
    attributes: BTreeMap<String, String>,
}

impl FileComponentTraits {
    /// Files are installed under `components_dir/<sanitized name>/`.
    pub fn from_config(config: &ComponentConfig, components_dir: &Path) -> anyhow::Result<Self> {
        let pk_hash = hex::decode(&config.public_key_sha256).map_err(|e| {
            anyhow::anyhow!("Component {} has an invalid public key hash: {}", config.name, e)
        })?;

        for file in &config.required_files {
            safe_relative_path(file).map_err(|e| {
                anyhow::anyhow!("Component {} lists a bad required file: {}", config.name, e)
            })?;
        }

        Ok(Self {
            name: config.name.clone(),
            pk_hash,
            base_dir: components_dir.join(sanitize_dir_name(&config.name)?),
            required_files: config.required_files.clone(),
            allow_background_download: config.allow_background_download,
            attributes: config.attributes.clone(),
        })
    }
}

impl InstallerTraits for FileComponentTraits {
    fn verify_installation(&self, _manifest: &InstallManifest, install_dir: &Path) -> bool {
        self.required_files.iter().all(|file| {
            let present = safe_relative_path(file)
                .map(|relative| install_dir.join(relative).is_file())
                .unwrap_or(false);
            if !present {
                warn!(component = %self.name, file = %file, "Required file missing");
            }
            present
        })
    }

    fn can_auto_update(&self) -> bool {
        true
    }

    fn on_custom_install(&self, _manifest: &InstallManifest, _install_dir: &Path) -> bool {
        true
    }

    fn on_component_ready(&self, version: &Version, install_dir: &Path, _manifest: &InstallManifest) {
        info!(
            component = %self.name,
            version = %version,
            path = %install_dir.display(),
            "Component ready"
        );
    }

    fn base_directory(&self) -> PathBuf {
        self.base_dir.clone()
    }

    fn public_key_hash(&self) -> Vec<u8> {
        self.pk_hash.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn uninstall(&self) -> bool {
        info!(component = %self.name, "Uninstalling component");
        true
    }

    fn installer_attributes(&self) -> BTreeMap<String, String> {
        self.attributes.clone()
    }

    fn allow_background_download(&self) -> bool {
        self.allow_background_download
    }
}
