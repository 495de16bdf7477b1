// SPDX-License-Identifier: GPL-3.0-only
pub mod default;
pub mod file_component;
pub mod traits;

pub use default::{DefaultComponentInstaller, InstalledComponent};
pub use file_component::FileComponentTraits;
pub use traits::{
    CrxInstaller, FINGERPRINT_FILE, InstallError, InstallManifest, InstallerTraits, MANIFEST_FILE,
    manifest_version,
};
