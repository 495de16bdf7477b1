// SPDX-License-Identifier: GPL-3.0-only
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::installer::{CrxInstaller, MANIFEST_FILE};
use crate::utils::{safe_relative_path, sha256_matches};

pub const DIFF_MANIFEST_FILE: &str = "manifest.diff.json";

#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    #[error("Bad differential commands: {0}")]
    BadCommands(String),

    #[error("Unsupported differential command: {0}")]
    UnsupportedCommand(String),

    #[error("Installed file not found: {0}")]
    MissingExistingFile(String),

    #[error("Differential operation failed: {0}")]
    OperationFailure(String),

    #[error("Output failed hash verification: {0}")]
    VerificationFailure(String),
}

#[derive(Debug, Deserialize)]
struct CopyCommand {
    input: String,
    output: String,
    sha256: String,
}

#[derive(Debug, Deserialize)]
struct CreateCommand {
    patch: String,
    output: String,
    sha256: String,
}

#[derive(Debug)]
enum DiffCommand {
    /// Reuse a file of the current installation
    Copy(CopyCommand),
    /// Take a file shipped inside the differential package
    Create(CreateCommand),
}

impl DiffCommand {
    fn parse(value: Value) -> Result<Self, PatchError> {
        let op = value
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| PatchError::BadCommands("command without op".to_string()))?
            .to_string();

        let bad = |e: serde_json::Error| PatchError::BadCommands(format!("{}: {}", op, e));
        match op.as_str() {
            "copy" => Ok(DiffCommand::Copy(serde_json::from_value(value).map_err(bad)?)),
            "create" => Ok(DiffCommand::Create(serde_json::from_value(value).map_err(bad)?)),
            _ => Err(PatchError::UnsupportedCommand(op)),
        }
    }

    fn output(&self) -> &str {
        match self {
            DiffCommand::Copy(command) => &command.output,
            DiffCommand::Create(command) => &command.output,
        }
    }

    fn sha256(&self) -> &str {
        match self {
            DiffCommand::Copy(command) => &command.sha256,
            DiffCommand::Create(command) => &command.sha256,
        }
    }
}

fn read_commands(diff_dir: &Path) -> Result<Vec<DiffCommand>, PatchError> {
    let raw = fs::read_to_string(diff_dir.join(DIFF_MANIFEST_FILE))
        .map_err(|e| PatchError::BadCommands(format!("{}: {}", DIFF_MANIFEST_FILE, e)))?;

    let values: Vec<Value> =
        serde_json::from_str(&raw).map_err(|e| PatchError::BadCommands(e.to_string()))?;

    values.into_iter().map(DiffCommand::parse).collect()
}

/// Rebuild a full package tree in `output_dir` from the extracted
/// differential package in `diff_dir` and the component's installed files.
///
/// Commands are parsed up front so an unsupported one fails the update
/// before anything is written.
pub fn apply_diff(
    diff_dir: &Path,
    output_dir: &Path,
    installer: &dyn CrxInstaller,
) -> Result<(), PatchError> {
    let commands = read_commands(diff_dir)?;
    fs::create_dir_all(output_dir).map_err(|e| PatchError::OperationFailure(e.to_string()))?;

    for command in &commands {
        let output = resolve(output_dir, command.output())?;

        let source: PathBuf = match command {
            DiffCommand::Copy(copy) => installer
                .installed_file(&copy.input)
                .ok_or_else(|| PatchError::MissingExistingFile(copy.input.clone()))?,
            DiffCommand::Create(create) => {
                let patch = resolve(diff_dir, &create.patch)?;
                if !patch.is_file() {
                    return Err(PatchError::OperationFailure(format!(
                        "patch file {} not in package",
                        create.patch
                    )));
                }
                patch
            }
        };

        debug!(source = %source.display(), output = %output.display(), "Applying diff command");

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| PatchError::OperationFailure(e.to_string()))?;
        }
        fs::copy(&source, &output).map_err(|e| {
            PatchError::OperationFailure(format!("{}: {}", command.output(), e))
        })?;

        let verified = sha256_matches(&output, command.sha256())
            .map_err(|e| PatchError::OperationFailure(e.to_string()))?;
        if !verified {
            return Err(PatchError::VerificationFailure(command.output().to_string()));
        }
    }

    // The new manifest always travels in the differential package.
    let manifest = diff_dir.join(MANIFEST_FILE);
    if manifest.is_file() {
        fs::copy(&manifest, output_dir.join(MANIFEST_FILE))
            .map_err(|e| PatchError::OperationFailure(e.to_string()))?;
    }

    Ok(())
}

fn resolve(base: &Path, relative: &str) -> Result<PathBuf, PatchError> {
    safe_relative_path(relative)
        .map(|path| base.join(path))
        .map_err(|e| PatchError::BadCommands(e.to_string()))
}
