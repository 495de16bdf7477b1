// SPDX-License-Identifier: GPL-3.0-only
use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Turn a component name into a directory name.
///
/// Keeps alphanumerics, dash and underscore, lowercases, and maps spaces to
/// underscores.
pub fn sanitize_dir_name(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == ' ')
        .collect();

    let normalized = sanitized.to_lowercase().trim().replace(' ', "_");

    if normalized.is_empty() {
        return Err(anyhow::anyhow!("Directory name cannot be empty after sanitization"));
    }

    if normalized.len() > 255 {
        return Err(anyhow::anyhow!("Directory name too long (max 255 characters)"));
    }

    if normalized.starts_with('-') {
        return Err(anyhow::anyhow!("Directory name cannot start with '-'"));
    }

    Ok(normalized)
}

/// Parse a slash-separated path taken from a package and make sure it stays
/// below whatever directory it is joined onto.
pub fn safe_relative_path(relative: &str) -> Result<PathBuf> {
    if relative.is_empty() {
        return Err(anyhow::anyhow!("Path is empty"));
    }

    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(anyhow::anyhow!(
                    "Path contains parent directory reference (..): {}",
                    relative
                ));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow::anyhow!("Path must be relative: {}", relative));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(anyhow::anyhow!("Path has no file component: {}", relative));
    }

    Ok(normalized)
}

/// Validate that an existing path is within a base directory.
///
/// Canonicalizes both sides so symlinks can't point out of `base`.
pub fn validate_path_within_base(path: &Path, base: &Path) -> Result<()> {
    let canonical_path = path.canonicalize().context("Failed to canonicalize path")?;

    let canonical_base = base
        .canonicalize()
        .context("Failed to canonicalize base path")?;

    if !canonical_path.starts_with(&canonical_base) {
        return Err(anyhow::anyhow!(
            "Path {} is outside base directory {}",
            canonical_path.display(),
            canonical_base.display()
        ));
    }

    Ok(())
}
