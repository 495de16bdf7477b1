// SPDX-License-Identifier: GPL-3.0-only
pub mod checksum;
pub mod path_sanitizer;

pub use checksum::{file_sha256, sha256_matches};
pub use path_sanitizer::{safe_relative_path, sanitize_dir_name, validate_path_within_base};
