// SPDX-License-Identifier: GPL-3.0-only
use serde::{Deserialize, Serialize};

/// Coarse classification of why an update attempt failed. Recorded on the
/// item and reported in pings next to the detailed error code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    #[default]
    None,
    Network,
    Unpack,
    Install,
    Service,
}

impl ErrorCategory {
    pub fn code(self) -> i32 {
        match self {
            ErrorCategory::None => 0,
            ErrorCategory::Network => 1,
            ErrorCategory::Unpack => 2,
            ErrorCategory::Install => 3,
            ErrorCategory::Service => 4,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ErrorCategory::Network,
            2 => ErrorCategory::Unpack,
            3 => ErrorCategory::Install,
            4 => ErrorCategory::Service,
            _ => ErrorCategory::None,
        }
    }
}

/// Error code recorded with `ErrorCategory::Service` when an update was
/// found but the component's installer refuses automatic updates.
pub const SERVICE_UPDATES_DISABLED: i32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip() {
        for category in [
            ErrorCategory::None,
            ErrorCategory::Network,
            ErrorCategory::Unpack,
            ErrorCategory::Install,
            ErrorCategory::Service,
        ] {
            assert_eq!(ErrorCategory::from_code(category.code()), category);
        }
        assert_eq!(ErrorCategory::from_code(42), ErrorCategory::None);
    }

    #[test]
    fn test_serialize_lowercase() {
        let json = serde_json::to_string(&ErrorCategory::Install).unwrap();
        assert_eq!(json, "\"install\"");
    }
}
