// SPDX-License-Identifier: GPL-3.0-only
pub mod http;
pub mod request;
pub mod response;
pub mod traits;

pub use http::HttpUpdateChecker;
pub use response::{Manifest, Package, UpdateResult, UpdateResults, parse_update_response};
pub use traits::{CheckError, CheckItem, UpdateChecker};
