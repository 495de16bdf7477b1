// SPDX-License-Identifier: GPL-3.0-only
pub mod api;
pub mod checker;
pub mod config;
pub mod crx;
pub mod downloader;
pub mod engine;
pub mod errors;
pub mod history;
pub mod installer;
pub mod logging;
pub mod ping;
pub mod unpacker;
pub mod utils;
pub mod version;

#[cfg(test)]
pub mod test_helpers;
