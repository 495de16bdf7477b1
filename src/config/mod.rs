// SPDX-License-Identifier: GPL-3.0-only
pub mod config;
pub mod traits;

pub use config::{ComponentConfig, Config};
pub use traits::Configurator;
