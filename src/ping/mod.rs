// SPDX-License-Identifier: GPL-3.0-only
pub mod manager;
pub mod message;

pub use manager::PingManager;
pub use message::{PingRequest, build_ping};
