// SPDX-License-Identifier: GPL-3.0-only
pub mod engine;
pub mod events;
pub mod service;


pub use engine::UpdateEngine;
pub use events::{Event, Status};
pub use service::ComponentUpdateService;
