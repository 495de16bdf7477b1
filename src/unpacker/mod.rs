// SPDX-License-Identifier: GPL-3.0-only
pub mod patcher;
pub mod unpacker;
pub mod zip;

pub use unpacker::{ComponentUnpacker, UnpackError, UnpackJob};
