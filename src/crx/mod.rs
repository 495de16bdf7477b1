// SPDX-License-Identifier: GPL-3.0-only
pub mod id;
pub mod item;

pub use id::{crx_id_from_pk_hash, is_valid_crx_id};
pub use item::{CrxComponent, ItemDetails, ReadyCallback, State, VersionedItem};
