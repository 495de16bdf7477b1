// SPDX-License-Identifier: GPL-3.0-only
use regex::Regex;
use std::sync::OnceLock;

/// Number of public key hash bytes that make up a component id.
const ID_BYTES: usize = 16;

/// Derive the component id from the SHA-256 hash of its public key.
///
/// The first 16 bytes are hex encoded and every hex digit is shifted into
/// the `a`..=`p` range, giving a 32 character id.
pub fn crx_id_from_pk_hash(pk_hash: &[u8]) -> String {
    let take = pk_hash.len().min(ID_BYTES);
    hex::encode(&pk_hash[..take])
        .chars()
        .map(|c| match c.to_digit(16) {
            Some(d) => char::from(b'a' + d as u8),
            None => c,
        })
        .collect()
}

pub fn is_valid_crx_id(id: &str) -> bool {
    static ID_RE: OnceLock<Regex> = OnceLock::new();
    ID_RE
        .get_or_init(|| Regex::new(r"^[a-p]{32}$").expect("static regex"))
        .is_match(id)
}
