//! Merkle root over voter identifiers.
//!
//! Leaves are hashed independently and paired left to right. A level with an
//! odd count promotes its last hash unchanged rather than duplicating it.

use crate::hasher::hash_str;

/// Returns `None` for an empty list.
pub fn merkle_root<S: AsRef<str>>(ids: &[S]) -> Option<String> {
    if ids.is_empty() {
        return None;
    }

    let mut level: Vec<String> = ids.iter().map(|id| hash_str(id.as_ref())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut pairs = level.chunks_exact(2);
        for pair in pairs.by_ref() {
            next.push(hash_str(&format!("{}{}", pair[0], pair[1])));
        }
        if let [carried] = pairs.remainder() {
            next.push(carried.clone());
        }
        level = next;
    }

    level.pop()
}
