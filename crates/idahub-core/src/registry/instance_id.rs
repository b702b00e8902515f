//! Short instance IDs derived from `pid:port:idb_path`.
//!
//! The same triple always hashes to the same ID, and a different analysis
//! target (idb_path) yields a different one.

use crate::config::InstanceIdConfig;
use crate::{HubError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Generate a base-36 ID of `length` characters for an instance.
pub fn generate_instance_id(pid: u32, port: u16, idb_path: &str, length: usize) -> String {
    let digest = Sha256::digest(format!("{}:{}:{}", pid, port, idb_path).as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u128;
    let mut n = head % 36u128.pow(length as u32);

    let alphabet = InstanceIdConfig::ALPHABET;
    let mut out = vec![b'0'; length];
    for slot in out.iter_mut().rev() {
        *slot = alphabet[(n % 36) as usize];
        n /= 36;
    }
    // Alphabet is ASCII.
    String::from_utf8_lossy(&out).into_owned()
}

/// Resolve a collision between `candidate` and the IDs already in use.
///
/// Order: the candidate itself, the 5-character form of the same hash, then
/// the candidate with each base-36 suffix appended.
pub fn resolve_collision(
    candidate: &str,
    existing: &HashSet<String>,
    pid: u32,
    port: u16,
    idb_path: &str,
) -> Result<String> {
    if !existing.contains(candidate) {
        return Ok(candidate.to_string());
    }

    let widened = generate_instance_id(pid, port, idb_path, InstanceIdConfig::DEFAULT_LENGTH + 1);
    if !existing.contains(&widened) {
        return Ok(widened);
    }

    for &suffix in InstanceIdConfig::ALPHABET.iter() {
        let suffixed = format!("{}{}", candidate, suffix as char);
        if !existing.contains(&suffixed) {
            return Ok(suffixed);
        }
    }

    Err(HubError::IdSpaceExhausted {
        candidate: candidate.to_string(),
        attempts: InstanceIdConfig::ALPHABET.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_base36(id: &str) -> bool {
        id.bytes()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate_instance_id(1234, 13337, "/tmp/sample.i64", 4);
        let b = generate_instance_id(1234, 13337, "/tmp/sample.i64", 4);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(is_base36(&a));
    }

    #[test]
    fn test_generate_changes_with_idb_path() {
        let ids: HashSet<String> = (0..20)
            .map(|i| generate_instance_id(1234, 13337, &format!("/tmp/sample{}.i64", i), 4))
            .collect();
        // 20 targets hashed into 36^4 buckets; a few collisions would be a broken hash.
        assert!(ids.len() >= 18);
    }

    #[test]
    fn test_generate_widened_length() {
        let id = generate_instance_id(42, 8000, "a.idb", 5);
        assert_eq!(id.len(), 5);
        assert!(is_base36(&id));
    }

    #[test]
    fn test_resolve_no_collision_keeps_candidate() {
        let existing = HashSet::from(["zzzz".to_string()]);
        let id = resolve_collision("k7m2", &existing, 1, 2, "x").unwrap();
        assert_eq!(id, "k7m2");
    }

    #[test]
    fn test_resolve_collision_widens_to_five() {
        let candidate = generate_instance_id(1, 2, "x", 4);
        let existing = HashSet::from([candidate.clone()]);

        let id = resolve_collision(&candidate, &existing, 1, 2, "x").unwrap();

        assert_eq!(id, generate_instance_id(1, 2, "x", 5));
        assert_ne!(id, candidate);
    }

    #[test]
    fn test_resolve_collision_falls_back_to_suffix() {
        let candidate = generate_instance_id(1, 2, "x", 4);
        let widened = generate_instance_id(1, 2, "x", 5);
        let mut existing = HashSet::from([candidate.clone(), widened.clone()]);
        existing.insert(format!("{}0", candidate));

        let id = resolve_collision(&candidate, &existing, 1, 2, "x").unwrap();

        if widened == format!("{}1", candidate) {
            assert_eq!(id, format!("{}2", candidate));
        } else {
            assert_eq!(id, format!("{}1", candidate));
        }
    }

    #[test]
    fn test_resolve_exhausted_is_typed_error() {
        let candidate = "abcd".to_string();
        let mut existing: HashSet<String> = InstanceIdConfig::ALPHABET
            .iter()
            .map(|&c| format!("{}{}", candidate, c as char))
            .collect();
        existing.insert(candidate.clone());
        existing.insert(generate_instance_id(9, 9, "y", 5));

        let result = resolve_collision(&candidate, &existing, 9, 9, "y");

        match result {
            Err(HubError::IdSpaceExhausted { candidate: c, attempts }) => {
                assert_eq!(c, "abcd");
                assert_eq!(attempts, 36);
            }
            other => panic!("Expected IdSpaceExhausted, got: {:?}", other),
        }
    }
}
