//! Opaque identifier generation.

use rand::Rng;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Alphabet for session identifiers. Lowercase letters and digits only so the
/// id can be embedded in hostnames and network names verbatim.
const SESSION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Alphabet for instance short ids, base32hex style.
const SHORT_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuv";

/// The length of a session identifier.
pub const SESSION_ID_LEN: usize = 8;

/// The length of an instance short identifier.
pub const SHORT_ID_LEN: usize = 20;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Generates a new 8-character session identifier from `[0-9a-z]`.
pub fn session_id() -> String {
    random_id(SESSION_ID_ALPHABET, SESSION_ID_LEN)
}

/// Generates a new 20-character opaque short identifier.
pub fn short_id() -> String {
    random_id(SHORT_ID_ALPHABET, SHORT_ID_LEN)
}

fn random_id(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        for _ in 0..100 {
            let id = session_id();
            assert_eq!(id.len(), SESSION_ID_LEN);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_short_id_shape() {
        let id = short_id();
        assert_eq!(id.len(), SHORT_ID_LEN);
        assert!(id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_ids_are_unique_enough() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(session_id()));
        }
    }
}
