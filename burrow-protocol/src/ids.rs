//! Sortable 128-bit identifiers for requests, tunnels, and connections.
//!
//! Encoded as 26-character Crockford base32 ULIDs: a 48-bit millisecond
//! timestamp followed by 80 random bits, so two IDs minted in the same
//! process sort the same way their creation times did.

use ulid::Ulid;

/// A sortable, globally-unique identifier.
pub type Id = Ulid;

/// Mint a new identifier.
pub fn new_id() -> Id {
    Ulid::new()
}

/// Render an identifier in its canonical 26-character form.
pub fn to_string(id: Id) -> String {
    id.to_string()
}

/// Parse a previously-rendered identifier back into its typed form.
pub fn parse(s: &str) -> Option<Id> {
    Ulid::from_string(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sort_by_creation_time() {
        let a = new_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id();
        assert!(a < b);
        assert!(a.timestamp_ms() <= b.timestamp_ms());
    }

    #[test]
    fn ids_round_trip_through_string() {
        let id = new_id();
        let s = to_string(id);
        assert_eq!(s.len(), 26);
        assert_eq!(parse(&s), Some(id));
    }

    #[test]
    fn ids_are_unique_under_rapid_generation() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(new_id()));
        }
    }
}
