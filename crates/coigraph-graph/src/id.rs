//! Identifier generation.
//!
//! Every entity/relationship/attribute/provenance id comes from one
//! generator so the encoding is a deployment parameter, not something the
//! engine hard-codes. The default is UUIDv7: unique, and time-ordered so ids
//! sort in creation order; creation-order tie-breaks in the resolver rely
//! on that.

use uuid::Uuid;

/// Source of sortable, monotonic, unique identifiers.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Default generator: UUIDv7 (Unix-timestamp-prefixed, sortable).
///
/// `Uuid::now_v7` runs against the uuid crate's shared thread-safe context,
/// so ids minted within the same millisecond still sort in generation order.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Generator;

impl UuidV7Generator {
    pub fn new() -> Self {
        Self
    }
}

impl IdGenerator for UuidV7Generator {
    fn next_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v7_ids_are_unique_and_sorted() {
        let generator = UuidV7Generator::new();
        let mut prev = generator.next_id();
        for _ in 0..256 {
            let next = generator.next_id();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn generator_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>(_: &T) {}
        let generator = UuidV7Generator::new();
        assert_send_sync(&generator);
        let shared: std::sync::Arc<dyn IdGenerator> = std::sync::Arc::new(generator);
        let handle = std::thread::spawn(move || shared.next_id());
        handle.join().unwrap();
    }
}
