//! Id generators for inserted documents.

use crate::error::{CoreError, CoreResult};
use crate::types::DocumentId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Assigns ids to documents at insert time.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Name the generator is selected by.
    fn name(&self) -> &str;

    /// Produces a fresh id.
    fn generate(&self) -> DocumentId;
}

/// Random UUID ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn name(&self) -> &str {
        "uuid"
    }

    fn generate(&self) -> DocumentId {
        DocumentId::new()
    }
}

/// Ids from an increasing counter, starting at 1.
///
/// Sequence ids sort in insertion order, which keeps fixtures and logs
/// readable.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicU64,
}

impl SequenceGenerator {
    /// Creates a generator whose first id is `start`.
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl IdGenerator for SequenceGenerator {
    fn name(&self) -> &str {
        "sequence"
    }

    fn generate(&self) -> DocumentId {
        DocumentId::from_u64(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Builds the generator registered under `name`.
///
/// # Errors
///
/// Returns `NotFound` for an unknown generator name.
pub fn generator_by_name(name: &str) -> CoreResult<Box<dyn IdGenerator>> {
    match name {
        "uuid" => Ok(Box::new(UuidGenerator)),
        "sequence" => Ok(Box::new(SequenceGenerator::default())),
        other => Err(CoreError::not_found(format!("id generator {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let generator = UuidGenerator;
        assert_ne!(generator.generate(), generator.generate());
    }

    #[test]
    fn sequence_counts_up() {
        let generator = SequenceGenerator::default();
        assert_eq!(generator.generate(), DocumentId::from_u64(1));
        assert_eq!(generator.generate(), DocumentId::from_u64(2));
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(generator_by_name("uuid").unwrap().name(), "uuid");
        assert_eq!(generator_by_name("sequence").unwrap().name(), "sequence");
        assert!(matches!(
            generator_by_name("snowflake"),
            Err(CoreError::NotFound { .. })
        ));
    }
}
