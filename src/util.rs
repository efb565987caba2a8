//! Small shared utilities.

use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique, human-readable identifiers for connections and client
/// ids. Uniqueness combines the process id, a coarse timestamp taken at
/// first use, and a process-wide counter.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    sequence: AtomicU64,
}

impl IdGenerator {
    pub const DEFAULT_PREFIX: &'static str = "ID:";

    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn generate(&self) -> String {
        static EPOCH_MILLIS: std::sync::OnceLock<u128> = std::sync::OnceLock::new();
        let stamp = EPOCH_MILLIS.get_or_init(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default()
        });
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}{}-{stamp}-{sequence}",
            self.prefix,
            std::process::id()
        )
    }
}

impl Default for IdGenerator {
    fn default() -> Self { Self::new(Self::DEFAULT_PREFIX) }
}

/// Milliseconds since the Unix epoch, saturating at zero if the system
/// clock reads before it.
#[must_use]
pub fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let generator = IdGenerator::default();
        let first = generator.generate();
        let second = generator.generate();
        assert!(first.starts_with(IdGenerator::DEFAULT_PREFIX));
        assert_ne!(first, second);
    }
}
