//! Time-ordered string identifiers.
//!
//! [`SequentialIdGenerator::next_id`] renders the current UTC time in microseconds followed by
//! a random three digit suffix, then maps each digit `0..=9` to the letter `a..=j`:
//!
//! ```ignore
//! let ids = SequentialIdGenerator::new();
//! let id = ids.next_id(); // e.g. "bghdjaceffbdjbchgjd"
//! ```
//!
//! IDs generated in later microseconds sort after earlier ones, which keeps them usable as
//! cursor-chaining keys.

use chrono::Utc;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::{Mutex, PoisonError};

/// Generator of sequential string IDs.
///
/// The generator owns its random source. Share one instance (e.g. behind an `Arc`) rather
/// than creating one per call.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    rng: Mutex<StdRng>,
}

impl SequentialIdGenerator {
    /// Creates a generator seeded from the operating system.
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Creates a generator with a fixed seed, for reproducible suffixes.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    /// Returns a random integer in `[min, max)`, or `max` when the range is empty.
    pub fn rand_in_range(&self, min: i64, max: i64) -> i64 {
        if min >= max {
            return max;
        }

        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(min..max)
    }

    /// Returns the next ID.
    pub fn next_id(&self) -> String {
        let micros = Utc::now().timestamp_micros();
        let suffix = self.rand_in_range(100, 1000);

        format!("{micros}{suffix}")
            .bytes()
            .map(|digit| char::from(digit + 49))
            .collect()
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_letters() {
        let id = SequentialIdGenerator::with_seed(7).next_id();

        assert!(id.len() >= 19);
        assert!(id.chars().all(|c| ('a'..='j').contains(&c)));
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let ids = SequentialIdGenerator::new();
        let first = ids.next_id();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ids.next_id();

        assert!(first < second);
    }

    #[test]
    fn empty_range_returns_max() {
        let ids = SequentialIdGenerator::with_seed(1);

        assert_eq!(ids.rand_in_range(5, 5), 5);
        assert_eq!(ids.rand_in_range(9, 3), 3);

        let value = ids.rand_in_range(100, 1000);
        assert!((100..1000).contains(&value));
    }
}
