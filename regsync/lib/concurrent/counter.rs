use std::sync::atomic::{AtomicI64, Ordering};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An atomic (count, total) pair.
///
/// Used both as the prerequisite counter of manifest tasks (count reaches
/// zero when every child has completed) and as the per-pass progress
/// counter of the scheduler (count of processed tasks against the growing
/// total).
#[derive(Debug)]
pub struct Counter {
    count: AtomicI64,
    total: AtomicI64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Counter {
    /// Creates a counter with the given initial count and total.
    pub fn new(count: i64, total: i64) -> Self {
        Self {
            count: AtomicI64::new(count),
            total: AtomicI64::new(total),
        }
    }

    /// Increments the count and returns the updated (count, total).
    pub fn increase(&self) -> (i64, i64) {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        (count, self.total.load(Ordering::Acquire))
    }

    /// Increments the total and returns the updated (count, total).
    pub fn increase_total(&self) -> (i64, i64) {
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        (self.count.load(Ordering::Acquire), total)
    }

    /// Decrements the count and returns the updated (count, total).
    ///
    /// The decrement is not clamped; a release called more times than the
    /// total drives the count negative, which callers treat the same as
    /// "already released" (only the exact transition to zero is reported
    /// as newly runnable).
    pub fn decrease(&self) -> (i64, i64) {
        let count = self.count.fetch_add(-1, Ordering::AcqRel) - 1;
        (count, self.total.load(Ordering::Acquire))
    }

    /// Returns the current (count, total).
    pub fn value(&self) -> (i64, i64) {
        (
            self.count.load(Ordering::Acquire),
            self.total.load(Ordering::Acquire),
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
