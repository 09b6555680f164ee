//! Lazy work generation

use std::iter::FusedIterator;

use ddload_common::WorkItem;

/// Yields one [`WorkItem`] per record without materialising the batch.
///
/// The cursor is advanced before the end check, so a generator built for
/// `nitems` yields indices `1..nitems`: `nitems - 1` items, never index 0.
/// See DESIGN.md before changing the termination check.
#[derive(Debug, Clone)]
pub struct WorkGenerator {
    nitems: u64,
    target_size_bytes: u64,
    cursor: u64,
}

impl WorkGenerator {
    pub fn new(nitems: u64, target_size_bytes: u64) -> Self {
        Self {
            nitems,
            target_size_bytes,
            cursor: 0,
        }
    }

    /// Items the generator yields in total, not counting any already taken
    pub fn total(&self) -> u64 {
        self.nitems.saturating_sub(1)
    }

    /// Bytes of payload the full sequence asks for
    pub fn estimated_bytes(&self) -> u64 {
        self.total().saturating_mul(self.target_size_bytes)
    }

    fn remaining(&self) -> u64 {
        self.nitems.saturating_sub(self.cursor.saturating_add(1))
    }
}

impl Iterator for WorkGenerator {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        if self.cursor >= self.nitems {
            return None;
        }
        self.cursor += 1;
        if self.cursor >= self.nitems {
            return None;
        }
        Some(WorkItem::new(self.cursor, self.target_size_bytes))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WorkGenerator {}

impl FusedIterator for WorkGenerator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yields_n_minus_one_items_from_one() {
        let items: Vec<WorkItem> = WorkGenerator::new(10, 64).collect();
        let indices: Vec<u64> = items.iter().map(|i| i.index).collect();

        assert_eq!(indices, (1..10).collect::<Vec<_>>());
        assert!(items.iter().all(|i| i.target_size_bytes == 64));
    }

    #[test]
    fn test_exhaustion_is_sticky() {
        let mut generator = WorkGenerator::new(2, 1);
        assert_eq!(generator.next(), Some(WorkItem::new(1, 1)));
        assert_eq!(generator.next(), None);
        assert_eq!(generator.next(), None);
        assert_eq!(generator.next(), None);
    }

    #[test]
    fn test_degenerate_counts() {
        assert_eq!(WorkGenerator::new(0, 1).count(), 0);
        assert_eq!(WorkGenerator::new(1, 1).count(), 0);
        assert_eq!(WorkGenerator::new(0, 1).total(), 0);
    }

    #[test]
    fn test_exact_size_tracks_progress() {
        let mut generator = WorkGenerator::new(5, 1);
        assert_eq!(generator.len(), 4);
        generator.next();
        assert_eq!(generator.len(), 3);
        generator.by_ref().for_each(drop);
        assert_eq!(generator.len(), 0);
        assert_eq!(generator.total(), 4);
    }

    #[test]
    fn test_estimated_bytes() {
        assert_eq!(WorkGenerator::new(1000, 50 << 20).estimated_bytes(), 999 * (50 << 20));
        assert_eq!(WorkGenerator::new(u64::MAX, u64::MAX).estimated_bytes(), u64::MAX);
    }
}
