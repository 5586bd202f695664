//! Scan Coordinator (spec.md §4.3): owns the shared page cursor, partitions
//! the physical page-ID space into contiguous tasks, and hands them out to
//! workers.

use std::sync::Mutex;

/// A contiguous, half-open range of physical pages assigned to one worker.
/// The last task extends `hi` to `u32::MAX` since the server's page estimate
/// is not authoritative (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRangeTask {
    pub lo: u32,
    pub hi: u32,
}

struct SharedCursor {
    next_page: u64,
}

/// Coordinates parallel workers over one table scan via a single
/// mutex-protected cursor. `next_page` only ever advances while the mutex is
/// held (spec.md §3 invariant).
pub struct ScanCoordinator {
    cursor: Mutex<SharedCursor>,
    approx_pages: u64,
    pages_per_task: u64,
}

impl ScanCoordinator {
    pub fn new(approx_pages: u64, pages_per_task: u64) -> Self {
        assert!(pages_per_task > 0, "pages_per_task must be positive");
        ScanCoordinator {
            cursor: Mutex::new(SharedCursor { next_page: 0 }),
            approx_pages: approx_pages.max(1),
            pages_per_task,
        }
    }

    /// `max(1, approx_pages / pages_per_task)`, as reported by spec.md §4.3.
    pub fn max_workers(&self) -> usize {
        (self.approx_pages / self.pages_per_task).max(1) as usize
    }

    /// Hands out the next contiguous page range, or `None` once the table
    /// has been fully partitioned. Concurrent callers are serialized by the
    /// cursor's mutex; the last task's upper bound is promoted to
    /// `u32::MAX` so it also covers any pages beyond the server's estimate.
    pub fn next_task(&self) -> Option<PageRangeTask> {
        let mut cursor = self.cursor.lock().expect("scan cursor mutex poisoned");
        if cursor.next_page >= self.approx_pages {
            return None;
        }

        let lo = cursor.next_page;
        let mut hi = lo + self.pages_per_task;
        // Advance by the regular stride even when the upper bound gets
        // promoted below, so exactly one task ends up covering the tail.
        cursor.next_page += self.pages_per_task;

        if hi >= self.approx_pages {
            hi = u32::MAX as u64;
        }

        Some(PageRangeTask {
            lo: lo as u32,
            hi: hi as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_page_table_gets_one_task_with_sentinel_upper_bound() {
        let coordinator = ScanCoordinator::new(1, 1000);
        let task = coordinator.next_task().unwrap();
        assert_eq!(task, PageRangeTask { lo: 0, hi: u32::MAX });
        assert!(coordinator.next_task().is_none());
    }

    #[test]
    fn partitions_contiguously_and_terminates() {
        let coordinator = ScanCoordinator::new(25, 10);
        let mut tasks = Vec::new();
        while let Some(task) = coordinator.next_task() {
            tasks.push(task);
        }
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0], PageRangeTask { lo: 0, hi: 10 });
        assert_eq!(tasks[1], PageRangeTask { lo: 10, hi: 20 });
        // Tail task absorbs anything beyond the server's (possibly stale)
        // page estimate.
        assert_eq!(tasks[2], PageRangeTask { lo: 20, hi: u32::MAX });
    }

    #[test]
    fn max_workers_is_at_least_one() {
        let coordinator = ScanCoordinator::new(1, 1000);
        assert_eq!(coordinator.max_workers(), 1);
    }

    #[test]
    fn concurrent_callers_never_double_assign_a_page() {
        use std::sync::Arc;
        use std::thread;

        let coordinator = Arc::new(ScanCoordinator::new(10_000, 7));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(task) = coordinator.next_task() {
                    mine.push(task);
                }
                mine
            }));
        }
        let mut all: Vec<PageRangeTask> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_by_key(|t| t.lo);
        for pair in all.windows(2) {
            assert_eq!(pair[0].hi, pair[1].lo, "tasks must tile the page space with no gaps or overlaps");
        }
    }
}

#[cfg(test)]
mod proptests {
    use proptest::prelude::*;
    use test_strategy::proptest;

    use super::*;

    /// For any table size and stride, `next_task()` must tile `[0,
    /// approx_pages)` with no gaps or overlaps and terminate with a sentinel
    /// upper bound on the final task (spec.md §8, universal invariant).
    #[proptest]
    fn tasks_tile_the_page_space_without_gaps_or_overlaps(
        #[strategy(1u64..50_000)] approx_pages: u64,
        #[strategy(1u64..500)] pages_per_task: u64,
    ) {
        let coordinator = ScanCoordinator::new(approx_pages, pages_per_task);
        let mut tasks = Vec::new();
        while let Some(task) = coordinator.next_task() {
            tasks.push(task);
        }

        prop_assert!(!tasks.is_empty());
        prop_assert_eq!(tasks[0].lo, 0);
        prop_assert_eq!(tasks.last().unwrap().hi, u32::MAX);
        for pair in tasks.windows(2) {
            prop_assert_eq!(pair[0].hi, pair[1].lo);
        }
    }
}
