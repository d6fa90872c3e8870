//! A [`BuddyAllocator`] that can be shared between harts.

use crate::buddy::{Block, BuddyAllocator};
use crate::frame::{FrameTable, Pfn};
use crate::{order_for_pages, AllocFlags, AllocStats, Error, Result};
use spin::{Mutex, MutexGuard};

/// The page allocator wrapped inside a spinlock.
///
/// The lock is held for the whole duration of every operation, so no other
/// hart can ever observe a half split or merged block.
pub struct LockedBuddyAllocator<T>(Mutex<BuddyAllocator<T>>);

impl<T: FrameTable> LockedBuddyAllocator<T> {
    /// Create a new, empty page allocator.
    pub const fn new(frames: T) -> Self {
        Self(Mutex::new(BuddyAllocator::new(frames)))
    }

    /// Wrap an already set up allocator.
    pub fn from_allocator(alloc: BuddyAllocator<T>) -> Self {
        Self(Mutex::new(alloc))
    }

    /// Lock the allocator to run multiple operations without
    /// another hart getting in between.
    pub fn lock(&self) -> MutexGuard<'_, BuddyAllocator<T>> {
        self.0.lock()
    }

    /// Makes a range of pages available for allocation.
    pub fn insert_pages(&self, range_start: Pfn, page_count: u64) {
        self.0.lock().insert_pages(range_start, page_count)
    }

    /// Takes a range of free pages away from the allocator.
    pub fn remove_pages(&self, range_start: Pfn, page_count: u64) {
        self.0.lock().remove_pages(range_start, page_count)
    }

    /// Allocate a single page.
    pub fn alloc(&self, flags: AllocFlags) -> Result<Block> {
        // order 0 is exactly one page
        self.0.lock().allocate_pages(0, flags)
    }

    /// Allocate `2^order` contiguous pages.
    pub fn allocate_pages(&self, order: usize, flags: AllocFlags) -> Result<Block> {
        self.0.lock().allocate_pages(order, flags)
    }

    /// Allocate at least `count` contiguous pages.
    ///
    /// The returned block is rounded up to the next power of two, and has to be
    /// freed using the order inside the [`Block`].
    pub fn alloc_pages(&self, count: u64, flags: AllocFlags) -> Result<Block> {
        if count == 0 {
            return Err(Error::AllocateZeroPages);
        }

        self.0.lock().allocate_pages(order_for_pages(count), flags)
    }

    /// Free a block that was allocated with the given order.
    pub fn free_pages(&self, pfn: Pfn, order: usize) {
        self.0.lock().free_pages(pfn, order)
    }

    /// The number of pages that are currently free.
    pub fn total_free_pages(&self) -> u64 {
        self.0.lock().total_free_pages()
    }

    /// Return the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.0.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameArray, PageFrame};
    use std::sync::Arc;

    #[test]
    fn alloc_pages_rounds_up() {
        let mut storage = vec![PageFrame::new(0); 32];
        let alloc = LockedBuddyAllocator::new(FrameArray::new(0, &mut storage));
        alloc.insert_pages(0, 32);

        assert_eq!(alloc.alloc_pages(0, AllocFlags::empty()), Err(Error::AllocateZeroPages));

        let block = alloc.alloc_pages(5, AllocFlags::USER).unwrap();
        assert_eq!(block.order, 3);
        assert_eq!(block.page_count(), 8);
        assert_eq!(block.flags, AllocFlags::USER);
        assert_eq!(alloc.total_free_pages(), 24);

        let page = alloc.alloc(AllocFlags::empty()).unwrap();
        assert_eq!(page.order, 0);
        assert_eq!(alloc.stats().allocated, 9);

        alloc.free_pages(page.pfn, page.order);
        alloc.free_pages(block.pfn, block.order);
        assert_eq!(alloc.total_free_pages(), 32);
        assert_eq!(alloc.lock().free_blocks(5).collect::<Vec<_>>(), [0]);
    }

    #[test]
    fn shared_between_threads() {
        let storage = Box::leak(vec![PageFrame::new(0); 256].into_boxed_slice());
        let mut buddy = BuddyAllocator::new(FrameArray::new(0, storage));
        buddy.insert_pages(0, 256);
        let alloc = Arc::new(LockedBuddyAllocator::from_allocator(buddy));

        let threads = (0..4)
            .map(|_| {
                let alloc = Arc::clone(&alloc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let blocks = (0..4)
                            .map(|order| alloc.allocate_pages(order, AllocFlags::empty()).unwrap())
                            .collect::<Vec<_>>();
                        for block in blocks {
                            alloc.free_pages(block.pfn, block.order);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(alloc.total_free_pages(), 256);
        assert_eq!(alloc.lock().free_blocks(8).collect::<Vec<_>>(), [0]);
    }
}
