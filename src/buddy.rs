//! Implementation of a Buddy Allocator that is responsible for allocating
//! physical page frames, which will then be used by either the slab allocator
//! or directly by the kernel.
//!
//! The allocator keeps one free list per order. A block of order `k` spans
//! `2^k` contiguous pages and is identified by the PFN of its first page, the
//! block head. Only block heads are linked into the free lists.
//!
//! The addresses of two buddies only differ in one bit, thus we can easily get
//! the PFN of a buddy if we have the other buddy:
//!
//! ```text
//!               <____________________>
//!              /                      \
//!     |<-----a block------->|<-----its buddy----->|
//!     or      |                        |
//!     |<-----its buddy----->|<-----a block------->|
//! ```
//!
//! Every operation that breaks the rules of the allocator, like freeing a block
//! twice or removing a block that isn't free, is a bug in the caller and will
//! panic, because silently ignoring it would corrupt the free lists.

use crate::free_list::FreeList;
use crate::frame::{descriptor, descriptor_mut, FrameTable, PageState, Pfn};
use crate::{
    block_aligned, pages_per_block, AllocFlags, AllocStats, Error, Result, LAST_ORDER,
    ORDER_COUNT, PAGE_SHIFT, PAGE_SIZE,
};
use core::fmt;

/// A block of pages that was handed out by the [`BuddyAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// The PFN of the first page inside this block.
    pub pfn: Pfn,
    /// The order this block was allocated with.
    pub order: usize,
    /// The flags that were passed to the allocation.
    pub flags: AllocFlags,
}

impl Block {
    /// The number of pages inside this block.
    pub fn page_count(&self) -> u64 {
        pages_per_block(self.order)
    }

    /// The physical address of the first page inside this block.
    pub fn base_address(&self) -> u64 {
        self.pfn << PAGE_SHIFT
    }

    /// The size of this block in bytes.
    pub fn size(&self) -> u64 {
        self.page_count() * PAGE_SIZE as u64
    }
}

/// The central structure that is responsible for allocating page frames
/// using the buddy algorithm.
pub struct BuddyAllocator<T> {
    frames: T,
    orders: [FreeList; ORDER_COUNT],
    last_order: usize,
    /// The number of pages that are linked into the free lists.
    total_free: u64,
    /// The number of pages that were inserted and not removed yet.
    total: u64,
}

impl<T: FrameTable> BuddyAllocator<T> {
    /// Create a new, empty buddy allocator that uses `frames` to look up
    /// page descriptors.
    pub const fn new(frames: T) -> Self {
        Self {
            frames,
            orders: [FreeList::EMPTY; ORDER_COUNT],
            last_order: LAST_ORDER,
            total_free: 0,
            total: 0,
        }
    }

    /// Create a new, empty buddy allocator whose largest blocks have
    /// the given order.
    ///
    /// # Panics
    ///
    /// If `last_order` is larger than [`LAST_ORDER`].
    pub fn with_last_order(frames: T, last_order: usize) -> Self {
        assert!(
            last_order <= LAST_ORDER,
            "the last order can be at most {}",
            LAST_ORDER
        );

        Self {
            last_order,
            ..Self::new(frames)
        }
    }

    /// The largest order this allocator hands out.
    pub fn last_order(&self) -> usize {
        self.last_order
    }

    /// The descriptor table of this allocator.
    pub fn frames(&self) -> &T {
        &self.frames
    }

    /// Consume this allocator and return its descriptor table.
    pub fn into_frames(self) -> T {
        self.frames
    }

    /// The number of pages that are currently free.
    pub fn total_free_pages(&self) -> u64 {
        self.total_free
    }

    /// The number of pages that are managed by this allocator.
    pub fn total_pages(&self) -> u64 {
        self.total
    }

    /// Return the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        AllocStats {
            allocated: self.total - self.total_free,
            free: self.total_free,
            total: self.total,
            ..AllocStats::with_name("Buddy Allocator")
        }
    }

    /// Returns an iterator over the heads of all free blocks with the given order,
    /// in ascending order.
    ///
    /// # Panics
    ///
    /// If `order` is larger than [`LAST_ORDER`].
    pub fn free_blocks(&self, order: usize) -> impl Iterator<Item = Pfn> + '_ {
        self.orders[order].iter(&self.frames)
    }

    /// Return the order of the free block whose head is `pfn`, if there is one.
    pub fn find_order(&self, pfn: Pfn) -> Option<usize> {
        let frame = self.frames.frame(pfn)?;
        if frame.is_free() && frame.free_block_size() != 0 {
            Some(frame.free_block_size().trailing_zeros() as usize)
        } else {
            None
        }
    }

    /// Returns a view of the free lists that implements [`Display`](fmt::Display).
    pub fn dump(&self) -> Dump<'_, T> {
        Dump { allocator: self }
    }

    /// Allocates a block of `2^order` pages.
    ///
    /// The `flags` are not interpreted, they are just returned as part of the [`Block`].
    pub fn allocate_pages(&mut self, order: usize, flags: AllocFlags) -> Result<Block> {
        log::trace!("allocate_pages: order = {}, flags = {:?}", order, flags);

        // check if we exceeded the maximum order
        if order > self.last_order {
            return Err(Error::OrderTooLarge);
        }

        // find the first order that has a block available
        let (mut current, pfn) = match (order..=self.last_order)
            .find_map(|o| self.orders[o].first().map(|pfn| (o, pfn)))
        {
            Some(found) => found,
            None => {
                log::warn!(
                    "no free block of order {} or above ({} pages free)",
                    order,
                    self.total_free
                );
                return Err(Error::NoMemoryAvailable);
            }
        };

        // now walk down the orders and split the block until it has the requested size.
        // the lower buddy keeps the PFN of the block, so `pfn` stays the block we hand out.
        while current > order {
            self.split_block(current, pfn);
            current -= 1;
        }

        self.remove_free_block(order, pfn);
        descriptor_mut(&mut self.frames, pfn).state = PageState::Allocated { order };
        self.total_free -= pages_per_block(order);

        Ok(Block { pfn, order, flags })
    }

    /// Deallocates the block at `pfn` that was allocated using the given order,
    /// and merges it with its buddies as far as possible.
    ///
    /// # Panics
    ///
    /// If the block is not allocated, or was allocated with a different order.
    pub fn free_pages(&mut self, pfn: Pfn, order: usize) {
        log::trace!("free_pages: pfn = {:#x}, order = {}", pfn, order);

        assert!(order <= self.last_order, "invalid order {} given to free_pages", order);
        assert!(
            block_aligned(order, pfn),
            "block {:#x} is not aligned to order {}",
            pfn,
            order
        );

        let frame = descriptor_mut(&mut self.frames, pfn);
        match frame.state {
            PageState::Allocated { order: allocated } if allocated == order => {}
            PageState::Allocated { order: allocated } => panic!(
                "block {:#x} was allocated with order {}, but freed with order {}",
                pfn, allocated, order
            ),
            state => panic!("tried to free block {:#x} which is not allocated ({:?})", pfn, state),
        }
        frame.state = PageState::Free;

        self.insert_free_block(order, pfn);
        self.total_free += pages_per_block(order);

        let mut block = pfn;
        let mut order = order;
        while order < self.last_order {
            match self.merge_buddies(order, block) {
                Some(merged) => {
                    block = merged;
                    order += 1;
                }
                None => break,
            }
        }
    }

    /// Makes the pages `range_start..range_start + page_count` available for allocation.
    ///
    /// The range is inserted as the fewest, largest blocks that fit into it,
    /// so a range of `2^4 + 1` pages that starts at an aligned PFN is inserted
    /// as one order `4` block and one order `0` block.
    ///
    /// # Panics
    ///
    /// If any page inside the range is already managed by this allocator, or
    /// has no descriptor.
    pub fn insert_pages(&mut self, range_start: Pfn, page_count: u64) {
        let end = range_end(range_start, page_count);
        log::debug!(
            "Inserting pages {:#x}..{:#x} into Buddy Allocator",
            range_start,
            end
        );

        for pfn in range_start..end {
            let frame = descriptor_mut(&mut self.frames, pfn);
            assert_eq!(
                frame.state,
                PageState::Reserved,
                "page {:#x} is already managed by the page allocator",
                pfn
            );
            frame.state = PageState::Free;
        }

        for (pfn, order) in blocks_in_range(range_start, end, self.last_order) {
            self.insert_free_block(order, pfn);
        }

        self.total_free += page_count;
        self.total += page_count;
    }

    /// Takes the pages `range_start..range_start + page_count` away from this allocator.
    ///
    /// The range is split into blocks the same way [`Self::insert_pages`] does,
    /// and every one of those blocks must be free.
    ///
    /// # Panics
    ///
    /// If one of the blocks is not inside the free list of its order.
    pub fn remove_pages(&mut self, range_start: Pfn, page_count: u64) {
        let end = range_end(range_start, page_count);
        log::debug!(
            "Removing pages {:#x}..{:#x} from Buddy Allocator",
            range_start,
            end
        );

        for (pfn, order) in blocks_in_range(range_start, end, self.last_order) {
            self.remove_free_block(order, pfn);
        }

        for pfn in range_start..end {
            descriptor_mut(&mut self.frames, pfn).state = PageState::Reserved;
        }

        self.total_free -= page_count;
        self.total -= page_count;
    }

    fn insert_free_block(&mut self, order: usize, pfn: Pfn) {
        assert!(order <= self.last_order, "invalid order {}", order);
        self.orders[order].insert(&mut self.frames, order, pfn);
    }

    fn remove_free_block(&mut self, order: usize, pfn: Pfn) {
        assert!(order <= self.last_order, "invalid order {}", order);
        self.orders[order].remove(&mut self.frames, order, pfn);
    }

    /// Check if `pfn` is the head of a free block with exactly the given order.
    fn is_free_head(&self, order: usize, pfn: Pfn) -> bool {
        self.frames.frame(pfn).map_or(false, |frame| {
            frame.is_free()
                && block_aligned(order, pfn)
                && frame.free_block_size() == pages_per_block(order)
        })
    }

    /// Split the free block at `pfn` into two buddies of the next lower order.
    ///
    /// ```text
    /// +-- this is were `block` starts
    /// v
    /// +---------------------------------+
    /// |             `order`             |
    /// +---------------------------------+
    ///
    /// +-- this is were `block` starts, it's now the first buddy
    /// v
    /// +---------------------------------+
    /// |    buddy 1     |    buddy 2     |
    /// +---------------------------------+
    ///                  ^
    ///                  +--- `block + 2^(order - 1)`
    /// ```
    fn split_block(&mut self, order: usize, pfn: Pfn) {
        assert!(
            order > 0 && order <= self.last_order,
            "can't split a block of order {}",
            order
        );

        self.remove_free_block(order, pfn);

        let lower = order - 1;
        self.insert_free_block(lower, pfn);
        self.insert_free_block(lower, pfn + pages_per_block(lower));
    }

    /// Merge the free block at `pfn` with its buddy, if the buddy is free too.
    ///
    /// Returns the head of the merged block.
    fn merge_buddies(&mut self, order: usize, pfn: Pfn) -> Option<Pfn> {
        assert!(order < self.last_order, "can't merge blocks of order {}", order);
        assert!(
            self.is_free_head(order, pfn),
            "block {:#x} is not a free block of order {}",
            pfn,
            order
        );

        // the buddy must be the head of a free block with the same order,
        // a free page that belongs to a smaller block is not enough.
        let buddy = pfn ^ pages_per_block(order);
        if !self.is_free_head(order, buddy) {
            return None;
        }

        self.remove_free_block(order, pfn);
        self.remove_free_block(order, buddy);

        let merged = core::cmp::min(pfn, buddy);
        self.insert_free_block(order + 1, merged);
        Some(merged)
    }
}

/// Calculate the end of a page range.
fn range_end(range_start: Pfn, page_count: u64) -> Pfn {
    match range_start.checked_add(page_count) {
        Some(end) => end,
        None => panic!(
            "page range {:#x} + {:#x} overflows the PFN space",
            range_start, page_count
        ),
    }
}

/// Split `start..end` into the largest aligned blocks, from low to high.
fn blocks_in_range(start: Pfn, end: Pfn, last_order: usize) -> BlocksInRange {
    BlocksInRange {
        pfn: start,
        end,
        last_order,
    }
}

struct BlocksInRange {
    pfn: Pfn,
    end: Pfn,
    last_order: usize,
}

impl Iterator for BlocksInRange {
    type Item = (Pfn, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pfn >= self.end {
            return None;
        }

        let left = self.end - self.pfn;
        let mut order = self.last_order;
        while order > 0 && (pages_per_block(order) > left || !block_aligned(order, self.pfn)) {
            order -= 1;
        }

        let pfn = self.pfn;
        self.pfn += pages_per_block(order);
        Some((pfn, order))
    }
}

/// The free lists of a [`BuddyAllocator`], printed one order per line.
pub struct Dump<'alloc, T> {
    allocator: &'alloc BuddyAllocator<T>,
}

impl<T: FrameTable> fmt::Display for Dump<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alloc = self.allocator;

        writeln!(f, "*** buddy page allocator - free list ***")?;
        for order in 0..=alloc.last_order {
            write!(f, "[{:02}]", order)?;
            for pfn in alloc.free_blocks(order) {
                let start = descriptor(&alloc.frames, pfn).base_address();
                let end = start + (pages_per_block(order) << PAGE_SHIFT) - 1;
                write!(f, " {:x}--{:x}", start, end)?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}
