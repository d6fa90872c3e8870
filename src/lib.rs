//! Physical page frame allocator for the Windy kernel.
//!
//! Every physical page is described by a [`PageFrame`] that lives inside a
//! [`FrameTable`]. The [`BuddyAllocator`] threads the free blocks of every order
//! through the `next_free` field of those descriptors, so no heap is required to
//! manage physical memory.
//!
//! A kernel usually stores a [`LockedBuddyAllocator`] in a `static`, feeds it the
//! usable memory regions using [`insert_pages`](BuddyAllocator::insert_pages),
//! and carves out reserved regions using [`remove_pages`](BuddyAllocator::remove_pages).
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), no_std)]

pub mod buddy;
pub mod flags;
pub mod frame;
pub mod unit;

mod free_list;
mod locked;

pub use buddy::{Block, BuddyAllocator, Dump};
pub use flags::AllocFlags;
pub use frame::{FrameArray, FrameTable, PageFrame, PageState, Pfn};
pub use locked::LockedBuddyAllocator;

use core::fmt;
use displaydoc_lite::displaydoc;

/// The number of bits a physical address has to be shifted to get the PFN.
pub const PAGE_SHIFT: usize = 12;

/// The size of a single page in memory.
///
/// This is also the size of an order-0 block.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// The largest order the buddy allocator supports (inclusive).
///
/// Linux uses `11` orders, so just use it too.
pub const LAST_ORDER: usize = 10;

/// The size of the free list array inside the buddy allocator.
pub const ORDER_COUNT: usize = LAST_ORDER + 1;

/// Result for every page allocation operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while allocating physical pages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// tried to allocate an order that exceeded the maximum order.
        OrderTooLarge,
        /// tried to allocate, but there was no free memory left.
        NoMemoryAvailable,
        /// tried to allocate zero pages using `alloc_pages`
        AllocateZeroPages,
    }
}

/// The number of pages inside a block of the given order.
#[inline]
pub const fn pages_per_block(order: usize) -> u64 {
    1 << order
}

/// Check if `pfn` could be the head of a block with the given order.
#[inline]
pub const fn block_aligned(order: usize, pfn: Pfn) -> bool {
    pfn % pages_per_block(order) == 0
}

/// Calculates the first order where `count` pages would fit in.
///
/// This function may return an order that is larger than [`LAST_ORDER`].
pub fn order_for_pages(count: u64) -> usize {
    let count = core::cmp::max(count, 1);
    count.next_power_of_two().trailing_zeros() as usize
}

/// Statistics for the page allocator.
///
/// All values are counted in pages.
#[derive(Debug, Clone)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// The number of pages that are currently handed out.
    pub allocated: u64,
    /// The number of pages that are left for allocation.
    pub free: u64,
    /// The total number of pages that were inserted into the allocator.
    pub total: u64,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            allocated: 0,
            free: 0,
            total: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = |pages: u64| unit::bytes(pages * PAGE_SIZE as u64);

        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nAllocated: {}", bytes(self.allocated))?;
        writeln!(f, "Free: {}", bytes(self.free))?;
        writeln!(f, "Total: {}", bytes(self.total))?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}
