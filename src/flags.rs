//! Flags that are handed to the page allocator together with an allocation request.

use bitflags::bitflags;

bitflags! {
    /// Flags for a page allocation.
    ///
    /// The buddy allocator never looks at these flags, it only hands them back
    /// as part of the [`Block`](crate::buddy::Block), so the caller can act on
    /// them after the allocation succeeded.
    #[derive(Default)]
    pub struct AllocFlags: u32 {
        /// The caller wants the pages to be filled with zeroes.
        const ZERO = 1 << 0;
        /// The pages are going to be mapped into user space.
        const USER = 1 << 1;
    }
}
