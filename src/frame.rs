//! Page frame descriptors and the table that owns them.

use crate::PAGE_SHIFT;

/// A page frame number.
pub type Pfn = u64;

/// The state of a single physical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// The page is not managed by the page allocator.
    ///
    /// This is the state of every page before it was inserted, and after its
    /// range got removed again.
    Reserved,
    /// The page is managed by the page allocator, and is not the head of an
    /// allocated block.
    ///
    /// Only block heads change state on allocation, so the tail pages of an
    /// allocated block stay `Free`. A page is the head of a free block if its
    /// [`free_block_size`](PageFrame::free_block_size) is non-zero.
    Free,
    /// The page is the head of a block that was handed out with the given order.
    Allocated { order: usize },
}

/// The descriptor of a single physical page frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFrame {
    pfn: Pfn,
    pub(crate) state: PageState,
    /// The number of pages of the free block this page is the head of.
    ///
    /// Zero if the page is not linked into any free list.
    pub(crate) free_block_size: u64,
    /// The next block head in the same free list.
    pub(crate) next_free: Option<Pfn>,
}

impl PageFrame {
    /// Create a new, unmanaged descriptor for the given PFN.
    pub const fn new(pfn: Pfn) -> Self {
        Self {
            pfn,
            state: PageState::Reserved,
            free_block_size: 0,
            next_free: None,
        }
    }

    /// The page frame number of this page.
    #[inline]
    pub fn pfn(&self) -> Pfn {
        self.pfn
    }

    /// The physical address this page starts at.
    #[inline]
    pub fn base_address(&self) -> u64 {
        self.pfn << PAGE_SHIFT
    }

    #[inline]
    pub fn state(&self) -> PageState {
        self.state
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == PageState::Free
    }

    /// The number of pages in the free block this page is the head of, or zero
    /// if it's not a free block head.
    #[inline]
    pub fn free_block_size(&self) -> u64 {
        self.free_block_size
    }

    #[inline]
    pub fn next_free(&self) -> Option<Pfn> {
        self.next_free
    }
}

/// The lookup from a page frame number to its descriptor.
///
/// The table owns the descriptors, the page allocator only mutates the
/// allocator specific fields of the descriptors it's handed.
pub trait FrameTable {
    /// Return the descriptor for `pfn`, or `None` if the table doesn't cover it.
    fn frame(&self, pfn: Pfn) -> Option<&PageFrame>;

    /// Return the mutable descriptor for `pfn`, or `None` if the table doesn't cover it.
    fn frame_mut(&mut self, pfn: Pfn) -> Option<&mut PageFrame>;
}

impl<T: FrameTable + ?Sized> FrameTable for &mut T {
    fn frame(&self, pfn: Pfn) -> Option<&PageFrame> {
        (**self).frame(pfn)
    }

    fn frame_mut(&mut self, pfn: Pfn) -> Option<&mut PageFrame> {
        (**self).frame_mut(pfn)
    }
}

/// Look up a descriptor that must exist.
///
/// # Panics
///
/// If the table doesn't cover `pfn`.
pub(crate) fn descriptor<T: FrameTable + ?Sized>(table: &T, pfn: Pfn) -> &PageFrame {
    match table.frame(pfn) {
        Some(frame) => frame,
        None => panic!("no page descriptor for PFN {:#x}", pfn),
    }
}

/// Mutable version of [`descriptor`].
pub(crate) fn descriptor_mut<T: FrameTable + ?Sized>(table: &mut T, pfn: Pfn) -> &mut PageFrame {
    match table.frame_mut(pfn) {
        Some(frame) => frame,
        None => panic!("no page descriptor for PFN {:#x}", pfn),
    }
}

/// A [`FrameTable`] that covers a contiguous window of PFNs using a slice of
/// descriptors, where index `0` describes the page `base`.
#[derive(Debug)]
pub struct FrameArray<'frames> {
    base: Pfn,
    frames: &'frames mut [PageFrame],
}

impl<'frames> FrameArray<'frames> {
    /// Turn `frames` into the descriptor table for `base..base + frames.len()`.
    ///
    /// Every descriptor is reset to an unmanaged page with the matching PFN.
    pub fn new(base: Pfn, frames: &'frames mut [PageFrame]) -> Self {
        frames
            .iter_mut()
            .zip(base..)
            .for_each(|(frame, pfn)| *frame = PageFrame::new(pfn));

        Self { base, frames }
    }

    /// The first PFN this table covers.
    pub fn base(&self) -> Pfn {
        self.base
    }

    /// The number of pages this table covers.
    pub fn len(&self) -> u64 {
        self.frames.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterate over all descriptors of this table.
    pub fn iter(&self) -> impl Iterator<Item = &PageFrame> + '_ {
        self.frames.iter()
    }

    fn index(&self, pfn: Pfn) -> Option<usize> {
        let idx = pfn.checked_sub(self.base)?;
        if idx < self.len() {
            Some(idx as usize)
        } else {
            None
        }
    }
}

impl FrameTable for FrameArray<'_> {
    fn frame(&self, pfn: Pfn) -> Option<&PageFrame> {
        let idx = self.index(pfn)?;
        self.frames.get(idx)
    }

    fn frame_mut(&mut self, pfn: Pfn) -> Option<&mut PageFrame> {
        let idx = self.index(pfn)?;
        self.frames.get_mut(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_lookup() {
        let mut storage = [PageFrame::new(0); 8];
        let mut table = FrameArray::new(0x100, &mut storage);

        assert_eq!(table.base(), 0x100);
        assert_eq!(table.len(), 8);
        assert!(table.frame(0xFF).is_none());
        assert!(table.frame(0x108).is_none());

        let frame = table.frame_mut(0x103).unwrap();
        assert_eq!(frame.pfn(), 0x103);
        assert_eq!(frame.base_address(), 0x103_000);
        assert_eq!(frame.state(), PageState::Reserved);
        assert_eq!(frame.free_block_size(), 0);
        assert_eq!(frame.next_free(), None);
    }
}
