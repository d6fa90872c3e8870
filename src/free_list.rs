//! Intrusive free list used in the buddy allocator.
//!
//! The links are stored inside the [`PageFrame`](crate::PageFrame)s
//! as the PFN of the next block head, so the list itself is only the PFN of
//! its first entry. Entries are sorted by ascending PFN.

use crate::frame::{descriptor, descriptor_mut, FrameTable, Pfn};
use crate::{block_aligned, pages_per_block};

#[derive(Debug, Clone, Copy)]
pub(crate) struct FreeList {
    head: Option<Pfn>,
}

impl FreeList {
    pub const EMPTY: FreeList = FreeList { head: None };

    /// The lowest block head inside this list.
    pub fn first(&self) -> Option<Pfn> {
        self.head
    }

    /// Link the block at `pfn` into this list, keeping the list sorted.
    ///
    /// # Panics
    ///
    /// If `pfn` is not aligned to `order`, or if it's already inside this list.
    pub fn insert<T: FrameTable + ?Sized>(&mut self, frames: &mut T, order: usize, pfn: Pfn) {
        assert!(
            block_aligned(order, pfn),
            "block {:#x} is not aligned to order {}",
            pfn,
            order
        );

        let mut prev = None;
        let mut cur = self.head;
        while let Some(entry) = cur {
            if entry >= pfn {
                break;
            }
            prev = Some(entry);
            cur = descriptor(&*frames, entry).next_free;
        }

        assert_ne!(
            cur,
            Some(pfn),
            "block {:#x} is already in the free list of order {}",
            pfn,
            order
        );

        let frame = descriptor_mut(frames, pfn);
        frame.next_free = cur;
        frame.free_block_size = pages_per_block(order);

        match prev {
            Some(prev) => descriptor_mut(frames, prev).next_free = Some(pfn),
            None => self.head = Some(pfn),
        }
    }

    /// Unlink the block at `pfn` from this list.
    ///
    /// # Panics
    ///
    /// If `pfn` is not part of this list.
    pub fn remove<T: FrameTable + ?Sized>(&mut self, frames: &mut T, order: usize, pfn: Pfn) {
        let mut prev = None;
        let mut cur = self.head;
        while let Some(entry) = cur {
            if entry == pfn {
                break;
            }
            prev = Some(entry);
            cur = descriptor(&*frames, entry).next_free;
        }

        if cur != Some(pfn) {
            panic!(
                "block {:#x} is not in the free list of order {}",
                pfn, order
            );
        }

        let frame = descriptor_mut(frames, pfn);
        let next = frame.next_free.take();
        frame.free_block_size = 0;

        match prev {
            Some(prev) => descriptor_mut(frames, prev).next_free = next,
            None => self.head = next,
        }
    }

    /// Returns an iterator over the block heads of this list.
    pub fn iter<'frames, T: FrameTable + ?Sized>(&self, frames: &'frames T) -> Iter<'frames, T> {
        Iter {
            frames,
            next: self.head,
        }
    }
}

pub struct Iter<'frames, T: ?Sized> {
    frames: &'frames T,
    next: Option<Pfn>,
}

impl<T: FrameTable + ?Sized> Iterator for Iter<'_, T> {
    type Item = Pfn;

    fn next(&mut self) -> Option<Self::Item> {
        let pfn = self.next?;
        self.next = descriptor(self.frames, pfn).next_free;
        Some(pfn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameArray, PageFrame};

    fn collect(list: &FreeList, frames: &FrameArray<'_>) -> Vec<Pfn> {
        list.iter(frames).collect()
    }

    #[test]
    fn insert_keeps_order() {
        let mut storage = [PageFrame::new(0); 16];
        let mut frames = FrameArray::new(0, &mut storage);
        let mut list = FreeList::EMPTY;
        assert!(list.first().is_none());

        list.insert(&mut frames, 1, 8);
        list.insert(&mut frames, 1, 2);
        list.insert(&mut frames, 1, 14);
        list.insert(&mut frames, 1, 4);

        assert_eq!(collect(&list, &frames), [2, 4, 8, 14]);
        assert_eq!(list.first(), Some(2));
        assert_eq!(frames.frame(4).unwrap().free_block_size(), 2);
        assert_eq!(frames.frame(14).unwrap().next_free(), None);
    }

    #[test]
    fn remove_unlinks() {
        let mut storage = [PageFrame::new(0); 8];
        let mut frames = FrameArray::new(0, &mut storage);
        let mut list = FreeList::EMPTY;

        for pfn in 0..4 {
            list.insert(&mut frames, 0, pfn);
        }

        list.remove(&mut frames, 0, 2);
        assert_eq!(collect(&list, &frames), [0, 1, 3]);
        list.remove(&mut frames, 0, 0);
        assert_eq!(collect(&list, &frames), [1, 3]);
        list.remove(&mut frames, 0, 3);
        assert_eq!(collect(&list, &frames), [1]);

        let frame = frames.frame(2).unwrap();
        assert_eq!(frame.next_free(), None);
        assert_eq!(frame.free_block_size(), 0);
    }

    #[test]
    #[should_panic(expected = "already in the free list")]
    fn double_insert() {
        let mut storage = [PageFrame::new(0); 4];
        let mut frames = FrameArray::new(0, &mut storage);
        let mut list = FreeList::EMPTY;

        list.insert(&mut frames, 1, 2);
        list.insert(&mut frames, 1, 2);
    }

    #[test]
    #[should_panic(expected = "not in the free list")]
    fn remove_missing() {
        let mut storage = [PageFrame::new(0); 4];
        let mut frames = FrameArray::new(0, &mut storage);
        let mut list = FreeList::EMPTY;

        list.insert(&mut frames, 0, 1);
        list.remove(&mut frames, 0, 3);
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn misaligned_insert() {
        let mut storage = [PageFrame::new(0); 4];
        let mut frames = FrameArray::new(0, &mut storage);
        let mut list = FreeList::EMPTY;
        list.insert(&mut frames, 1, 1);
    }
}
