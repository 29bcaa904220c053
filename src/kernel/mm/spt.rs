// src/kernel/mm/spt.rs
//! Supplemental page table
//!
//! Each process owns one [`SupplementalPageTable`] mapping user virtual
//! pages that are part of its address space to a [`PageDescriptor`]
//! recording how to resolve a fault on that page: load it from the
//! executable, zero-fill it (a stack page), or pull it back from swap.
//!
//! Guarded in production by [`crate::sync::LockId::PageList`].

use alloc::collections::BTreeMap;
use spin::Mutex;

use crate::kernel::core::traits::FileHandle;
use crate::kernel::mm::swap::SwapSlot;
use crate::kernel::mm::types::{PhysAddr, VirtAddr};

/// How a page's initial content is produced the first time it's faulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// Backed by a range of the executable file.
    Code {
        file: FileHandle,
        file_offset: u32,
        read_bytes: u32,
    },
    /// Zero-filled on first fault, grown lazily as the stack deepens.
    Stack,
}

/// One page's worth of bookkeeping: where its content comes from, whether
/// it is currently resident or swapped out, and the fine-grained lock that
/// serializes a fault against an in-flight eviction of this exact page.
pub struct PageDescriptor {
    pub upage: VirtAddr,
    pub kind: PageKind,
    pub writable: bool,
    pub frame: Option<PhysAddr>,
    pub swap_slot: Option<SwapSlot>,
    pub clock_used: bool,
    /// Serializes page-fault handling against eviction of this page.
    /// Acquired last, after the frame table, process table, and swap store.
    pub evict_barrier: Mutex<()>,
}

impl PageDescriptor {
    fn new(upage: VirtAddr, kind: PageKind, writable: bool) -> Self {
        Self {
            upage,
            kind,
            writable,
            frame: None,
            swap_slot: None,
            clock_used: false,
            evict_barrier: Mutex::new(()),
        }
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }
}

/// Per-process page table of not-yet-resolved or previously-resolved pages.
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<VirtAddr, PageDescriptor>,
}

impl SupplementalPageTable {
    pub const fn new() -> Self {
        Self { pages: BTreeMap::new() }
    }

    /// Register a page the process may fault on. Returns `false` if `upage`
    /// is already tracked (callers should treat that as a loader bug, not
    /// silently overwrite an existing mapping).
    pub fn create(&mut self, upage: VirtAddr, writable: bool, kind: PageKind) -> bool {
        if self.pages.contains_key(&upage) {
            return false;
        }
        self.pages.insert(upage, PageDescriptor::new(upage, kind, writable));
        true
    }

    pub fn find(&self, upage: VirtAddr) -> Option<&PageDescriptor> {
        self.pages.get(&upage)
    }

    pub fn find_mut(&mut self, upage: VirtAddr) -> Option<&mut PageDescriptor> {
        self.pages.get_mut(&upage)
    }

    pub fn contains(&self, upage: VirtAddr) -> bool {
        self.pages.contains_key(&upage)
    }

    pub fn highest_stack_page(&self) -> Option<VirtAddr> {
        self.pages
            .iter()
            .filter(|(_, d)| matches!(d.kind, PageKind::Stack))
            .map(|(upage, _)| *upage)
            .min()
    }

    /// Remove every tracked page and hand its descriptors to the caller for
    /// teardown (freeing frames/swap slots is the responsibility of the
    /// owner, which also must free the frame-table and swap-store entries
    /// under their own locks).
    pub fn drain(&mut self) -> alloc::vec::Vec<PageDescriptor> {
        core::mem::take(&mut self.pages).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_rejects_duplicate_upage() {
        let mut spt = SupplementalPageTable::new();
        let upage = VirtAddr::new(0x1000);
        assert!(spt.create(upage, false, PageKind::Stack));
        assert!(!spt.create(upage, true, PageKind::Stack));
    }

    #[test]
    fn drain_empties_table() {
        let mut spt = SupplementalPageTable::new();
        spt.create(VirtAddr::new(0x1000), true, PageKind::Stack);
        spt.create(VirtAddr::new(0x2000), true, PageKind::Stack);
        let drained = spt.drain();
        assert_eq!(drained.len(), 2);
        assert!(spt.find(VirtAddr::new(0x1000)).is_none());
    }
}
