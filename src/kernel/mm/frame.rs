// src/kernel/mm/frame.rs
//! Physical frame management
//!
//! Two layers live here:
//!
//! - [`BootInfoFrameAllocator`]: the raw pool of physical frames reported by
//!   the bootloader's memory map. It implements both the `x86_64` crate's
//!   `FrameAllocator`/`FrameDeallocator` (used for page-table bootstrap
//!   frames) and [`RawFrameSource`] (used by [`FrameTable`] below).
//! - [`FrameTable`]: the resident-frame list the clock-eviction algorithm
//!   walks. It never talks to hardware directly; it only calls `RawFrameSource`
//!   and, when the pool runs dry, defers to `kernel::mm::eviction`.

use alloc::vec::Vec;
use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use lazy_static::lazy_static;
use spin::Mutex;
use x86_64::structures::paging::{FrameAllocator, FrameDeallocator, PhysFrame, Size4KiB};
use x86_64::{PhysAddr as X86PhysAddr, VirtAddr as X86VirtAddr};

use crate::constants::PAGE_SIZE;
use crate::kernel::core::traits::{FrameWriter, RawFrameSource};
use crate::kernel::mm::types::{PhysAddr, VirtAddr};
use crate::kernel::process::ProcessId;

/// Raw physical-frame pool backed by the bootloader's memory map.
///
/// Hands out frames from `Usable` regions in order; frames returned via
/// `frame_dealloc`/`deallocate_frame` go onto a reuse stack rather than being
/// tracked precisely, matching the "Writing an OS in Rust" bump-allocator
/// style this kernel was built from.
pub struct BootInfoFrameAllocator {
    memory_regions: &'static MemoryRegions,
    phys_mem_offset: X86VirtAddr,
    next: usize,
    freed: Vec<PhysFrame<Size4KiB>>,
}

impl BootInfoFrameAllocator {
    /// # Safety
    ///
    /// `memory_regions` must describe memory the bootloader actually reports
    /// as usable, and `phys_mem_offset` must be the virtual address at which
    /// all physical memory is mapped. The caller must not hand out any frame
    /// covered by `memory_regions` to anything else.
    pub unsafe fn init(memory_regions: &'static MemoryRegions, phys_mem_offset: X86VirtAddr) -> Self {
        Self {
            memory_regions,
            phys_mem_offset,
            next: 0,
            freed: Vec::new(),
        }
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame<Size4KiB>> + '_ {
        self.memory_regions
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .flat_map(|r| (r.start..r.end).step_by(PAGE_SIZE))
            .map(|addr| PhysFrame::containing_address(X86PhysAddr::new(addr)))
    }

    pub fn phys_mem_offset(&self) -> X86VirtAddr {
        self.phys_mem_offset
    }

    fn zero_frame(&self, frame: PhysFrame<Size4KiB>) {
        let virt = self.phys_mem_offset + frame.start_address().as_u64();
        // SAFETY: phys_mem_offset maps all physical memory 1:1-with-offset,
        // and `frame` was just taken out of the pool by this allocator.
        unsafe {
            virt.as_mut_ptr::<u8>().write_bytes(0, PAGE_SIZE);
        }
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        if let Some(frame) = self.freed.pop() {
            return Some(frame);
        }
        let frame = self.usable_frames().nth(self.next);
        self.next += 1;
        frame
    }
}

impl FrameDeallocator<Size4KiB> for BootInfoFrameAllocator {
    unsafe fn deallocate_frame(&mut self, frame: PhysFrame<Size4KiB>) {
        self.freed.push(frame);
    }
}

impl RawFrameSource for BootInfoFrameAllocator {
    fn frame_alloc(&mut self) -> Option<PhysAddr> {
        let frame = FrameAllocator::<Size4KiB>::allocate_frame(self)?;
        self.zero_frame(frame);
        Some(PhysAddr::new(frame.start_address().as_u64() as usize))
    }

    fn frame_dealloc(&mut self, frame: PhysAddr) {
        let x86_frame = PhysFrame::containing_address(X86PhysAddr::new(frame.as_u64()));
        // SAFETY: the frame was previously handed out by `frame_alloc`.
        unsafe {
            FrameDeallocator::<Size4KiB>::deallocate_frame(self, x86_frame);
        }
    }
}

impl FrameWriter for BootInfoFrameAllocator {
    fn write_frame(&mut self, frame: PhysAddr, offset: usize, data: &[u8]) {
        let virt = self.phys_mem_offset + frame.as_u64();
        // SAFETY: `frame` is a frame this allocator handed out, and
        // phys_mem_offset maps all physical memory at a fixed offset.
        unsafe {
            let dst = virt.as_mut_ptr::<u8>().add(offset);
            core::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
    }
}

/// One resident user page: which frame backs it and who owns it.
///
/// The clock hand walks a `Vec` of these rather than following pointers into
/// each process's supplemental page table, so eviction needs only the
/// `(owner, upage)` pair to find the real [`super::spt::PageDescriptor`]
/// through `PROCESS_TABLE`.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecord {
    pub frame: PhysAddr,
    pub owner: ProcessId,
    pub upage: VirtAddr,
    pub clock_used: bool,
}

/// Resident-frame list the eviction clock hand rotates over.
///
/// Guarded in production by [`crate::sync::LockId::Frame`].
pub struct FrameTable {
    resident: Vec<FrameRecord>,
    clock_hand: usize,
}

impl FrameTable {
    pub const fn new() -> Self {
        Self {
            resident: Vec::new(),
            clock_hand: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resident.is_empty()
    }

    pub fn insert(&mut self, record: FrameRecord) {
        self.resident.push(record);
    }

    pub fn remove(&mut self, frame: PhysAddr) -> Option<FrameRecord> {
        let idx = self.resident.iter().position(|r| r.frame == frame)?;
        if idx <= self.clock_hand {
            self.clock_hand = self.clock_hand.saturating_sub(1);
        }
        let record = self.resident.remove(idx);
        if self.clock_hand >= self.resident.len() {
            self.clock_hand = self.resident.len().saturating_sub(1);
        }
        Some(record)
    }

    pub fn mark_used(&mut self, frame: PhysAddr) {
        if let Some(r) = self.resident.iter_mut().find(|r| r.frame == frame) {
            r.clock_used = true;
        }
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.resident
    }

    /// Advance the clock hand one record and return its old position, or
    /// `None` if the list is empty. Used by `kernel::mm::eviction`.
    pub(super) fn clock_step(&mut self) -> Option<usize> {
        if self.resident.is_empty() {
            return None;
        }
        let idx = self.clock_hand;
        self.clock_hand = (self.clock_hand + 1) % self.resident.len();
        Some(idx)
    }

    pub(super) fn record_at_mut(&mut self, idx: usize) -> &mut FrameRecord {
        &mut self.resident[idx]
    }

    pub(super) fn take_at(&mut self, idx: usize) -> FrameRecord {
        if idx <= self.clock_hand {
            self.clock_hand = self.clock_hand.saturating_sub(1);
        }
        let record = self.resident.remove(idx);
        if self.clock_hand >= self.resident.len() {
            self.clock_hand = self.resident.len().saturating_sub(1);
        }
        record
    }
}

lazy_static! {
    /// Global frame pool, initialized once from the bootloader memory map.
    pub static ref BOOT_INFO_ALLOCATOR: Mutex<Option<BootInfoFrameAllocator>> = Mutex::new(None);
    /// Global resident-frame list the eviction clock walks.
    pub static ref FRAME_TABLE: Mutex<FrameTable> = Mutex::new(FrameTable::new());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_step_wraps_around() {
        let mut table = FrameTable::new();
        for i in 0..3u64 {
            table.insert(FrameRecord {
                frame: PhysAddr::new(i as usize * PAGE_SIZE),
                owner: ProcessId::new(1),
                upage: VirtAddr::new(0x1000 * (i as usize + 1)),
                clock_used: false,
            });
        }
        let first = table.clock_step().unwrap();
        let second = table.clock_step().unwrap();
        let third = table.clock_step().unwrap();
        let fourth = table.clock_step().unwrap();
        assert_eq!([first, second, third, fourth], [0, 1, 2, 0]);
    }

    #[test]
    fn remove_keeps_hand_consistent() {
        let mut table = FrameTable::new();
        for i in 0..2u64 {
            table.insert(FrameRecord {
                frame: PhysAddr::new(i as usize * PAGE_SIZE),
                owner: ProcessId::new(1),
                upage: VirtAddr::new(0x1000),
                clock_used: false,
            });
        }
        table.clock_step();
        let removed = table.remove(PhysAddr::new(0));
        assert!(removed.is_some());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_at_hand_on_last_index_does_not_leave_hand_out_of_bounds() {
        let mut table = FrameTable::new();
        for i in 0..3u64 {
            table.insert(FrameRecord {
                frame: PhysAddr::new(i as usize * PAGE_SIZE),
                owner: ProcessId::new(1),
                upage: VirtAddr::new(0x1000),
                clock_used: false,
            });
        }
        // Advance the hand to the last index (2) before removing that exact
        // resident frame, shrinking the Vec to len 2.
        table.clock_step();
        table.clock_step();
        assert_eq!(table.clock_hand, 2);
        let removed = table.remove(PhysAddr::new(2 * PAGE_SIZE));
        assert!(removed.is_some());
        assert_eq!(table.len(), 2);
        // A subsequent clock_step must return an in-bounds index rather than
        // the stale one-past-the-end hand.
        assert!(table.clock_step().unwrap() < table.len());
    }
}
