// src/kernel/mm/eviction.rs
//! Clock-algorithm eviction
//!
//! Walks the resident-frame list kept by [`super::frame::FrameTable`] and
//! reclaims one frame with the clock (second-chance) algorithm: give each
//! frame one pass to clear its `clock_used` bit before taking it, so a page
//! touched since the hand last passed survives one more round.
//!
//! Lock order while reclaiming a victim: the frame table is
//! locked only long enough to pick the victim and is released before the
//! process table, swap store, and the victim's own `evict_barrier` are
//! acquired in that order.

use core::sync::atomic::Ordering;

use crate::constants::PAGE_SIZE;
use crate::errors::ProcessError;
use crate::kernel::core::traits::PageDirectory;
use crate::kernel::mm::frame::{FrameRecord, FRAME_TABLE};
use crate::kernel::mm::paging::UserPageDirectory;
use crate::kernel::mm::swap::SWAP_STORE;
use crate::kernel::mm::types::PhysAddr;
use crate::kernel::mm::PHYS_MEM_OFFSET;
use crate::kernel::process::PROCESS_TABLE;

fn read_frame(phys_mem_offset: x86_64::VirtAddr, frame: PhysAddr, out: &mut [u8]) {
    let virt = phys_mem_offset + frame.as_u64();
    // SAFETY: `frame` is a currently-resident frame and phys_mem_offset maps
    // all physical memory at a fixed offset.
    unsafe {
        core::ptr::copy_nonoverlapping(virt.as_ptr::<u8>(), out.as_mut_ptr(), out.len());
    }
}

/// Run the clock algorithm once and reclaim a frame, returning it for the
/// caller to immediately reassociate with whichever page needed one.
pub fn evict_one() -> Result<PhysAddr, ProcessError> {
    let phys_mem_offset = x86_64::VirtAddr::new(PHYS_MEM_OFFSET.load(Ordering::Relaxed));

    loop {
        let candidate = {
            let mut table = FRAME_TABLE.lock();
            let idx = table.clock_step().ok_or(ProcessError::OutOfFrames)?;
            if table.record_at_mut(idx).clock_used {
                table.record_at_mut(idx).clock_used = false;
                continue;
            }
            table.take_at(idx)
        };
        return evict_record(candidate, phys_mem_offset);
    }
}

fn evict_record(record: FrameRecord, phys_mem_offset: x86_64::VirtAddr) -> Result<PhysAddr, ProcessError> {
    let mut table = PROCESS_TABLE.lock();
    let owner = table.get_process_mut(record.owner).ok_or(ProcessError::ChildNotFound)?;
    let mut page_dir = UserPageDirectory::new(owner.page_table_frame(), phys_mem_offset);

    let mut swap_guard = SWAP_STORE.lock();
    let desc = owner.spt_mut().find_mut(record.upage).ok_or(ProcessError::ChildNotFound)?;
    let _barrier = desc.evict_barrier.lock();

    page_dir.invalidate(record.upage);

    if desc.writable {
        let mut page = [0u8; PAGE_SIZE];
        read_frame(phys_mem_offset, record.frame, &mut page);
        let slot = swap_guard.store(&page)?;
        desc.swap_slot = Some(slot);
    }
    desc.frame = None;
    desc.clock_used = false;

    Ok(record.frame)
}
