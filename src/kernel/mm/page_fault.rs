// src/kernel/mm/page_fault.rs
//! User page-fault resolution
//!
//! Invoked from the `#PF` handler for faults taken in user mode. Consults
//! the faulting process's supplemental page table; on a miss, tries the
//! stack-growth heuristics before giving up and asking the caller to
//! terminate the process.

use core::sync::atomic::Ordering;

use crate::constants::{PAGE_SIZE, STACK_INIT, STACK_MAX_PAGES};
use crate::errors::ProcessError;
use crate::kernel::core::traits::{FileSystem, PageDirectory};
use crate::kernel::fs::FILESYSTEM;
use crate::kernel::mm::eviction;
use crate::kernel::mm::frame::{FrameRecord, BOOT_INFO_ALLOCATOR, FRAME_TABLE};
use crate::kernel::mm::paging::UserPageDirectory;
use crate::kernel::mm::spt::PageKind;
use crate::kernel::mm::swap::SWAP_STORE;
use crate::kernel::mm::types::{PhysAddr, VirtAddr};
use crate::kernel::mm::PHYS_MEM_OFFSET;
use crate::kernel::process::{ProcessId, PROCESS_TABLE};

fn page_round_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE as u64 - 1)
}

/// Acquire a zero-filled frame for `(owner, upage)`, evicting one if the raw
/// pool is empty, and add it to the resident-frame list.
fn frame_get(owner: ProcessId, upage: VirtAddr) -> Result<PhysAddr, ProcessError> {
    let fresh = BOOT_INFO_ALLOCATOR.lock().as_mut().and_then(|a| a.frame_alloc());
    let frame = match fresh {
        Some(f) => f,
        None => eviction::evict_one()?,
    };
    FRAME_TABLE.lock().insert(FrameRecord { frame, owner, upage, clock_used: true });
    Ok(frame)
}

fn write_frame(phys_mem_offset: x86_64::VirtAddr, frame: PhysAddr, data: &[u8]) {
    let virt = phys_mem_offset + frame.as_u64();
    // SAFETY: `frame` was just handed out by `frame_get` and is not mapped
    // anywhere yet.
    unsafe {
        core::ptr::copy_nonoverlapping(data.as_ptr(), virt.as_mut_ptr::<u8>(), data.len());
    }
}

/// Handle a page fault taken at `fault_addr` in user mode, with `esp` the
/// user stack pointer at the time of the fault and `write` set if the
/// access was a write.
pub fn handle_user_page_fault(
    fault_addr: x86_64::VirtAddr,
    esp: x86_64::VirtAddr,
    write: bool,
) -> Result<(), ProcessError> {
    let phys_mem_offset = x86_64::VirtAddr::new(PHYS_MEM_OFFSET.load(Ordering::Relaxed));
    let upage = VirtAddr::new(page_round_down(fault_addr.as_u64()) as usize);

    // Acquired before `PROCESS_TABLE` regardless of whether this fault turns
    // out to need it, to respect the filesystem-before-page-list lock order.
    let mut fs = FILESYSTEM.lock();
    let mut table = PROCESS_TABLE.lock();
    let pid = table.current_process().map(|p| p.pid()).ok_or(ProcessError::ChildNotFound)?;
    let process = table.get_process_mut(pid).ok_or(ProcessError::ChildNotFound)?;

    if !process.spt().contains(upage) && !grow_stack(process, fault_addr, esp, upage) {
        return Err(ProcessError::BadUserAddress);
    }

    let desc_writable = process.spt().find(upage).map(|d| d.writable).unwrap_or(false);
    if write && !desc_writable {
        return Err(ProcessError::BadUserAddress);
    }

    // Serialize with an in-flight eviction of this exact page.
    {
        let desc = process.spt().find(upage).ok_or(ProcessError::BadUserAddress)?;
        let _barrier = desc.evict_barrier.lock();
    }

    let swap_slot = process.spt().find(upage).and_then(|d| d.swap_slot);
    let kind = process.spt().find(upage).map(|d| d.kind).ok_or(ProcessError::BadUserAddress)?;

    let frame = frame_get(pid, upage)?;

    if let Some(slot) = swap_slot {
        let mut page = [0u8; PAGE_SIZE];
        SWAP_STORE.lock().load(slot, &mut page)?;
        write_frame(phys_mem_offset, frame, &page);
        SWAP_STORE.lock().free(slot);
        if let Some(desc) = process.spt_mut().find_mut(upage) {
            desc.swap_slot = None;
        }
    } else {
        match kind {
            PageKind::Code { file, file_offset, read_bytes } => {
                let mut page = [0u8; PAGE_SIZE];
                fs.seek(file, file_offset);
                fs.read(file, &mut page[..read_bytes as usize]);
                write_frame(phys_mem_offset, frame, &page);
            }
            PageKind::Stack => {
                let zeros = [0u8; PAGE_SIZE];
                write_frame(phys_mem_offset, frame, &zeros);
            }
        }
    }

    let l4_frame = process.page_table_frame();
    let mut page_dir = UserPageDirectory::new(l4_frame, phys_mem_offset);
    if !page_dir.install(upage, frame, desc_writable) {
        return Err(ProcessError::OutOfFrames);
    }

    if let Some(desc) = process.spt_mut().find_mut(upage) {
        desc.frame = Some(frame);
    }

    Ok(())
}

/// Apply the stack-growth heuristics for a fault just below the current
/// stack pointer. Returns `true`
/// if the fault is now resolvable (new STACK entries were created).
fn grow_stack(
    process: &mut crate::kernel::process::Process,
    fault_addr: x86_64::VirtAddr,
    esp: x86_64::VirtAddr,
    upage: VirtAddr,
) -> bool {
    let fa = fault_addr.as_u64();
    let esp_val = esp.as_u64();

    let looks_like_push = fa < esp_val && matches!(esp_val - fa, 4 | 32);
    let within_stack_region = upage.as_u64() <= STACK_INIT as u64
        && (STACK_INIT as u64 - upage.as_u64()) / PAGE_SIZE as u64 <= STACK_MAX_PAGES as u64;

    if !looks_like_push && !within_stack_region {
        return false;
    }

    // Walk down from the process's current lowest stack page, not
    // `STACK_INIT` (the loader already creates that entry eagerly, so
    // starting there would immediately hit `contains` and create nothing),
    // creating zero-fill entries for every untracked page down to `upage`.
    let lowest_tracked = process
        .spt()
        .highest_stack_page()
        .map(|a| a.as_u64())
        .unwrap_or(STACK_INIT as u64);
    let mut page = lowest_tracked.saturating_sub(PAGE_SIZE as u64);
    while page >= upage.as_u64() {
        let candidate = VirtAddr::new(page as usize);
        if process.spt().contains(candidate) {
            break;
        }
        process.spt_mut().create(candidate, true, PageKind::Stack);
        if page == 0 {
            break;
        }
        page -= PAGE_SIZE as u64;
    }

    process.spt().contains(upage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_round_down_clears_offset_bits() {
        assert_eq!(page_round_down(0x1234), 0x1000);
        assert_eq!(page_round_down(0x1000), 0x1000);
    }
}
