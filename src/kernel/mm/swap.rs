// src/kernel/mm/swap.rs
//! Swap store
//!
//! A fixed number of page-sized slots on a block device. Each slot occupies
//! `PAGE_SIZE / SECTOR_SIZE` consecutive sectors; a free list (one bit per
//! slot) tracks which ones are in use.
//!
//! Guarded in production by [`crate::sync::LockId::Swap`].

use alloc::vec;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

use crate::constants::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE, SWAP_PAGES};
use crate::errors::{LoadFailure, ProcessError};
use crate::kernel::core::traits::BlockDevice;

/// Identifies one page-sized slot in the swap store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(u32);

impl SwapSlot {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A block device backed by a plain in-memory buffer.
///
/// Stands in for the block-device collaborator named out of scope in spec
/// §1/§6: this kernel never shipped a disk driver, so the swap store runs
/// over memory shaped like one instead.
pub struct RamBlockDevice {
    block_size: usize,
    blocks: Vec<u8>,
}

impl RamBlockDevice {
    pub fn new(block_size: usize, total_blocks: u64) -> Self {
        Self {
            block_size,
            blocks: vec![0u8; block_size * total_blocks as usize],
        }
    }
}

impl crate::kernel::core::traits::Device for RamBlockDevice {
    fn name(&self) -> &str {
        "ramdisk-swap"
    }

    fn init(&mut self) -> crate::kernel::core::result::KernelResult<()> {
        Ok(())
    }

    fn reset(&mut self) -> crate::kernel::core::result::KernelResult<()> {
        self.blocks.iter_mut().for_each(|b| *b = 0);
        Ok(())
    }
}

impl BlockDevice for RamBlockDevice {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> crate::kernel::core::result::KernelResult<usize> {
        let start = block as usize * self.block_size;
        let end = start + self.block_size;
        let n = buf.len().min(self.block_size);
        buf[..n].copy_from_slice(&self.blocks[start..start + n]);
        let _ = end;
        Ok(n)
    }

    fn write_block(&mut self, block: u64, buf: &[u8]) -> crate::kernel::core::result::KernelResult<usize> {
        let start = block as usize * self.block_size;
        let n = buf.len().min(self.block_size);
        self.blocks[start..start + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }

    fn total_blocks(&self) -> u64 {
        (self.blocks.len() / self.block_size) as u64
    }
}

/// Page-granular swap area over a sector-addressed block device.
pub struct SwapStore<B: BlockDevice> {
    device: B,
    free: Vec<bool>,
}

impl<B: BlockDevice> SwapStore<B> {
    pub fn new(device: B) -> Self {
        Self {
            device,
            free: vec![true; SWAP_PAGES],
        }
    }

    fn first_free(&self) -> Option<usize> {
        self.free.iter().position(|&f| f)
    }

    /// Write `page` (exactly `PAGE_SIZE` bytes) into a free slot.
    pub fn store(&mut self, page: &[u8]) -> Result<SwapSlot, ProcessError> {
        debug_assert_eq!(page.len(), PAGE_SIZE);
        let slot = self.first_free().ok_or(ProcessError::SwapFull)?;
        self.free[slot] = false;
        let base_sector = (slot * SECTORS_PER_PAGE) as u64;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &page[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            self.device
                .write_block(base_sector + i as u64, chunk)
                .map_err(|_| ProcessError::LoadFailed(LoadFailure::OpenFailed))?;
        }
        Ok(SwapSlot(slot as u32))
    }

    /// Read a previously-stored page back into `out` (`PAGE_SIZE` bytes).
    pub fn load(&self, slot: SwapSlot, out: &mut [u8]) -> Result<(), ProcessError> {
        debug_assert_eq!(out.len(), PAGE_SIZE);
        let base_sector = (slot.as_u32() as usize * SECTORS_PER_PAGE) as u64;
        for i in 0..SECTORS_PER_PAGE {
            let chunk = &mut out[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE];
            self.device
                .read_block(base_sector + i as u64, chunk)
                .map_err(|_| ProcessError::LoadFailed(LoadFailure::OpenFailed))?;
        }
        Ok(())
    }

    /// Return a slot to the free list without reading it back.
    pub fn free(&mut self, slot: SwapSlot) {
        self.free[slot.as_u32() as usize] = true;
    }
}

lazy_static! {
    /// Single swap store shared by the page-fault handler and the eviction
    /// clock. Backed by a ramdisk since this kernel never shipped a real
    /// block-device driver.
    pub static ref SWAP_STORE: Mutex<SwapStore<RamBlockDevice>> = Mutex::new(SwapStore::new(
        RamBlockDevice::new(SECTOR_SIZE, (SWAP_PAGES * SECTORS_PER_PAGE) as u64)
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_store() -> SwapStore<RamBlockDevice> {
        SwapStore::new(RamBlockDevice::new(SECTOR_SIZE, (SWAP_PAGES * SECTORS_PER_PAGE) as u64))
    }

    #[test]
    fn round_trip_preserves_bytes() {
        let mut store = new_store();
        let mut page = [0u8; PAGE_SIZE];
        for (i, b) in page.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let slot = store.store(&page).expect("store");
        let mut out = [0u8; PAGE_SIZE];
        store.load(slot, &mut out).expect("load");
        assert_eq!(page, out);
    }

    #[test]
    fn full_swap_is_reported() {
        let mut store = new_store();
        let page = [0u8; PAGE_SIZE];
        for _ in 0..SWAP_PAGES {
            store.store(&page).expect("store");
        }
        assert_eq!(store.store(&page), Err(ProcessError::SwapFull));
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut store = new_store();
        let page = [7u8; PAGE_SIZE];
        let slot = store.store(&page).expect("store");
        store.free(slot);
        let reused = store.store(&page).expect("store after free");
        assert_eq!(reused, slot);
    }
}
