// src/kernel/mm/mod.rs
//! メモリ管理モジュール

pub mod paging;
pub mod allocator;
pub mod frame;
pub mod types;
pub mod spt;
pub mod swap;
pub mod eviction;
pub mod page_fault;

use core::sync::atomic::AtomicU64;

pub use allocator::{LockedHeap, LinkedListAllocator};
pub use frame::{BootInfoFrameAllocator, FrameRecord, FrameTable, BOOT_INFO_ALLOCATOR, FRAME_TABLE};
pub use types::{LayoutSize, MemoryError, PageFrameNumber, PhysAddr, VirtAddr};

/// Virtual address at which the bootloader maps all physical memory.
///
/// Set once during boot before any user process is created. Read by the
/// loader and page-fault handler whenever they need to turn a frame's
/// physical address into a kernel-accessible pointer.
pub static PHYS_MEM_OFFSET: AtomicU64 = AtomicU64::new(0);
