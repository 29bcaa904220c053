// src/kernel/mm/paging.rs
//! ページング管理
//!
//! ライフタイムベースのページマッピングで安全性を保証。

use core::marker::PhantomData;
use crate::kernel::core::{KernelResult, KernelError, MemoryError, ErrorKind};
use crate::kernel::core::traits::PageDirectory;
use crate::kernel::mm::frame::BOOT_INFO_ALLOCATOR;
use crate::kernel::mm::types::{PhysAddr as AbsPhysAddr, VirtAddr as AbsVirtAddr};
use x86_64::{VirtAddr, PhysAddr};
use x86_64::structures::paging::{Page, PageTable, PageTableFlags, PhysFrame, Size4KiB, Mapper, FrameAllocator};
use x86_64::structures::paging::OffsetPageTable;

/// ページテーブルへの参照を保持するページマッピング
///
/// ライフタイム `'pt` により、ページテーブルの所有権を管理します。
/// Drop 時 に自動的にアンマップされます。
pub struct PageMapping<'pt> {
    page: x86_64::structures::paging::Page<Size4KiB>,
    mapper: &'pt mut OffsetPageTable<'pt>,
    _phantom: PhantomData<&'pt mut PageTable>,
}

impl<'pt> PageMapping<'pt> {
    /// 新しいページマッピングを作成
    ///
    /// # Safety
    ///
    /// virt と phys は有効なアドレスである必要があります。
    /// また、mapper は正しく初期化されている必要があります。
    pub unsafe fn new(
        mapper: &'pt mut OffsetPageTable<'pt>,
        frame_allocator: &mut impl FrameAllocator<Size4KiB>,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageTableFlags,
    ) -> KernelResult<Self> {
        use x86_64::structures::paging::Page;
        
        let page = Page::from_start_address(virt).map_err(|_| {
            KernelError::with_context(ErrorKind::Memory(MemoryError::InvalidAddress), "Invalid virtual address")
        })?;
        
        let frame = PhysFrame::from_start_address(phys).map_err(|_| {
            KernelError::with_context(ErrorKind::Memory(MemoryError::InvalidAddress), "Invalid physical address")
        })?;
        
        mapper.map_to(page, frame, flags, frame_allocator).map_err(|_| {
             KernelError::with_context(ErrorKind::Memory(MemoryError::OutOfMemory), "Failed to map page")
        })?.flush();

        Ok(Self {
            page,
            mapper,
            _phantom: PhantomData,
        })
    }
}

impl Drop for PageMapping<'_> {
    fn drop(&mut self) {
        // SAFETY: このマッピングを作成したので、アンマップも安全
        // ただし、本来は unmap の結果を確認すべきだが、Drop では panic できないため無視する
        let _ = self.mapper.unmap(self.page);
    }
}

/// One process's address space, identified by its level-4 page-table frame.
///
/// Reconstructs a short-lived [`OffsetPageTable`] from `(l4_frame,
/// phys_mem_offset)` on every call instead of holding a live borrow across
/// calls, the same manual-reconstruction pattern `kernel::process` already
/// uses for page-table access.
pub struct UserPageDirectory {
    l4_frame: PhysFrame<Size4KiB>,
    phys_mem_offset: VirtAddr,
}

impl UserPageDirectory {
    pub fn new(l4_frame: PhysFrame<Size4KiB>, phys_mem_offset: VirtAddr) -> Self {
        Self { l4_frame, phys_mem_offset }
    }

    /// # Safety
    ///
    /// `l4_frame` must be a currently-valid level-4 table and
    /// `phys_mem_offset` must map all physical memory at a fixed offset.
    unsafe fn with_mapper<R>(&self, f: impl FnOnce(&mut OffsetPageTable) -> R) -> R {
        let virt = self.phys_mem_offset + self.l4_frame.start_address().as_u64();
        let l4_table: &mut PageTable = &mut *virt.as_mut_ptr();
        let mut mapper = OffsetPageTable::new(l4_table, self.phys_mem_offset);
        f(&mut mapper)
    }
}

impl PageDirectory for UserPageDirectory {
    fn install(&mut self, upage: AbsVirtAddr, frame: AbsPhysAddr, writable: bool) -> bool {
        let page = match Page::<Size4KiB>::from_start_address(VirtAddr::new(upage.as_u64())) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let phys_frame = match PhysFrame::<Size4KiB>::from_start_address(PhysAddr::new(frame.as_u64())) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        if writable {
            flags |= PageTableFlags::WRITABLE;
        }
        let mut guard = BOOT_INFO_ALLOCATOR.lock();
        let alloc = match guard.as_mut() {
            Some(a) => a,
            None => return false,
        };
        // SAFETY: l4_frame/phys_mem_offset hold the struct's invariant.
        unsafe {
            self.with_mapper(|mapper| {
                mapper
                    .map_to(page, phys_frame, flags, alloc)
                    .map(|flush| flush.flush())
                    .is_ok()
            })
        }
    }

    fn invalidate(&mut self, upage: AbsVirtAddr) {
        let page = match Page::<Size4KiB>::from_start_address(VirtAddr::new(upage.as_u64())) {
            Ok(p) => p,
            Err(_) => return,
        };
        // SAFETY: see `install`.
        unsafe {
            self.with_mapper(|mapper| {
                if let Ok((_, flush)) = mapper.unmap(page) {
                    flush.flush();
                }
            })
        }
    }

    fn translate(&self, upage: AbsVirtAddr) -> Option<AbsPhysAddr> {
        let page = Page::<Size4KiB>::from_start_address(VirtAddr::new(upage.as_u64())).ok()?;
        // SAFETY: see `install`.
        unsafe {
            self.with_mapper(|mapper| {
                mapper
                    .translate_page(page)
                    .ok()
                    .map(|f| AbsPhysAddr::new(f.start_address().as_u64() as usize))
            })
        }
    }

    fn activate(&self) {
        use x86_64::registers::control::{Cr3, Cr3Flags};
        // SAFETY: l4_frame is a valid, fully-populated level-4 table
        // belonging to a live user process address space.
        unsafe {
            Cr3::write(self.l4_frame, Cr3Flags::empty());
        }
    }
}
