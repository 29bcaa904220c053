#![no_std]
#![no_main]

use core::panic::PanicInfo;
use core::sync::atomic::Ordering;

use bootloader_api::config::{BootloaderConfig, Mapping};
use bootloader_api::{entry_point, BootInfo};
use x86_64::registers::control::Cr3;
use x86_64::VirtAddr;

use vmkernel::arch::x86_64::{gdt, interrupts, pic, syscall};
use vmkernel::constants::{HEAP_SIZE, HEAP_START, PAGE_SIZE};
use vmkernel::kernel::core::traits::{PageDirectory, RawFrameSource};
use vmkernel::kernel::driver::{init_console, init_serial, init_vga};
use vmkernel::kernel::mm::frame::{BootInfoFrameAllocator, BOOT_INFO_ALLOCATOR};
use vmkernel::kernel::mm::paging::UserPageDirectory;
use vmkernel::kernel::mm::types::{LayoutSize, VirtAddr as AbsVirtAddr};
use vmkernel::kernel::mm::PHYS_MEM_OFFSET;
use vmkernel::kernel::process::lifecycle::create_user_process;
use vmkernel::{debug_println, hlt_loop};

/// Ask the bootloader to identity-map all physical memory at a dynamically
/// chosen offset; [`BootInfoFrameAllocator`] and [`UserPageDirectory`] both
/// assume that mapping exists.
static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(Mapping::Dynamic);
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

/// Map `[HEAP_START, HEAP_START + HEAP_SIZE)` into the currently active
/// (boot) page table, one frame per page, using the just-seeded
/// [`BOOT_INFO_ALLOCATOR`]. [`UserPageDirectory`] only cares about a level-4
/// frame and a physical-memory offset, so the boot page table named by the
/// current `CR3` works as well as any process's.
fn map_kernel_heap() {
    let (l4_frame, _) = Cr3::read();
    let phys_mem_offset = VirtAddr::new(PHYS_MEM_OFFSET.load(Ordering::Relaxed));
    let mut boot_table = UserPageDirectory::new(l4_frame, phys_mem_offset);

    for page_index in 0..(HEAP_SIZE / PAGE_SIZE) {
        let page_addr = HEAP_START + page_index * PAGE_SIZE;
        let frame = BOOT_INFO_ALLOCATOR
            .lock()
            .as_mut()
            .expect("frame allocator not initialized")
            .frame_alloc()
            .expect("out of physical memory while mapping kernel heap");
        if !boot_table.install(AbsVirtAddr::new(page_addr), frame, true) {
            panic!("failed to map kernel heap page at {:#x}", page_addr);
        }
    }
}

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    init_serial().expect("serial port bring-up failed");
    debug_println!("[boot] serial online");

    gdt::init();
    interrupts::init_idt();
    unsafe {
        pic::PICS.lock().initialize();
    }
    debug_println!("[boot] gdt/idt/pic ready");

    let phys_mem_offset = boot_info
        .physical_memory_offset
        .into_option()
        .expect("bootloader did not map physical memory");
    PHYS_MEM_OFFSET.store(phys_mem_offset, Ordering::Relaxed);

    // SAFETY: `physical_memory_offset` above is exactly the offset the
    // bootloader config requested, and `memory_regions` is this boot's own
    // memory map; nothing else hands out these frames.
    let frame_allocator = unsafe {
        BootInfoFrameAllocator::init(&boot_info.memory_regions, VirtAddr::new(phys_mem_offset))
    };
    *BOOT_INFO_ALLOCATOR.lock() = Some(frame_allocator);
    debug_println!("[boot] physical frame allocator ready");

    map_kernel_heap();
    unsafe {
        vmkernel::init_heap(AbsVirtAddr::new(HEAP_START), LayoutSize::new(HEAP_SIZE))
            .expect("heap already initialized");
    }
    debug_println!("[boot] heap ready");

    init_vga().expect("vga bring-up failed");
    init_console();
    syscall::init();
    debug_println!("[boot] drivers and syscall mechanism ready");

    match create_user_process("shell") {
        Ok(pid) => debug_println!("[boot] launched initial process pid={}", pid.as_u64()),
        Err(_) => debug_println!("[boot] no initial program found in the filesystem; idling"),
    }

    x86_64::instructions::interrupts::enable();
    hlt_loop()
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    debug_println!("[PANIC] {}", info);
    hlt_loop()
}
