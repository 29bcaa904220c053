// src/constants.rs

//! Kernel constants and configuration values
//!
//! This module centralizes all constant values used throughout the kernel,
//! including feature descriptions, system information, and UI messages.

/// List of major kernel features and improvements
///
/// These features are displayed during boot to inform the user
/// about the kernel's capabilities.
pub const FEATURES: &[&str] = &[
    "Replaced static mut with Mutex (SAFE!)",
    "Interrupt-safe locking (no deadlock!)",
    "Implemented fmt::Write trait",
    "Optimized scroll with copy_nonoverlapping",
    "Modular code structure (vga_buffer, serial)",
    "Serial FIFO transmit check",
    "VGA color support (16 colors)",
    "VGA auto-scroll",
    "CPU hlt instruction",
    "Detailed panic handler",
];

/// System component information
///
/// Each tuple contains a (label, value) pair describing
/// a kernel component or configuration.
pub const SYSTEM_INFO: &[(&str, &str)] = &[
    ("Bootloader", "0.9.33"),
    ("Serial", "COM1 (0x3F8) with FIFO check"),
];

/// Usage hints displayed to serial output
///
/// These messages provide guidance on interacting with
/// the kernel when running under QEMU or similar emulators.
pub const SERIAL_HINTS: &[&str] = &[
    "Kernel running. System in low-power hlt loop.",
    "Press Ctrl+A, X to exit QEMU.",
];

/// Size in bytes of one virtual-memory page.
pub const PAGE_SIZE: usize = 4096;

/// Size in bytes of one block-device sector.
pub const SECTOR_SIZE: usize = 512;

/// Sectors occupied by one swapped-out page.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Number of page-sized slots in the swap store.
pub const SWAP_PAGES: usize = 256;

/// Top of the user address range a freshly-loaded process's stack starts at.
pub const PHYS_BASE: u64 = 0x0000_C000_0000;

/// Initial top-of-stack page for a new process, one page below `PHYS_BASE`.
pub const STACK_INIT: u64 = PHYS_BASE - PAGE_SIZE as u64;

/// Stack growth never admits more pages below `STACK_INIT` than this.
pub const STACK_MAX_PAGES: u64 = 2048;

/// Command-line argument count cap enforced by the loader.
pub const MAX_ARGS: usize = 100;

/// Maximum accepted program-header entry count in an executable image.
pub const MAX_PHNUM: u16 = 1024;

/// First file descriptor handed out to a process (0 and 1 are reserved for
/// stdin/stdout).
pub const FIRST_USER_FD: u32 = 2;

/// Virtual address of the kernel heap, mapped once at boot.
pub const HEAP_START: usize = 0x_4444_4444_0000;

/// Size in bytes of the kernel heap.
pub const HEAP_SIZE: usize = 1024 * 1024; // 1 MiB

