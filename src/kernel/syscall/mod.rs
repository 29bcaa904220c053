// src/kernel/syscall/mod.rs
//! System-call dispatch
//!
//! The call number and every argument live on the *user* stack at the
//! point `syscall` was executed — `*esp` is the call number, `esp+1,
//! esp+2, …` are machine-word (4-byte) argument slots. This kernel runs
//! each process's syscalls with that process's page directory still
//! active, so a validated user address can be dereferenced directly; an
//! unvalidated one terminates the process rather than risking a fault
//! the dispatcher didn't ask for.

use alloc::string::String;
use alloc::vec::Vec;

use crate::arch::Cpu;
use crate::constants::PAGE_SIZE;
use crate::kernel::core::traits::{CharDevice, FileHandle, FileSystem};
use crate::kernel::driver::keyboard::SCANCODE_QUEUE;
use crate::kernel::fs::FILESYSTEM;
use crate::kernel::mm::types::VirtAddr;
use crate::kernel::process::{self, lifecycle, schedule_next, ProcessId, PROCESS_TABLE};

/// Result type for a syscall, returned to userspace in `eax`.
pub type SyscallResult = i64;

const SYS_HALT: u32 = 0;
const SYS_EXIT: u32 = 1;
const SYS_EXEC: u32 = 2;
const SYS_WAIT: u32 = 3;
const SYS_WRITE: u32 = 4;
const SYS_READ: u32 = 5;
const SYS_CREATE: u32 = 6;
const SYS_REMOVE: u32 = 7;
const SYS_OPEN: u32 = 8;
const SYS_CLOSE: u32 = 9;
const SYS_FILESIZE: u32 = 10;
const SYS_SEEK: u32 = 11;
const SYS_TELL: u32 = 12;

const FD_STDIN: i32 = 0;
const FD_STDOUT: i32 = 1;

/// Cap on a `string_arg` walk so a missing NUL terminator can't loop
/// forever reading (validated, but endless) user memory.
const MAX_STRING_LEN: u64 = 4096;

fn page_of(addr: u64) -> VirtAddr {
    VirtAddr::new(addr as usize).align_down(PAGE_SIZE)
}

fn page_present(addr: u64) -> bool {
    PROCESS_TABLE
        .lock()
        .current_process()
        .map(|p| p.spt().contains(page_of(addr)))
        .unwrap_or(false)
}

fn page_writable(addr: u64) -> bool {
    PROCESS_TABLE
        .lock()
        .current_process()
        .and_then(|p| p.spt().find(page_of(addr)).map(|d| d.writable))
        .unwrap_or(false)
}

/// Validate an integer-sized slot: both the first and last byte of the
/// 4-byte value at `addr` must lie in an SPT-tracked page.
fn validate_int_slot(addr: u64) -> bool {
    match addr.checked_add(3) {
        Some(last) => page_present(addr) && page_present(last),
        None => false,
    }
}

fn read_u32(addr: u64) -> u32 {
    // SAFETY: caller validated `addr`'s containing page via
    // `validate_int_slot` before calling this.
    unsafe { core::ptr::read_unaligned(addr as *const u32) }
}

/// Read and validate integer argument `k` (0-indexed, `esp+1` is arg 0).
fn int_arg(esp: u64, k: u64) -> Option<i32> {
    let addr = esp.checked_add((k + 1) * 4)?;
    if !validate_int_slot(addr) {
        return None;
    }
    Some(read_u32(addr) as i32)
}

/// Read and validate a pointer argument: the slot holding the pointer
/// value, then the page the pointer itself lands in.
fn ptr_arg(esp: u64, k: u64) -> Option<u64> {
    let value = int_arg(esp, k)? as u32 as u64;
    if !page_present(value) {
        return None;
    }
    Some(value)
}

/// Read and validate a NUL-terminated string argument, walking it byte by
/// byte and validating the containing page at each step.
fn string_arg(esp: u64, k: u64) -> Option<String> {
    let base = ptr_arg(esp, k)?;
    let mut bytes = Vec::new();
    for i in 0..MAX_STRING_LEN {
        let addr = base.checked_add(i)?;
        if !page_present(addr) {
            return None;
        }
        // SAFETY: `addr`'s page was just validated present in the SPT.
        let byte = unsafe { core::ptr::read(addr as *const u8) };
        if byte == 0 {
            return String::from_utf8(bytes).ok();
        }
        bytes.push(byte);
    }
    None
}

/// Validate every page in `[buf, buf+len)` is SPT-tracked and writable —
/// the rule §4.7 states for `read`'s destination buffer.
fn writable_buf(buf: u64, len: u64) -> bool {
    ranged(buf, len, page_writable)
}

/// Validate every page in `[buf, buf+len)` is SPT-tracked, for a buffer the
/// syscall only reads from (`write`'s source, `create`'s name is handled as
/// a string instead).
fn readable_buf(buf: u64, len: u64) -> bool {
    ranged(buf, len, page_present)
}

fn ranged(buf: u64, len: u64, page_ok: impl Fn(u64) -> bool) -> bool {
    if len == 0 {
        return true;
    }
    let Some(last) = buf.checked_add(len - 1) else { return false };
    let mut page = page_of(buf).as_u64();
    let end_page = page_of(last).as_u64();
    loop {
        if !page_ok(page) {
            return false;
        }
        if page == end_page {
            return true;
        }
        page += PAGE_SIZE as u64;
    }
}

/// Terminate the current process with `code` and never return to the
/// caller — used both for explicit `exit` and for any argument-validation
/// failure (spec: "invalid access terminates the process with status -1").
fn terminate_current(code: i32) -> ! {
    if let Some(pid) = process::current_pid() {
        lifecycle::terminate_process(pid, code);
    }
    schedule_next();
    loop {
        crate::arch::ArchCpu::halt();
    }
}

/// Look up `fd` in the current process's fd table. `fd` values 0 and 1 are
/// reserved for the console/keyboard and never appear here.
fn lookup_fd(fd: i32) -> Option<FileHandle> {
    PROCESS_TABLE.lock().current_process_mut()?.fd_table_mut().get(fd)
}

fn sys_halt() -> ! {
    crate::exit_qemu(crate::QemuExitCode::Success);
}

fn sys_exit(esp: u64) -> SyscallResult {
    let Some(status) = int_arg(esp, 0) else { terminate_current(-1) };
    lifecycle::exit_process(status);
    schedule_next();
    loop {
        crate::arch::ArchCpu::halt();
    }
}

fn sys_exec(esp: u64) -> SyscallResult {
    let Some(cmd) = string_arg(esp, 0) else { terminate_current(-1) };
    match lifecycle::exec_process(&cmd) {
        Ok(pid) => pid.as_u64() as SyscallResult,
        Err(_) => -1,
    }
}

fn sys_wait(esp: u64) -> SyscallResult {
    let Some(pid) = int_arg(esp, 0) else { terminate_current(-1) };
    if pid < 0 {
        return -1;
    }
    lifecycle::wait_process(ProcessId::new(pid as u64)) as SyscallResult
}

fn sys_write(esp: u64) -> SyscallResult {
    let (Some(fd), Some(buf), Some(len)) = (int_arg(esp, 0), ptr_arg(esp, 1), int_arg(esp, 2)) else {
        terminate_current(-1)
    };
    let len = len.max(0) as u64;
    if !readable_buf(buf, len) {
        terminate_current(-1);
    }
    // SAFETY: `readable_buf` validated every page in this range.
    let slice = unsafe { core::slice::from_raw_parts(buf as *const u8, len as usize) };

    if fd == FD_STDOUT {
        console_putbuf(slice);
        return len as SyscallResult;
    }
    if fd == FD_STDIN {
        return -1;
    }
    let Some(handle) = lookup_fd(fd) else { return -1 };
    FILESYSTEM.lock().write(handle, slice) as SyscallResult
}

fn console_putbuf(bytes: &[u8]) {
    if let Some(vga) = crate::kernel::driver::vga::VGA.get() {
        let mut vga = vga.lock();
        for &b in bytes {
            let _ = vga.write_byte(b);
        }
    }
}

fn sys_read(esp: u64) -> SyscallResult {
    let (Some(fd), Some(buf), Some(len)) = (int_arg(esp, 0), ptr_arg(esp, 1), int_arg(esp, 2)) else {
        terminate_current(-1)
    };
    let len = len.max(0) as u64;
    if !writable_buf(buf, len) {
        terminate_current(-1);
    }

    if fd == FD_STDIN {
        for i in 0..len {
            let byte = loop {
                if let Some(b) = SCANCODE_QUEUE.lock().pop_scancode() {
                    break b;
                }
                schedule_next();
            };
            // SAFETY: `writable_buf` validated every page in this range.
            unsafe { core::ptr::write((buf + i) as *mut u8, byte) };
        }
        return len as SyscallResult;
    }
    if fd == FD_STDOUT {
        return -1;
    }
    let Some(handle) = lookup_fd(fd) else { return -1 };
    // SAFETY: `writable_buf` validated every page in this range.
    let slice = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, len as usize) };
    FILESYSTEM.lock().read(handle, slice) as SyscallResult
}

fn sys_create(esp: u64) -> SyscallResult {
    let (Some(name), Some(size)) = (string_arg(esp, 0), int_arg(esp, 1)) else { terminate_current(-1) };
    FILESYSTEM.lock().create(&name, size.max(0) as u32) as SyscallResult
}

fn sys_remove(esp: u64) -> SyscallResult {
    let Some(name) = string_arg(esp, 0) else { terminate_current(-1) };
    FILESYSTEM.lock().remove(&name) as SyscallResult
}

fn sys_open(esp: u64) -> SyscallResult {
    let Some(name) = string_arg(esp, 0) else { terminate_current(-1) };
    let Some(handle) = FILESYSTEM.lock().open(&name) else { return -1 };
    let Some(process) = PROCESS_TABLE.lock().current_process_mut() else { return -1 };
    process.fd_table_mut().insert(handle) as SyscallResult
}

fn sys_close(esp: u64) -> SyscallResult {
    let Some(fd) = int_arg(esp, 0) else { terminate_current(-1) };
    if fd == FD_STDIN || fd == FD_STDOUT {
        return 0;
    }
    let removed = PROCESS_TABLE
        .lock()
        .current_process_mut()
        .and_then(|p| p.fd_table_mut().remove(fd));
    if let Some(handle) = removed {
        FILESYSTEM.lock().close(handle);
    }
    0
}

fn sys_filesize(esp: u64) -> SyscallResult {
    let Some(fd) = int_arg(esp, 0) else { terminate_current(-1) };
    match lookup_fd(fd) {
        Some(handle) => FILESYSTEM.lock().length(handle) as SyscallResult,
        None => -1,
    }
}

fn sys_seek(esp: u64) -> SyscallResult {
    let (Some(fd), Some(pos)) = (int_arg(esp, 0), int_arg(esp, 1)) else { terminate_current(-1) };
    if let Some(handle) = lookup_fd(fd) {
        FILESYSTEM.lock().seek(handle, pos.max(0) as u32);
    }
    0
}

fn sys_tell(esp: u64) -> SyscallResult {
    let Some(fd) = int_arg(esp, 0) else { terminate_current(-1) };
    match lookup_fd(fd) {
        Some(handle) => FILESYSTEM.lock().tell(handle) as SyscallResult,
        None => -1,
    }
}

/// Dispatch the syscall whose frame starts at `esp` (the user stack
/// pointer at the moment `syscall` was executed). Unknown call numbers and
/// any argument-validation failure terminate the process with `-1`.
pub fn dispatch(esp: x86_64::VirtAddr) -> SyscallResult {
    let esp = esp.as_u64();
    if !validate_int_slot(esp) {
        terminate_current(-1);
    }
    match read_u32(esp) {
        SYS_HALT => sys_halt(),
        SYS_EXIT => sys_exit(esp),
        SYS_EXEC => sys_exec(esp),
        SYS_WAIT => sys_wait(esp),
        SYS_WRITE => sys_write(esp),
        SYS_READ => sys_read(esp),
        SYS_CREATE => sys_create(esp),
        SYS_REMOVE => sys_remove(esp),
        SYS_OPEN => sys_open(esp),
        SYS_CLOSE => sys_close(esp),
        SYS_FILESIZE => sys_filesize(esp),
        SYS_SEEK => sys_seek(esp),
        SYS_TELL => sys_tell(esp),
        _ => terminate_current(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranged_accepts_single_page_when_predicate_true() {
        assert!(ranged(0x1000, 16, |_| true));
    }

    #[test]
    fn ranged_rejects_on_overflow() {
        assert!(!ranged(u64::MAX - 4, 16, |_| true));
    }

    #[test]
    fn ranged_empty_range_is_always_ok() {
        assert!(ranged(0x1000, 0, |_| false));
    }

    #[test]
    fn validate_int_slot_rejects_overflowing_address() {
        assert!(!validate_int_slot(u64::MAX - 1));
    }
}
