//! Process lifecycle management
//!
//! `exec` allocates a child and loads it synchronously
//! before the child is ever made visible in [`PROCESS_TABLE`] — there is no
//! separate kernel-thread entry point distinct from the user entry point in
//! this kernel, so the "child signals load outcome before the parent's exec
//! returns" handshake collapses to ordinary sequential execution. `wait`
//! stays genuinely asynchronous: it blocks the caller and lets the scheduler
//! run other processes until the child's `exit` marks it `Terminated`.

use core::sync::atomic::Ordering;

use x86_64::VirtAddr;

use crate::errors::ProcessError;
use crate::kernel::core::traits::{FrameWriter, RawFrameSource};
use crate::kernel::fs::FILESYSTEM;
use crate::kernel::loader::load_executable;
use crate::kernel::mm::frame::{BOOT_INFO_ALLOCATOR, FRAME_TABLE};
use crate::kernel::mm::paging::UserPageDirectory;
use crate::kernel::mm::types::{PhysAddr, VirtAddr as AbsVirtAddr};
use crate::kernel::mm::PHYS_MEM_OFFSET;
use crate::constants::STACK_INIT;
use crate::kernel::process::{LifecycleState, Process, ProcessId, ProcessState, PROCESS_TABLE};

/// Error types for process creation.
#[derive(Debug)]
pub enum CreateError {
    FrameAllocationFailed,
    PageTableCreationError(&'static str),
    Load(ProcessError),
}

impl From<ProcessError> for CreateError {
    fn from(e: ProcessError) -> Self {
        CreateError::Load(e)
    }
}

/// Re-locks [`BOOT_INFO_ALLOCATOR`] for every individual operation rather
/// than borrowing it for a whole call, the same per-call locking
/// `kernel::mm::page_fault::frame_get` uses. `load_executable` calls into
/// `UserPageDirectory::install`, which takes its own brief lock on the same
/// allocator to walk page-table levels; holding one borrow across both would
/// deadlock the (non-reentrant) `spin::Mutex`.
struct GlobalFrameSource;

impl RawFrameSource for GlobalFrameSource {
    fn frame_alloc(&mut self) -> Option<PhysAddr> {
        BOOT_INFO_ALLOCATOR.lock().as_mut()?.frame_alloc()
    }

    fn frame_dealloc(&mut self, frame: PhysAddr) {
        if let Some(alloc) = BOOT_INFO_ALLOCATOR.lock().as_mut() {
            alloc.frame_dealloc(frame);
        }
    }
}

impl FrameWriter for GlobalFrameSource {
    fn write_frame(&mut self, frame: PhysAddr, offset: usize, data: &[u8]) {
        if let Some(alloc) = BOOT_INFO_ALLOCATOR.lock().as_mut() {
            alloc.write_frame(frame, offset, data);
        }
    }
}

/// Build, load, and fully initialize a process from `cmdline`, without
/// adding it to [`PROCESS_TABLE`]. Shared by the first process created at
/// boot and by every subsequent `exec`.
fn build_process(cmdline: &str) -> Result<Process, CreateError> {
    let phys_mem_offset = VirtAddr::new(PHYS_MEM_OFFSET.load(Ordering::Relaxed));

    let mut process = {
        let mut allocator_lock = BOOT_INFO_ALLOCATOR.lock();
        let frame_allocator = allocator_lock.as_mut().ok_or(CreateError::FrameAllocationFailed)?;
        crate::kernel::process::create_process_with_context(
            VirtAddr::new(0),
            frame_allocator,
            phys_mem_offset,
        )
        .map_err(CreateError::PageTableCreationError)?
    };

    let mut page_dir = UserPageDirectory::new(process.page_table_frame(), phys_mem_offset);
    let mut frame_source = GlobalFrameSource;
    let loaded = {
        let mut fs = FILESYSTEM.lock();
        load_executable(cmdline, &mut *fs, process.spt_mut(), &mut frame_source, &mut page_dir)?
    };

    FRAME_TABLE.lock().insert(crate::kernel::mm::frame::FrameRecord {
        frame: loaded.stack_frame,
        owner: process.pid(),
        upage: AbsVirtAddr::new(STACK_INIT as usize),
        clock_used: true,
    });

    process.registers_mut().rip = loaded.entry_point.as_u64();
    process.registers_mut().rsp = loaded.stack_top.as_u64();
    process.set_name(loaded.name);
    process.set_executable(loaded.executable);
    process.set_lifecycle(LifecycleState::Running);

    crate::kernel::process::switch::setup_process_context(&mut process);
    process.set_state(ProcessState::Ready);

    Ok(process)
}

/// Create the first user process in the system. Has no parent to rendezvous
/// with or report back to.
pub fn create_user_process(cmdline: &str) -> Result<ProcessId, CreateError> {
    let process = build_process(cmdline)?;
    let pid = process.pid();
    PROCESS_TABLE.lock().add_process(process);
    crate::debug_println!("[Process] Created process PID={}", pid.as_u64());
    Ok(pid)
}

/// `exec(cmd)`: build and load a new child process. The load happens before
/// the child is added to the table, so on failure there is no zombie left
/// behind and nothing is printed — matching scenario 1 (`exec("no-such-file")
/// => -1`, child prints nothing).
pub fn exec_process(cmdline: &str) -> Result<ProcessId, CreateError> {
    let parent_pid =
        crate::kernel::process::current_pid().ok_or(CreateError::PageTableCreationError("no current process"))?;

    let mut child = build_process(cmdline)?;
    child.set_parent_pid(parent_pid);
    let pid = child.pid();
    PROCESS_TABLE.lock().add_process(child);

    crate::debug_println!("[Process] PID={} exec'd -> PID={}", parent_pid.as_u64(), pid.as_u64());
    Ok(pid)
}

/// `wait(pid)`. Blocks the caller until `pid` exits, then reaps
/// it and returns its exit status. Returns `-1` immediately if `pid` is not
/// a live or zombie child of the caller, or has already been waited on.
pub fn wait_process(pid: ProcessId) -> i32 {
    let Some(caller) = crate::kernel::process::current_pid() else {
        return -1;
    };

    loop {
        let mut table = PROCESS_TABLE.lock();
        match table.get_process(pid) {
            None => return -1,
            Some(child) if child.parent_pid() != Some(caller) => return -1,
            Some(child) if child.state() == ProcessState::Terminated => {
                let exit_code = child.exit_code().unwrap_or(-1);
                table.remove_process(pid);
                return exit_code;
            }
            Some(_) => {
                let current = table.current_process_mut().expect("current process missing");
                current.set_state(ProcessState::Blocked);
            }
        }
        drop(table);
        crate::kernel::process::schedule_next();
    }
}

/// `exit(status)`: prints the termination line, closes every
/// open file, frees the SPT, releases the executable's write-deny, and
/// wakes the parent if it is blocked in `wait`. The process itself stays in
/// the table as a zombie (`Terminated`) until its parent reaps it.
pub fn exit_process(status: i32) {
    let Some(pid) = crate::kernel::process::current_pid() else {
        return;
    };

    // Filesystem is acquired before the process table, matching the
    // filesystem-before-page-list lock order.
    let mut fs = FILESYSTEM.lock();
    let mut table = PROCESS_TABLE.lock();

    let parent_pid = {
        let Some(process) = table.get_process_mut(pid) else {
            return;
        };

        crate::println!("{}: exit({})", process.name(), status);

        for handle in process.fd_table_mut().drain() {
            fs.close(handle);
        }
        if let Some(exec) = process.executable() {
            fs.allow_write(exec);
            fs.close(exec);
        }

        process.free_memory();
        process.set_state(ProcessState::Terminated);
        process.set_exit_code(status);
        process.set_lifecycle(LifecycleState::Dying);

        process.parent_pid()
    };
    drop(fs);

    if let Some(ppid) = parent_pid {
        if let Some(parent) = table.get_process_mut(ppid) {
            if parent.state() == ProcessState::Blocked {
                parent.set_state(ProcessState::Ready);
            }
        }
    }
}

/// Terminate the currently running process. `pid` is asserted against
/// `current_pid()` rather than looked up independently: both the syscall
/// dispatcher's `exit` handler and the page-fault handler's
/// fault-in-user-mode path only ever terminate the process that is actually
/// running when they're invoked.
pub fn terminate_process(pid: ProcessId, exit_code: i32) {
    debug_assert_eq!(Some(pid), crate::kernel::process::current_pid());
    exit_process(exit_code);
}
