//! Process management API

use crate::syscall;

/// Exit the current process with the given exit code
pub fn exit(code: i32) -> ! {
    syscall::exit(code)
}

/// Execute a program, returning its pid or a negative error code.
///
/// Unlike `fork`+`exec`, this kernel starts the new process directly;
/// there is no intermediate child image to inherit from.
pub fn exec(cmd: &str) -> i64 {
    syscall::exec(cmd)
}

/// Wait for a child process to terminate, returning its exit status.
pub fn wait(pid: i32) -> i64 {
    syscall::wait(pid)
}
