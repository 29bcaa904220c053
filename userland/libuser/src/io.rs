//! High-level I/O API

use crate::syscall;

const STDIN: i32 = 0;
const STDOUT: i32 = 1;

/// Print a string to stdout
pub fn print(s: &str) {
    let _ = syscall::write(STDOUT, s.as_bytes());
}

/// Print a string to stdout with a newline
pub fn println(s: &str) {
    print(s);
    print("\n");
}

/// Read up to `buf.len()` bytes from stdin (the keyboard, one byte at a
/// time). Returns the number of bytes read.
pub fn read_stdin(buf: &mut [u8]) -> i64 {
    syscall::read(STDIN, buf)
}

/// Macro for formatted printing (simplified version)
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {{
        // For now, we don't support format! in no_std without alloc
        // Users should use the print() function directly
        $crate::io::print($($arg)*);
    }};
}

/// Macro for formatted printing with newline
#[macro_export]
macro_rules! println {
    () => { $crate::io::println("") };
    ($s:expr) => { $crate::io::println($s) };
}
