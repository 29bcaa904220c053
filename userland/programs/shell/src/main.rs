#![no_std]
#![no_main]

use core::panic::PanicInfo;
use libuser::io::{println, read_stdin};
use libuser::process::{exec, exit, wait};

/// Minimal line-reading shell: read a command line from stdin a byte at a
/// time, exec it, and wait for it to finish.
#[no_mangle]
#[link_section = ".text.entry"]
pub extern "C" fn _start() -> ! {
    println("Userland shell. Type a program name and press enter.");

    let mut line = [0u8; 128];
    loop {
        let mut len = 0usize;
        loop {
            let mut byte = [0u8; 1];
            if read_stdin(&mut byte) <= 0 {
                continue;
            }
            if byte[0] == b'\n' || byte[0] == b'\r' {
                break;
            }
            if len < line.len() {
                line[len] = byte[0];
                len += 1;
            }
        }

        if len == 0 {
            continue;
        }

        let Ok(cmd) = core::str::from_utf8(&line[..len]) else {
            println("invalid command line");
            continue;
        };

        let pid = exec(cmd);
        if pid < 0 {
            println("exec failed");
            continue;
        }
        let _status = wait(pid as i32);
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    println("Shell Panic!");
    exit(1);
}
