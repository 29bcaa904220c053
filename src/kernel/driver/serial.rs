// src/kernel/driver/serial.rs
//! 16550 UART (COM1) ドライバ
//!
//! CharDevice trait に基づいた型安全な実装。debug_print!/debug_println! の
//! 出力先として、ブート初期化の最初期から利用可能であることが期待される。

use core::fmt;
use spin::{Mutex, Once};

use crate::arch::x86_64::port::{Port, PortReadOnly, PortWriteOnly};
use crate::kernel::core::{CharDevice, Device, KernelResult};

const COM1_BASE: u16 = 0x3F8;

/// 16550 UART ドライバ (COM1 固定)
pub struct SerialPort {
    data: Port<u8>,
    interrupt_enable: PortWriteOnly<u8>,
    fifo_control: PortWriteOnly<u8>,
    line_control: PortWriteOnly<u8>,
    modem_control: PortWriteOnly<u8>,
    line_status: PortReadOnly<u8>,
}

impl SerialPort {
    /// COM1 固定ベースアドレスでドライバを構築
    pub const fn new() -> Self {
        Self {
            data: Port::new(COM1_BASE),
            interrupt_enable: PortWriteOnly::new(COM1_BASE + 1),
            fifo_control: PortWriteOnly::new(COM1_BASE + 2),
            line_control: PortWriteOnly::new(COM1_BASE + 3),
            modem_control: PortWriteOnly::new(COM1_BASE + 4),
            line_status: PortReadOnly::new(COM1_BASE + 5),
        }
    }

    fn transmit_empty(&self) -> bool {
        unsafe { self.line_status.read() & 0x20 != 0 }
    }
}

impl Device for SerialPort {
    fn name(&self) -> &str {
        "16550 UART (COM1)"
    }

    fn init(&mut self) -> KernelResult<()> {
        unsafe {
            self.interrupt_enable.write(0x00); // 割り込み無効
            self.line_control.write(0x80); // DLAB を立てる
            self.data.write(0x01); // divisor low: 115200 baud
            self.interrupt_enable.write(0x00); // divisor high
            self.line_control.write(0x03); // 8N1, DLAB クリア
            self.fifo_control.write(0xC7); // FIFO 有効化・クリア・14バイト閾値
            self.modem_control.write(0x0B); // RTS/DSR セット
        }
        Ok(())
    }

    fn reset(&mut self) -> KernelResult<()> {
        self.init()
    }
}

impl CharDevice for SerialPort {
    fn read_byte(&self) -> KernelResult<Option<u8>> {
        if unsafe { self.line_status.read() } & 0x01 != 0 {
            Ok(Some(unsafe { self.data.read() }))
        } else {
            Ok(None)
        }
    }

    fn write_byte(&mut self, byte: u8) -> KernelResult<()> {
        while !self.transmit_empty() {
            core::hint::spin_loop();
        }
        unsafe { self.data.write(byte) };
        Ok(())
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}

/// グローバル COM1 ドライバ（遅延初期化）
pub static SERIAL1: Once<Mutex<SerialPort>> = Once::new();

/// COM1 を初期化する。ブート初期化の最初期に一度だけ呼び出す。
pub fn init_serial() -> KernelResult<()> {
    SERIAL1.call_once(|| {
        let mut serial = SerialPort::new();
        serial.init().expect("serial port initialization failed");
        Mutex::new(serial)
    });
    Ok(())
}
