// src/error.rs

//! Unified error types for the kernel
//!
//! This module provides a consistent error handling approach across
//! all kernel subsystems.

use core::fmt;

/// Top-level kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// VGA subsystem error
    Vga(VgaError),
    /// Serial subsystem error
    Serial(SerialError),
    /// Initialization error
    Init(InitError),
    /// Display subsystem error
    Display(DisplayError),
    /// Process execution / virtual memory core error
    Process(ProcessError),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::Vga(e) => write!(f, "VGA error: {}", e),
            KernelError::Serial(e) => write!(f, "Serial error: {}", e),
            KernelError::Init(e) => write!(f, "Init error: {}", e),
            KernelError::Display(e) => write!(f, "Display error: {}", e),
            KernelError::Process(e) => write!(f, "Process error: {}", e),
        }
    }
}

/// Errors from the process lifecycle, syscall dispatcher, and virtual memory core.
///
/// `SwapFull` and `OutOfFrames` are never returned to a caller in this teaching
/// kernel: both are promoted to a panic at the call site per the resource
/// exhaustion policy. Every other variant does flow back to a syscall's `eax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// A syscall argument or dereference left the current process's SPT.
    BadUserAddress,
    /// Executable failed to load: bad header, oversized segment table, open failure.
    LoadFailed(LoadFailure),
    /// No free swap slot remained when one was needed.
    SwapFull,
    /// The physical frame pool and swap are both exhausted.
    OutOfFrames,
    /// `fd` does not name an open file in the current process.
    FdNotFound,
    /// `pid` does not name a waitable child of the current process.
    ChildNotFound,
    /// A write was attempted against a read-only page.
    PermissionDenied,
}

/// Reasons an executable failed to load (subset of `ProcessError::LoadFailed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailure {
    /// Could not open the named executable.
    OpenFailed,
    /// The 16-byte identifier, `e_type`, `e_machine`, or `e_version` did not match.
    BadHeader,
    /// `e_phnum` exceeded the maximum accepted program-header count.
    TooManySegments,
    /// A `PT_LOAD` segment failed validation (alignment, bounds, or size).
    BadSegment,
    /// A segment requested an unsupported type (DYNAMIC, INTERP, SHLIB).
    UnsupportedSegment,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::BadUserAddress => write!(f, "address outside process address space"),
            ProcessError::LoadFailed(r) => write!(f, "executable load failed: {:?}", r),
            ProcessError::SwapFull => write!(f, "swap store exhausted"),
            ProcessError::OutOfFrames => write!(f, "frame pool and swap both exhausted"),
            ProcessError::FdNotFound => write!(f, "no such file descriptor"),
            ProcessError::ChildNotFound => write!(f, "no such waitable child"),
            ProcessError::PermissionDenied => write!(f, "write to read-only page"),
        }
    }
}

impl From<ProcessError> for KernelError {
    fn from(err: ProcessError) -> Self {
        KernelError::Process(err)
    }
}

impl ErrorContext for ProcessError {
    fn context(&self) -> &'static str {
        match self {
            ProcessError::BadUserAddress => {
                "syscall argument or buffer left the current process's supplemental page table"
            }
            ProcessError::LoadFailed(_) => "executable image failed header or segment validation",
            ProcessError::SwapFull => "swap free list had no slot to satisfy an eviction",
            ProcessError::OutOfFrames => "frame allocator found the pool empty and eviction made no progress",
            ProcessError::FdNotFound => "file descriptor not present in the process's open-file table",
            ProcessError::ChildNotFound => "pid is not a live or zombie child of the caller",
            ProcessError::PermissionDenied => "attempted write into a page marked read-only",
        }
    }
}

/// VGA subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VgaError {
    /// Buffer not accessible
    BufferNotAccessible,
    /// Invalid position
    InvalidPosition,
    /// Write operation failed
    WriteFailure,
    /// Not initialized
    NotInitialized,
    /// Writer not locked
    NotLocked,
    /// Buffer overflow
    BufferOverflow,
}

impl VgaError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            VgaError::BufferNotAccessible => "buffer not accessible",
            VgaError::InvalidPosition => "invalid position",
            VgaError::WriteFailure => "write failure",
            VgaError::NotInitialized => "not initialized",
            VgaError::NotLocked => "writer not locked",
            VgaError::BufferOverflow => "buffer overflow",
        }
    }
}

impl fmt::Display for VgaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<VgaError> for KernelError {
    fn from(err: VgaError) -> Self {
        KernelError::Vga(err)
    }
}

/// Serial subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialError {
    /// Port already initialized
    AlreadyInitialized,
    /// Hardware not present
    PortNotPresent,
    /// Timeout during operation
    Timeout,
    /// Configuration failed
    ConfigurationFailed,
    /// Hardware access failed
    HardwareAccessFailed,
    /// Too many initialization attempts
    TooManyAttempts,
    /// Invalid baud rate
    InvalidBaudRate,
    /// FIFO error
    FifoError,
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialError::AlreadyInitialized => write!(f, "already initialized"),
            SerialError::PortNotPresent => write!(f, "hardware not present"),
            SerialError::Timeout => write!(f, "operation timeout"),
            SerialError::ConfigurationFailed => write!(f, "configuration failed"),
            SerialError::HardwareAccessFailed => write!(f, "hardware access failed"),
            SerialError::TooManyAttempts => write!(f, "too many attempts"),
            SerialError::InvalidBaudRate => write!(f, "invalid baud rate"),
            SerialError::FifoError => write!(f, "FIFO error"),
        }
    }
}

impl From<SerialError> for KernelError {
    fn from(err: SerialError) -> Self {
        KernelError::Serial(err)
    }
}

/// Initialization errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// VGA initialization failed
    VgaFailed(VgaError),
    /// Serial initialization failed
    SerialFailed(SerialError),
    /// Already initialized
    AlreadyInitialized,
    /// Prerequisites not met
    PrerequisitesNotMet,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::VgaFailed(e) => write!(f, "VGA init failed: {}", e),
            InitError::SerialFailed(e) => write!(f, "Serial init failed: {}", e),
            InitError::AlreadyInitialized => write!(f, "already initialized"),
            InitError::PrerequisitesNotMet => write!(f, "prerequisites not met"),
        }
    }
}

impl From<InitError> for KernelError {
    fn from(err: InitError) -> Self {
        KernelError::Init(err)
    }
}

/// Display subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayError {
    /// No output available
    NoOutputAvailable,
    /// Format error
    FormatError,
    /// Underlying subsystem error
    SubsystemError,
}

impl fmt::Display for DisplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayError::NoOutputAvailable => write!(f, "no output available"),
            DisplayError::FormatError => write!(f, "format error"),
            DisplayError::SubsystemError => write!(f, "subsystem error"),
        }
    }
}

impl From<DisplayError> for KernelError {
    fn from(err: DisplayError) -> Self {
        KernelError::Display(err)
    }
}

/// Result type alias for kernel operations
pub type Result<T> = core::result::Result<T, KernelError>;

/// Additional conversions for VgaError
impl From<VgaError> for InitError {
    fn from(err: VgaError) -> Self {
        InitError::VgaFailed(err)
    }
}

/// Additional conversions for SerialError
impl From<SerialError> for InitError {
    fn from(err: SerialError) -> Self {
        InitError::SerialFailed(err)
    }
}

/// Helper trait for error context
pub trait ErrorContext {
    /// Get a detailed description of the error
    fn context(&self) -> &'static str;
}

impl ErrorContext for KernelError {
    fn context(&self) -> &'static str {
        match self {
            KernelError::Vga(_) => "Error occurred in VGA buffer subsystem",
            KernelError::Serial(_) => "Error occurred in serial port subsystem",
            KernelError::Init(_) => "Error occurred during kernel initialization",
            KernelError::Display(_) => "Error occurred in display subsystem",
            KernelError::Process(e) => e.context(),
        }
    }
}

impl ErrorContext for VgaError {
    fn context(&self) -> &'static str {
        match self {
            VgaError::BufferNotAccessible => "VGA buffer memory could not be accessed",
            VgaError::InvalidPosition => "Attempted to write to invalid screen position",
            VgaError::WriteFailure => "Failed to write to VGA buffer",
            VgaError::NotInitialized => "VGA writer must be initialized before use",
            VgaError::NotLocked => "VGA writer lock must be acquired before writing",
            VgaError::BufferOverflow => "VGA buffer capacity exceeded",
        }
    }
}

impl ErrorContext for SerialError {
    fn context(&self) -> &'static str {
        match self {
            SerialError::AlreadyInitialized => "Serial port cannot be initialized twice",
            SerialError::PortNotPresent => "Serial port hardware is not available",
            SerialError::Timeout => "Serial operation timed out waiting for hardware",
            SerialError::ConfigurationFailed => "Failed to configure serial port registers",
            SerialError::HardwareAccessFailed => "Could not access serial port I/O registers",
            SerialError::TooManyAttempts => "Exceeded maximum retry attempts for serial operation",
            SerialError::InvalidBaudRate => "Specified baud rate is not supported",
            SerialError::FifoError => "Serial FIFO buffer encountered an error",
        }
    }
}

impl ErrorContext for InitError {
    fn context(&self) -> &'static str {
        match self {
            InitError::VgaFailed(_) => "VGA subsystem initialization failed",
            InitError::SerialFailed(_) => "Serial subsystem initialization failed",
            InitError::AlreadyInitialized => "Kernel subsystems are already initialized",
            InitError::PrerequisitesNotMet => {
                "Required conditions for initialization not satisfied"
            }
        }
    }
}

impl ErrorContext for DisplayError {
    fn context(&self) -> &'static str {
        match self {
            DisplayError::NoOutputAvailable => "No display output methods are available",
            DisplayError::FormatError => "Failed to format output string",
            DisplayError::SubsystemError => "Underlying display subsystem error",
        }
    }
}
