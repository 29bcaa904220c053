// src/kernel/core/traits.rs
//! カーネルコア trait 定義

use super::types::*;
use super::result::*;
use crate::kernel::mm::types::{PhysAddr, VirtAddr};
// use alloc::boxed::Box; // Phase 4 で有効化

/// デバイス抽象化の基本 trait
/// 
/// すべてのデバイスドライバはこの trait を実装します。
pub trait Device {
    /// デバイス名を取得
    fn name(&self) -> &str;
    
    /// デバイスを初期化
    fn init(&mut self) -> KernelResult<()>;
    
    /// デバイスをリセット
    fn reset(&mut self) -> KernelResult<()>;
    
    /// デバイスが利用可能か確認
    fn is_available(&self) -> bool {
        true
    }
}

/// キャラクタデバイス trait（シリアル、VGA など）
/// 
/// バイト単位で読み書きするデバイス用。
pub trait CharDevice: Device {
    /// 1バイト読み取り（ノンブロッキング）
    fn read_byte(&self) -> KernelResult<Option<u8>>;
    
    /// 1バイト書き込み
    fn write_byte(&mut self, byte: u8) -> KernelResult<()>;
    
    /// バッファを書き込み
    fn write_bytes(&mut self, buf: &[u8]) -> KernelResult<usize> {
        for &byte in buf.iter() {
            self.write_byte(byte)?;
        }
        Ok(buf.len())
    }
}

/// ブロックデバイス trait（ストレージなど）
/// 
/// 固定サイズブロック単位で読み書きするデバイス用。
pub trait BlockDevice: Device {
    /// ブロックサイズを取得（バイト単位）
    fn block_size(&self) -> usize;
    
    /// ブロックを読み取り
    fn read_block(&self, block: u64, buf: &mut [u8]) -> KernelResult<usize>;
    
    /// ブロックを書き込み
    fn write_block(&mut self, block: u64, buf: &[u8]) -> KernelResult<usize>;
    
    /// デバイスの総ブロック数
    fn total_blocks(&self) -> u64 {
        0 // デフォルト実装
    }
}

/// タスク抽象化
/// 
/// スケジューラで管理される実行単位。
/// タスクの実行状態は外部（Scheduler）が管理します。
pub trait Task {
    /// タスク ID を取得
    fn id(&self) -> TaskId;
    
    /// 優先度を取得
    fn priority(&self) -> Priority;
    
    /// タスク名を取得
    fn name(&self) -> &str {
        "unnamed"
    }
    
    /// 現在の実行状態を取得
    fn state(&self) -> TaskState;
}

/// タスク実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// 実行可能（スケジュール待ち）
    Ready,
    /// 現在実行中
    Running,
    /// ブロック中（I/O待ちなど）
    Blocked,
    /// 終了済み
    Terminated,
}

/// スケジューラ trait
/// 
/// タスクのスケジューリングとコンテキストスイッチを管理。
pub trait Scheduler {
    /// 次に実行するタスクを選択
    fn schedule(&mut self) -> Option<TaskId>;
    
    /// 指定されたタスクにスイッチ
    fn switch_to(&mut self, id: TaskId) -> KernelResult<()>;
    
    // /// タスクを追加 (Phase 4 で有効化)
    // fn add_task(&mut self, task: Box<dyn Task>) -> KernelResult<TaskId>;
    
    /// タスクを削除
    fn remove_task(&mut self, id: TaskId) -> KernelResult<()>;
    
    /// タスク数を取得
    fn task_count(&self) -> usize;
    
    /// タスクの状態を変更
    fn set_task_state(&mut self, id: TaskId, state: TaskState) -> KernelResult<()>;
}

/// The raw physical-page pool the frame allocator wraps.
///
/// Named external collaborator: the process/VM core never talks to hardware
/// frame bitmaps directly, only through this seam.
pub trait RawFrameSource {
    /// Take one zero-filled physical frame, or `None` if the pool is empty.
    fn frame_alloc(&mut self) -> Option<PhysAddr>;

    /// Return a frame to the pool.
    fn frame_dealloc(&mut self, frame: PhysAddr);
}

/// Opaque handle to an open file, as seen by the process/VM core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// The byte-level filesystem, named out of scope in §1 and used here only
/// through open/read/write/seek/length and the write-deny pair the loader
/// needs for the executable's lifetime.
pub trait FileSystem {
    /// Open `name`, returning a handle the caller must eventually `close`.
    fn open(&mut self, name: &str) -> Option<FileHandle>;

    /// Close a handle previously returned by `open`.
    fn close(&mut self, handle: FileHandle);

    /// Read up to `buf.len()` bytes at the handle's current position.
    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> usize;

    /// Write `buf` at the handle's current position.
    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> usize;

    /// Seek to an absolute byte offset.
    fn seek(&mut self, handle: FileHandle, pos: u32);

    /// Current byte offset.
    fn tell(&self, handle: FileHandle) -> u32;

    /// Total length in bytes.
    fn length(&self, handle: FileHandle) -> u32;

    /// Create a new file of the given initial size.
    fn create(&mut self, name: &str, initial_size: u32) -> bool;

    /// Remove a file by name.
    fn remove(&mut self, name: &str) -> bool;

    /// Prevent writes to the underlying file while it backs a running
    /// executable.
    fn deny_write(&mut self, handle: FileHandle);

    /// Undo a prior `deny_write`.
    fn allow_write(&mut self, handle: FileHandle);
}

/// The hardware page-directory routines, named out of scope in §1.
///
/// One instance per process address space.
pub trait PageDirectory {
    /// Install `frame` at `upage` with the given writability.
    ///
    /// Returns `false` if the underlying hardware mapping could not be
    /// created (e.g. an intermediate page-table frame could not be
    /// allocated).
    fn install(&mut self, upage: VirtAddr, frame: PhysAddr, writable: bool) -> bool;

    /// Remove any mapping at `upage`. No-op if nothing was mapped.
    fn invalidate(&mut self, upage: VirtAddr);

    /// Resolve `upage` to its currently-mapped frame, if any.
    fn translate(&self, upage: VirtAddr) -> Option<PhysAddr>;

    /// Make this address space the one the CPU translates through.
    fn activate(&self);
}

/// Materializes bytes into an already-allocated physical frame.
///
/// Split out of [`RawFrameSource`] because only the loader's eager stack
/// page and the page-fault handler's demand-load path need to put content
/// into a frame; everything else only allocates/frees them.
pub trait FrameWriter {
    /// Copy `data` into the frame starting at `offset` bytes in.
    fn write_frame(&mut self, frame: PhysAddr, offset: usize, data: &[u8]);
}

/// Blocking rendezvous primitives the process lifecycle (§4.8) is built on:
/// `exec_handshake` and `wait_handshake` are both single-permit signals
/// implemented in terms of `block_current`/`wake`.
///
/// `Pid` is left generic so this core never has to name the scheduler's own
/// process-identifier type.
pub trait ProcessScheduler<Pid: Copy> {
    /// Block the calling thread until `wake` is called for it.
    fn block_current(&mut self);

    /// Wake the thread blocked on behalf of `pid`, if any.
    fn wake(&mut self, pid: Pid);

    /// Voluntarily give up the CPU without blocking.
    fn yield_now(&mut self);
}
