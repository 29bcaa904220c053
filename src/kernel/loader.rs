// src/kernel/loader.rs
//! Executable loader
//!
//! Parses the little-endian ELF-like executable header, registers
//! each `PT_LOAD` segment as lazy CODE entries in the process's supplemental
//! page table, and builds the eager initial stack page with the argc/argv
//! layout a freshly-`exec`'d program expects.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::constants::{MAX_PHNUM, PAGE_SIZE, PHYS_BASE, STACK_INIT};
use crate::errors::{LoadFailure, ProcessError};
use crate::kernel::core::traits::{FileHandle, FileSystem, FrameWriter, PageDirectory, RawFrameSource};
use crate::kernel::mm::spt::{PageKind, SupplementalPageTable};
use crate::kernel::mm::types::{PhysAddr, VirtAddr};

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const ELF_MAGIC: [u8; 7] = [0x7f, b'E', b'L', b'F', 0x01, 0x01, 0x01];
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const EV_CURRENT: u32 = 1;
const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_INTERP: u32 = 3;
const PT_SHLIB: u32 = 5;
const PF_W: u32 = 2;

/// Outcome of a successful load.
pub struct LoadedProgram {
    pub entry_point: x86_64::VirtAddr,
    pub stack_top: x86_64::VirtAddr,
    /// Physical frame backing the eager stack page, for the caller to add to
    /// the resident-frame list.
    pub stack_frame: PhysAddr,
    /// Handle of the executable, already write-denied. The caller owns this
    /// for the process's lifetime and must `allow_write`+`close` it on exit.
    pub executable: FileHandle,
    /// Executable name (argv[0]), for the process's termination message.
    pub name: String,
}

struct ElfHeader {
    entry: u32,
    phoff: u32,
    phnum: u16,
}

struct ProgramHeader {
    p_type: u32,
    offset: u32,
    vaddr: u32,
    filesz: u32,
    memsz: u32,
    flags: u32,
}

fn split_cmdline(cmdline: &str, max_args: usize) -> Vec<String> {
    cmdline
        .split(' ')
        .filter(|s| !s.is_empty())
        .take(max_args)
        .map(|s| s.to_string())
        .collect()
}

fn parse_ehdr(buf: &[u8; EHDR_SIZE]) -> Result<ElfHeader, ProcessError> {
    if buf[0..7] != ELF_MAGIC {
        return Err(ProcessError::LoadFailed(LoadFailure::BadHeader));
    }
    let e_type = u16::from_le_bytes([buf[16], buf[17]]);
    let e_machine = u16::from_le_bytes([buf[18], buf[19]]);
    let e_version = u32::from_le_bytes(buf[20..24].try_into().unwrap());
    if e_type != ET_EXEC || e_machine != EM_386 || e_version != EV_CURRENT {
        return Err(ProcessError::LoadFailed(LoadFailure::BadHeader));
    }
    let e_entry = u32::from_le_bytes(buf[24..28].try_into().unwrap());
    let e_phoff = u32::from_le_bytes(buf[28..32].try_into().unwrap());
    let e_phnum = u16::from_le_bytes([buf[44], buf[45]]);
    if e_phnum > MAX_PHNUM {
        return Err(ProcessError::LoadFailed(LoadFailure::TooManySegments));
    }
    Ok(ElfHeader { entry: e_entry, phoff: e_phoff, phnum: e_phnum })
}

fn parse_phdr(buf: &[u8; PHDR_SIZE]) -> ProgramHeader {
    ProgramHeader {
        p_type: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        offset: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        vaddr: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
        filesz: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        memsz: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        flags: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
    }
}

fn validate_segment(ph: &ProgramHeader, file_len: u32) -> Result<(), ProcessError> {
    let bad = ProcessError::LoadFailed(LoadFailure::BadSegment);

    if ph.offset % PAGE_SIZE as u32 != ph.vaddr % PAGE_SIZE as u32 {
        return Err(bad);
    }
    if ph.vaddr % PAGE_SIZE as u32 != 0 {
        return Err(bad);
    }
    if ph.offset > file_len {
        return Err(bad);
    }
    if ph.memsz == 0 || ph.memsz < ph.filesz {
        return Err(bad);
    }
    if ph.vaddr < PAGE_SIZE as u32 {
        return Err(bad);
    }
    let end = ph.vaddr.checked_add(ph.memsz).ok_or(bad)?;
    if end as u64 > PHYS_BASE {
        return Err(bad);
    }
    Ok(())
}

/// Register one `PT_LOAD` segment as lazy CODE pages.
///
/// Assumes `p_vaddr` is page-aligned: [`validate_segment`] rejects any
/// segment where it isn't, since the content placement below assumes byte
/// zero of `upage` is byte zero of the segment (Pintos tolerates a sub-page
/// `p_vaddr % PAGE_SIZE` offset by folding it into the page; this loader
/// does not replicate that).
fn register_load_segment(
    spt: &mut SupplementalPageTable,
    handle: FileHandle,
    ph: &ProgramHeader,
) -> Result<(), ProcessError> {
    let writable = ph.flags & PF_W != 0;
    let mut offset = ph.offset;
    let mut vaddr = ph.vaddr;
    let mut remaining_file = ph.filesz;
    let mut remaining_mem = ph.memsz;

    while remaining_mem > 0 {
        let read_bytes = remaining_file.min(PAGE_SIZE as u32);
        let upage = VirtAddr::new(vaddr as usize);
        let created = spt.create(
            upage,
            writable,
            PageKind::Code { file: handle, file_offset: offset, read_bytes },
        );
        if !created {
            return Err(ProcessError::LoadFailed(LoadFailure::BadSegment));
        }
        offset += read_bytes;
        remaining_file -= read_bytes;
        vaddr += PAGE_SIZE as u32;
        remaining_mem = remaining_mem.saturating_sub(PAGE_SIZE as u32);
    }
    Ok(())
}

fn load_segments<F: FileSystem>(
    fs: &mut F,
    handle: FileHandle,
    spt: &mut SupplementalPageTable,
) -> Result<u32, ProcessError> {
    fs.seek(handle, 0);
    let mut ehdr_buf = [0u8; EHDR_SIZE];
    if fs.read(handle, &mut ehdr_buf) != EHDR_SIZE {
        return Err(ProcessError::LoadFailed(LoadFailure::BadHeader));
    }
    let ehdr = parse_ehdr(&ehdr_buf)?;
    let file_len = fs.length(handle);

    for i in 0..ehdr.phnum {
        let phoff = ehdr.phoff + i as u32 * PHDR_SIZE as u32;
        fs.seek(handle, phoff);
        let mut phdr_buf = [0u8; PHDR_SIZE];
        if fs.read(handle, &mut phdr_buf) != PHDR_SIZE {
            return Err(ProcessError::LoadFailed(LoadFailure::BadSegment));
        }
        let ph = parse_phdr(&phdr_buf);

        match ph.p_type {
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => {
                return Err(ProcessError::LoadFailed(LoadFailure::UnsupportedSegment));
            }
            PT_LOAD => {
                validate_segment(&ph, file_len)?;
                register_load_segment(spt, handle, &ph)?;
            }
            _ => {}
        }
    }

    Ok(ehdr.entry)
}

/// Build the eager initial stack page: argument strings top-down,
/// 4-byte alignment, a NUL `argv[argc]` sentinel, pointers right-to-left,
/// `argv`, `argc`, and a zero return address.
fn build_initial_stack<A, D>(
    args: &[String],
    spt: &mut SupplementalPageTable,
    frames: &mut A,
    page_dir: &mut D,
) -> Result<(u32, PhysAddr), ProcessError>
where
    A: RawFrameSource + FrameWriter,
    D: PageDirectory,
{
    let mut buf = [0u8; PAGE_SIZE];
    let mut sp: usize = PAGE_SIZE;

    let mut arg_addrs = Vec::with_capacity(args.len());
    for arg in args.iter().rev() {
        let bytes = arg.as_bytes();
        sp -= bytes.len() + 1;
        buf[sp..sp + bytes.len()].copy_from_slice(bytes);
        buf[sp + bytes.len()] = 0;
        arg_addrs.push(STACK_INIT as u32 + sp as u32);
    }
    arg_addrs.reverse();

    sp &= !0x3;

    sp -= 4;
    buf[sp..sp + 4].copy_from_slice(&0u32.to_le_bytes());

    for &addr in arg_addrs.iter().rev() {
        sp -= 4;
        buf[sp..sp + 4].copy_from_slice(&addr.to_le_bytes());
    }

    let argv_ptr = STACK_INIT as u32 + sp as u32;
    sp -= 4;
    buf[sp..sp + 4].copy_from_slice(&argv_ptr.to_le_bytes());

    let argc = args.len() as u32;
    sp -= 4;
    buf[sp..sp + 4].copy_from_slice(&argc.to_le_bytes());

    sp -= 4;
    buf[sp..sp + 4].copy_from_slice(&0u32.to_le_bytes());

    let frame = frames.frame_alloc().ok_or(ProcessError::OutOfFrames)?;
    frames.write_frame(frame, 0, &buf);

    let stack_page = VirtAddr::new(STACK_INIT as usize);
    if !page_dir.install(stack_page, frame, true) {
        frames.frame_dealloc(frame);
        return Err(ProcessError::OutOfFrames);
    }

    spt.create(stack_page, true, PageKind::Stack);
    if let Some(desc) = spt.find_mut(stack_page) {
        desc.frame = Some(frame);
    }

    Ok((STACK_INIT as u32 + sp as u32, frame))
}

/// Load `cmdline`'s executable (token 0 is the name, the rest is argv) into
/// a fresh address space. On any failure the executable's write-deny is
/// released and the handle closed before returning.
pub fn load_executable<F, A, D>(
    cmdline: &str,
    fs: &mut F,
    spt: &mut SupplementalPageTable,
    frames: &mut A,
    page_dir: &mut D,
) -> Result<LoadedProgram, ProcessError>
where
    F: FileSystem,
    A: RawFrameSource + FrameWriter,
    D: PageDirectory,
{
    let args = split_cmdline(cmdline, crate::constants::MAX_ARGS);
    let name = args.first().cloned().unwrap_or_default();

    let handle = fs.open(&name).ok_or(ProcessError::LoadFailed(LoadFailure::OpenFailed))?;
    fs.deny_write(handle);

    let entry = match load_segments(fs, handle, spt) {
        Ok(entry) => entry,
        Err(e) => {
            fs.allow_write(handle);
            fs.close(handle);
            return Err(e);
        }
    };

    let (stack_top, stack_frame) = match build_initial_stack(&args, spt, frames, page_dir) {
        Ok(v) => v,
        Err(e) => {
            fs.allow_write(handle);
            fs.close(handle);
            return Err(e);
        }
    };

    Ok(LoadedProgram {
        entry_point: x86_64::VirtAddr::new(entry as u64),
        stack_top: x86_64::VirtAddr::new(stack_top as u64),
        stack_frame,
        executable: handle,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::fs::MemFileSystem;
    use alloc::vec;

    struct FakeFrameSource {
        next: usize,
        pages: alloc::collections::BTreeMap<usize, [u8; PAGE_SIZE]>,
    }

    impl FakeFrameSource {
        fn new() -> Self {
            Self { next: 0x1000, pages: alloc::collections::BTreeMap::new() }
        }
    }

    impl RawFrameSource for FakeFrameSource {
        fn frame_alloc(&mut self) -> Option<PhysAddr> {
            let addr = self.next;
            self.next += PAGE_SIZE;
            self.pages.insert(addr, [0u8; PAGE_SIZE]);
            Some(PhysAddr::new(addr))
        }

        fn frame_dealloc(&mut self, frame: PhysAddr) {
            self.pages.remove(&(frame.as_u64() as usize));
        }
    }

    impl FrameWriter for FakeFrameSource {
        fn write_frame(&mut self, frame: PhysAddr, offset: usize, data: &[u8]) {
            if let Some(page) = self.pages.get_mut(&(frame.as_u64() as usize)) {
                page[offset..offset + data.len()].copy_from_slice(data);
            }
        }
    }

    struct FakePageDirectory {
        installs: Vec<(VirtAddr, PhysAddr)>,
    }

    impl FakePageDirectory {
        fn new() -> Self {
            Self { installs: Vec::new() }
        }
    }

    impl PageDirectory for FakePageDirectory {
        fn install(&mut self, upage: VirtAddr, frame: PhysAddr, _writable: bool) -> bool {
            self.installs.push((upage, frame));
            true
        }
        fn invalidate(&mut self, _upage: VirtAddr) {}
        fn translate(&self, upage: VirtAddr) -> Option<PhysAddr> {
            self.installs.iter().find(|(u, _)| *u == upage).map(|(_, f)| *f)
        }
        fn activate(&self) {}
    }

    fn make_elf(entry: u32, segments: &[(u32, u32, u32, u32, u32)]) -> Vec<u8> {
        // segments: (p_type, offset, vaddr, filesz, memsz), flags fixed writable-false except noted via p_type high bit trick not used here
        let phnum = segments.len() as u16;
        let phoff = EHDR_SIZE as u32;
        let mut buf = vec![0u8; EHDR_SIZE + segments.len() * PHDR_SIZE];
        buf[0..7].copy_from_slice(&ELF_MAGIC);
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_386.to_le_bytes());
        buf[20..24].copy_from_slice(&EV_CURRENT.to_le_bytes());
        buf[24..28].copy_from_slice(&entry.to_le_bytes());
        buf[28..32].copy_from_slice(&phoff.to_le_bytes());
        buf[44..46].copy_from_slice(&phnum.to_le_bytes());

        for (i, &(p_type, offset, vaddr, filesz, memsz)) in segments.iter().enumerate() {
            let base = EHDR_SIZE + i * PHDR_SIZE;
            buf[base..base + 4].copy_from_slice(&p_type.to_le_bytes());
            buf[base + 4..base + 8].copy_from_slice(&offset.to_le_bytes());
            buf[base + 8..base + 12].copy_from_slice(&vaddr.to_le_bytes());
            buf[base + 16..base + 20].copy_from_slice(&filesz.to_le_bytes());
            buf[base + 20..base + 24].copy_from_slice(&memsz.to_le_bytes());
            buf[base + 24..base + 28].copy_from_slice(&PF_W.to_le_bytes());
        }
        buf
    }

    #[test]
    fn rejects_missing_executable() {
        let mut fs = MemFileSystem::new();
        let mut spt = SupplementalPageTable::new();
        let mut frames = FakeFrameSource::new();
        let mut dir = FakePageDirectory::new();
        let err = load_executable("no-such-file", &mut fs, &mut spt, &mut frames, &mut dir).unwrap_err();
        assert_eq!(err, ProcessError::LoadFailed(LoadFailure::OpenFailed));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut fs = MemFileSystem::new();
        fs.seed("bad", vec![0u8; 64]);
        let mut spt = SupplementalPageTable::new();
        let mut frames = FakeFrameSource::new();
        let mut dir = FakePageDirectory::new();
        let err = load_executable("bad", &mut fs, &mut spt, &mut frames, &mut dir).unwrap_err();
        assert_eq!(err, ProcessError::LoadFailed(LoadFailure::BadHeader));
    }

    #[test]
    fn rejects_dynamic_segment() {
        let mut fs = MemFileSystem::new();
        let elf = make_elf(PAGE_SIZE as u32, &[(PT_DYNAMIC, 0, PAGE_SIZE as u32, 0, PAGE_SIZE as u32)]);
        fs.seed("dyn", elf);
        let mut spt = SupplementalPageTable::new();
        let mut frames = FakeFrameSource::new();
        let mut dir = FakePageDirectory::new();
        let err = load_executable("dyn", &mut fs, &mut spt, &mut frames, &mut dir).unwrap_err();
        assert_eq!(err, ProcessError::LoadFailed(LoadFailure::UnsupportedSegment));
    }

    #[test]
    fn loads_single_code_page_and_builds_stack() {
        let mut fs = MemFileSystem::new();
        let code_off = EHDR_SIZE as u32 + PHDR_SIZE as u32;
        let entry = PAGE_SIZE as u32;
        let mut elf = make_elf(entry, &[(PT_LOAD, code_off, PAGE_SIZE as u32, 16, PAGE_SIZE as u32)]);
        elf.extend(vec![0xAAu8; 16]);
        fs.seed("prog", elf);

        let mut spt = SupplementalPageTable::new();
        let mut frames = FakeFrameSource::new();
        let mut dir = FakePageDirectory::new();

        let loaded =
            load_executable("prog argone", &mut fs, &mut spt, &mut frames, &mut dir).unwrap();

        assert_eq!(loaded.entry_point.as_u64(), entry as u64);
        assert_eq!(loaded.name, "prog");
        assert!(spt.contains(VirtAddr::new(PAGE_SIZE)));
        let code_desc = spt.find(VirtAddr::new(PAGE_SIZE)).unwrap();
        assert!(matches!(code_desc.kind, PageKind::Code { read_bytes: 16, .. }));

        let stack_page = VirtAddr::new(STACK_INIT as usize);
        let stack_desc = spt.find(stack_page).unwrap();
        assert!(stack_desc.frame.is_some());
        assert!(loaded.stack_top.as_u64() < STACK_INIT + PAGE_SIZE as u64);
    }

    #[test]
    fn unseekable_segment_offset_is_rejected() {
        let mut fs = MemFileSystem::new();
        // offset/vaddr page-offset mismatch: offset=1, vaddr page-aligned.
        let elf = make_elf(PAGE_SIZE as u32, &[(PT_LOAD, 1, PAGE_SIZE as u32, 4, PAGE_SIZE as u32)]);
        fs.seed("mis", elf);
        let mut spt = SupplementalPageTable::new();
        let mut frames = FakeFrameSource::new();
        let mut dir = FakePageDirectory::new();
        let err = load_executable("mis", &mut fs, &mut spt, &mut frames, &mut dir).unwrap_err();
        assert_eq!(err, ProcessError::LoadFailed(LoadFailure::BadSegment));
    }
}
