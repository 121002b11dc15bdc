//! Linux views of the debuggee: /proc parsing, the auxiliary vector, and
//! the SVR4 link-map walk through tracee memory.

use crate::arch::CpuArch;
use crate::error::{ErrorCode, Result};
use crate::memory::TraceeMemory;
use crate::types::{
    Endian, MappedFileInfo, MemoryRegionInfo, ProcessInfo, Protection, SharedLibraryInfo,
};
use goblin::elf::Elf;
use libc::pid_t;
use std::fs;
use std::path::PathBuf;

pub const AT_PHDR: u64 = 3;
pub const AT_PHENT: u64 = 4;
pub const AT_PHNUM: u64 = 5;
pub const AT_ENTRY: u64 = 9;

const DT_NULL: u64 = 0;
const DT_DEBUG: u64 = 21;

fn proc_path(pid: pid_t, entry: &str) -> PathBuf {
    PathBuf::from(format!("/proc/{}/{}", pid, entry))
}

/// Describe the process from /proc and the ELF identification of its
/// executable.
pub fn process_info(pid: pid_t) -> Result<ProcessInfo> {
    let exe =
        fs::read(proc_path(pid, "exe")).map_err(|_| ErrorCode::ProcessNotFound)?;
    let elf = Elf::parse(&exe).map_err(|_| ErrorCode::Unsupported)?;

    let arch = match elf.header.e_machine {
        goblin::elf::header::EM_386 => CpuArch::X86,
        goblin::elf::header::EM_X86_64 => CpuArch::X64,
        goblin::elf::header::EM_ARM => CpuArch::Arm,
        goblin::elf::header::EM_AARCH64 => CpuArch::Arm64,
        _ => return Err(ErrorCode::Unsupported),
    };

    let name = fs::read_to_string(proc_path(pid, "comm"))
        .map(|s| s.trim_end().to_string())
        .unwrap_or_default();

    let mut parent_pid = 0;
    let mut real_uid = 0;
    let mut real_gid = 0;
    let mut effective_uid = 0;
    let mut effective_gid = 0;
    if let Ok(status) = fs::read_to_string(proc_path(pid, "status")) {
        for line in status.lines() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("PPid:") => {
                    parent_pid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0)
                }
                Some("Uid:") => {
                    real_uid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    effective_uid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(real_uid);
                }
                Some("Gid:") => {
                    real_gid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    effective_gid = fields.next().and_then(|v| v.parse().ok()).unwrap_or(real_gid);
                }
                _ => {}
            }
        }
    }

    Ok(ProcessInfo {
        pid,
        parent_pid,
        name,
        real_uid,
        real_gid,
        effective_uid,
        effective_gid,
        arch,
        endian: if elf.little_endian {
            Endian::Little
        } else {
            Endian::Big
        },
        pointer_size: if elf.is_64 { 8 } else { 4 },
    })
}

/// The raw auxiliary vector of the process.
pub fn auxiliary_vector(pid: pid_t) -> Result<Vec<u8>> {
    fs::read(proc_path(pid, "auxv")).map_err(|_| ErrorCode::ProcessNotFound)
}

/// Look one entry up in a raw auxiliary vector.
pub fn auxiliary_vector_value(auxv: &[u8], at_type: u64, pointer_size: usize) -> Option<u64> {
    let read_word = |offset: usize| -> Option<u64> {
        if pointer_size == 8 {
            let bytes = auxv.get(offset..offset + 8)?;
            let mut word = [0u8; 8];
            word.copy_from_slice(bytes);
            Some(u64::from_le_bytes(word))
        } else {
            let bytes = auxv.get(offset..offset + 4)?;
            let mut word = [0u8; 4];
            word.copy_from_slice(bytes);
            Some(u64::from(u32::from_le_bytes(word)))
        }
    };

    let mut offset = 0;
    loop {
        let tag = read_word(offset)?;
        let value = read_word(offset + pointer_size)?;
        if tag == 0 {
            return None;
        }
        if tag == at_type {
            return Some(value);
        }
        offset += 2 * pointer_size;
    }
}

fn parse_maps_line(line: &str) -> Option<MemoryRegionInfo> {
    // start-end perms offset dev inode [path]
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let inode = fields.next()?;
    let path = fields.next().unwrap_or("");

    let mut range = range.splitn(2, '-');
    let start = u64::from_str_radix(range.next()?, 16).ok()?;
    let end = u64::from_str_radix(range.next()?, 16).ok()?;

    let mut protection = Protection::empty();
    let perms = perms.as_bytes();
    if perms.get(0) == Some(&b'r') {
        protection |= Protection::READ;
    }
    if perms.get(1) == Some(&b'w') {
        protection |= Protection::WRITE;
    }
    if perms.get(2) == Some(&b'x') {
        protection |= Protection::EXECUTE;
    }

    Some(MemoryRegionInfo {
        start,
        length: end - start,
        protection: protection.bits(),
        name: path.to_string(),
        backing_file: if path.starts_with('/') {
            path.to_string()
        } else {
            String::new()
        },
        backing_file_offset: u64::from_str_radix(offset, 16).unwrap_or(0),
        backing_file_inode: inode.parse().unwrap_or(0),
    })
}

/// The mapping containing `address`, from /proc/pid/maps.
pub fn memory_region_info(pid: pid_t, address: u64) -> Result<MemoryRegionInfo> {
    let maps =
        fs::read_to_string(proc_path(pid, "maps")).map_err(|_| ErrorCode::ProcessNotFound)?;
    for line in maps.lines() {
        if let Some(region) = parse_maps_line(line) {
            if address >= region.start && address < region.start + region.length {
                return Ok(region);
            }
        }
    }
    Err(ErrorCode::NotFound)
}

/// Every file-backed mapping, one callback per file with its lowest base
/// and total extent.
pub fn enumerate_mapped_files(
    pid: pid_t,
    mut cb: impl FnMut(&MappedFileInfo),
) -> Result<()> {
    let maps =
        fs::read_to_string(proc_path(pid, "maps")).map_err(|_| ErrorCode::ProcessNotFound)?;

    let mut current: Option<MappedFileInfo> = None;
    for line in maps.lines() {
        let region = match parse_maps_line(line) {
            Some(region) => region,
            None => continue,
        };
        if region.backing_file.is_empty() {
            continue;
        }

        match current.as_mut() {
            Some(file) if file.path == region.backing_file => {
                file.size = region.start + region.length - file.base_address;
            }
            _ => {
                if let Some(file) = current.take() {
                    cb(&file);
                }
                current = Some(MappedFileInfo {
                    path: region.backing_file.clone(),
                    base_address: region.start,
                    size: region.length,
                });
            }
        }
    }
    if let Some(file) = current.take() {
        cb(&file);
    }
    Ok(())
}

/// Thread ids of the process. The set may be changing underneath the
/// reader; callers iterate until it stabilizes.
pub fn thread_ids(pid: pid_t) -> Result<Vec<pid_t>> {
    let mut tids = Vec::new();
    let entries =
        fs::read_dir(proc_path(pid, "task")).map_err(|_| ErrorCode::ProcessNotFound)?;
    for entry in entries.flatten() {
        if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
            tids.push(tid);
        }
    }
    tids.sort_unstable();
    Ok(tids)
}

/// CPU the thread last ran on, from /proc/pid/task/tid/stat.
pub fn thread_core(pid: pid_t, tid: pid_t) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{}/task/{}/stat", pid, tid)).ok()?;
    // The comm field may contain spaces; skip past its closing paren.
    let rest = &stat[stat.rfind(')')? + 2..];
    // Field 39 (task_cpu) counted from field 3 (state).
    rest.split_whitespace().nth(36)?.parse().ok()
}

fn read_pointer(mem: &dyn TraceeMemory, address: u64, pointer_size: usize) -> Result<u64> {
    if pointer_size == 8 {
        mem.read_u64(address)
    } else {
        Ok(u64::from(mem.read_u32(address)?))
    }
}

fn read_c_string(mem: &dyn TraceeMemory, address: u64) -> Result<String> {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 64];
    let mut offset = 0u64;
    while collected.len() < 4096 {
        mem.read_exact(address + offset, &mut chunk)?;
        match memchr::memchr(0, &chunk) {
            Some(nul) => {
                collected.extend_from_slice(&chunk[..nul]);
                return Ok(String::from_utf8_lossy(&collected).into_owned());
            }
            None => collected.extend_from_slice(&chunk),
        }
        offset += chunk.len() as u64;
    }
    Err(ErrorCode::NameTooLong)
}

/// Walk the dynamic linker's link map and report every loaded object.
///
/// The map is found through DT_DEBUG: the executable's program headers
/// locate the dynamic section (rebased by the load bias from AT_PHDR),
/// whose DT_DEBUG entry the linker points at its `r_debug` structure.
pub fn enumerate_shared_libraries(
    pid: pid_t,
    mem: &dyn TraceeMemory,
    pointer_size: usize,
    mut cb: impl FnMut(&SharedLibraryInfo),
) -> Result<()> {
    let exe = fs::read(proc_path(pid, "exe")).map_err(|_| ErrorCode::ProcessNotFound)?;
    let elf = Elf::parse(&exe).map_err(|_| ErrorCode::Unsupported)?;

    let auxv = auxiliary_vector(pid)?;
    let phdr_addr =
        auxiliary_vector_value(&auxv, AT_PHDR, pointer_size).ok_or(ErrorCode::NotFound)?;

    let mut phdr_vaddr = None;
    let mut dynamic_vaddr = None;
    for ph in &elf.program_headers {
        match ph.p_type {
            goblin::elf::program_header::PT_PHDR => phdr_vaddr = Some(ph.p_vaddr),
            goblin::elf::program_header::PT_DYNAMIC => dynamic_vaddr = Some(ph.p_vaddr),
            _ => {}
        }
    }
    let dynamic_vaddr = dynamic_vaddr.ok_or(ErrorCode::NotFound)?;
    // Statically linked executables have no linker and no link map.
    let bias = phdr_addr.wrapping_sub(phdr_vaddr.unwrap_or(phdr_addr));
    let dynamic_addr = bias.wrapping_add(dynamic_vaddr);

    // Scan the in-memory dynamic section for DT_DEBUG.
    let mut r_debug_addr = 0;
    let mut entry = dynamic_addr;
    loop {
        let tag = read_pointer(mem, entry, pointer_size)?;
        let value = read_pointer(mem, entry + pointer_size as u64, pointer_size)?;
        if tag == DT_NULL {
            break;
        }
        if tag == DT_DEBUG {
            r_debug_addr = value;
            break;
        }
        entry += 2 * pointer_size as u64;
    }
    if r_debug_addr == 0 {
        return Err(ErrorCode::NotFound);
    }

    // r_debug: version word, then the head of the link map.
    let mut link_map = read_pointer(mem, r_debug_addr + pointer_size as u64, pointer_size)?;

    let ws = pointer_size as u64;
    let mut main = true;
    while link_map != 0 {
        let l_addr = read_pointer(mem, link_map, pointer_size)?;
        let l_name = read_pointer(mem, link_map + ws, pointer_size)?;
        let l_ld = read_pointer(mem, link_map + 2 * ws, pointer_size)?;
        let l_next = read_pointer(mem, link_map + 3 * ws, pointer_size)?;

        let path = if l_name != 0 {
            read_c_string(mem, l_name).unwrap_or_default()
        } else {
            String::new()
        };

        cb(&SharedLibraryInfo {
            path,
            main,
            map_address: l_addr,
            ld_address: l_ld,
        });

        main = false;
        link_map = l_next;
    }

    Ok(())
}
