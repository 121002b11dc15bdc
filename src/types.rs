use libc::pid_t;
use std::fmt;

pub const ANY_PROCESS_ID: pid_t = 0;
pub const ALL_PROCESS_IDS: pid_t = -1;
pub const ANY_THREAD_ID: pid_t = 0;
pub const ALL_THREAD_IDS: pid_t = -1;

/// A 64-bit debuggee address plus a validity flag. Invalid addresses are
/// rejected at every public entry point. On 32-bit debuggees only the low
/// 32 bits are significant; use `masked()` before comparing.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Address {
    value: u64,
    valid: bool,
}

impl Address {
    pub fn new(value: u64) -> Address {
        Address { value, valid: true }
    }

    /// An unset address, distinct from address zero.
    pub fn invalid() -> Address {
        Address {
            value: 0,
            valid: false,
        }
    }

    pub fn is_valid(self) -> bool {
        self.valid
    }

    pub fn value(self) -> u64 {
        self.value
    }

    /// The address truncated to the debuggee pointer width.
    pub fn masked(self, pointer_size: usize) -> u64 {
        if pointer_size == 4 {
            self.value & 0xffff_ffff
        } else {
            self.value
        }
    }

    pub fn clear(&mut self) {
        self.value = 0;
        self.valid = false;
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Address {
        Address::new(value)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.value, f)
    }
}

/// A `(pid, tid)` pair addressing one tracee thread, or a whole process
/// when the tid holds the "any" sentinel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcessThreadId {
    pub pid: pid_t,
    pub tid: pid_t,
}

impl ProcessThreadId {
    pub fn new(pid: pid_t, tid: pid_t) -> ProcessThreadId {
        ProcessThreadId { pid, tid }
    }

    pub fn process(pid: pid_t) -> ProcessThreadId {
        ProcessThreadId {
            pid,
            tid: ANY_THREAD_ID,
        }
    }

    pub fn valid_pid(&self) -> bool {
        self.pid != ANY_PROCESS_ID && self.pid != ALL_PROCESS_IDS
    }

    pub fn valid_tid(&self) -> bool {
        self.tid != ANY_THREAD_ID && self.tid != ALL_THREAD_IDS
    }

    /// At least one concrete field.
    pub fn valid(&self) -> bool {
        self.valid_pid() || self.valid_tid()
    }

    /// The id `wait()`/memory operations should target: the tid when
    /// concrete, the pid otherwise.
    pub fn effective_id(&self) -> pid_t {
        if self.valid_tid() {
            self.tid
        } else {
            self.pid
        }
    }
}

bitflags::bitflags! {
    /// Memory protection of a region or allocation request.
    pub struct Protection: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Protection {
    pub fn to_posix(self) -> i32 {
        let mut prot = libc::PROT_NONE;
        if self.contains(Protection::READ) {
            prot |= libc::PROT_READ;
        }
        if self.contains(Protection::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(Protection::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }

    pub fn from_posix(prot: i32) -> Protection {
        let mut result = Protection::empty();
        if prot & libc::PROT_READ != 0 {
            result |= Protection::READ;
        }
        if prot & libc::PROT_WRITE != 0 {
            result |= Protection::WRITE;
        }
        if prot & libc::PROT_EXEC != 0 {
            result |= Protection::EXECUTE;
        }
        result
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Endian {
    Little,
    Big,
}

/// Static description of a debuggee process, filled from /proc and the
/// ELF identification of its executable.
#[derive(Clone, Debug)]
pub struct ProcessInfo {
    pub pid: pid_t,
    pub parent_pid: pid_t,
    pub name: String,
    pub real_uid: libc::uid_t,
    pub real_gid: libc::gid_t,
    pub effective_uid: libc::uid_t,
    pub effective_gid: libc::gid_t,
    pub arch: crate::arch::CpuArch,
    pub endian: Endian,
    pub pointer_size: usize,
}

impl ProcessInfo {
    pub fn is_32bit(&self) -> bool {
        self.pointer_size == 4
    }
}

/// One entry of the debuggee address-space map.
#[derive(Clone, Debug, Default)]
pub struct MemoryRegionInfo {
    pub start: u64,
    pub length: u64,
    pub protection: u32,
    pub name: String,
    pub backing_file: String,
    pub backing_file_offset: u64,
    pub backing_file_inode: u64,
}

/// A loaded object discovered through the SVR4 link map.
#[derive(Clone, Debug)]
pub struct SharedLibraryInfo {
    pub path: String,
    pub main: bool,
    /// Address the object was mapped at (link_map l_addr).
    pub map_address: u64,
    /// Address of the object's dynamic section.
    pub ld_address: u64,
}

#[derive(Clone, Debug)]
pub struct MappedFileInfo {
    pub path: String,
    pub base_address: u64,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_validity() {
        let a = Address::new(0);
        assert!(a.is_valid());
        assert!(!Address::invalid().is_valid());
        assert_eq!(Address::new(0x1_2345_6789).masked(4), 0x2345_6789);
        assert_eq!(Address::new(0x1_2345_6789).masked(8), 0x1_2345_6789);
    }

    #[test]
    fn ptid_sentinels() {
        assert!(!ProcessThreadId::new(ANY_PROCESS_ID, ANY_THREAD_ID).valid());
        assert!(ProcessThreadId::process(10).valid());
        assert_eq!(ProcessThreadId::process(10).effective_id(), 10);
        assert_eq!(ProcessThreadId::new(10, 12).effective_id(), 12);
        assert!(!ProcessThreadId::new(ALL_PROCESS_IDS, ANY_THREAD_ID).valid());
    }

    #[test]
    fn protection_round_trip() {
        let rw = Protection::READ | Protection::WRITE;
        assert_eq!(rw.to_posix(), libc::PROT_READ | libc::PROT_WRITE);
        assert_eq!(Protection::from_posix(rw.to_posix()), rw);
    }
}
