//! Static register descriptions handed to the protocol layer, which turns
//! them into the XML (GDB) or qRegisterInfo (LLDB) register catalogs. The
//! `regno` values here are the ones the [`CpuState`](super::CpuState)
//! register views accept.

use crate::arch::CpuArch;

#[derive(Copy, Clone, Debug)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub regno: u32,
    pub bit_size: u32,
    /// Semantic role, when one exists: "pc", "sp", "fp", "flags", "arg1"…
    pub generic: Option<&'static str>,
}

const fn reg(name: &'static str, regno: u32, bit_size: u32) -> RegisterDescriptor {
    RegisterDescriptor {
        name,
        regno,
        bit_size,
        generic: None,
    }
}

const fn greg(
    name: &'static str,
    regno: u32,
    bit_size: u32,
    generic: &'static str,
) -> RegisterDescriptor {
    RegisterDescriptor {
        name,
        regno,
        bit_size,
        generic: Some(generic),
    }
}

pub static ARM_GDB: &[RegisterDescriptor] = &[
    reg("r0", 0, 32),
    reg("r1", 1, 32),
    reg("r2", 2, 32),
    reg("r3", 3, 32),
    reg("r4", 4, 32),
    reg("r5", 5, 32),
    reg("r6", 6, 32),
    reg("r7", 7, 32),
    reg("r8", 8, 32),
    reg("r9", 9, 32),
    reg("r10", 10, 32),
    reg("r11", 11, 32),
    reg("r12", 12, 32),
    greg("sp", 13, 32, "sp"),
    greg("lr", 14, 32, "ra"),
    greg("pc", 15, 32, "pc"),
    greg("cpsr", 25, 32, "flags"),
];

pub static ARM_LLDB: &[RegisterDescriptor] = &[
    reg("r0", 0, 32),
    reg("r1", 1, 32),
    reg("r2", 2, 32),
    reg("r3", 3, 32),
    reg("r4", 4, 32),
    reg("r5", 5, 32),
    reg("r6", 6, 32),
    reg("r7", 7, 32),
    reg("r8", 8, 32),
    reg("r9", 9, 32),
    reg("r10", 10, 32),
    reg("r11", 11, 32),
    reg("r12", 12, 32),
    greg("sp", 13, 32, "sp"),
    greg("lr", 14, 32, "ra"),
    greg("pc", 15, 32, "pc"),
    greg("cpsr", 16, 32, "flags"),
    reg("d0", 17, 64),
    reg("d1", 18, 64),
    reg("d2", 19, 64),
    reg("d3", 20, 64),
    reg("d4", 21, 64),
    reg("d5", 22, 64),
    reg("d6", 23, 64),
    reg("d7", 24, 64),
    reg("d8", 25, 64),
    reg("d9", 26, 64),
    reg("d10", 27, 64),
    reg("d11", 28, 64),
    reg("d12", 29, 64),
    reg("d13", 30, 64),
    reg("d14", 31, 64),
    reg("d15", 32, 64),
    reg("d16", 33, 64),
    reg("d17", 34, 64),
    reg("d18", 35, 64),
    reg("d19", 36, 64),
    reg("d20", 37, 64),
    reg("d21", 38, 64),
    reg("d22", 39, 64),
    reg("d23", 40, 64),
    reg("d24", 41, 64),
    reg("d25", 42, 64),
    reg("d26", 43, 64),
    reg("d27", 44, 64),
    reg("d28", 45, 64),
    reg("d29", 46, 64),
    reg("d30", 47, 64),
    reg("d31", 48, 64),
    reg("fpscr", 49, 32),
];

pub static ARM64: &[RegisterDescriptor] = &[
    reg("x0", 0, 64),
    reg("x1", 1, 64),
    reg("x2", 2, 64),
    reg("x3", 3, 64),
    reg("x4", 4, 64),
    reg("x5", 5, 64),
    reg("x6", 6, 64),
    reg("x7", 7, 64),
    reg("x8", 8, 64),
    reg("x9", 9, 64),
    reg("x10", 10, 64),
    reg("x11", 11, 64),
    reg("x12", 12, 64),
    reg("x13", 13, 64),
    reg("x14", 14, 64),
    reg("x15", 15, 64),
    reg("x16", 16, 64),
    reg("x17", 17, 64),
    reg("x18", 18, 64),
    reg("x19", 19, 64),
    reg("x20", 20, 64),
    reg("x21", 21, 64),
    reg("x22", 22, 64),
    reg("x23", 23, 64),
    reg("x24", 24, 64),
    reg("x25", 25, 64),
    reg("x26", 26, 64),
    reg("x27", 27, 64),
    reg("x28", 28, 64),
    greg("x29", 29, 64, "fp"),
    greg("x30", 30, 64, "ra"),
    greg("sp", 31, 64, "sp"),
    greg("pc", 32, 64, "pc"),
    greg("cpsr", 33, 32, "flags"),
];

pub static X86_GDB: &[RegisterDescriptor] = &[
    reg("eax", 0, 32),
    reg("ecx", 1, 32),
    reg("edx", 2, 32),
    reg("ebx", 3, 32),
    greg("esp", 4, 32, "sp"),
    greg("ebp", 5, 32, "fp"),
    reg("esi", 6, 32),
    reg("edi", 7, 32),
    greg("eip", 8, 32, "pc"),
    greg("eflags", 9, 32, "flags"),
    reg("cs", 10, 32),
    reg("ss", 11, 32),
    reg("ds", 12, 32),
    reg("es", 13, 32),
    reg("fs", 14, 32),
    reg("gs", 15, 32),
];

pub static X64_GDB: &[RegisterDescriptor] = &[
    reg("rax", 0, 64),
    reg("rbx", 1, 64),
    reg("rcx", 2, 64),
    reg("rdx", 3, 64),
    reg("rsi", 4, 64),
    reg("rdi", 5, 64),
    greg("rbp", 6, 64, "fp"),
    greg("rsp", 7, 64, "sp"),
    reg("r8", 8, 64),
    reg("r9", 9, 64),
    reg("r10", 10, 64),
    reg("r11", 11, 64),
    reg("r12", 12, 64),
    reg("r13", 13, 64),
    reg("r14", 14, 64),
    reg("r15", 15, 64),
    greg("rip", 16, 64, "pc"),
    greg("eflags", 17, 64, "flags"),
    reg("cs", 18, 32),
    reg("ss", 19, 32),
    reg("ds", 20, 32),
    reg("es", 21, 32),
    reg("fs", 22, 32),
    reg("gs", 23, 32),
];

/// The GDB catalog for an architecture (32-bit variant for compat
/// processes).
pub fn gdb_descriptor(arch: CpuArch, is_32bit: bool) -> &'static [RegisterDescriptor] {
    match (arch, is_32bit) {
        (CpuArch::Arm, _) | (CpuArch::Arm64, true) => ARM_GDB,
        (CpuArch::Arm64, false) => ARM64,
        (CpuArch::X86, _) | (CpuArch::X64, true) => X86_GDB,
        (CpuArch::X64, false) => X64_GDB,
    }
}

pub fn lldb_descriptor(arch: CpuArch, is_32bit: bool) -> &'static [RegisterDescriptor] {
    match (arch, is_32bit) {
        (CpuArch::Arm, _) | (CpuArch::Arm64, true) => ARM_LLDB,
        (CpuArch::Arm64, false) => ARM64,
        (CpuArch::X86, _) | (CpuArch::X64, true) => X86_GDB,
        (CpuArch::X64, false) => X64_GDB,
    }
}
