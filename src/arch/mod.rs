pub mod arm;
pub mod arm64;
pub mod cpu_state;
pub mod registers;
pub mod x86;
pub mod x86_64;

pub use cpu_state::CpuState;

/// Debuggee instruction-set architecture. A 64-bit engine may be driving a
/// 32-bit process; that distinction lives in [`CpuState`], not here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CpuArch {
    Arm,
    Arm64,
    X86,
    X64,
}

impl CpuArch {
    /// The architecture this engine itself was compiled for.
    pub fn native() -> CpuArch {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                CpuArch::X64
            } else if #[cfg(target_arch = "x86")] {
                CpuArch::X86
            } else if #[cfg(target_arch = "aarch64")] {
                CpuArch::Arm64
            } else if #[cfg(target_arch = "arm")] {
                CpuArch::Arm
            } else {
                compile_error!("unsupported host architecture")
            }
        }
    }

    /// Whether an exec-mode breakpoint of `size` bytes is legal. The ARM
    /// size 3 is the GDB convention for a 4-byte Thumb-2 opcode.
    pub fn valid_breakpoint_size(self, size: usize) -> bool {
        match self {
            CpuArch::X86 | CpuArch::X64 => size == 1,
            CpuArch::Arm => (2..=4).contains(&size),
            CpuArch::Arm64 => size == 4,
        }
    }

    /// Size a caller should use for an exec breakpoint when the
    /// architecture has a single answer. On ARM the caller must supply the
    /// size (or let the software manager discover it from CPSR.T).
    pub fn preferred_breakpoint_size(self) -> Option<usize> {
        match self {
            CpuArch::X86 | CpuArch::X64 => Some(1),
            CpuArch::Arm64 => Some(4),
            CpuArch::Arm => None,
        }
    }

    /// Number of bytes the CPU advances PC past a software trap before the
    /// stop is reported; `hit()` rewinds by this much before the site
    /// lookup.
    pub fn breakpoint_pc_adjustment(self) -> u64 {
        match self {
            // int3 leaves PC after the trap byte.
            CpuArch::X86 | CpuArch::X64 => 1,
            // udf/brk report PC at the faulting instruction.
            CpuArch::Arm | CpuArch::Arm64 => 0,
        }
    }

    /// Whether the kernel honors PTRACE_SINGLESTEP on this architecture.
    pub fn has_hardware_single_step(self) -> bool {
        match self {
            CpuArch::X86 | CpuArch::X64 | CpuArch::Arm64 => true,
            CpuArch::Arm => false,
        }
    }

    /// Trap opcode bytes for an exec breakpoint of `size`, in target
    /// (little-endian) memory order. Returns `None` for sizes
    /// `valid_breakpoint_size` rejects.
    pub fn trap_opcode(self, size: usize) -> Option<&'static [u8]> {
        match (self, size) {
            // int3
            (CpuArch::X86, 1) | (CpuArch::X64, 1) => Some(&[0xcc]),
            // udf #1
            (CpuArch::Arm, 2) => Some(&[0x01, 0xde]),
            // udf.w #0, a 2x16-bit Thumb-2 word
            (CpuArch::Arm, 3) => Some(&[0xf0, 0xf7, 0x00, 0xa0]),
            // udf #16
            (CpuArch::Arm, 4) => Some(&[0xf0, 0x01, 0xf0, 0xe7]),
            // brk #0
            (CpuArch::Arm64, 4) => Some(&[0x00, 0x00, 0x20, 0xd4]),
            _ => None,
        }
    }

    /// Bytes actually written to the instruction stream for a breakpoint
    /// of `size`; differs from `size` only for the ARM "3" encoding.
    pub fn trap_length(self, size: usize) -> usize {
        self.trap_opcode(size).map(<[u8]>::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoint_sizes() {
        assert!(CpuArch::X64.valid_breakpoint_size(1));
        assert!(!CpuArch::X64.valid_breakpoint_size(4));
        assert!(CpuArch::Arm.valid_breakpoint_size(3));
        assert!(!CpuArch::Arm.valid_breakpoint_size(1));
        assert!(CpuArch::Arm64.valid_breakpoint_size(4));
    }

    #[test]
    fn trap_opcodes() {
        assert_eq!(CpuArch::X64.trap_opcode(1), Some(&[0xcc][..]));
        // The ARM size-3 convention expands to the 4-byte udf.w encoding.
        assert_eq!(CpuArch::Arm.trap_length(3), 4);
        assert_eq!(CpuArch::Arm.trap_length(2), 2);
        assert_eq!(CpuArch::Arm64.trap_opcode(4), Some(&[0x00, 0x00, 0x20, 0xd4][..]));
        assert_eq!(CpuArch::Arm.trap_opcode(1), None);
    }
}
