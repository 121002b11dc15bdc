use crate::arch::arm::ArmState;
use crate::arch::arm64::Arm64State;
use crate::arch::x86::X86State;
use crate::arch::x86_64::X64State;
use crate::arch::CpuArch;

/// View an integer register field as its in-place little-endian bytes.
/// The protocol layer reads and writes individual registers through these
/// slices without reinterpretation.
pub(crate) fn bytes_of<T: Copy>(value: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}

pub(crate) fn bytes_of_mut<T: Copy>(value: &mut T) -> &mut [u8] {
    unsafe { std::slice::from_raw_parts_mut(value as *mut T as *mut u8, std::mem::size_of::<T>()) }
}

/// Architecture-tagged register snapshot.
///
/// The `Arm64A32` and `X64Compat32` variants carry the 32-bit register file
/// of a compat-mode process running under a 64-bit kernel; the backend
/// translates to and from the 64-bit kernel structures.
#[derive(Clone, Debug)]
pub enum CpuState {
    Arm(ArmState),
    Arm64A32(ArmState),
    Arm64(Arm64State),
    X86(X86State),
    X64Compat32(X86State),
    X64(X64State),
}

impl CpuState {
    /// A zeroed state of the right shape for `(arch, is_32bit)`.
    pub fn new(arch: CpuArch, is_32bit: bool) -> CpuState {
        match (arch, is_32bit) {
            (CpuArch::Arm, _) => CpuState::Arm(ArmState::new()),
            (CpuArch::Arm64, true) => CpuState::Arm64A32(ArmState::new()),
            (CpuArch::Arm64, false) => CpuState::Arm64(Arm64State::new()),
            (CpuArch::X86, _) => CpuState::X86(X86State::new()),
            (CpuArch::X64, true) => CpuState::X64Compat32(X86State::new()),
            (CpuArch::X64, false) => CpuState::X64(X64State::new()),
        }
    }

    pub fn arch(&self) -> CpuArch {
        match self {
            CpuState::Arm(_) => CpuArch::Arm,
            CpuState::Arm64A32(_) | CpuState::Arm64(_) => CpuArch::Arm64,
            CpuState::X86(_) => CpuArch::X86,
            CpuState::X64Compat32(_) | CpuState::X64(_) => CpuArch::X64,
        }
    }

    /// The architecture whose instruction set the thread is executing,
    /// i.e. compat variants report the 32-bit one.
    pub fn exec_arch(&self) -> CpuArch {
        match self {
            CpuState::Arm(_) | CpuState::Arm64A32(_) => CpuArch::Arm,
            CpuState::Arm64(_) => CpuArch::Arm64,
            CpuState::X86(_) | CpuState::X64Compat32(_) => CpuArch::X86,
            CpuState::X64(_) => CpuArch::X64,
        }
    }

    pub fn is_32bit(&self) -> bool {
        match self {
            CpuState::Arm(_)
            | CpuState::Arm64A32(_)
            | CpuState::X86(_)
            | CpuState::X64Compat32(_) => true,
            CpuState::Arm64(_) | CpuState::X64(_) => false,
        }
    }

    /// Zero every register, keeping the variant.
    pub fn clear(&mut self) {
        *self = CpuState::new(self.arch(), self.is_32bit());
    }

    pub fn pc(&self) -> u64 {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => s.pc(),
            CpuState::Arm64(s) => s.pc(),
            CpuState::X86(s) | CpuState::X64Compat32(s) => s.pc(),
            CpuState::X64(s) => s.pc(),
        }
    }

    /// Set the (aligned) PC value.
    pub fn set_pc(&mut self, pc: u64) {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => s.set_pc(pc),
            CpuState::Arm64(s) => s.set_pc(pc),
            CpuState::X86(s) | CpuState::X64Compat32(s) => s.set_pc(pc),
            CpuState::X64(s) => s.set_pc(pc),
        }
    }

    /// PC with the Thumb bit restored when CPSR.T is set; identical to
    /// `pc()` elsewhere.
    pub fn xpc(&self) -> u64 {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => s.xpc(),
            _ => self.pc(),
        }
    }

    pub fn sp(&self) -> u64 {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => s.sp(),
            CpuState::Arm64(s) => s.sp(),
            CpuState::X86(s) | CpuState::X64Compat32(s) => s.sp(),
            CpuState::X64(s) => s.sp(),
        }
    }

    /// The register a syscall result lands in (r0/x0/eax/rax); read by
    /// the injected-code path.
    pub fn retval(&self) -> u64 {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => s.retval(),
            CpuState::Arm64(s) => s.retval(),
            CpuState::X86(s) | CpuState::X64Compat32(s) => s.retval(),
            CpuState::X64(s) => s.retval(),
        }
    }

    pub fn is_thumb(&self) -> bool {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => s.is_thumb(),
            _ => false,
        }
    }

    /// In-place bytes of the register `regno` in the GDB numbering for
    /// this architecture. Unknown numbers yield `None` and touch nothing.
    pub fn gdb_register(&self, regno: u32) -> Option<&[u8]> {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => crate::arch::arm::gdb_register(s, regno),
            CpuState::Arm64(s) => crate::arch::arm64::register(s, regno),
            CpuState::X86(s) | CpuState::X64Compat32(s) => crate::arch::x86::gdb_register(s, regno),
            CpuState::X64(s) => crate::arch::x86_64::gdb_register(s, regno),
        }
    }

    pub fn gdb_register_mut(&mut self, regno: u32) -> Option<&mut [u8]> {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => {
                crate::arch::arm::gdb_register_mut(s, regno)
            }
            CpuState::Arm64(s) => crate::arch::arm64::register_mut(s, regno),
            CpuState::X86(s) | CpuState::X64Compat32(s) => {
                crate::arch::x86::gdb_register_mut(s, regno)
            }
            CpuState::X64(s) => crate::arch::x86_64::gdb_register_mut(s, regno),
        }
    }

    /// LLDB numbering differs from GDB only on 32-bit ARM.
    pub fn lldb_register(&self, regno: u32) -> Option<&[u8]> {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => crate::arch::arm::lldb_register(s, regno),
            _ => self.gdb_register(regno),
        }
    }

    pub fn lldb_register_mut(&mut self, regno: u32) -> Option<&mut [u8]> {
        match self {
            CpuState::Arm(s) | CpuState::Arm64A32(s) => {
                crate::arch::arm::lldb_register_mut(s, regno)
            }
            _ => self.gdb_register_mut(regno),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_shapes() {
        assert!(matches!(
            CpuState::new(CpuArch::Arm64, true),
            CpuState::Arm64A32(_)
        ));
        assert!(matches!(
            CpuState::new(CpuArch::X64, false),
            CpuState::X64(_)
        ));
        assert!(CpuState::new(CpuArch::X64, true).is_32bit());
        assert_eq!(
            CpuState::new(CpuArch::Arm64, true).exec_arch(),
            CpuArch::Arm
        );
    }

    #[test]
    fn pc_round_trip() {
        let mut state = CpuState::new(CpuArch::X64, false);
        state.set_pc(0x401020);
        assert_eq!(state.pc(), 0x401020);
        assert_eq!(state.xpc(), 0x401020);
        state.clear();
        assert_eq!(state.pc(), 0);
    }

    #[test]
    fn thumb_xpc_through_dispatch() {
        let mut state = CpuState::new(CpuArch::Arm, true);
        state.set_pc(0x8000);
        if let CpuState::Arm(s) = &mut state {
            s.gp.cpsr |= crate::arch::arm::CPSR_T_BIT;
        }
        assert_eq!(state.xpc(), 0x8001);
        assert_eq!(state.pc(), 0x8000);
    }

    #[test]
    fn register_views() {
        let mut state = CpuState::new(CpuArch::X64, false);
        if let CpuState::X64(s) = &mut state {
            s.gp.rbx = 0x1122_3344_5566_7788;
        }
        assert_eq!(
            state.gdb_register(1).unwrap(),
            &0x1122_3344_5566_7788u64.to_le_bytes()[..]
        );
        assert!(state.gdb_register(4096).is_none());

        // Writes through the view land in the register.
        state
            .gdb_register_mut(0)
            .unwrap()
            .copy_from_slice(&42u64.to_le_bytes());
        assert_eq!(state.retval(), 42);
    }

    #[test]
    fn lldb_arm_numbering() {
        let mut state = CpuState::new(CpuArch::Arm, true);
        if let CpuState::Arm(s) = &mut state {
            s.gp.cpsr = 0xf000_0010;
        }
        // cpsr is 16 for LLDB, 25 for GDB.
        assert_eq!(
            state.lldb_register(16).unwrap(),
            &0xf000_0010u32.to_le_bytes()[..]
        );
        assert_eq!(
            state.gdb_register(25).unwrap(),
            &0xf000_0010u32.to_le_bytes()[..]
        );
        assert!(state.gdb_register(16).is_none());
    }
}
