/// 64-bit x86 register state.
#[derive(Copy, Clone, Debug)]
pub struct GpRegisters {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub eflags: u64,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub orig_rax: u64,
    pub fs_base: u64,
    pub gs_base: u64,
}

#[derive(Copy, Clone, Debug)]
pub struct X87Registers {
    pub fstw: u16,
    pub fctw: u16,
    pub ftag: u16,
    pub fop: u16,
    pub firip: u64,
    pub forip: u64,
    pub regs: [[u8; 10]; 8],
}

/// SSE/AVX/AVX-512 state. Only the widest (zmm) form is stored; xmm and
/// ymm are projections over its low bytes. The XSAVE mask says which
/// families the kernel actually populated.
#[derive(Copy, Clone, Debug)]
pub struct AvxRegisters {
    pub mxcsr: u32,
    pub mxcsr_mask: u32,
    pub zmm: [[u8; 64]; 32],
}

impl AvxRegisters {
    pub fn xmm(&self, n: usize) -> &[u8] {
        &self.zmm[n][..16]
    }

    pub fn xmm_mut(&mut self, n: usize) -> &mut [u8] {
        &mut self.zmm[n][..16]
    }

    pub fn ymm(&self, n: usize) -> &[u8] {
        &self.zmm[n][..32]
    }

    pub fn ymm_mut(&mut self, n: usize) -> &mut [u8] {
        &mut self.zmm[n][..32]
    }
}

#[derive(Copy, Clone, Debug)]
pub struct X64State {
    pub gp: GpRegisters,
    pub x87: X87Registers,
    pub avx: AvxRegisters,
    pub xsave_mask: u64,
    pub dr: [u64; 8],
}

impl X64State {
    pub fn new() -> X64State {
        X64State {
            gp: GpRegisters {
                rax: 0,
                rbx: 0,
                rcx: 0,
                rdx: 0,
                rsi: 0,
                rdi: 0,
                rbp: 0,
                rsp: 0,
                r8: 0,
                r9: 0,
                r10: 0,
                r11: 0,
                r12: 0,
                r13: 0,
                r14: 0,
                r15: 0,
                rip: 0,
                eflags: 0,
                cs: 0,
                ss: 0,
                ds: 0,
                es: 0,
                fs: 0,
                gs: 0,
                orig_rax: 0,
                fs_base: 0,
                gs_base: 0,
            },
            x87: X87Registers {
                fstw: 0,
                fctw: 0,
                ftag: 0,
                fop: 0,
                firip: 0,
                forip: 0,
                regs: [[0; 10]; 8],
            },
            avx: AvxRegisters {
                mxcsr: 0,
                mxcsr_mask: 0,
                zmm: [[0; 64]; 32],
            },
            xsave_mask: 0,
            dr: [0; 8],
        }
    }

    pub fn pc(&self) -> u64 {
        self.gp.rip
    }

    pub fn set_pc(&mut self, pc: u64) {
        self.gp.rip = pc;
    }

    pub fn sp(&self) -> u64 {
        self.gp.rsp
    }

    pub fn retval(&self) -> u64 {
        self.gp.rax
    }
}

impl Default for X64State {
    fn default() -> X64State {
        X64State::new()
    }
}

mod views {
    use super::*;
    use crate::arch::cpu_state::{bytes_of, bytes_of_mut};

    // GDB x86_64 numbering: rax rbx rcx rdx rsi rdi rbp rsp r8-r15 rip
    // eflags cs ss ds es fs gs, st0-st7, then the SSE set.
    pub fn gdb_register(state: &X64State, regno: u32) -> Option<&[u8]> {
        let gp = &state.gp;
        match regno {
            0 => Some(bytes_of(&gp.rax)),
            1 => Some(bytes_of(&gp.rbx)),
            2 => Some(bytes_of(&gp.rcx)),
            3 => Some(bytes_of(&gp.rdx)),
            4 => Some(bytes_of(&gp.rsi)),
            5 => Some(bytes_of(&gp.rdi)),
            6 => Some(bytes_of(&gp.rbp)),
            7 => Some(bytes_of(&gp.rsp)),
            8 => Some(bytes_of(&gp.r8)),
            9 => Some(bytes_of(&gp.r9)),
            10 => Some(bytes_of(&gp.r10)),
            11 => Some(bytes_of(&gp.r11)),
            12 => Some(bytes_of(&gp.r12)),
            13 => Some(bytes_of(&gp.r13)),
            14 => Some(bytes_of(&gp.r14)),
            15 => Some(bytes_of(&gp.r15)),
            16 => Some(bytes_of(&gp.rip)),
            17 => Some(bytes_of(&gp.eflags)),
            18 => Some(bytes_of(&gp.cs)),
            19 => Some(bytes_of(&gp.ss)),
            20 => Some(bytes_of(&gp.ds)),
            21 => Some(bytes_of(&gp.es)),
            22 => Some(bytes_of(&gp.fs)),
            23 => Some(bytes_of(&gp.gs)),
            24..=31 => Some(&state.x87.regs[(regno - 24) as usize][..]),
            40..=55 => Some(state.avx.xmm((regno - 40) as usize)),
            56 => Some(bytes_of(&state.avx.mxcsr)),
            _ => None,
        }
    }

    pub fn gdb_register_mut(state: &mut X64State, regno: u32) -> Option<&mut [u8]> {
        match regno {
            0 => Some(bytes_of_mut(&mut state.gp.rax)),
            1 => Some(bytes_of_mut(&mut state.gp.rbx)),
            2 => Some(bytes_of_mut(&mut state.gp.rcx)),
            3 => Some(bytes_of_mut(&mut state.gp.rdx)),
            4 => Some(bytes_of_mut(&mut state.gp.rsi)),
            5 => Some(bytes_of_mut(&mut state.gp.rdi)),
            6 => Some(bytes_of_mut(&mut state.gp.rbp)),
            7 => Some(bytes_of_mut(&mut state.gp.rsp)),
            8 => Some(bytes_of_mut(&mut state.gp.r8)),
            9 => Some(bytes_of_mut(&mut state.gp.r9)),
            10 => Some(bytes_of_mut(&mut state.gp.r10)),
            11 => Some(bytes_of_mut(&mut state.gp.r11)),
            12 => Some(bytes_of_mut(&mut state.gp.r12)),
            13 => Some(bytes_of_mut(&mut state.gp.r13)),
            14 => Some(bytes_of_mut(&mut state.gp.r14)),
            15 => Some(bytes_of_mut(&mut state.gp.r15)),
            16 => Some(bytes_of_mut(&mut state.gp.rip)),
            17 => Some(bytes_of_mut(&mut state.gp.eflags)),
            18 => Some(bytes_of_mut(&mut state.gp.cs)),
            19 => Some(bytes_of_mut(&mut state.gp.ss)),
            20 => Some(bytes_of_mut(&mut state.gp.ds)),
            21 => Some(bytes_of_mut(&mut state.gp.es)),
            22 => Some(bytes_of_mut(&mut state.gp.fs)),
            23 => Some(bytes_of_mut(&mut state.gp.gs)),
            24..=31 => Some(&mut state.x87.regs[(regno - 24) as usize][..]),
            40..=55 => Some(state.avx.xmm_mut((regno - 40) as usize)),
            56 => Some(bytes_of_mut(&mut state.avx.mxcsr)),
            _ => None,
        }
    }
}

pub(crate) use views::{gdb_register, gdb_register_mut};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_register_aliasing() {
        let mut state = X64State::new();
        state.avx.zmm[1][0] = 0x11;
        state.avx.zmm[1][31] = 0x22;
        state.avx.zmm[1][63] = 0x33;
        assert_eq!(state.avx.xmm(1)[0], 0x11);
        assert_eq!(state.avx.ymm(1)[31], 0x22);
        assert_eq!(state.avx.xmm(1).len(), 16);
        assert_eq!(state.avx.ymm(1).len(), 32);
    }
}
