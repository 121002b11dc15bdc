//! Software single-step for ARM/Thumb.
//!
//! The kernel does not provide a usable hardware single-step on 32-bit
//! ARM, so stepping is emulated: decode the instruction under PC, compute
//! every PC it can transfer control to, and plant one-shot breakpoints at
//! each. The following resume stops at whichever one fires, and the
//! manager's `disable()` collects the rest.

use crate::arch::arm::branching::{self, BranchDisp, BranchInfo, BranchType};
use crate::arch::arm::ArmState;
use crate::breakpoint::software::SoftwareBreakpointManager;
use crate::breakpoint::{Lifetime, Mode};
use crate::error::{ErrorCode, Result};
use crate::memory::TraceeMemory;
use crate::types::Address;

/// A predicted successor PC and the breakpoint size to plant there.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Successor {
    pub pc: u32,
    pub size: usize,
}

fn align_up(value: u32, align: u32) -> u32 {
    (value.wrapping_add(align - 1)) & !(align - 1)
}

fn read_thumb_words(mem: &dyn TraceeMemory, address: u32) -> Result<[u16; 4]> {
    let mut buf = [0u8; 8];
    mem.read_exact(u64::from(address), &mut buf)?;
    let mut words = [0u16; 4];
    for (i, w) in words.iter_mut().enumerate() {
        *w = u16::from_le_bytes([buf[2 * i], buf[2 * i + 1]]);
    }
    Ok(words)
}

fn reg(state: &ArmState, r: Option<usize>) -> Result<u32> {
    r.map(|r| state.gp.regs[r]).ok_or(ErrorCode::Unsupported)
}

/// Where an indirect target keeps the Thumb bit, derive the breakpoint
/// size from it and strip it.
fn sized_by_thumb_bit(target: u32) -> Successor {
    Successor {
        pc: target & !1,
        size: if target & 1 != 0 { 2 } else { 4 },
    }
}

/// Successor set of the Thumb instruction at `pc`: `(fallthrough, branch)`.
fn plan_thumb(
    mem: &dyn TraceeMemory,
    pc: u32,
    state: &ArmState,
) -> Result<(Option<Successor>, Option<Successor>)> {
    let words = read_thumb_words(mem, pc)?;

    let info: BranchInfo = match branching::thumb_branch_info(&words) {
        None => {
            // Not a branch: the only successor is the next instruction.
            // A 2-byte breakpoint is enough even if that instruction is a
            // 4-byte one, since it can't be jumped over.
            let next = pc.wrapping_add(branching::thumb_inst_size(u32::from(words[0])).byte_count() as u32);
            return Ok((Some(Successor { pc: next, size: 2 }), None));
        }
        Some(info) => info,
    };

    debug!(
        "thumb branch/IT found at {:#x} (it={}[{}])",
        pc, info.it, info.it_count
    );

    // Inside an IT block the step target is the instruction after the
    // whole block; the in-block instructions execute or skip as a unit.
    if info.it {
        let mut next = pc.wrapping_add(2);

        // Up to four instructions of up to four bytes each.
        let mut buf = [0u8; 16];
        mem.read_exact(u64::from(next), &mut buf)?;
        let mut it_words = [0u16; 8];
        for (i, w) in it_words.iter_mut().enumerate() {
            *w = u16::from_le_bytes([buf[2 * i], buf[2 * i + 1]]);
        }

        let mut skip = 0usize;
        for _ in 0..info.it_count {
            skip += branching::thumb_inst_size(u32::from(it_words[skip / 2])).byte_count();
        }

        next = next.wrapping_add(skip as u32);
        return Ok((Some(Successor { pc: next, size: 2 }), None));
    }

    let link = info.ty.is_link();

    // Conditional and link branches keep a live fallthrough.
    let next = if matches!(info.ty, BranchType::BccImm | BranchType::CbImm) || link {
        let next = pc.wrapping_add(
            branching::thumb_inst_size(u32::from(words[0])).byte_count() as u32,
        );
        Some(Successor { pc: next, size: 2 })
    } else {
        None
    };

    let branch = match info.ty {
        BranchType::BImm | BranchType::BlImm | BranchType::BccImm | BranchType::CbImm => {
            Some(Successor {
                pc: pc.wrapping_add(info.disp as u32),
                size: 2,
            })
        }

        BranchType::BxReg | BranchType::BlxReg | BranchType::MovPc => {
            Some(sized_by_thumb_bit(reg(state, info.reg1)?))
        }

        BranchType::LdrPc => {
            let mut address = reg(state, info.reg1)?;
            if info.mode == BranchDisp::Lsl {
                address = address.wrapping_add(reg(state, info.reg2)? << info.disp);
            } else {
                if let Some(r2) = info.reg2 {
                    address = address.wrapping_add(state.gp.regs[r2]);
                }
                address = address.wrapping_add(info.disp as u32);
            }
            Some(sized_by_thumb_bit(mem.read_u32(u64::from(address))?))
        }

        BranchType::LdmPc | BranchType::PopPc => {
            let address = reg(state, info.reg1)?.wrapping_add(info.disp as u32);
            Some(sized_by_thumb_bit(mem.read_u32(u64::from(address))?))
        }

        // Switches to ARM state; the target is word-aligned and gets an
        // ARM-sized breakpoint.
        BranchType::BlxImm => Some(Successor {
            pc: align_up(pc.wrapping_add(info.disp as u32), info.align),
            size: 4,
        }),

        BranchType::SubPc => Some(sized_by_thumb_bit(
            reg(state, info.reg1)?.wrapping_sub(info.disp as u32),
        )),

        BranchType::Tbb | BranchType::Tbh => {
            let mut address = reg(state, info.reg1)?;
            if info.reg1 == Some(super::REG_PC) {
                address = address.wrapping_add(4);
            }
            address = address.wrapping_add(reg(state, info.reg2)? << info.disp);
            let offset = if info.ty == BranchType::Tbb {
                u32::from(mem.read_u8(u64::from(address))?)
            } else {
                u32::from(mem.read_u16(u64::from(address))?)
            };
            Some(Successor {
                pc: pc.wrapping_add(4).wrapping_add(offset * 2),
                size: 2,
            })
        }

        BranchType::None => None,
        _ => return Err(ErrorCode::Unsupported),
    };

    Ok((next, branch))
}

/// Successor set of the ARM instruction at `pc`.
fn plan_arm(
    mem: &dyn TraceeMemory,
    pc: u32,
    state: &ArmState,
) -> Result<(Option<Successor>, Option<Successor>)> {
    let insn = mem.read_u32(u64::from(pc))?;

    let info = match branching::arm_branch_info(insn) {
        None => {
            return Ok((
                Some(Successor {
                    pc: pc.wrapping_add(4),
                    size: 4,
                }),
                None,
            ));
        }
        Some(info) => info,
    };

    debug!("arm branch found at {:#x}", pc);

    let link = info.ty.is_link();

    let next = if info.cond != branching::BranchCond::Al || link {
        Some(Successor {
            pc: pc.wrapping_add(4),
            size: 4,
        })
    } else {
        None
    };

    let branch = match info.ty {
        BranchType::BImm | BranchType::BlImm | BranchType::BccImm => Some(Successor {
            pc: pc.wrapping_add(info.disp as u32),
            size: 4,
        }),

        BranchType::BxReg | BranchType::BlxReg => {
            Some(sized_by_thumb_bit(reg(state, info.reg1)?))
        }

        BranchType::MovPc => match info.mode {
            BranchDisp::Normal => Some(sized_by_thumb_bit(reg(state, info.reg1)?)),
            _ => return Err(ErrorCode::Unsupported),
        },

        BranchType::LdrPc => {
            let mut address = reg(state, info.reg1)?;
            match info.mode {
                BranchDisp::Lsl => {
                    address = address.wrapping_add(reg(state, info.reg2)? << info.disp);
                }
                BranchDisp::Normal => {
                    if let Some(r2) = info.reg2 {
                        let offset = state.gp.regs[r2];
                        address = if info.subtract_reg2 {
                            address.wrapping_sub(offset)
                        } else {
                            address.wrapping_add(offset)
                        };
                    }
                    address = address.wrapping_add(info.disp as u32);
                }
                _ => return Err(ErrorCode::Unsupported),
            }
            Some(sized_by_thumb_bit(mem.read_u32(u64::from(address))?))
        }

        BranchType::LdmPc | BranchType::PopPc => {
            let address = reg(state, info.reg1)?.wrapping_add(info.disp as u32);
            Some(sized_by_thumb_bit(mem.read_u32(u64::from(address))?))
        }

        // Switches to Thumb state, so the breakpoint is a Thumb one.
        BranchType::BlxImm => Some(Successor {
            pc: pc.wrapping_add(info.disp as u32),
            size: 2,
        }),

        BranchType::SubPc => Some(sized_by_thumb_bit(
            reg(state, info.reg1)?.wrapping_sub(info.disp as u32),
        )),

        _ => return Err(ErrorCode::Unsupported),
    };

    Ok((next, branch))
}

/// Compute the successors of the instruction at `address` (or at the
/// state's PC) and plant a one-shot breakpoint at each.
pub fn prepare_software_single_step(
    mem: &mut dyn TraceeMemory,
    manager: &mut SoftwareBreakpointManager,
    state: &ArmState,
    address: Address,
) -> Result<()> {
    let pc = if address.is_valid() {
        address.value() as u32
    } else {
        state.pc() as u32
    };

    let (next, branch) = if state.is_thumb() {
        plan_thumb(mem, pc, state)?
    } else {
        plan_arm(mem, pc, state)?
    };

    debug!(
        "pc={:#x}, branch={:?} next={:?}",
        pc, branch, next
    );

    if let Some(s) = branch {
        manager.add(
            mem,
            Address::new(u64::from(s.pc)),
            Lifetime::TEMP_ONE_SHOT,
            s.size,
            Mode::EXEC,
        )?;
    }

    if let Some(s) = next {
        manager.add(
            mem,
            Address::new(u64::from(s.pc)),
            Lifetime::TEMP_ONE_SHOT,
            s.size,
            Mode::EXEC,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm::CPSR_T_BIT;
    use crate::memory::testing::FakeMemory;

    fn thumb_state(pc: u32) -> ArmState {
        let mut state = ArmState::new();
        state.set_pc(u64::from(pc));
        state.gp.cpsr |= CPSR_T_BIT;
        state
    }

    fn arm_state(pc: u32) -> ArmState {
        let mut state = ArmState::new();
        state.set_pc(u64::from(pc));
        state
    }

    #[test]
    fn thumb_conditional_branch_has_two_successors() {
        let mut mem = FakeMemory::new();
        // 0x8000: beq +4 (to 0x8008); 0x8002..: nops.
        mem.load(0x8000, &[0x02, 0xd0, 0x00, 0xbf, 0x00, 0xbf, 0x00, 0xbf]);

        let state = thumb_state(0x8000);
        let (next, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        assert_eq!(next, Some(Successor { pc: 0x8002, size: 2 }));
        assert_eq!(branch, Some(Successor { pc: 0x8008, size: 2 }));
    }

    #[test]
    fn thumb_straight_line_falls_through() {
        let mut mem = FakeMemory::new();
        // movs r0, #1; padding.
        mem.load(0x8000, &[0x01, 0x20, 0x00, 0xbf, 0x00, 0xbf, 0x00, 0xbf]);

        let state = thumb_state(0x8000);
        let (next, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        assert_eq!(next, Some(Successor { pc: 0x8002, size: 2 }));
        assert_eq!(branch, None);
    }

    #[test]
    fn thumb_bx_lr_uses_register_and_thumb_bit() {
        let mut mem = FakeMemory::new();
        // bx lr; padding.
        mem.load(0x8000, &[0x70, 0x47, 0x00, 0xbf, 0x00, 0xbf, 0x00, 0xbf]);

        let mut state = thumb_state(0x8000);
        state.gp.regs[14] = 0x9001; // thumb return address
        let (next, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        assert_eq!(next, None);
        assert_eq!(branch, Some(Successor { pc: 0x9000, size: 2 }));

        state.gp.regs[14] = 0xa000; // arm return address
        let (_, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        assert_eq!(branch, Some(Successor { pc: 0xa000, size: 4 }));
    }

    #[test]
    fn thumb_pop_pc_reads_stack_slot() {
        let mut mem = FakeMemory::new();
        // pop {r4, pc}; padding.
        mem.load(0x8000, &[0x10, 0xbd, 0x00, 0xbf, 0x00, 0xbf, 0x00, 0xbf]);
        // Stack: r4 slot then PC slot.
        mem.load_u32(0x2000, 0xdead_0000);
        mem.load_u32(0x2004, 0x0000_9005);

        let mut state = thumb_state(0x8000);
        state.gp.regs[13] = 0x2000;
        let (next, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        assert_eq!(next, None);
        assert_eq!(branch, Some(Successor { pc: 0x9004, size: 2 }));
    }

    #[test]
    fn thumb_it_block_steps_past_the_block() {
        let mut mem = FakeMemory::new();
        // 0x8000: ITTE EQ (3 conditional instructions)
        // 0x8002: movs r0,#1 (2b); 0x8004: bl prefix pair (4b); 0x8008: movs r1,#2
        mem.load(0x8000, &[0x06, 0xbf, 0x01, 0x20, 0x00, 0xf0, 0x00, 0xf8]);
        mem.load(0x8008, &[0x02, 0x21, 0x00, 0xbf, 0x00, 0xbf, 0x00, 0xbf]);
        mem.load(0x8010, &[0x00, 0xbf, 0x00, 0xbf]);

        let state = thumb_state(0x8000);
        let (next, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        // 2 (IT) + 2 + 4 + 2 bytes of block body.
        assert_eq!(next, Some(Successor { pc: 0x800a, size: 2 }));
        assert_eq!(branch, None);
    }

    #[test]
    fn thumb_tbb_indexes_the_table() {
        let mut mem = FakeMemory::new();
        // tbb [r0, r1]; padding.
        mem.load(0x8000, &[0xd0, 0xe8, 0x01, 0xf0, 0x00, 0xbf, 0x00, 0xbf]);
        mem.load(0x9000, &[0x00, 0x05, 0x0a, 0x00]);

        let mut state = thumb_state(0x8000);
        state.gp.regs[0] = 0x9000;
        state.gp.regs[1] = 1; // index 1 -> table byte 0x05
        let (_, branch) = plan_thumb(&mem, 0x8000, &state).unwrap();
        assert_eq!(branch, Some(Successor { pc: 0x8000 + 4 + 0x05 * 2, size: 2 }));
    }

    #[test]
    fn arm_unconditional_branch_has_single_successor() {
        let mut mem = FakeMemory::new();
        // b +4: 0xeaffffff
        mem.load_u32(0x4000, 0xeaff_ffff);

        let state = arm_state(0x4000);
        let (next, branch) = plan_arm(&mem, 0x4000, &state).unwrap();
        assert_eq!(next, None);
        assert_eq!(branch, Some(Successor { pc: 0x4004, size: 4 }));
    }

    #[test]
    fn arm_conditional_branch_has_two_successors() {
        let mut mem = FakeMemory::new();
        // beq -12: 0x0afffffb
        mem.load_u32(0x4000, 0x0aff_fffb);

        let state = arm_state(0x4000);
        let (next, branch) = plan_arm(&mem, 0x4000, &state).unwrap();
        assert_eq!(next, Some(Successor { pc: 0x4004, size: 4 }));
        assert_eq!(branch, Some(Successor { pc: 0x4000 - 12, size: 4 }));
    }

    #[test]
    fn arm_blx_imm_targets_thumb() {
        let mut mem = FakeMemory::new();
        // blx +8: 0xfa000000
        mem.load_u32(0x4000, 0xfa00_0000);

        let state = arm_state(0x4000);
        let (next, branch) = plan_arm(&mem, 0x4000, &state).unwrap();
        // Link form keeps the fallthrough live.
        assert_eq!(next, Some(Successor { pc: 0x4004, size: 4 }));
        assert_eq!(branch, Some(Successor { pc: 0x4008, size: 2 }));
    }

    #[test]
    fn arm_ldr_pc_subtracting_register() {
        let mut mem = FakeMemory::new();
        // ldr pc, [r1, -r2]: 0xe711f002
        mem.load_u32(0x4000, 0xe711_f002);
        mem.load_u32(0x5ff0, 0x0001_2345); // thumb target

        let mut state = arm_state(0x4000);
        state.gp.regs[1] = 0x6000;
        state.gp.regs[2] = 0x10;
        let (next, branch) = plan_arm(&mem, 0x4000, &state).unwrap();
        assert_eq!(next, None);
        assert_eq!(branch, Some(Successor { pc: 0x12344, size: 2 }));
    }

    #[test]
    fn plants_one_shot_breakpoints() {
        use crate::arch::CpuArch;

        let mut mem = FakeMemory::new();
        mem.load(0x8000, &[0x02, 0xd0, 0x00, 0xbf, 0x00, 0xbf, 0x00, 0xbf]);
        mem.load(0x8008, &[0x00, 0xbf, 0x00, 0xbf]);

        let mut manager = SoftwareBreakpointManager::new(CpuArch::Arm);
        let state = thumb_state(0x8000);
        prepare_software_single_step(&mut mem, &mut manager, &state, Address::invalid()).unwrap();

        assert!(manager.has(Address::new(0x8002)));
        assert!(manager.has(Address::new(0x8008)));
    }
}
