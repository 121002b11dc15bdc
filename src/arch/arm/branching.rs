//! Decoding of the ARM and Thumb instructions that can change PC.
//!
//! The decoders are pure functions over raw instruction words; the
//! software single-step planner uses the resulting [`BranchInfo`] to
//! enumerate every possible successor PC.
//!
//! ```text
//! ARM           | Thumb-2        | Thumb-1
//! --------------+----------------+---------------
//! b i           | b.n i          | b i
//! bl i          | b.w i          | bl i
//! blx i         | bl i           | bx r
//! bx r          | blx i          | mov pc, ...
//! blx r         | bx r           | pop {...,pc}
//! ldr pc, ...   | blx r          |
//! mov pc, ...   | cbz r, i       |
//! pop {...,pc}  | cbnz r, i      |
//! <aop> pc, ... | mov pc, ...    |
//!               | ldr pc, ...    |
//!               | pop {...,pc}   |
//!               | ldm.w {...,pc} |
//!               | tbb / tbh      |
//! ```

/// Kind of PC-affecting instruction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BranchType {
    /// An IT header with no branch in reach; only `it`/`it_count` matter.
    None,
    BImm,
    BccImm,
    CbImm,
    BxReg,
    BlImm,
    BlxImm,
    BlxReg,
    MovPc,
    LdrPc,
    LdmPc,
    PopPc,
    SubPc,
    Tbb,
    Tbh,
    AdcPc,
    AddPc,
    AndPc,
    BicPc,
    EorPc,
    OrrPc,
    RsbPc,
    RscPc,
    SbcPc,
    MvnPc,
}

impl BranchType {
    /// Branch-and-link forms; these always have a live fallthrough.
    pub fn is_link(self) -> bool {
        matches!(self, BranchType::BlImm | BranchType::BlxImm | BranchType::BlxReg)
    }
}

/// How `disp` combines with `reg2` for register-offset addressing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BranchDisp {
    Normal,
    Lsl,
    Lsr,
    Asr,
    Ror,
    Rrx,
}

/// ARM condition field, in its architectural encoding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BranchCond {
    Eq,
    Ne,
    Cs,
    Cc,
    Mi,
    Pl,
    Vs,
    Vc,
    Hi,
    Ls,
    Ge,
    Lt,
    Gt,
    Le,
    Al,
    Nv,
}

impl BranchCond {
    pub fn from_bits(bits: u32) -> BranchCond {
        match bits & 0xf {
            0 => BranchCond::Eq,
            1 => BranchCond::Ne,
            2 => BranchCond::Cs,
            3 => BranchCond::Cc,
            4 => BranchCond::Mi,
            5 => BranchCond::Pl,
            6 => BranchCond::Vs,
            7 => BranchCond::Vc,
            8 => BranchCond::Hi,
            9 => BranchCond::Ls,
            10 => BranchCond::Ge,
            11 => BranchCond::Lt,
            12 => BranchCond::Gt,
            13 => BranchCond::Le,
            14 => BranchCond::Al,
            _ => BranchCond::Nv,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct BranchInfo {
    pub ty: BranchType,
    pub cond: BranchCond,
    pub mode: BranchDisp,
    pub reg1: Option<usize>,
    pub reg2: Option<usize>,
    /// Immediate displacement, byte count for LDM/POP, or shift amount
    /// depending on `ty`/`mode`. Branch displacements already include the
    /// pipeline offset (+4 Thumb, +8 ARM).
    pub disp: i32,
    /// Alignment the computed target must be rounded up to (BLX to ARM).
    pub align: u32,
    /// Set when the word is an IT header; the next `it_count` Thumb
    /// instructions are conditional.
    pub it: bool,
    pub it_count: u32,
    /// Register-offset form subtracts `reg2` (ARM LDR only).
    pub subtract_reg2: bool,
}

impl BranchInfo {
    fn new() -> BranchInfo {
        BranchInfo {
            ty: BranchType::None,
            cond: BranchCond::Al,
            mode: BranchDisp::Normal,
            reg1: None,
            reg2: None,
            disp: 0,
            align: 1,
            it: false,
            it_count: 0,
            subtract_reg2: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThumbInstSize {
    TwoBytes,
    FourBytes,
}

impl ThumbInstSize {
    pub fn byte_count(self) -> usize {
        match self {
            ThumbInstSize::TwoBytes => 2,
            ThumbInstSize::FourBytes => 4,
        }
    }
}

/// Classify the Thumb instruction starting in the low half-word of `insn`.
pub fn thumb_inst_size(insn: u32) -> ThumbInstSize {
    let lo = (insn & 0xffff) as u16;
    if (lo & 0xe000) != 0xe000 || (lo & 0x1800) == 0x0000 {
        ThumbInstSize::TwoBytes
    } else {
        ThumbInstSize::FourBytes
    }
}

fn sign_ext(n: u32, size: u32) -> i32 {
    let sh = 32 - size;
    ((n << sh) as i32) >> sh
}

/// Rebuild a Thumb-2 branch displacement from its scattered fields. The
/// J1/J2 bits are xor-folded with S for B.W/BL/BLX but used directly (and
/// swapped) for Bcc.W.
#[allow(clippy::too_many_arguments)]
fn t2_branch_disp(
    s: u32,
    j1: u32,
    j2: u32,
    imm_h_size: u32,
    imm_h: u32,
    imm_l_size: u32,
    imm_l: u32,
    zero_pad: u32,
    xor_values: bool,
) -> i32 {
    let i1 = if xor_values { (j1 ^ s) ^ 1 } else { j2 };
    let i2 = if xor_values { (j2 ^ s) ^ 1 } else { j1 };

    let mut disp = s;
    disp = (disp << 1) | i1;
    disp = (disp << 1) | i2;
    disp = (disp << imm_h_size) | imm_h;
    disp = (disp << imm_l_size) | imm_l;
    disp <<= zero_pad;

    sign_ext(disp, 3 + imm_h_size + imm_l_size + zero_pad)
}

fn decode_shift_mode(disp: u8, ty: u8) -> BranchDisp {
    match ty & 3 {
        0 => BranchDisp::Lsl,
        1 => BranchDisp::Lsr,
        2 => BranchDisp::Asr,
        _ => {
            if disp == 0 {
                BranchDisp::Rrx
            } else {
                BranchDisp::Ror
            }
        }
    }
}

mod thumb {
    use super::*;

    /// IT <cond>; makes the next 1-4 instructions conditional.
    pub fn get_it(insn: u16, info: &mut BranchInfo) -> bool {
        info.align = 1;
        let mask = insn & 0xf;
        info.it = (insn & 0xff00) == 0xbf00 && mask != 0;
        info.it_count = 0;
        if info.it {
            info.cond = BranchCond::from_bits(u32::from(insn >> 4));
            info.it_count = 4 - u32::from(mask).trailing_zeros();
        } else {
            info.cond = BranchCond::Al;
        }
        info.it
    }

    /// B.N <imm>
    pub fn get_b_n(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xf800) == 0xe000 {
            info.ty = BranchType::BImm;
            info.mode = BranchDisp::Normal;
            // The displacement points past the instruction plus 2 bytes
            // for the pipeline.
            info.disp = sign_ext(u32::from(insn & 0x7ff) << 1, 12) + 4;
            return true;
        }
        false
    }

    /// Bcc.N <imm>
    pub fn get_bcc_n(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xf000) == 0xd000 && (insn & 0x0f00) < 0x0e00 {
            info.ty = BranchType::BccImm;
            info.cond = BranchCond::from_bits(u32::from(insn >> 8));
            info.mode = BranchDisp::Normal;
            info.disp = sign_ext(u32::from(insn & 0xff) << 1, 9) + 4;
            return true;
        }
        false
    }

    /// BX <reg>
    pub fn get_bx(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xff80) == 0x4700 {
            info.ty = BranchType::BxReg;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from((insn >> 3) & 0xf));
            info.disp = 0;
            return true;
        }
        false
    }

    /// BLX <reg>
    pub fn get_blx_r(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xff80) == 0x4780 {
            info.ty = BranchType::BlxReg;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from((insn >> 3) & 0xf));
            info.disp = 0;
            return true;
        }
        false
    }

    /// MOV pc, <reg>
    pub fn get_mov_pc(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xff87) == 0x4687 {
            info.ty = BranchType::MovPc;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from((insn >> 3) & 0xf));
            info.disp = 0;
            return true;
        }
        false
    }

    /// POP {...,pc}
    pub fn get_pop_pc(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xff00) == 0xbd00 {
            info.ty = BranchType::PopPc;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(super::super::REG_SP);
            // PC is popped after the low registers in the list.
            info.disp = ((insn & 0xff).count_ones() << 2) as i32;
            return true;
        }
        false
    }

    /// B.W <imm>
    pub fn get_b_w(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xf800) == 0xf000 && (insn[1] & 0xd000) == 0x9000 {
            info.ty = BranchType::BImm;
            info.mode = BranchDisp::Normal;

            let s = u32::from(insn[0] >> 10) & 1;
            let j1 = u32::from(insn[1] >> 13) & 1;
            let j2 = u32::from(insn[1] >> 11) & 1;
            let imm10 = u32::from(insn[0]) & 0x3ff;
            let imm11 = u32::from(insn[1]) & 0x7ff;

            info.disp = t2_branch_disp(s, j1, j2, 10, imm10, 11, imm11, 1, true) + 4;
            return true;
        }
        false
    }

    /// Bcc.W <imm>
    pub fn get_bcc_w(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xf800) == 0xf000
            && (insn[0] & 0x0380) != 0x0380
            && (insn[1] & 0xd000) == 0x8000
        {
            info.ty = BranchType::BccImm;
            info.mode = BranchDisp::Normal;
            info.cond = BranchCond::from_bits(u32::from(insn[0] >> 6));

            let s = u32::from(insn[0] >> 10) & 1;
            let j1 = u32::from(insn[1] >> 13) & 1;
            let j2 = u32::from(insn[1] >> 11) & 1;
            let imm6 = u32::from(insn[0]) & 0x3f;
            let imm11 = u32::from(insn[1]) & 0x7ff;

            info.disp = t2_branch_disp(s, j1, j2, 6, imm6, 11, imm11, 1, false) + 4;
            return true;
        }
        false
    }

    /// BL <imm>
    pub fn get_bl(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xf800) == 0xf000 && (insn[1] & 0xd000) == 0xd000 {
            info.ty = BranchType::BlImm;
            info.mode = BranchDisp::Normal;

            let s = u32::from(insn[0] >> 10) & 1;
            let j1 = u32::from(insn[1] >> 13) & 1;
            let j2 = u32::from(insn[1] >> 11) & 1;
            let imm10 = u32::from(insn[0]) & 0x3ff;
            let imm11 = u32::from(insn[1]) & 0x7ff;

            info.disp = t2_branch_disp(s, j1, j2, 10, imm10, 11, imm11, 1, true) + 4;
            return true;
        }
        false
    }

    /// BLX <imm>; switches to ARM state, so the target is word-aligned.
    pub fn get_blx_i(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xf800) == 0xf000 && (insn[1] & 0xd000) == 0xc000 {
            info.ty = BranchType::BlxImm;
            info.mode = BranchDisp::Normal;

            let s = u32::from(insn[0] >> 10) & 1;
            let j1 = u32::from(insn[1] >> 13) & 1;
            let j2 = u32::from(insn[1] >> 11) & 1;
            let imm10h = u32::from(insn[0]) & 0x3ff;
            let imm10l = u32::from(insn[1] >> 1) & 0x3ff;

            info.disp = t2_branch_disp(s, j1, j2, 10, imm10h, 10, imm10l, 2, true) + 2;
            info.align = 4;
            return true;
        }
        false
    }

    /// CB{Z,NZ} <reg>, <imm>
    pub fn get_cbz(insn: u16, info: &mut BranchInfo) -> bool {
        if (insn & 0xf500) == 0xb100 {
            info.ty = BranchType::CbImm;
            info.mode = BranchDisp::Normal;
            let i = u32::from(insn >> 9) & 1;
            let imm5 = u32::from(insn >> 3) & 0x1f;
            info.disp = (((i << 5) | imm5) << 1) as i32 + 4;
            return true;
        }
        false
    }

    /// LDR.W pc, [...]
    pub fn get_ldr_pc(insn: &[u16], info: &mut BranchInfo) -> bool {
        // LDR.W pc, [Rn{, #<imm12>}]
        if (insn[0] & 0xfff0) == 0xf8d0 && (insn[1] & 0xf000) == 0xf000 {
            info.ty = BranchType::LdrPc;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from(insn[0] & 0xf));
            info.disp = i32::from(insn[1] & 0xfff);
            return true;
        }

        // LDR.W pc, <label> / LDR.W pc, [pc, #-0]
        if (insn[0] & 0xff7f) == 0xf85f && (insn[1] & 0xf000) == 0xf000 {
            info.ty = BranchType::LdrPc;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(super::super::REG_PC);
            info.disp = i32::from(insn[1] & 0xfff);
            if (insn[0] >> 7) & 1 == 0 {
                info.disp = -info.disp;
            }
            return true;
        }

        // LDR.W pc, [Rn, Rm{, LSL #<imm2>}]
        if (insn[0] & 0xfff0) == 0xf850 && (insn[1] & 0xffc0) == 0xf000 {
            info.ty = BranchType::LdrPc;
            info.reg1 = Some(usize::from(insn[0] & 0xf));
            info.reg2 = Some(usize::from(insn[1] & 0xf));
            info.disp = i32::from(insn[1] >> 4) & 3;
            info.mode = if info.disp == 0 {
                BranchDisp::Normal
            } else {
                BranchDisp::Lsl
            };
            return true;
        }

        // LDR.W pc, [Rn, #+/-<imm8>] with pre/post-indexing forms.
        if (insn[0] & 0xfff0) == 0xf850 && (insn[1] & 0xf800) == 0xf800 {
            info.ty = BranchType::LdrPc;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from(insn[0] & 0xf));
            info.disp = 0;
            // The displacement takes part only when pre-indexing.
            if (insn[1] >> 10) & 1 != 0 {
                info.disp = i32::from(insn[1] & 0xff);
                if (insn[1] >> 9) & 1 == 0 {
                    info.disp = -info.disp;
                }
            }
            return true;
        }

        false
    }

    /// LDM{IA,DB}.W <reg>, {...,pc}
    pub fn get_ldm_pc(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xffd0) == 0xe890 && (insn[1] & 0x8000) == 0x8000 {
            let rn = usize::from(insn[0] & 0xf);
            let writeback = (insn[0] >> 5) & 1 != 0;
            info.ty = if writeback && rn == super::super::REG_SP {
                BranchType::PopPc
            } else {
                BranchType::LdmPc
            };
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(rn);
            // PC sits in the highest slot of the transfer list.
            info.disp = ((u32::from(insn[1]).count_ones() - 1) * 4) as i32;
            return true;
        }
        false
    }

    /// SUBS pc, lr, #<const>
    pub fn get_subs_pc_lr(insn: &[u16], info: &mut BranchInfo) -> bool {
        if insn[0] == 0xf3de && (insn[1] & 0xff00) == 0x8f00 {
            info.ty = BranchType::SubPc;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from(insn[0] & 0xf));
            info.disp = i32::from(insn[1] & 0xff);
            return true;
        }
        false
    }

    /// TBB [Rn, Rm]
    pub fn get_tbb(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xfff0) == 0xe8d0 && (insn[1] & 0xfff0) == 0xf000 {
            info.ty = BranchType::Tbb;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from(insn[0] & 0xf));
            info.reg2 = Some(usize::from(insn[1] & 0xf));
            info.disp = 0;
            return true;
        }
        false
    }

    /// TBH [Rn, Rm, LSL #1]
    pub fn get_tbh(insn: &[u16], info: &mut BranchInfo) -> bool {
        if (insn[0] & 0xfff0) == 0xe8d0 && (insn[1] & 0xfff0) == 0xf010 {
            info.ty = BranchType::Tbh;
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(usize::from(insn[0] & 0xf));
            info.reg2 = Some(usize::from(insn[1] & 0xf));
            info.disp = 1;
            return true;
        }
        false
    }
}

/// Decode the Thumb instruction stream starting at `words[0]`. Returns
/// `Some` when the word is an IT header or any PC-affecting instruction;
/// for an IT header the decode applies to the first instruction inside the
/// block.
pub fn thumb_branch_info(words: &[u16; 4]) -> Option<BranchInfo> {
    let mut info = BranchInfo::new();
    let mut insn: &[u16] = words;

    if thumb::get_it(insn[0], &mut info) {
        insn = &insn[1..];
    }

    let is_branch =
        // Thumb-1
        thumb::get_b_n(insn[0], &mut info)
        || thumb::get_bcc_n(insn[0], &mut info)
        || thumb::get_bl(insn, &mut info)
        || thumb::get_blx_r(insn[0], &mut info)
        || thumb::get_bx(insn[0], &mut info)
        || thumb::get_mov_pc(insn[0], &mut info)
        || thumb::get_pop_pc(insn[0], &mut info)
        // Thumb-2
        || thumb::get_b_w(insn, &mut info)
        || thumb::get_bcc_w(insn, &mut info)
        || thumb::get_blx_i(insn, &mut info)
        || thumb::get_cbz(insn[0], &mut info)
        || thumb::get_ldr_pc(insn, &mut info)
        || thumb::get_ldm_pc(insn, &mut info)
        || thumb::get_subs_pc_lr(insn, &mut info)
        || thumb::get_tbb(insn, &mut info)
        || thumb::get_tbh(insn, &mut info);

    if info.it || is_branch {
        Some(info)
    } else {
        None
    }
}

mod arm {
    use super::*;

    fn expand_modified_immediate(value: u32) -> i32 {
        let rotate = ((value >> 8) & 0xf) << 1;
        let value = value & 0xff;
        value.rotate_right(rotate) as i32
    }

    /// B/BL/BLX <imm>; the NV condition space encodes BLX.
    pub fn get_b(insn: u32, info: &mut BranchInfo) -> bool {
        if (insn & 0x0e00_0000) == 0x0a00_0000 {
            let mut h = 0;
            info.cond = BranchCond::from_bits(insn >> 28);
            if info.cond == BranchCond::Nv {
                info.cond = BranchCond::Al;
                info.ty = BranchType::BlxImm;
                h = (insn >> 24) & 1;
            } else if (insn >> 24) & 1 != 0 {
                info.ty = BranchType::BlImm;
            } else {
                info.ty = BranchType::BImm;
            }
            info.mode = BranchDisp::Normal;
            // Points past the instruction, plus 4 for the pipeline.
            info.disp = sign_ext(((insn & 0xff_ffff) << 2) | (h << 1), 26) + 8;
            return true;
        }
        false
    }

    /// BX/BLX <reg>
    pub fn get_bx(insn: u32, info: &mut BranchInfo) -> bool {
        if (insn & 0x0fff_ffd0) == 0x012f_ff10 {
            info.cond = BranchCond::from_bits(insn >> 28);
            info.ty = if insn & 0x20 != 0 {
                BranchType::BlxReg
            } else {
                BranchType::BxReg
            };
            info.mode = BranchDisp::Normal;
            info.reg1 = Some((insn & 0xf) as usize);
            info.disp = 0;
            return true;
        }
        false
    }

    /// Data-processing instructions writing pc, immediate and register
    /// shifted forms: ADC ADD AND BIC EOR MOV MVN ORR RSB RSC SBC SUB.
    pub fn get_alu_pc(insn: u32, info: &mut BranchInfo) -> bool {
        let form = if (insn & 0x0e00_f000) == 0x0200_f000 {
            1 // immediate
        } else if (insn & 0x0e00_f010) == 0x0000_f000 {
            2 // register
        } else {
            return false;
        };

        let opcode = (insn >> 21) & 0xf;
        // TST/TEQ/CMP/CMN do not write their Rd field.
        if (8..=11).contains(&opcode) {
            return false;
        }

        info.cond = BranchCond::from_bits(insn >> 28);
        info.reg1 = Some(((insn >> 16) & 0xf) as usize);
        if form == 1 {
            info.reg2 = None;
            info.disp = expand_modified_immediate(insn & 0xfff);
            info.mode = BranchDisp::Normal;
        } else {
            info.reg2 = Some((insn & 0xf) as usize);
            info.disp = ((insn >> 7) & 0x1f) as i32;
            info.mode = decode_shift_mode(info.disp as u8, ((insn >> 5) & 3) as u8);
        }

        info.ty = match opcode {
            0 => BranchType::AndPc,
            1 => BranchType::EorPc,
            2 => BranchType::SubPc,
            3 => BranchType::RsbPc,
            4 => BranchType::AddPc,
            5 => BranchType::AdcPc,
            6 => BranchType::SbcPc,
            7 => BranchType::RscPc,
            12 => BranchType::OrrPc,
            13 => {
                // MOV has no first operand; the register form moves reg2.
                if form == 1 {
                    info.reg1 = None;
                } else {
                    info.reg1 = info.reg2.take();
                }
                BranchType::MovPc
            }
            14 => BranchType::BicPc,
            _ => {
                if form == 1 {
                    info.reg1 = None;
                }
                BranchType::MvnPc
            }
        };

        if info.disp == 0 && info.mode == BranchDisp::Lsl {
            info.mode = BranchDisp::Normal;
        }
        true
    }

    /// LDR pc, [...]
    pub fn get_ldr_pc(insn: u32, info: &mut BranchInfo) -> bool {
        // LDR pc, [<Rn>{, #+/-<imm12>}] and post/pre-indexed forms.
        if (insn & 0x0e50_f000) == 0x0410_f000 {
            info.ty = BranchType::LdrPc;
            info.cond = BranchCond::from_bits(insn >> 28);
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(((insn >> 16) & 0xf) as usize);
            info.disp = 0;
            // The displacement takes part only when pre-indexing.
            if (insn >> 24) & 1 != 0 {
                info.disp = (insn & 0xfff) as i32;
            }
            if (insn >> 23) & 1 == 0 {
                info.disp = -info.disp;
            }
            return true;
        }

        // LDR pc, <label> / LDR pc, [pc, #-0]
        if (insn & 0x0f7f_f000) == 0x051f_f000 {
            info.ty = BranchType::LdrPc;
            info.cond = BranchCond::from_bits(insn >> 28);
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(super::super::REG_PC);
            info.disp = (insn & 0xfff) as i32;
            if (insn >> 23) & 1 == 0 {
                info.disp = -info.disp;
            }
            return true;
        }

        // LDR pc, [<Rn>,+/-<Rm>{, <shift>}]{!} and post-indexed form.
        if (insn & 0x0e50_f010) == 0x0610_f000 {
            info.ty = BranchType::LdrPc;
            info.cond = BranchCond::from_bits(insn >> 28);
            info.reg1 = Some(((insn >> 16) & 0xf) as usize);
            info.reg2 = None;
            info.mode = BranchDisp::Normal;
            info.disp = 0;
            if (insn >> 24) & 1 != 0 {
                info.reg2 = Some((insn & 0xf) as usize);
                info.disp = ((insn >> 7) & 0x1f) as i32;
                info.mode = decode_shift_mode(info.disp as u8, ((insn >> 5) & 3) as u8);
            }
            info.subtract_reg2 = (insn >> 23) & 1 == 0;
            return true;
        }

        false
    }

    /// LDM{IA,IB,DA,DB} <reg>, {...,pc}
    pub fn get_ldm_pc(insn: u32, info: &mut BranchInfo) -> bool {
        if (insn & 0x0fd0_8000) == 0x0890_8000 // LDMIA
            || (insn & 0x0fd0_8000) == 0x0810_8000 // LDMDA
            || (insn & 0x0fd0_8000) == 0x0990_8000 // LDMIB
            || (insn & 0x0fd0_8000) == 0x0910_8000
        // LDMDB
        {
            let writeback = (insn >> 21) & 1 != 0;
            let rn = ((insn >> 16) & 0xf) as usize;
            info.cond = BranchCond::from_bits(insn >> 28);
            info.ty = if (insn & 0x0fd0_0000) == 0x0890_0000 && writeback && rn == super::super::REG_SP
            {
                BranchType::PopPc
            } else {
                BranchType::LdmPc
            };
            info.mode = BranchDisp::Normal;
            info.reg1 = Some(rn);
            // PC is transferred after every lower register in the list.
            info.disp = ((insn & 0x7fff).count_ones() << 2) as i32;
            return true;
        }
        false
    }
}

/// Decode one ARM instruction word.
pub fn arm_branch_info(insn: u32) -> Option<BranchInfo> {
    let mut info = BranchInfo::new();
    let is_branch = arm::get_b(insn, &mut info)
        || arm::get_bx(insn, &mut info)
        || arm::get_alu_pc(insn, &mut info)
        || arm::get_ldr_pc(insn, &mut info)
        || arm::get_ldm_pc(insn, &mut info);
    if is_branch {
        Some(info)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thumb16(w0: u16) -> [u16; 4] {
        [w0, 0, 0, 0]
    }

    fn thumb32(w0: u16, w1: u16) -> [u16; 4] {
        [w0, w1, 0, 0]
    }

    #[test]
    fn thumb_sizes() {
        assert_eq!(thumb_inst_size(0x0000_d002), ThumbInstSize::TwoBytes); // beq
        assert_eq!(thumb_inst_size(0x0000_bf00), ThumbInstSize::TwoBytes); // nop
        assert_eq!(thumb_inst_size(0x0000_e7fe), ThumbInstSize::TwoBytes); // b.n
        assert_eq!(thumb_inst_size(0x0000_f000), ThumbInstSize::FourBytes); // bl prefix
        assert_eq!(thumb_inst_size(0x0000_e8d0), ThumbInstSize::FourBytes); // tbb prefix
    }

    #[test]
    fn thumb_beq_forward() {
        // BEQ +4 at 0x8000 lands at 0x8008 once the pipeline offset is in.
        let info = thumb_branch_info(&thumb16(0xd002)).unwrap();
        assert_eq!(info.ty, BranchType::BccImm);
        assert_eq!(info.cond, BranchCond::Eq);
        assert_eq!(info.disp, 8);
    }

    #[test]
    fn thumb_b_n_backward() {
        // B.N -8: 0xe7fa
        let info = thumb_branch_info(&thumb16(0xe7fa)).unwrap();
        assert_eq!(info.ty, BranchType::BImm);
        assert_eq!(info.disp, -12 + 4);
    }

    #[test]
    fn thumb_register_branches() {
        // BX r3 = 0x4718
        let info = thumb_branch_info(&thumb16(0x4718)).unwrap();
        assert_eq!(info.ty, BranchType::BxReg);
        assert_eq!(info.reg1, Some(3));

        // BLX r4 = 0x47a0
        let info = thumb_branch_info(&thumb16(0x47a0)).unwrap();
        assert_eq!(info.ty, BranchType::BlxReg);
        assert_eq!(info.reg1, Some(4));

        // MOV pc, lr = 0x46f7
        let info = thumb_branch_info(&thumb16(0x46f7)).unwrap();
        assert_eq!(info.ty, BranchType::MovPc);
        assert_eq!(info.reg1, Some(14));
    }

    #[test]
    fn thumb_pop_pc() {
        // POP {r4-r7, pc} = 0xbdf0
        let info = thumb_branch_info(&thumb16(0xbdf0)).unwrap();
        assert_eq!(info.ty, BranchType::PopPc);
        assert_eq!(info.reg1, Some(13));
        assert_eq!(info.disp, 16);
    }

    #[test]
    fn thumb_bl_displacement() {
        // BL +0x100: f000 f880
        let info = thumb_branch_info(&thumb32(0xf000, 0xf880)).unwrap();
        assert_eq!(info.ty, BranchType::BlImm);
        assert_eq!(info.disp, 0x100 + 4);

        // BL -4: f7ff fffe
        let info = thumb_branch_info(&thumb32(0xf7ff, 0xfffe)).unwrap();
        assert_eq!(info.ty, BranchType::BlImm);
        assert_eq!(info.disp, -4 + 4);
    }

    #[test]
    fn thumb_b_w_displacement() {
        // B.W +0x400: f000 ba00
        let info = thumb_branch_info(&thumb32(0xf000, 0xba00)).unwrap();
        assert_eq!(info.ty, BranchType::BImm);
        assert_eq!(info.disp, 0x400 + 4);
    }

    #[test]
    fn thumb_cbz() {
        // CBZ r2, +8: b91a is CBNZ r2 +6... use CBZ r1, #16 = 0xb141
        let info = thumb_branch_info(&thumb16(0xb141)).unwrap();
        assert_eq!(info.ty, BranchType::CbImm);
        assert_eq!(info.disp, 16 + 4);
    }

    #[test]
    fn thumb_it_block() {
        // ITTE EQ = 0xbf06: firstcond=0, mask=0b0110 -> 3 instructions.
        let info = thumb_branch_info(&thumb16(0xbf06)).unwrap();
        assert!(info.it);
        assert_eq!(info.it_count, 3);
        assert_eq!(info.cond, BranchCond::Eq);

        // IT NE = 0xbf18: one instruction.
        let info = thumb_branch_info(&thumb16(0xbf18)).unwrap();
        assert!(info.it);
        assert_eq!(info.it_count, 1);
        assert_eq!(info.cond, BranchCond::Ne);
    }

    #[test]
    fn thumb_tbb_tbh() {
        // TBB [r0, r1] = e8d0 f001
        let info = thumb_branch_info(&thumb32(0xe8d0, 0xf001)).unwrap();
        assert_eq!(info.ty, BranchType::Tbb);
        assert_eq!(info.reg1, Some(0));
        assert_eq!(info.reg2, Some(1));

        // TBH [r2, r3, LSL #1] = e8d2 f013
        let info = thumb_branch_info(&thumb32(0xe8d2, 0xf013)).unwrap();
        assert_eq!(info.ty, BranchType::Tbh);
        assert_eq!(info.reg1, Some(2));
        assert_eq!(info.reg2, Some(3));
        assert_eq!(info.disp, 1);
    }

    #[test]
    fn thumb_ldr_pc_literal() {
        // LDR.W pc, [r0, #16] = f8d0 f010
        let info = thumb_branch_info(&thumb32(0xf8d0, 0xf010)).unwrap();
        assert_eq!(info.ty, BranchType::LdrPc);
        assert_eq!(info.reg1, Some(0));
        assert_eq!(info.disp, 16);
    }

    #[test]
    fn thumb_ldm_and_pop_w() {
        // LDMIA.W r1, {r2, pc} = e891 8004
        let info = thumb_branch_info(&thumb32(0xe891, 0x8004)).unwrap();
        assert_eq!(info.ty, BranchType::LdmPc);
        assert_eq!(info.reg1, Some(1));
        assert_eq!(info.disp, 4);

        // POP.W {r4, pc} = e8bd 8010
        let info = thumb_branch_info(&thumb32(0xe8bd, 0x8010)).unwrap();
        assert_eq!(info.ty, BranchType::PopPc);
    }

    #[test]
    fn thumb_non_branch() {
        // NOP
        assert!(thumb_branch_info(&thumb16(0xbf00)).is_none());
        // MOVS r0, #0
        assert!(thumb_branch_info(&thumb16(0x2000)).is_none());
    }

    // The ARM vectors below mirror the encoding table the decoder was
    // originally validated against.
    #[test]
    fn arm_b_family() {
        // B +4 (disp after pipeline: -4+8)
        let info = arm_branch_info(0xeaff_ffff).unwrap();
        assert_eq!(info.ty, BranchType::BImm);
        assert_eq!(info.disp, 4);

        // B -12
        let info = arm_branch_info(0xeaff_fffb).unwrap();
        assert_eq!(info.disp, -12);

        // BL +8
        let info = arm_branch_info(0xeb00_0000).unwrap();
        assert_eq!(info.ty, BranchType::BlImm);
        assert_eq!(info.disp, 8);

        // BLEQ -12
        let info = arm_branch_info(0x0bff_fffb).unwrap();
        assert_eq!(info.ty, BranchType::BlImm);
        assert_eq!(info.cond, BranchCond::Eq);

        // BLX +8 (NV space)
        let info = arm_branch_info(0xfa00_0000).unwrap();
        assert_eq!(info.ty, BranchType::BlxImm);
        assert_eq!(info.cond, BranchCond::Al);
        assert_eq!(info.disp, 8);

        // BLX +18 (H bit set)
        let info = arm_branch_info(0xfb00_0002).unwrap();
        assert_eq!(info.ty, BranchType::BlxImm);
        assert_eq!(info.disp, 8 + 2 + 8);
    }

    #[test]
    fn arm_bx_family() {
        // BX r10
        let info = arm_branch_info(0xe12f_ff1a).unwrap();
        assert_eq!(info.ty, BranchType::BxReg);
        assert_eq!(info.reg1, Some(10));

        // BLXEQ r11
        let info = arm_branch_info(0x012f_ff3b).unwrap();
        assert_eq!(info.ty, BranchType::BlxReg);
        assert_eq!(info.reg1, Some(11));
        assert_eq!(info.cond, BranchCond::Eq);
    }

    #[test]
    fn arm_ldr_pc_forms() {
        // LDR pc, [r11, #-1234]
        let info = arm_branch_info(0xe51b_f4d2).unwrap();
        assert_eq!(info.ty, BranchType::LdrPc);
        assert_eq!(info.reg1, Some(11));
        assert_eq!(info.disp, -1234);

        // LDR pc, [r11, #+1234]
        let info = arm_branch_info(0xe59b_f4d2).unwrap();
        assert_eq!(info.disp, 1234);

        // LDR pc, [r11], #-1234: post-indexed, no displacement applied.
        let info = arm_branch_info(0xe41b_f4d2).unwrap();
        assert_eq!(info.disp, 0);

        // LDR pc, <label> backward
        let info = arm_branch_info(0xe51f_f00c).unwrap();
        assert_eq!(info.reg1, Some(15));
        assert_eq!(info.disp, -12);

        // LDR pc, [r1, +r2]
        let info = arm_branch_info(0xe791_f002).unwrap();
        assert_eq!(info.reg1, Some(1));
        assert_eq!(info.reg2, Some(2));
        assert!(!info.subtract_reg2);

        // LDR pc, [r1, -r2]
        let info = arm_branch_info(0xe711_f002).unwrap();
        assert!(info.subtract_reg2);

        // LDR pc, [r1, +r2, LSL #2]
        let info = arm_branch_info(0xe791_f102).unwrap();
        assert_eq!(info.mode, BranchDisp::Lsl);
        assert_eq!(info.disp, 2);

        // LDR pc, [r1, -r2, RRX]
        let info = arm_branch_info(0xe711_f062).unwrap();
        assert_eq!(info.mode, BranchDisp::Rrx);
    }

    #[test]
    fn arm_ldm_forms() {
        // POP {r4-r7, pc} == LDMIA sp!, {...}
        let info = arm_branch_info(0xe8bd_80f0).unwrap();
        assert_eq!(info.ty, BranchType::PopPc);
        assert_eq!(info.reg1, Some(13));
        assert_eq!(info.disp, 16);

        // LDMIA r1!, {r3, r4, pc}
        let info = arm_branch_info(0xe8b1_8018).unwrap();
        assert_eq!(info.ty, BranchType::LdmPc);
        assert_eq!(info.reg1, Some(1));
        assert_eq!(info.disp, 8);

        // LDMDB r6!, {r3, r4, pc}
        let info = arm_branch_info(0xe936_8018).unwrap();
        assert_eq!(info.ty, BranchType::LdmPc);
    }

    #[test]
    fn arm_alu_pc_forms() {
        // MOV pc, lr
        let info = arm_branch_info(0xe1a0_f00e).unwrap();
        assert_eq!(info.ty, BranchType::MovPc);
        assert_eq!(info.reg1, Some(14));
        assert_eq!(info.reg2, None);

        // MOV pc, #0x1200
        let info = arm_branch_info(0xe3a0_fc12).unwrap();
        assert_eq!(info.ty, BranchType::MovPc);
        assert_eq!(info.reg1, None);
        assert_eq!(info.disp, 0x1200);

        // ADD pc, lr, #0x1f00
        let info = arm_branch_info(0xe28e_fc1f).unwrap();
        assert_eq!(info.ty, BranchType::AddPc);
        assert_eq!(info.reg1, Some(14));
        assert_eq!(info.disp, 0x1f00);

        // SUB pc, lr, r1
        let info = arm_branch_info(0xe04e_f001).unwrap();
        assert_eq!(info.ty, BranchType::SubPc);
        assert_eq!(info.reg1, Some(14));
        assert_eq!(info.reg2, Some(1));

        // CMP does not branch even with the mask shape.
        assert!(arm_branch_info(0xe15e_f001).is_none());
    }

    #[test]
    fn arm_non_branch() {
        // MOV r0, r1
        assert!(arm_branch_info(0xe1a0_0001).is_none());
        // STR r0, [r1]
        assert!(arm_branch_info(0xe581_0000).is_none());
    }
}
