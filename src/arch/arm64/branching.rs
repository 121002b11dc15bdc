//! Decoding of the AArch64 instructions that can change PC.
//!
//! ```text
//! Conditional:   b.cond i   cbz/cbnz r, i   tbz/tbnz r, #u, i
//! Unconditional: b i   bl i   br r   blr r   ret {r}
//! ```

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BranchType {
    BImm,
    BlImm,
    BccImm,
    BlrReg,
    BrReg,
    Ret,
    CbImm,
    TbImm,
}

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
    fn from_bits(bits: u32) -> BranchCond {
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
    /// Only used by `BccImm`.
    pub cond: BranchCond,
    /// True when the tested register is a w register.
    pub half_reg: bool,
    pub reg: Option<usize>,
    pub disp: i64,
    /// Bit number tested by TBZ/TBNZ.
    pub offset: u32,
}

fn sign_ext(n: u64, size: u32) -> i64 {
    let sh = 64 - size;
    ((n << sh) as i64) >> sh
}

/// B <imm> / BL <imm> / B.<cond> <imm>
fn get_b(insn: u32, info: &mut BranchInfo) -> bool {
    if (insn & 0x3c00_0000) == 0x1400_0000 {
        let (disp, size) = if (insn >> 30) & 1 != 0 {
            info.ty = BranchType::BccImm;
            info.cond = BranchCond::from_bits(insn & 0xf);
            (u64::from((insn & 0x00ff_ffe0) >> 5), 21)
        } else {
            info.ty = if (insn >> 31) & 1 != 0 {
                BranchType::BlImm
            } else {
                BranchType::BImm
            };
            (u64::from(insn & 0x03ff_ffff), 28)
        };
        info.disp = sign_ext(disp << 2, size);
        return true;
    }
    false
}

/// BR <reg> / BLR <reg> / RET {<reg>}
fn get_br(insn: u32, info: &mut BranchInfo) -> bool {
    info.ty = match insn & 0xffff_fc1f {
        0xd61f_0000 => BranchType::BrReg,
        0xd63f_0000 => BranchType::BlrReg,
        0xd65f_0000 => BranchType::Ret,
        _ => return false,
    };
    info.reg = Some(((insn >> 5) & 0x1f) as usize);
    true
}

/// CB{Z,NZ} <reg>, <imm> / TB{Z,NZ} <reg>, #<bit>, <imm>
fn get_bz(insn: u32, info: &mut BranchInfo) -> bool {
    if (insn & 0x7c00_0000) == 0x3400_0000 {
        info.reg = Some((insn & 0x1f) as usize);
        info.half_reg = (insn >> 31) & 1 == 0;

        if (insn >> 25) & 1 != 0 {
            info.ty = BranchType::TbImm;
            info.disp = sign_ext(u64::from((insn & 0x007f_ffe0) >> 5) << 2, 16);
            info.offset = (insn & 0x00f8_0000) >> 19;
            if !info.half_reg {
                info.offset += 32;
            }
        } else {
            info.ty = BranchType::CbImm;
            info.disp = sign_ext(u64::from((insn & 0x00ff_ffe0) >> 5) << 2, 21);
        }
        return true;
    }
    false
}

/// Decode one AArch64 instruction word.
pub fn arm64_branch_info(insn: u32) -> Option<BranchInfo> {
    let mut info = BranchInfo {
        ty: BranchType::BImm,
        cond: BranchCond::Nv,
        half_reg: false,
        reg: None,
        disp: 0,
        offset: 0,
    };

    if get_b(insn, &mut info) || get_br(insn, &mut info) || get_bz(insn, &mut info) {
        Some(info)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn b_and_bl() {
        // B +8 = 0x14000002
        let info = arm64_branch_info(0x1400_0002).unwrap();
        assert_eq!(info.ty, BranchType::BImm);
        assert_eq!(info.disp, 8);

        // B -4 = 0x17ffffff
        let info = arm64_branch_info(0x17ff_ffff).unwrap();
        assert_eq!(info.disp, -4);

        // BL +16 = 0x94000004
        let info = arm64_branch_info(0x9400_0004).unwrap();
        assert_eq!(info.ty, BranchType::BlImm);
        assert_eq!(info.disp, 16);
    }

    #[test]
    fn bcc() {
        // B.EQ +8 = 0x54000040
        let info = arm64_branch_info(0x5400_0040).unwrap();
        assert_eq!(info.ty, BranchType::BccImm);
        assert_eq!(info.cond, BranchCond::Eq);
        assert_eq!(info.disp, 8);

        // B.NE -8 = 0x54ffffc1
        let info = arm64_branch_info(0x54ff_ffc1).unwrap();
        assert_eq!(info.cond, BranchCond::Ne);
        assert_eq!(info.disp, -8);
    }

    #[test]
    fn register_branches() {
        // BR x3 = 0xd61f0060
        let info = arm64_branch_info(0xd61f_0060).unwrap();
        assert_eq!(info.ty, BranchType::BrReg);
        assert_eq!(info.reg, Some(3));

        // BLR x5 = 0xd63f00a0
        let info = arm64_branch_info(0xd63f_00a0).unwrap();
        assert_eq!(info.ty, BranchType::BlrReg);
        assert_eq!(info.reg, Some(5));

        // RET (x30) = 0xd65f03c0
        let info = arm64_branch_info(0xd65f_03c0).unwrap();
        assert_eq!(info.ty, BranchType::Ret);
        assert_eq!(info.reg, Some(30));
    }

    #[test]
    fn compare_and_test_branches() {
        // CBZ w1, +16 = 0x34000081
        let info = arm64_branch_info(0x3400_0081).unwrap();
        assert_eq!(info.ty, BranchType::CbImm);
        assert_eq!(info.reg, Some(1));
        assert!(info.half_reg);
        assert_eq!(info.disp, 16);

        // CBNZ x2, -8 = 0xb5ffffc2
        let info = arm64_branch_info(0xb5ff_ffc2).unwrap();
        assert_eq!(info.ty, BranchType::CbImm);
        assert!(!info.half_reg);
        assert_eq!(info.disp, -8);

        // TBZ w0, #5, +8 = 0x36280040
        let info = arm64_branch_info(0x3628_0040).unwrap();
        assert_eq!(info.ty, BranchType::TbImm);
        assert_eq!(info.offset, 5);
        assert_eq!(info.disp, 8);

        // TBNZ x7, #33, +4 = 0xb7080027
        let info = arm64_branch_info(0xb708_0027).unwrap();
        assert_eq!(info.ty, BranchType::TbImm);
        assert_eq!(info.offset, 33);
        assert_eq!(info.disp, 4);
    }

    #[test]
    fn non_branches() {
        // NOP
        assert!(arm64_branch_info(0xd503_201f).is_none());
        // ADD x0, x1, x2
        assert!(arm64_branch_info(0x8b02_0020).is_none());
    }
}
