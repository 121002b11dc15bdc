//! Software breakpoints: trap opcodes written over the debuggee's
//! instruction stream, with the original bytes saved for restore.

use crate::arch::arm::branching::{thumb_inst_size, ThumbInstSize};
use crate::arch::{CpuArch, CpuState};
use crate::breakpoint::{fill_stop_reason, Lifetime, Mode, RemoveOutcome, Site, SiteRegistry};
use crate::error::{ErrorCode, Result};
use crate::memory::TraceeMemory;
use crate::stop_info::{StopInfo, ThreadState};
use crate::types::Address;
use std::collections::BTreeMap;

pub struct SoftwareBreakpointManager {
    arch: CpuArch,
    registry: SiteRegistry,
    /// Original bytes keyed by site address while installed.
    saved_insns: BTreeMap<u64, Vec<u8>>,
    enabled: bool,
}

impl SoftwareBreakpointManager {
    pub fn new(arch: CpuArch) -> SoftwareBreakpointManager {
        SoftwareBreakpointManager {
            arch,
            registry: SiteRegistry::new(),
            saved_insns: BTreeMap::new(),
            enabled: false,
        }
    }

    pub fn arch(&self) -> CpuArch {
        self.arch
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn site_count(&self) -> usize {
        self.registry.len()
    }

    fn validate(&self, address: Address, size: usize, mode: Mode) -> Result<()> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        if mode != Mode::EXEC {
            return Err(ErrorCode::InvalidArgument);
        }
        if !self.arch.valid_breakpoint_size(size) {
            debug!("unsupported breakpoint size {}", size);
            return Err(ErrorCode::InvalidArgument);
        }
        Ok(())
    }

    /// Register an exec breakpoint of a known size. On ARM the Thumb bit
    /// is stripped before the address is stored.
    pub fn add(
        &mut self,
        mem: &mut dyn TraceeMemory,
        address: Address,
        lifetime: Lifetime,
        size: usize,
        mode: Mode,
    ) -> Result<()> {
        let address = if self.arch == CpuArch::Arm {
            Address::new(address.value() & !1)
        } else {
            address
        };
        self.validate(address, size, mode)?;

        if self.registry.add(address, lifetime, size, mode)? && self.enabled {
            let site = self.registry.get(address.value()).unwrap().clone();
            self.enable_location(mem, &site)?;
        }
        Ok(())
    }

    /// Register an ARM exec breakpoint without a caller-supplied size: the
    /// size is discovered from the Thumb bit of the address (or
    /// `is_thumb`, the current CPSR.T) and, for Thumb, from the
    /// instruction under the address. The size convention is byte count,
    /// with 3 denoting a 4-byte Thumb-2 opcode.
    pub fn add_discovering_size(
        &mut self,
        mem: &mut dyn TraceeMemory,
        address: Address,
        lifetime: Lifetime,
        mode: Mode,
        is_thumb: bool,
    ) -> Result<()> {
        if self.arch != CpuArch::Arm {
            return Err(ErrorCode::Unsupported);
        }
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }

        let thumb = address.value() & 1 != 0 || is_thumb;
        let size = if thumb {
            let insn = mem.read_u32(address.value() & !1)?;
            match thumb_inst_size(insn) {
                ThumbInstSize::TwoBytes => 2,
                ThumbInstSize::FourBytes => 3,
            }
        } else {
            4
        };

        self.add(mem, address, lifetime, size, mode)
    }

    pub fn remove(&mut self, mem: &mut dyn TraceeMemory, address: Address) -> Result<()> {
        debug_assert!(self.arch != CpuArch::Arm || address.value() & 1 == 0);
        match self.registry.remove(address)? {
            RemoveOutcome::Kept => Ok(()),
            RemoveOutcome::Erased(site) => {
                if self.enabled {
                    self.disable_location(mem, &site)?;
                }
                Ok(())
            }
        }
    }

    pub fn has(&self, address: Address) -> bool {
        debug_assert!(self.arch != CpuArch::Arm || address.value() & 1 == 0);
        self.registry.has(address)
    }

    pub fn enumerate(&self, cb: impl FnMut(&Site)) {
        self.registry.enumerate(cb);
    }

    /// Install every registered site. Idempotent; between `enable` and
    /// `disable` the debuggee's instruction stream carries the traps.
    pub fn enable(&mut self, mem: &mut dyn TraceeMemory) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        for address in self.registry.addresses() {
            let site = self.registry.get(address).unwrap().clone();
            self.enable_location(mem, &site)?;
        }
        self.enabled = true;
        Ok(())
    }

    /// Restore every installed site and drop the planner's one-shots.
    pub fn disable(&mut self, mem: &mut dyn TraceeMemory) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for address in self.registry.addresses() {
            let site = self.registry.get(address).unwrap().clone();
            self.disable_location(mem, &site)?;
        }
        self.registry.collect_one_shots();
        self.enabled = false;
        Ok(())
    }

    /// Forget every site, restoring original bytes first when installed.
    /// This is the detach path; the debuggee keeps running afterwards.
    pub fn clear(&mut self, mem: &mut dyn TraceeMemory) -> Result<()> {
        self.disable(mem)?;
        self.registry.clear();
        self.saved_insns.clear();
        Ok(())
    }

    fn enable_location(&mut self, mem: &mut dyn TraceeMemory, site: &Site) -> Result<()> {
        let opcode = self
            .arch
            .trap_opcode(site.size)
            .ok_or(ErrorCode::InvalidArgument)?;

        let mut old = vec![0u8; opcode.len()];
        mem.read_exact(site.address.value(), &mut old).map_err(|e| {
            error!("cannot enable breakpoint at {:#x}", site.address.value());
            e
        })?;

        mem.write_memory(site.address.value(), opcode).map_err(|e| {
            error!("cannot enable breakpoint at {:#x}", site.address.value());
            e
        })?;

        debug!(
            "set breakpoint instruction at {:#x} (saved insn {:02x?})",
            site.address.value(),
            old
        );
        self.saved_insns.insert(site.address.value(), old);
        Ok(())
    }

    fn disable_location(&mut self, mem: &mut dyn TraceeMemory, site: &Site) -> Result<()> {
        let old = self
            .saved_insns
            .remove(&site.address.value())
            .ok_or(ErrorCode::NotFound)?;

        mem.write_memory(site.address.value(), &old).map_err(|e| {
            error!("cannot restore instruction at {:#x}", site.address.value());
            e
        })?;

        debug!(
            "reset instruction {:02x?} at {:#x}",
            old,
            site.address.value()
        );
        Ok(())
    }

    /// Decide whether a stopped thread's trap belongs to one of our sites.
    /// On x86 the trap byte has already advanced PC; the lookup happens at
    /// the rewound address and, on a hit, `state` is updated so the caller
    /// can write the corrected PC back.
    pub fn hit(&mut self, state: &mut CpuState, thread_state: ThreadState) -> Option<Site> {
        // A hardware single-step trap is not ours to claim; where stepping
        // is emulated with planted breakpoints, it is.
        if thread_state == ThreadState::Stepped && self.arch.has_hardware_single_step() {
            return None;
        }

        let rewind = self.arch.breakpoint_pc_adjustment();
        let pc = state.pc().wrapping_sub(rewind);
        let site = self.registry.hit(pc)?;
        if rewind != 0 {
            state.set_pc(pc);
        }
        Some(site)
    }

    pub fn fill_stop_info(&self, site: &Site, stop_info: &mut StopInfo) {
        fill_stop_reason(site, -1, stop_info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::FakeMemory;

    #[test]
    fn x86_round_trip_restores_original_bytes() {
        let mut mem = FakeMemory::new();
        // mov rbp, rsp
        mem.load(0x401020, &[0x48, 0x89, 0xe5]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::X64);
        bpm.add(
            &mut mem,
            Address::new(0x401020),
            Lifetime::PERMANENT,
            1,
            Mode::EXEC,
        )
        .unwrap();

        // Not yet installed.
        assert_eq!(mem.byte(0x401020), Some(0x48));

        bpm.enable(&mut mem).unwrap();
        assert_eq!(mem.byte(0x401020), Some(0xcc));
        assert_eq!(mem.byte(0x401021), Some(0x89));

        bpm.disable(&mut mem).unwrap();
        assert_eq!(mem.byte(0x401020), Some(0x48));

        bpm.remove(&mut mem, Address::new(0x401020)).unwrap();
        assert!(!bpm.has(Address::new(0x401020)));
    }

    #[test]
    fn add_installs_when_already_enabled() {
        let mut mem = FakeMemory::new();
        mem.load(0x1000, &[0x90, 0x90]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::X64);
        bpm.enable(&mut mem).unwrap();
        bpm.add(
            &mut mem,
            Address::new(0x1000),
            Lifetime::PERMANENT,
            1,
            Mode::EXEC,
        )
        .unwrap();
        assert_eq!(mem.byte(0x1000), Some(0xcc));

        bpm.remove(&mut mem, Address::new(0x1000)).unwrap();
        assert_eq!(mem.byte(0x1000), Some(0x90));
    }

    #[test]
    fn arm_traps_by_size() {
        let mut mem = FakeMemory::new();
        mem.load(0x8000, &[0x00, 0xbf, 0x00, 0xbf]); // 2-byte site
        mem.load(0x8010, &[0x00, 0xf0, 0x00, 0xf8]); // thumb2 site
        mem.load(0x8020, &[0x00, 0x00, 0xa0, 0xe1]); // arm site

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::Arm);
        bpm.add(&mut mem, Address::new(0x8000), Lifetime::PERMANENT, 2, Mode::EXEC)
            .unwrap();
        bpm.add(&mut mem, Address::new(0x8010), Lifetime::PERMANENT, 3, Mode::EXEC)
            .unwrap();
        bpm.add(&mut mem, Address::new(0x8020), Lifetime::PERMANENT, 4, Mode::EXEC)
            .unwrap();
        bpm.enable(&mut mem).unwrap();

        // udf #1
        assert_eq!(mem.byte(0x8000), Some(0x01));
        assert_eq!(mem.byte(0x8001), Some(0xde));
        // udf.w #0: the "3" size writes a 4-byte opcode.
        assert_eq!(mem.byte(0x8010), Some(0xf0));
        assert_eq!(mem.byte(0x8013), Some(0xa0));
        // udf #16
        assert_eq!(mem.byte(0x8020), Some(0xf0));
        assert_eq!(mem.byte(0x8023), Some(0xe7));

        bpm.disable(&mut mem).unwrap();
        assert_eq!(mem.byte(0x8000), Some(0x00));
        assert_eq!(mem.byte(0x8010), Some(0x00));
        assert_eq!(mem.byte(0x8023), Some(0xe1));
    }

    #[test]
    fn arm_strips_thumb_bit() {
        let mut mem = FakeMemory::new();
        mem.load(0x8000, &[0x00, 0xbf]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::Arm);
        bpm.add(&mut mem, Address::new(0x8001), Lifetime::PERMANENT, 2, Mode::EXEC)
            .unwrap();
        assert!(bpm.has(Address::new(0x8000)));
    }

    #[test]
    fn arm_size_discovery() {
        let mut mem = FakeMemory::new();
        // Thumb-1 nop and a Thumb-2 bl prefix.
        mem.load(0x8000, &[0x00, 0xbf, 0x00, 0xbf]);
        mem.load(0x8010, &[0x00, 0xf0, 0x00, 0xf8]);
        // ARM mov r0, r0.
        mem.load(0x8020, &[0x00, 0x00, 0xa0, 0xe1]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::Arm);
        bpm.add_discovering_size(
            &mut mem,
            Address::new(0x8001),
            Lifetime::PERMANENT,
            Mode::EXEC,
            false,
        )
        .unwrap();
        bpm.add_discovering_size(
            &mut mem,
            Address::new(0x8010),
            Lifetime::PERMANENT,
            Mode::EXEC,
            true,
        )
        .unwrap();
        bpm.add_discovering_size(
            &mut mem,
            Address::new(0x8020),
            Lifetime::PERMANENT,
            Mode::EXEC,
            false,
        )
        .unwrap();

        let mut sizes = std::collections::BTreeMap::new();
        bpm.enumerate(|site| {
            sizes.insert(site.address.value(), site.size);
        });
        assert_eq!(sizes[&0x8000], 2);
        assert_eq!(sizes[&0x8010], 3);
        assert_eq!(sizes[&0x8020], 4);
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut mem = FakeMemory::new();
        let mut bpm = SoftwareBreakpointManager::new(CpuArch::X64);
        assert_eq!(
            bpm.add(&mut mem, Address::new(0x1), Lifetime::PERMANENT, 4, Mode::EXEC),
            Err(ErrorCode::InvalidArgument)
        );
        assert_eq!(
            bpm.add(&mut mem, Address::new(0x1), Lifetime::PERMANENT, 1, Mode::WRITE),
            Err(ErrorCode::InvalidArgument)
        );
        assert_eq!(
            bpm.add(&mut mem, Address::invalid(), Lifetime::PERMANENT, 1, Mode::EXEC),
            Err(ErrorCode::InvalidArgument)
        );
        assert_eq!(
            bpm.remove(&mut mem, Address::new(0x5000)),
            Err(ErrorCode::NotFound)
        );
    }

    #[test]
    fn x86_hit_rewinds_pc() {
        let mut mem = FakeMemory::new();
        mem.load(0x401020, &[0x48, 0x89, 0xe5]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::X64);
        bpm.add(
            &mut mem,
            Address::new(0x401020),
            Lifetime::PERMANENT,
            1,
            Mode::EXEC,
        )
        .unwrap();
        bpm.enable(&mut mem).unwrap();

        // The int3 advanced PC by one past the site.
        let mut state = CpuState::new(CpuArch::X64, false);
        state.set_pc(0x401021);
        let site = bpm.hit(&mut state, ThreadState::Stopped).unwrap();
        assert_eq!(site.address, Address::new(0x401020));
        assert_eq!(state.pc(), 0x401020);

        // A stop somewhere else is not attributed.
        state.set_pc(0x500000);
        assert!(bpm.hit(&mut state, ThreadState::Stopped).is_none());

        // A single-step trap is never claimed.
        state.set_pc(0x401021);
        assert!(bpm.hit(&mut state, ThreadState::Stepped).is_none());
    }

    #[test]
    fn arm_hit_does_not_rewind() {
        let mut mem = FakeMemory::new();
        mem.load(0x8000, &[0x00, 0xbf]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::Arm);
        bpm.add(&mut mem, Address::new(0x8000), Lifetime::PERMANENT, 2, Mode::EXEC)
            .unwrap();

        let mut state = CpuState::new(CpuArch::Arm, true);
        state.set_pc(0x8000);
        let site = bpm.hit(&mut state, ThreadState::Stopped).unwrap();
        assert_eq!(site.address, Address::new(0x8000));
        assert_eq!(state.pc(), 0x8000);
    }

    #[test]
    fn one_shot_gone_after_disable() {
        let mut mem = FakeMemory::new();
        mem.load(0x8000, &[0x00, 0xbf]);
        mem.load(0x8008, &[0x00, 0xbf]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::Arm);
        bpm.add(
            &mut mem,
            Address::new(0x8000),
            Lifetime::TEMP_ONE_SHOT,
            2,
            Mode::EXEC,
        )
        .unwrap();
        bpm.add(
            &mut mem,
            Address::new(0x8008),
            Lifetime::PERMANENT,
            2,
            Mode::EXEC,
        )
        .unwrap();

        bpm.enable(&mut mem).unwrap();
        bpm.disable(&mut mem).unwrap();

        assert!(!bpm.has(Address::new(0x8000)));
        assert!(bpm.has(Address::new(0x8008)));
        // The debuggee byte stream is back to the original.
        assert_eq!(mem.byte(0x8000), Some(0x00));
        assert_eq!(mem.byte(0x8008), Some(0x00));
    }

    #[test]
    fn detach_clear_restores_bytes() {
        let mut mem = FakeMemory::new();
        mem.load(0x1000, &[0x55, 0x48, 0x89]);

        let mut bpm = SoftwareBreakpointManager::new(CpuArch::X64);
        bpm.add(&mut mem, Address::new(0x1000), Lifetime::PERMANENT, 1, Mode::EXEC)
            .unwrap();
        bpm.enable(&mut mem).unwrap();
        assert_eq!(mem.byte(0x1000), Some(0xcc));

        bpm.clear(&mut mem).unwrap();
        assert_eq!(mem.byte(0x1000), Some(0x55));
        assert_eq!(bpm.site_count(), 0);
    }
}
