//! Hardware breakpoints and watchpoints: a fixed-capacity slot vector
//! mapped onto the CPU debug registers, programmed per thread.
//!
//! Pure read watchpoints do not exist in the hardware; a read request is
//! programmed as read|write and filtered in software by comparing the
//! watched memory against its last observed value on every hit.

use crate::arch::CpuArch;
use crate::breakpoint::{fill_stop_reason, Lifetime, Mode, RemoveOutcome, Site, SiteRegistry};
use crate::error::{ErrorCode, Result};
use crate::memory::TraceeMemory;
use crate::stop_info::{StopInfo, ThreadState};
use crate::types::Address;
use bit_field::BitField;
use libc::pid_t;
use std::collections::BTreeSet;

const X86_STATUS_REG: usize = 6;
const X86_CONTROL_REG: usize = 7;

/// Per-thread debug-register access, implemented by the trace backend.
/// The x86 path goes through the numbered dr0-dr7 interface; ARM targets
/// program value/control slot pairs instead.
pub trait DebugRegisterAccess {
    fn read_dr(&mut self, _tid: pid_t, _idx: usize) -> Result<u64> {
        Err(ErrorCode::Unsupported)
    }

    fn write_dr(&mut self, _tid: pid_t, _idx: usize, _value: u64) -> Result<()> {
        Err(ErrorCode::Unsupported)
    }

    fn write_breakpoint_slot(
        &mut self,
        _tid: pid_t,
        _slot: usize,
        _address: u64,
        _ctrl: u32,
    ) -> Result<()> {
        Err(ErrorCode::Unsupported)
    }

    fn write_watchpoint_slot(
        &mut self,
        _tid: pid_t,
        _slot: usize,
        _address: u64,
        _ctrl: u32,
    ) -> Result<()> {
        Err(ErrorCode::Unsupported)
    }
}

/// Program slot `idx` of an x86 DR7 image for `(mode, size)`.
///
/// Layout, per slot i: G_i at bit 2i+1; R/W_i at bits 16+4i..16+4i+1
/// (exec=00, write=01, read|write=11); LEN_i at bits 16+4i+2..16+4i+3
/// (1=00, 2=01, 4=11, 8=10, exec always 00). The top half of the register
/// must read back as zero.
pub fn enable_debug_ctrl(ctrl: u64, idx: usize, mode: Mode, size: usize) -> Result<u64> {
    let mut ctrl = ctrl;
    let enable_bit = 1 + idx * 2;
    let info_bit = 16 + idx * 4;

    ctrl.set_bit(enable_bit, true);

    if mode == Mode::EXEC {
        ctrl.set_bit(info_bit, false);
        ctrl.set_bit(info_bit + 1, false);
    } else if mode == Mode::WRITE {
        ctrl.set_bit(info_bit, true);
        ctrl.set_bit(info_bit + 1, false);
    } else if mode.intersects(Mode::READ) {
        ctrl.set_bit(info_bit, true);
        ctrl.set_bit(info_bit + 1, true);
    } else {
        return Err(ErrorCode::InvalidArgument);
    }

    let len_bits = if mode == Mode::EXEC {
        0b00
    } else {
        match size {
            1 => 0b00,
            2 => 0b01,
            4 => 0b11,
            8 => 0b10,
            _ => {
                error!("invalid hardware breakpoint size: {}", size);
                return Err(ErrorCode::InvalidArgument);
            }
        }
    };
    ctrl.set_bit(info_bit + 2, len_bits & 1 != 0);
    ctrl.set_bit(info_bit + 3, len_bits & 2 != 0);

    ctrl.set_bits(32..64, 0);
    Ok(ctrl)
}

/// Clear slot `idx` in an x86 DR7 image.
pub fn disable_debug_ctrl(ctrl: u64, idx: usize) -> u64 {
    let mut ctrl = ctrl;
    ctrl.set_bit(1 + idx * 2, false);
    ctrl.set_bits(32..64, 0);
    ctrl
}

/// Build the kernel control word for an ARM/ARM64 break- or watchpoint
/// slot: byte-address-select from bit 5, load/store at bits 4:3, user
/// privilege at bits 2:1, enable at bit 0.
pub fn hw_stoppoint_ctrl(arch: CpuArch, mode: Mode, size: usize, address: u64) -> Result<u32> {
    let (bas, lsc) = if mode == Mode::EXEC {
        let bas = match (arch, size) {
            (CpuArch::Arm, 2) => 0x3,
            (CpuArch::Arm, _) | (CpuArch::Arm64, _) => 0xf,
            _ => return Err(ErrorCode::Unsupported),
        };
        (bas, 0u32)
    } else {
        let align_mask = match arch {
            CpuArch::Arm => 3,
            CpuArch::Arm64 => 7,
            _ => return Err(ErrorCode::Unsupported),
        };
        let bas = ((1u32 << size) - 1) << (address & align_mask);
        let lsc = match (mode.intersects(Mode::READ), mode.contains(Mode::WRITE)) {
            (true, true) => 0b11,
            (true, false) => 0b01,
            (false, true) => 0b10,
            (false, false) => return Err(ErrorCode::InvalidArgument),
        };
        (bas, lsc)
    };

    Ok((bas << 5) | (lsc << 3) | (0b10 << 1) | 1)
}

pub struct HardwareBreakpointManager {
    arch: CpuArch,
    max_slots: usize,
    registry: SiteRegistry,
    /// Slot index -> site address; zero marks a free slot.
    locations: Vec<u64>,
    enabled_tids: BTreeSet<pid_t>,
}

impl HardwareBreakpointManager {
    pub fn new(arch: CpuArch, max_slots: usize) -> HardwareBreakpointManager {
        HardwareBreakpointManager {
            arch,
            max_slots,
            registry: SiteRegistry::new(),
            locations: vec![0; max_slots],
            enabled_tids: BTreeSet::new(),
        }
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn site_count(&self) -> usize {
        self.registry.len()
    }

    pub fn enabled(&self, tid: pid_t) -> bool {
        self.enabled_tids.contains(&tid)
    }

    fn validate(&self, address: Address, size: usize, mode: Mode) -> Result<()> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        if mode.contains(Mode::EXEC) && mode.intersects(Mode::READ | Mode::WRITE) {
            return Err(ErrorCode::InvalidArgument);
        }
        if mode == Mode::EXEC {
            let wanted = match self.arch {
                CpuArch::X86 | CpuArch::X64 => 1,
                CpuArch::Arm | CpuArch::Arm64 => 4,
            };
            if size != wanted && !(self.arch == CpuArch::Arm && size == 2) {
                return Err(ErrorCode::InvalidArgument);
            }
            return Ok(());
        }

        match size {
            1 | 2 | 4 => {}
            8 => warn!("8-byte watchpoints are not supported on all architectures"),
            _ => return Err(ErrorCode::InvalidArgument),
        }
        // The hardware compares aligned cells; an unaligned watch would
        // silently cover the wrong bytes.
        if address.value() % size as u64 != 0 {
            return Err(ErrorCode::InvalidArgument);
        }
        Ok(())
    }

    /// Register a hardware stoppoint. A pure read request keeps its mode
    /// for reporting, but is programmed read|write and filtered on hit.
    pub fn add(
        &mut self,
        mem: &dyn TraceeMemory,
        address: Address,
        lifetime: Lifetime,
        size: usize,
        mode: Mode,
    ) -> Result<()> {
        self.validate(address, size, mode)?;
        if self.registry.len() >= self.max_slots && !self.registry.has(address) {
            return Err(ErrorCode::InvalidArgument);
        }

        let created = self.registry.add(address, lifetime, size, mode)?;
        if created {
            // Seed the software read filter with the current content.
            let value = mem.read_u64(address.value()).unwrap_or(0);
            self.registry.get_mut(address.value()).unwrap().memory_value = value;
        }
        Ok(())
    }

    pub fn remove(&mut self, address: Address) -> Result<()> {
        match self.registry.remove(address)? {
            RemoveOutcome::Kept => Ok(()),
            RemoveOutcome::Erased(site) => {
                if let Some(slot) = self.slot_of(site.address.value()) {
                    self.locations[slot] = 0;
                }
                Ok(())
            }
        }
    }

    pub fn has(&self, address: Address) -> bool {
        self.registry.has(address)
    }

    pub fn enumerate(&self, cb: impl FnMut(&Site)) {
        self.registry.enumerate(cb);
    }

    pub fn clear(&mut self) {
        self.registry.clear();
        self.locations = vec![0; self.max_slots];
        self.enabled_tids.clear();
    }

    fn slot_of(&self, address: u64) -> Option<usize> {
        if address == 0 {
            return None;
        }
        self.locations.iter().position(|&a| a == address)
    }

    fn allocate_slot(&mut self, address: u64) -> Result<usize> {
        if let Some(slot) = self.slot_of(address) {
            return Ok(slot);
        }
        let slot = self
            .locations
            .iter()
            .position(|&a| a == 0)
            .ok_or(ErrorCode::InvalidArgument)?;
        self.locations[slot] = address;
        Ok(slot)
    }

    /// The mode actually programmed into the hardware.
    fn effective_mode(site: &Site) -> Mode {
        if site.mode == Mode::READ {
            Mode::READ | Mode::WRITE
        } else {
            site.mode
        }
    }

    fn program_slot(
        &mut self,
        dr: &mut dyn DebugRegisterAccess,
        tid: pid_t,
        slot: usize,
        site: &Site,
    ) -> Result<()> {
        let mode = Self::effective_mode(site);
        match self.arch {
            CpuArch::X86 | CpuArch::X64 => {
                dr.write_dr(tid, slot, site.address.value())?;
                let ctrl = dr.read_dr(tid, X86_CONTROL_REG)?;
                let ctrl = enable_debug_ctrl(ctrl, slot, mode, site.size)?;
                dr.write_dr(tid, X86_CONTROL_REG, ctrl)?;
                dr.write_dr(tid, X86_STATUS_REG, 0)?;
            }
            CpuArch::Arm | CpuArch::Arm64 => {
                let ctrl = hw_stoppoint_ctrl(self.arch, mode, site.size, site.address.value())?;
                if mode == Mode::EXEC {
                    dr.write_breakpoint_slot(tid, slot, site.address.value(), ctrl)?;
                } else {
                    dr.write_watchpoint_slot(tid, slot, site.address.value(), ctrl)?;
                }
            }
        }
        Ok(())
    }

    fn clear_slot(
        &mut self,
        dr: &mut dyn DebugRegisterAccess,
        tid: pid_t,
        slot: usize,
        site: &Site,
    ) -> Result<()> {
        match self.arch {
            CpuArch::X86 | CpuArch::X64 => {
                dr.write_dr(tid, slot, 0)?;
                let ctrl = dr.read_dr(tid, X86_CONTROL_REG)?;
                dr.write_dr(tid, X86_CONTROL_REG, disable_debug_ctrl(ctrl, slot))?;
            }
            CpuArch::Arm | CpuArch::Arm64 => {
                if Self::effective_mode(site) == Mode::EXEC {
                    dr.write_breakpoint_slot(tid, slot, 0, 0)?;
                } else {
                    dr.write_watchpoint_slot(tid, slot, 0, 0)?;
                }
            }
        }
        Ok(())
    }

    /// Install every registered site on the given threads (those already
    /// stopped; a running thread cannot have its debug registers written).
    pub fn enable(
        &mut self,
        dr: &mut dyn DebugRegisterAccess,
        mem: &dyn TraceeMemory,
        threads: &[(pid_t, ThreadState)],
    ) -> Result<()> {
        for address in self.registry.addresses() {
            let slot = self.allocate_slot(address)?;
            let site = self.registry.get(address).unwrap().clone();

            for &(tid, state) in threads {
                if state == ThreadState::Stopped && !self.enabled(tid) {
                    self.program_slot(dr, tid, slot, &site)?;
                }
            }

            // Refresh the read-filter baseline at installation time.
            if let Ok(value) = mem.read_u64(address) {
                self.registry.get_mut(address).unwrap().memory_value = value;
            }
        }

        for &(tid, _) in threads {
            self.enabled_tids.insert(tid);
        }
        Ok(())
    }

    /// Uninstall from the given threads; when no thread remains enabled,
    /// the planner's one-shot sites are collected.
    pub fn disable(
        &mut self,
        dr: &mut dyn DebugRegisterAccess,
        threads: &[(pid_t, ThreadState)],
    ) -> Result<()> {
        for address in self.registry.addresses() {
            if let Some(slot) = self.slot_of(address) {
                let site = self.registry.get(address).unwrap().clone();
                for &(tid, state) in threads {
                    if state.is_paused() && self.enabled(tid) {
                        self.clear_slot(dr, tid, slot, &site)?;
                    }
                }
            }
        }

        for &(tid, _) in threads {
            self.enabled_tids.remove(&tid);
        }
        if self.enabled_tids.is_empty() {
            self.registry.collect_one_shots();
        }
        Ok(())
    }

    /// A thread has died; forget its installation mark.
    pub fn forget_thread(&mut self, tid: pid_t) {
        self.enabled_tids.remove(&tid);
    }

    /// Attribute a stop to one of our slots. Returns the slot index and
    /// site, or `None` when the stop is not ours — including a write hit
    /// on a read-only watchpoint, which is suppressed after refreshing the
    /// comparison baseline.
    pub fn hit(
        &mut self,
        dr: &mut dyn DebugRegisterAccess,
        mem: &dyn TraceeMemory,
        tid: pid_t,
        thread_state: ThreadState,
    ) -> Option<(usize, Site)> {
        if self.registry.len() == 0 || thread_state != ThreadState::Stopped {
            return None;
        }
        match self.arch {
            CpuArch::X86 | CpuArch::X64 => {}
            // The kernel reports ARM watchpoint hits through siginfo, not
            // a status register; attribution is left to the fault address.
            CpuArch::Arm | CpuArch::Arm64 => return None,
        }

        let status = dr.read_dr(tid, X86_STATUS_REG).ok()?;
        let slot = (0..self.max_slots).find(|&i| status.get_bit(i))?;
        let address = self.locations[slot];
        debug_assert!(address != 0);

        let requested_mode = self.registry.get(address)?.mode;
        let previous = self.registry.get(address)?.memory_value;
        let current = mem.read_u64(address).unwrap_or(previous);
        self.registry.get_mut(address)?.memory_value = current;

        if requested_mode == Mode::READ && current != previous {
            // The value changed, so this trigger was the write half of the
            // promoted watchpoint; the caller never sees it.
            return None;
        }

        let site = self.registry.hit(address)?;
        Some((slot, site))
    }

    pub fn fill_stop_info(
        &mut self,
        dr: &mut dyn DebugRegisterAccess,
        mem: &dyn TraceeMemory,
        tid: pid_t,
        thread_state: ThreadState,
        stop_info: &mut StopInfo,
    ) -> bool {
        match self.hit(dr, mem, tid, thread_state) {
            Some((slot, site)) => {
                fill_stop_reason(&site, slot as i32, stop_info);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::FakeMemory;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeDebugRegs {
        regs: HashMap<(pid_t, usize), u64>,
        slots: HashMap<(pid_t, usize), (u64, u32, bool)>,
    }

    impl DebugRegisterAccess for FakeDebugRegs {
        fn read_dr(&mut self, tid: pid_t, idx: usize) -> Result<u64> {
            Ok(*self.regs.get(&(tid, idx)).unwrap_or(&0))
        }

        fn write_dr(&mut self, tid: pid_t, idx: usize, value: u64) -> Result<()> {
            self.regs.insert((tid, idx), value);
            Ok(())
        }

        fn write_breakpoint_slot(
            &mut self,
            tid: pid_t,
            slot: usize,
            address: u64,
            ctrl: u32,
        ) -> Result<()> {
            self.slots.insert((tid, slot), (address, ctrl, false));
            Ok(())
        }

        fn write_watchpoint_slot(
            &mut self,
            tid: pid_t,
            slot: usize,
            address: u64,
            ctrl: u32,
        ) -> Result<()> {
            self.slots.insert((tid, slot), (address, ctrl, true));
            Ok(())
        }
    }

    const TID: pid_t = 100;

    fn stopped(tid: pid_t) -> Vec<(pid_t, ThreadState)> {
        vec![(tid, ThreadState::Stopped)]
    }

    #[test]
    fn debug_ctrl_bit_layout() {
        // Write watchpoint of 4 bytes in slot 0: G0, R/W0=01, LEN0=11.
        let ctrl = enable_debug_ctrl(0, 0, Mode::WRITE, 4).unwrap();
        assert_eq!(ctrl, 0b1101_0000_0000_0000_0010);

        // Access watchpoint of 8 bytes in slot 3: G3, R/W3=11, LEN3=10.
        let ctrl = enable_debug_ctrl(0, 3, Mode::READ | Mode::WRITE, 8).unwrap();
        assert_eq!(ctrl, (0b1011u64 << 28) | (1 << 7));

        // Exec breakpoints force LEN=00.
        let ctrl = enable_debug_ctrl(0, 1, Mode::EXEC, 1).unwrap();
        assert_eq!(ctrl, 1 << 3);

        // Slots compose without clobbering each other.
        let ctrl = enable_debug_ctrl(0, 0, Mode::WRITE, 4).unwrap();
        let ctrl = enable_debug_ctrl(ctrl, 1, Mode::EXEC, 1).unwrap();
        let cleared = disable_debug_ctrl(ctrl, 0);
        assert!(!cleared.get_bit(1));
        assert!(cleared.get_bit(3));
        // Disabling leaves the stale R/W and LEN fields alone.
        assert_eq!(cleared.get_bits(16..20), 0b1101);

        // The top half is always zeroed.
        let ctrl = enable_debug_ctrl(u64::max_value(), 0, Mode::EXEC, 1).unwrap();
        assert_eq!(ctrl >> 32, 0);
    }

    #[test]
    fn arm_ctrl_words() {
        // 4-byte write watchpoint at an aligned address: BAS=0b1111,
        // LSC=store, user, enabled.
        let ctrl = hw_stoppoint_ctrl(CpuArch::Arm64, Mode::WRITE, 4, 0x1000).unwrap();
        assert_eq!(ctrl, (0xf << 5) | (0b10 << 3) | (0b10 << 1) | 1);

        // 2-byte access watch at offset 2 selects the high byte pair.
        let ctrl = hw_stoppoint_ctrl(CpuArch::Arm, Mode::READ | Mode::WRITE, 2, 0x1002).unwrap();
        assert_eq!(ctrl, (0b1100 << 5) | (0b11 << 3) | (0b10 << 1) | 1);

        // Thumb exec breakpoint selects a half-word.
        let ctrl = hw_stoppoint_ctrl(CpuArch::Arm, Mode::EXEC, 2, 0x8000).unwrap();
        assert_eq!(ctrl, (0x3 << 5) | (0b10 << 1) | 1);
    }

    #[test]
    fn slot_exhaustion() {
        let mem = FakeMemory::new();
        let mut bpm = HardwareBreakpointManager::new(CpuArch::X64, 4);
        for i in 0..4 {
            bpm.add(
                &mem,
                Address::new(0x1000 + i * 8),
                Lifetime::PERMANENT,
                4,
                Mode::WRITE,
            )
            .unwrap();
        }
        assert_eq!(
            bpm.add(
                &mem,
                Address::new(0x2000),
                Lifetime::PERMANENT,
                4,
                Mode::WRITE
            ),
            Err(ErrorCode::InvalidArgument)
        );
        // Re-adding an existing site is not a new slot.
        bpm.add(
            &mem,
            Address::new(0x1000),
            Lifetime::PERMANENT,
            4,
            Mode::WRITE,
        )
        .unwrap();
    }

    #[test]
    fn validation() {
        let mem = FakeMemory::new();
        let mut bpm = HardwareBreakpointManager::new(CpuArch::X64, 4);

        // Unaligned watchpoints are rejected.
        assert_eq!(
            bpm.add(&mem, Address::new(0x1001), Lifetime::PERMANENT, 4, Mode::WRITE),
            Err(ErrorCode::InvalidArgument)
        );
        // Exec+watch combinations are contradictory.
        assert_eq!(
            bpm.add(
                &mem,
                Address::new(0x1000),
                Lifetime::PERMANENT,
                1,
                Mode::EXEC | Mode::WRITE
            ),
            Err(ErrorCode::InvalidArgument)
        );
        // Watchpoint sizes are powers of two up to 8.
        assert_eq!(
            bpm.add(&mem, Address::new(0x1000), Lifetime::PERMANENT, 3, Mode::WRITE),
            Err(ErrorCode::InvalidArgument)
        );
    }

    #[test]
    fn enable_programs_debug_registers() {
        let mut mem = FakeMemory::new();
        mem.load(0x1000, &[0u8; 8]);
        let mut dr = FakeDebugRegs::default();
        let mut bpm = HardwareBreakpointManager::new(CpuArch::X64, 4);

        bpm.add(&mem, Address::new(0x1000), Lifetime::PERMANENT, 4, Mode::WRITE)
            .unwrap();
        bpm.enable(&mut dr, &mem, &stopped(TID)).unwrap();

        assert!(bpm.enabled(TID));
        assert_eq!(dr.regs[&(TID, 0)], 0x1000);
        let ctrl = dr.regs[&(TID, X86_CONTROL_REG)];
        assert!(ctrl.get_bit(1)); // G0
        assert_eq!(ctrl.get_bits(16..18), 0b01); // write
        assert_eq!(ctrl.get_bits(18..20), 0b11); // len 4
        assert_eq!(dr.regs[&(TID, X86_STATUS_REG)], 0);

        bpm.disable(&mut dr, &stopped(TID)).unwrap();
        assert!(!bpm.enabled(TID));
        assert!(!dr.regs[&(TID, X86_CONTROL_REG)].get_bit(1));
    }

    #[test]
    fn hit_reports_slot_and_site() {
        let mut mem = FakeMemory::new();
        mem.load(0x2000, &[1, 0, 0, 0, 0, 0, 0, 0]);
        let mut dr = FakeDebugRegs::default();
        let mut bpm = HardwareBreakpointManager::new(CpuArch::X64, 4);

        bpm.add(&mem, Address::new(0x2000), Lifetime::PERMANENT, 4, Mode::WRITE)
            .unwrap();
        bpm.enable(&mut dr, &mem, &stopped(TID)).unwrap();

        // Slot 0 fired.
        dr.write_dr(TID, X86_STATUS_REG, 1).unwrap();
        let (slot, site) = bpm.hit(&mut dr, &mem, TID, ThreadState::Stopped).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(site.address, Address::new(0x2000));

        let mut info = StopInfo::new();
        fill_stop_reason(&site, slot as i32, &mut info);
        assert_eq!(info.reason, crate::stop_info::StopReason::WriteWatchpoint);
        assert_eq!(info.watchpoint_index, 0);
    }

    #[test]
    fn read_only_watchpoint_software_filter() {
        let mut mem = FakeMemory::new();
        mem.load(0x7fff1000, &[0u8; 8]);
        let mut dr = FakeDebugRegs::default();
        let mut bpm = HardwareBreakpointManager::new(CpuArch::X64, 4);

        // A pure read request is programmed as read|write.
        bpm.add(&mem, Address::new(0x7fff1000), Lifetime::PERMANENT, 4, Mode::READ)
            .unwrap();
        bpm.enable(&mut dr, &mem, &stopped(TID)).unwrap();
        let ctrl = dr.regs[&(TID, X86_CONTROL_REG)];
        assert_eq!(ctrl.get_bits(16..18), 0b11);

        // The debuggee writes to the cell: the value changed, the hit is
        // suppressed and the baseline refreshed.
        mem.write_memory(0x7fff1000, &[0xaa, 0, 0, 0]).unwrap();
        dr.write_dr(TID, X86_STATUS_REG, 1).unwrap();
        assert!(bpm.hit(&mut dr, &mem, TID, ThreadState::Stopped).is_none());

        // The debuggee reads the cell: unchanged value, reported as a read.
        dr.write_dr(TID, X86_STATUS_REG, 1).unwrap();
        let mut info = StopInfo::new();
        assert!(bpm.fill_stop_info(&mut dr, &mem, TID, ThreadState::Stopped, &mut info));
        assert_eq!(info.reason, crate::stop_info::StopReason::ReadWatchpoint);
        assert_eq!(info.watchpoint_address, Address::new(0x7fff1000));
    }

    #[test]
    fn arm_slot_programming() {
        let mut mem = FakeMemory::new();
        mem.load(0x3000, &[0u8; 8]);
        let mut dr = FakeDebugRegs::default();
        let mut bpm = HardwareBreakpointManager::new(CpuArch::Arm64, 2);

        bpm.add(&mem, Address::new(0x3000), Lifetime::PERMANENT, 8, Mode::WRITE)
            .unwrap();
        bpm.enable(&mut dr, &mem, &stopped(TID)).unwrap();

        let (address, ctrl, is_watch) = dr.slots[&(TID, 0)];
        assert_eq!(address, 0x3000);
        assert!(is_watch);
        assert_eq!(ctrl, (0xff << 5) | (0b10 << 3) | (0b10 << 1) | 1);
    }
}
