//! The debuggee process: thread aggregation, the event loop, memory and
//! allocation operations, and breakpoint orchestration.

use crate::arch::registers::{self, RegisterDescriptor};
use crate::arch::{CpuArch, CpuState};
use crate::breakpoint::hardware::HardwareBreakpointManager;
use crate::breakpoint::software::SoftwareBreakpointManager;
use crate::breakpoint::{Lifetime, Mode};
use crate::error::{ErrorCode, Result};
use crate::host::ptrace::{Ptrace, PtraceMemory};
use crate::host::syscalls;
use crate::stop_info::{StopEvent, StopReason, ThreadState};
use crate::target::linux;
use crate::target::thread::Thread;
use crate::types::{
    Address, MappedFileInfo, MemoryRegionInfo, ProcessInfo, ProcessThreadId, Protection,
    SharedLibraryInfo,
};
use libc::pid_t;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::collections::{BTreeMap, BTreeSet};

bitflags! {
    pub struct ProcessFlags: u32 {
        /// Attached to an already-running process.
        const ATTACHED = 1 << 0;
        /// Spawned under our control.
        const SPAWNED = 1 << 1;
    }
}

/// Contract consumed from the upstream spawner: fork/exec with stdio and
/// environment control, running `pre_exec` in the child before exec.
pub trait ProcessSpawner {
    fn run(&mut self, pre_exec: &mut dyn FnMut() -> bool) -> Result<pid_t>;
}

pub struct Process {
    pid: pid_t,
    flags: ProcessFlags,
    terminated: bool,
    info: ProcessInfo,
    threads: BTreeMap<pid_t, Thread>,
    current_tid: pid_t,
    load_base: Address,
    entry_point: Address,
    software_breakpoints: Option<SoftwareBreakpointManager>,
    hardware_breakpoints: Option<HardwareBreakpointManager>,
    passthru_signals: BTreeSet<i32>,
    /// Tids whose first SIGSTOP is an artifact of thread creation.
    pending_entry_stops: BTreeSet<pid_t>,
    interrupt_requested: bool,
    ptrace: Ptrace,
}

impl Process {
    /// Take control of a running process.
    pub fn attach(pid: pid_t) -> Result<Process> {
        if pid <= 0 {
            return Err(ErrorCode::ProcessNotFound);
        }
        let ptrace = Ptrace::new();
        ptrace.attach(pid)?;

        match Process::initialize(pid, ProcessFlags::ATTACHED) {
            Ok(process) => Ok(process),
            Err(error) => {
                let _ = ptrace.detach(pid);
                Err(error)
            }
        }
    }

    /// Spawn a process under trace; the child requests tracing of itself
    /// (and ASLR suppression) before exec.
    pub fn create(spawner: &mut dyn ProcessSpawner) -> Result<Process> {
        let pid = spawner.run(&mut || Ptrace::new().trace_me(true).is_ok())?;
        debug!("created process {}", pid);
        Process::initialize(pid, ProcessFlags::SPAWNED)
    }

    fn initialize(pid: pid_t, flags: ProcessFlags) -> Result<Process> {
        let ptrace = Ptrace::new();

        // The main thread is stopped (SIGSTOP on attach, SIGTRAP at exec);
        // consume that event before anything else.
        let status = ptrace.wait(ProcessThreadId::process(pid))?;
        ptrace.trace_that(pid)?;

        let info = linux::process_info(pid)?;
        let auxv = linux::auxiliary_vector(pid).unwrap_or_default();
        let entry_point =
            linux::auxiliary_vector_value(&auxv, linux::AT_ENTRY, info.pointer_size)
                .map(Address::new)
                .unwrap_or_else(Address::invalid);
        let load_base = linux::auxiliary_vector_value(&auxv, linux::AT_PHDR, info.pointer_size)
            .map(|phdr| Address::new(phdr & !(*crate::host::PAGE_SIZE as u64 - 1)))
            .unwrap_or_else(Address::invalid);

        let mut process = Process {
            pid,
            flags,
            terminated: false,
            info,
            threads: BTreeMap::new(),
            current_tid: pid,
            load_base,
            entry_point,
            software_breakpoints: None,
            hardware_breakpoints: None,
            passthru_signals: BTreeSet::new(),
            pending_entry_stops: BTreeSet::new(),
            interrupt_requested: false,
            ptrace,
        };

        let mut main_thread = Thread::new(pid, pid);
        main_thread.update_stop_info(&status);
        process.insert(main_thread);

        if flags.contains(ProcessFlags::ATTACHED) {
            process.attach_existing_threads()?;
        }
        Ok(process)
    }

    /// Attach every thread of the process, iterating until the set stays
    /// stable: threads may be spawned while the enumeration runs.
    fn attach_existing_threads(&mut self) -> Result<()> {
        loop {
            let tids = linux::thread_ids(self.pid)?;
            let new: Vec<pid_t> = tids
                .into_iter()
                .filter(|tid| !self.threads.contains_key(tid))
                .collect();
            if new.is_empty() {
                return Ok(());
            }

            for tid in new {
                self.ptrace.attach(tid)?;
                let ptid = ProcessThreadId::new(self.pid, tid);
                let status = self.ptrace.wait(ptid)?;
                let mut thread = Thread::new(self.pid, tid);
                thread.update_stop_info(&status);
                thread.mark_stopped();
                self.insert(thread);
            }
        }
    }

    pub fn pid(&self) -> pid_t {
        self.pid
    }

    pub fn flags(&self) -> ProcessFlags {
        self.flags
    }

    pub fn get_info(&self) -> &ProcessInfo {
        &self.info
    }

    pub fn load_base(&self) -> Address {
        self.load_base
    }

    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    fn current_ptid(&self) -> ProcessThreadId {
        ProcessThreadId::new(self.pid, self.current_tid)
    }

    pub fn current_thread(&self) -> Option<&Thread> {
        self.threads.get(&self.current_tid)
    }

    pub fn current_thread_mut(&mut self) -> Option<&mut Thread> {
        self.threads.get_mut(&self.current_tid)
    }

    pub fn thread(&self, tid: pid_t) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    pub fn enumerate_threads(&self, mut cb: impl FnMut(&Thread)) -> Result<()> {
        if self.pid <= 0 {
            return Err(ErrorCode::ProcessNotFound);
        }
        for thread in self.threads.values() {
            cb(thread);
        }
        Ok(())
    }

    pub fn thread_ids(&self) -> Vec<pid_t> {
        self.threads.keys().copied().collect()
    }

    fn insert(&mut self, thread: Thread) {
        self.threads.entry(thread.tid()).or_insert(thread);
    }

    pub fn remove_thread(&mut self, tid: pid_t) {
        if self.threads.remove(&tid).is_some() {
            debug!("[thread {} exited]", tid);
        }
        if let Some(hw) = self.hardware_breakpoints.as_mut() {
            hw.forget_thread(tid);
        }
        self.pending_entry_stops.remove(&tid);
    }

    fn cleanup(&mut self) {
        let tids: Vec<pid_t> = self.threads.keys().copied().collect();
        for tid in tids {
            self.remove_thread(tid);
        }
    }

    pub fn is_alive(&self) -> bool {
        !self.terminated && self.pid > 0 && unsafe { libc::kill(self.pid, 0) } == 0
    }

    // ----- event loop -----

    /// Block until an event worth reporting. Thread exits, passthru
    /// signals and bookkeeping stops are consumed internally; on return
    /// the current thread's stop information describes the event.
    pub fn wait(&mut self) -> Result<()> {
        if self.terminated {
            return Err(ErrorCode::ProcessNotFound);
        }

        loop {
            let (tid, status) = self.ptrace.wait_any()?;
            if tid <= 0 {
                continue;
            }

            if !self.threads.contains_key(&tid) {
                // The thread's first stop can race ahead of the clone
                // event that announces it.
                let mut thread = Thread::new(self.pid, tid);
                thread.update_stop_info(&status);
                thread.mark_stopped();
                self.insert(thread);
                continue;
            }

            let info = self.info.clone();
            let thread = self.threads.get_mut(&tid).unwrap();
            thread.update_stop_info(&status);

            match status {
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    if tid == self.pid {
                        self.terminated = true;
                        self.current_tid = tid;
                        return Ok(());
                    }
                    self.remove_thread(tid);
                }

                WaitStatus::PtraceEvent(_, _, event) if event == libc::PTRACE_EVENT_CLONE => {
                    let new_tid = self
                        .ptrace
                        .get_event_message(ProcessThreadId::new(self.pid, tid))?
                        as pid_t;
                    debug!("clone event: new thread {}", new_tid);
                    if !self.threads.contains_key(&new_tid) {
                        self.insert(Thread::new(self.pid, new_tid));
                        self.pending_entry_stops.insert(new_tid);
                    }
                    if let Some(spawned) = self.threads.get_mut(&new_tid) {
                        spawned.stop_info_mut().reason = StopReason::ThreadSpawn;
                    }
                    let thread = self.threads.get_mut(&tid).unwrap();
                    thread.stop_info_mut().reason = StopReason::ThreadSpawn;
                    self.current_tid = tid;
                    return Ok(());
                }

                WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => {
                    self.current_tid = tid;
                    return Ok(());
                }

                WaitStatus::Stopped(_, signal) => {
                    let signo = signal as i32;

                    if self.passthru_signals.contains(&signo) {
                        thread.resume(&info, signo, Address::invalid())?;
                        continue;
                    }

                    if signal == Signal::SIGSTOP {
                        if self.pending_entry_stops.remove(&tid) {
                            // Birth stop of a cloned thread; not a
                            // client-visible event.
                            let thread = self.threads.get_mut(&tid).unwrap();
                            thread.mark_stopped();
                            thread.resume(&info, 0, Address::invalid())?;
                            continue;
                        }
                        if self.interrupt_requested {
                            self.interrupt_requested = false;
                            let thread = self.threads.get_mut(&tid).unwrap();
                            thread.stop_info_mut().reason = StopReason::SignalStop;
                            self.current_tid = tid;
                            return Ok(());
                        }
                        thread.resume(&info, 0, Address::invalid())?;
                        continue;
                    }

                    if signal == Signal::SIGCHLD {
                        thread.resume(&info, 0, Address::invalid())?;
                        continue;
                    }

                    self.current_tid = tid;
                    return Ok(());
                }

                WaitStatus::StillAlive | WaitStatus::Continued(_) => {}
            }
        }
    }

    /// Force a stop of an otherwise-busy tracee; the next `wait()` will
    /// report it as a signal stop.
    pub fn interrupt(&mut self) -> Result<()> {
        self.interrupt_requested = true;
        self.ptrace
            .kill(ProcessThreadId::process(self.pid), libc::SIGSTOP)
    }

    pub fn terminate(&mut self) -> Result<()> {
        // SIGKILL: the tracee must not be able to catch it, and it works
        // without a ptrace restart.
        self.ptrace
            .kill(ProcessThreadId::process(self.pid), libc::SIGKILL)
    }

    /// Stop every running thread; already-stopped threads are left alone
    /// and threads found dead are reaped.
    pub fn suspend(&mut self) -> Result<()> {
        let tids: Vec<pid_t> = self.threads.keys().copied().collect();
        for tid in tids {
            let state = self.threads.get(&tid).map(Thread::state);
            match state {
                Some(ThreadState::Running) => {
                    debug!("suspending tid {}", tid);
                    let result = self.threads.get_mut(&tid).unwrap().suspend();
                    match result {
                        Ok(()) => {}
                        Err(ErrorCode::ProcessNotFound) => {
                            debug!("tried to suspend tid {} which is already dead", tid);
                            self.remove_thread(tid);
                            return Err(ErrorCode::ProcessNotFound);
                        }
                        Err(error) => {
                            warn!("failed suspending tid {}, error={}", tid, error);
                            return Err(error);
                        }
                    }
                }
                Some(ThreadState::Terminated) => self.remove_thread(tid),
                _ => {}
            }
        }
        Ok(())
    }

    /// Resume every paused thread not in `excluded` with `signal`.
    pub fn resume(&mut self, signal: i32, excluded: &[pid_t]) -> Result<()> {
        let info = self.info.clone();

        // A freshly cloned thread cannot be continued until its birth
        // SIGSTOP has been observed; consume those stops first so the
        // resume below releases every thread, new ones included.
        let pending: Vec<pid_t> = self.pending_entry_stops.iter().copied().collect();
        for tid in pending {
            if let Some(thread) = self.threads.get_mut(&tid) {
                if let Ok(status) = self.ptrace.wait(thread.ptid()) {
                    thread.update_stop_info(&status);
                    if thread.state().is_paused() {
                        thread.mark_stopped();
                    }
                }
            }
            self.pending_entry_stops.remove(&tid);
        }

        for thread in self.threads.values_mut() {
            if excluded.contains(&thread.tid()) {
                continue;
            }
            if thread.state().is_paused() {
                debug!("resuming tid {} with signal {}", thread.tid(), signal);
                if let Err(error) = thread.resume(&info, signal, Address::invalid()) {
                    warn!("failed resuming tid {}, error={}", thread.tid(), error);
                }
            }
        }
        Ok(())
    }

    pub fn resume_thread(&mut self, tid: pid_t, signal: i32, address: Address) -> Result<()> {
        let info = self.info.clone();
        self.threads
            .get_mut(&tid)
            .ok_or(ErrorCode::ProcessNotFound)?
            .resume(&info, signal, address)
    }

    /// Single-step one thread; on ARM this plants the planner's one-shot
    /// breakpoints and resumes.
    pub fn step_thread(&mut self, tid: pid_t, signal: i32, address: Address) -> Result<()> {
        let info = self.info.clone();
        let arch = info.arch;
        let breakpoints = self
            .software_breakpoints
            .get_or_insert_with(|| SoftwareBreakpointManager::new(arch));
        self.threads
            .get_mut(&tid)
            .ok_or(ErrorCode::ProcessNotFound)?
            .step(&info, signal, address, breakpoints)
    }

    // ----- resume cycle bracketing -----

    /// Install breakpoints before letting the debuggee run: software
    /// sites process-wide, hardware slots on every stopped thread.
    pub fn before_resume(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Err(ErrorCode::ProcessNotFound);
        }

        let arch = self.info.arch;
        let mut mem = PtraceMemory::new(self.current_ptid());

        let software = self
            .software_breakpoints
            .get_or_insert_with(|| SoftwareBreakpointManager::new(arch));
        software.enable(&mut mem)?;

        if let Some(hardware) = self.hardware_breakpoints.as_mut() {
            let threads: Vec<(pid_t, ThreadState)> = self
                .threads
                .values()
                .map(|t| (t.tid(), t.state()))
                .collect();
            let mut dr = Ptrace::new();
            hardware.enable(&mut dr, &mem, &threads)?;
        }
        Ok(())
    }

    /// After the following wait: attribute traps to breakpoint sites and
    /// uninstall everything, so a paused debuggee never shows a trap
    /// instruction.
    pub fn after_resume(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        let info = self.info.clone();
        let mut mem = PtraceMemory::new(self.current_ptid());

        if let Some(software) = self.software_breakpoints.as_mut() {
            for thread in self.threads.values_mut() {
                if !thread.state().is_paused() || thread.stop_info().event != StopEvent::Stop {
                    continue;
                }
                let mut state = CpuState::new(info.arch, info.is_32bit());
                if thread.read_cpu_state(&info, &mut state).is_err() {
                    continue;
                }
                let pc_before = state.pc();
                if let Some(site) = software.hit(&mut state, thread.state()) {
                    debug!("hit breakpoint for tid {}", thread.tid());
                    if state.pc() != pc_before {
                        thread.write_cpu_state(&info, &state)?;
                    }
                    if thread.state() == ThreadState::Stepped {
                        // A planner one-shot consumed by a step stays a
                        // trace event.
                        thread.stop_info_mut().reason = StopReason::Trace;
                    } else {
                        software.fill_stop_info(&site, thread.stop_info_mut());
                    }
                }
            }
            software.disable(&mut mem)?;
        }

        if let Some(hardware) = self.hardware_breakpoints.as_mut() {
            let mut dr = Ptrace::new();
            for thread in self.threads.values_mut() {
                if thread.state() != ThreadState::Stopped
                    || thread.stop_info().event != StopEvent::Stop
                {
                    continue;
                }
                let tid = thread.tid();
                let thread_state = thread.state();
                let mut stop_info = thread.stop_info().clone();
                if hardware.fill_stop_info(&mut dr, &mem, tid, thread_state, &mut stop_info) {
                    *thread.stop_info_mut() = stop_info;
                }
            }

            let threads: Vec<(pid_t, ThreadState)> = self
                .threads
                .values()
                .map(|t| (t.tid(), t.state()))
                .collect();
            hardware.disable(&mut dr, &threads)?;
        }
        Ok(())
    }

    // ----- teardown -----

    /// Restore every original code byte before letting go of the tracee.
    pub fn prepare_for_detach(&mut self) -> Result<()> {
        let mut mem = PtraceMemory::new(self.current_ptid());
        if let Some(software) = self.software_breakpoints.as_mut() {
            software.clear(&mut mem)?;
        }
        if let Some(hardware) = self.hardware_breakpoints.as_mut() {
            let mut dr = Ptrace::new();
            let threads: Vec<(pid_t, ThreadState)> = self
                .threads
                .values()
                .map(|t| (t.tid(), t.state()))
                .collect();
            let _ = hardware.disable(&mut dr, &threads);
            hardware.clear();
        }
        Ok(())
    }

    /// Release the process: restore code bytes, detach every thread, and
    /// drop all bookkeeping. The debuggee continues unaware.
    pub fn detach(&mut self) -> Result<()> {
        self.prepare_for_detach()?;

        for tid in self.thread_ids() {
            let _ = self.ptrace.detach(tid);
        }
        self.cleanup();
        self.flags.remove(ProcessFlags::ATTACHED);
        Ok(())
    }

    // ----- memory -----

    pub fn read_memory(&self, address: Address, buf: &mut [u8]) -> Result<usize> {
        self.ptrace.read_memory(self.current_ptid(), address, buf)
    }

    pub fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<usize> {
        self.ptrace.write_memory(self.current_ptid(), address, data)
    }

    pub fn read_string(&self, address: Address, max_length: usize) -> Result<String> {
        self.ptrace
            .read_string(self.current_ptid(), address, max_length)
    }

    /// Read up to `length` bytes, shrinking to what was transferable.
    pub fn read_memory_buffer(&self, address: Address, length: usize) -> Result<Vec<u8>> {
        if self.pid <= 0 {
            return Err(ErrorCode::ProcessNotFound);
        }
        let mut buffer = vec![0u8; length];
        let nread = self.read_memory(address, &mut buffer)?;
        buffer.truncate(nread);
        Ok(buffer)
    }

    pub fn write_memory_buffer(
        &mut self,
        address: Address,
        buffer: &[u8],
        length: usize,
    ) -> Result<usize> {
        if self.pid <= 0 {
            return Err(ErrorCode::ProcessNotFound);
        }
        let length = length.min(buffer.len());
        self.write_memory(address, &buffer[..length])
    }

    pub fn get_memory_region_info(&self, address: Address) -> Result<MemoryRegionInfo> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        linux::memory_region_info(self.pid, address.value())
    }

    pub fn enumerate_mapped_files(&self, cb: impl FnMut(&MappedFileInfo)) -> Result<()> {
        linux::enumerate_mapped_files(self.pid, cb)
    }

    pub fn enumerate_shared_libraries(&self, cb: impl FnMut(&SharedLibraryInfo)) -> Result<()> {
        let mem = PtraceMemory::new(self.current_ptid());
        linux::enumerate_shared_libraries(self.pid, &mem, self.info.pointer_size, cb)
    }

    pub fn get_auxiliary_vector(&self) -> Result<Vec<u8>> {
        linux::auxiliary_vector(self.pid)
    }

    // ----- allocation via code injection -----

    fn check_mmap_result(&self, result: u64) -> Result<u64> {
        let (failed, errno) = if self.info.pointer_size == 4 || self.info.arch == CpuArch::Arm {
            let value = result as u32 as i32;
            (value == -1, if (-4095..0).contains(&value) { -value } else { 0 })
        } else {
            let value = result as i64;
            (
                value == -1,
                if (-4095..0).contains(&value) {
                    (-value) as i32
                } else {
                    0
                },
            )
        };

        if failed {
            return Err(ErrorCode::NoMemory);
        }
        if errno != 0 {
            debug!("mmap failed with errno={}", errno);
            return Err(ErrorCode::from_raw_errno(errno));
        }
        Ok(result)
    }

    /// Grow the debuggee address space by `size` bytes with `protection`,
    /// through an injected mmap call. Returns the mapped address.
    pub fn allocate_memory(&mut self, size: usize, protection: Protection) -> Result<u64> {
        let info = self.info.clone();
        let prot = protection.to_posix() as u32;

        let code = match (info.arch, info.is_32bit()) {
            (CpuArch::X64, false) => syscalls::x86_64::mmap_code(size as u64, prot),
            (CpuArch::X64, true) | (CpuArch::X86, _) => {
                syscalls::x86::mmap_code(size as u32, prot)
            }
            (CpuArch::Arm64, false) => syscalls::arm64::mmap_code(size as u64, prot),
            (CpuArch::Arm, _) | (CpuArch::Arm64, true) => {
                // Thumb and ARM state need different stubs.
                let mut state = CpuState::new(info.arch, true);
                self.ptrace
                    .read_cpu_state(self.current_ptid(), &info, &mut state)?;
                if state.is_thumb() {
                    let mut code = syscalls::arm::thumb_mmap_code(size as u32, prot);
                    syscalls::arm::thumb_align_stub(state.pc(), &mut code);
                    code
                } else {
                    syscalls::arm::arm_mmap_code(size as u32, prot)
                }
            }
        };

        let result = self.ptrace.execute(self.current_ptid(), &info, &code)?;
        self.check_mmap_result(result)
    }

    /// Release an allocation made by `allocate_memory`.
    pub fn deallocate_memory(&mut self, address: u64, size: usize) -> Result<()> {
        if size == 0 {
            return Err(ErrorCode::InvalidArgument);
        }
        let info = self.info.clone();

        let code = match (info.arch, info.is_32bit()) {
            (CpuArch::X64, false) => syscalls::x86_64::munmap_code(address, size as u64),
            (CpuArch::X64, true) | (CpuArch::X86, _) => {
                syscalls::x86::munmap_code(address as u32, size as u32)
            }
            (CpuArch::Arm64, false) => syscalls::arm64::munmap_code(address, size as u64),
            (CpuArch::Arm, _) | (CpuArch::Arm64, true) => {
                let mut state = CpuState::new(info.arch, true);
                self.ptrace
                    .read_cpu_state(self.current_ptid(), &info, &mut state)?;
                if state.is_thumb() {
                    let mut code = syscalls::arm::thumb_munmap_code(address as u32, size as u32);
                    syscalls::arm::thumb_align_stub(state.pc(), &mut code);
                    code
                } else {
                    syscalls::arm::arm_munmap_code(address as u32, size as u32)
                }
            }
        };

        let result = self.ptrace.execute(self.current_ptid(), &info, &code)?;
        let value = if info.pointer_size == 4 || info.arch == CpuArch::Arm {
            i64::from(result as u32 as i32)
        } else {
            result as i64
        };
        if value < 0 {
            return Err(ErrorCode::InvalidArgument);
        }
        Ok(())
    }

    // ----- breakpoint managers -----

    pub fn software_breakpoint_manager(&mut self) -> &mut SoftwareBreakpointManager {
        let arch = self.info.arch;
        self.software_breakpoints
            .get_or_insert_with(|| SoftwareBreakpointManager::new(arch))
    }

    pub fn hardware_breakpoint_manager(&mut self) -> &mut HardwareBreakpointManager {
        let arch = self.info.arch;
        let slots = self.max_watchpoints();
        self.hardware_breakpoints
            .get_or_insert_with(|| HardwareBreakpointManager::new(arch, slots))
    }

    /// Register a software breakpoint, discovering the instruction size
    /// on ARM from the current execution state when not supplied.
    pub fn add_software_breakpoint(
        &mut self,
        address: Address,
        lifetime: Lifetime,
        size: usize,
    ) -> Result<()> {
        let info = self.info.clone();
        let ptid = self.current_ptid();
        let mut mem = PtraceMemory::new(ptid);
        let arch = info.arch;
        let manager = self
            .software_breakpoints
            .get_or_insert_with(|| SoftwareBreakpointManager::new(arch));

        if arch == CpuArch::Arm && !arch.valid_breakpoint_size(size) {
            let mut state = CpuState::new(info.arch, true);
            Ptrace::new().read_cpu_state(ptid, &info, &mut state)?;
            return manager.add_discovering_size(
                &mut mem,
                address,
                lifetime,
                Mode::EXEC,
                state.is_thumb(),
            );
        }

        let size = match arch.preferred_breakpoint_size() {
            Some(preferred) if size == 0 => preferred,
            _ => size,
        };
        manager.add(&mut mem, address, lifetime, size, Mode::EXEC)
    }

    pub fn remove_software_breakpoint(&mut self, address: Address) -> Result<()> {
        let mut mem = PtraceMemory::new(self.current_ptid());
        let address = if self.info.arch == CpuArch::Arm {
            Address::new(address.value() & !1)
        } else {
            address
        };
        match self.software_breakpoints.as_mut() {
            Some(manager) => manager.remove(&mut mem, address),
            None => Err(ErrorCode::NotFound),
        }
    }

    /// Register a hardware stoppoint; watch modes cover `size` bytes at a
    /// naturally aligned `address`.
    pub fn add_hardware_stoppoint(
        &mut self,
        address: Address,
        lifetime: Lifetime,
        size: usize,
        mode: Mode,
    ) -> Result<()> {
        let mem = PtraceMemory::new(self.current_ptid());
        let arch = self.info.arch;
        let slots = self.max_watchpoints();
        self.hardware_breakpoints
            .get_or_insert_with(|| HardwareBreakpointManager::new(arch, slots))
            .add(&mem, address, lifetime, size, mode)
    }

    pub fn remove_hardware_stoppoint(&mut self, address: Address) -> Result<()> {
        match self.hardware_breakpoints.as_mut() {
            Some(manager) => manager.remove(address),
            None => Err(ErrorCode::NotFound),
        }
    }

    pub fn max_breakpoints(&self) -> usize {
        match self.info.arch {
            CpuArch::X86 | CpuArch::X64 => 4,
            CpuArch::Arm | CpuArch::Arm64 => self.ptrace.max_hardware_breakpoints(self.pid),
        }
    }

    pub fn max_watchpoints(&self) -> usize {
        match self.info.arch {
            CpuArch::X86 | CpuArch::X64 => 4,
            CpuArch::Arm | CpuArch::Arm64 => self.ptrace.max_hardware_watchpoints(self.pid),
        }
    }

    pub fn max_watchpoint_size(&self) -> usize {
        match self.info.arch {
            CpuArch::X86 | CpuArch::X64 => 8,
            CpuArch::Arm | CpuArch::Arm64 => self.ptrace.max_watchpoint_size(self.pid),
        }
    }

    // ----- protocol support -----

    pub fn gdb_registers_descriptor(&self) -> &'static [RegisterDescriptor] {
        registers::gdb_descriptor(self.info.arch, self.info.is_32bit())
    }

    pub fn lldb_registers_descriptor(&self) -> &'static [RegisterDescriptor] {
        registers::lldb_descriptor(self.info.arch, self.info.is_32bit())
    }

    /// Declare whether `signo` should be delivered to the debuggee
    /// without surfacing a stop.
    pub fn set_signal_pass(&mut self, signo: i32, set: bool) {
        if set {
            self.passthru_signals.insert(signo);
        } else {
            self.passthru_signals.remove(&signo);
        }
    }

    pub fn reset_signal_pass(&mut self) {
        self.passthru_signals.clear();
    }
}
