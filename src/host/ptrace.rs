//! Thin, uniform wrapper over the ptrace(2) primitive.
//!
//! Every request funnels through [`wrap_ptrace`], which retries transient
//! EAGAIN/EBUSY failures up to three times and leaves errno describing
//! the final outcome. Memory transfer is word-sized peek/poke with a
//! read-modify-write tail; register transfer translates between the
//! kernel structures and the canonical [`CpuState`].

use crate::arch::CpuState;
use crate::breakpoint::hardware::DebugRegisterAccess;
use crate::error::{ErrorCode, Result};
use crate::memory::TraceeMemory;
use crate::types::{Address, ProcessInfo, ProcessThreadId};
use libc::{c_long, c_uint, c_void, pid_t};
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

const WORD_SIZE: usize = std::mem::size_of::<usize>();
const PTRACE_RETRIES: usize = 3;

fn clear_errno() {
    unsafe {
        *libc::__errno_location() = 0;
    }
}

fn errno_value() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Issue one ptrace request, retrying while the kernel reports the
/// tracee transiently busy. errno is cleared first so PTRACE_PEEK*
/// results can be told apart from failures.
fn wrap_ptrace(request: c_uint, pid: pid_t, addr: u64, data: u64) -> c_long {
    let mut retries = PTRACE_RETRIES;
    loop {
        clear_errno();
        let ret = unsafe { libc::ptrace(request, pid, addr as *mut c_void, data as *mut c_void) };
        if ret < 0 && retries > 0 {
            let errno = Errno::last();
            if errno == Errno::EAGAIN || errno == Errno::EBUSY {
                retries -= 1;
                warn!(
                    "ptrace command {} on pid {} returned {:?}, retrying",
                    request, pid, errno
                );
                continue;
            }
        }
        return ret;
    }
}

fn check(ret: c_long) -> Result<c_long> {
    if ret < 0 && errno_value() != 0 {
        Err(ErrorCode::from(Errno::last()))
    } else {
        Ok(ret)
    }
}

fn wait_error(error: nix::Error) -> ErrorCode {
    match error {
        nix::Error::Sys(Errno::ESRCH) | nix::Error::Sys(Errno::ECHILD) => {
            ErrorCode::ProcessNotFound
        }
        other => ErrorCode::from(other),
    }
}

/// The ptrace trace backend. Stateless; every operation names its target
/// through a [`ProcessThreadId`].
#[derive(Copy, Clone, Default)]
pub struct Ptrace;

impl Ptrace {
    pub fn new() -> Ptrace {
        Ptrace
    }

    pub fn attach(&self, pid: pid_t) -> Result<()> {
        if pid <= 0 {
            return Err(ErrorCode::ProcessNotFound);
        }
        debug!("attaching to pid {}", pid);
        check(wrap_ptrace(libc::PTRACE_ATTACH, pid, 0, 0))?;
        Ok(())
    }

    pub fn detach(&self, pid: pid_t) -> Result<()> {
        if pid <= 0 {
            return Err(ErrorCode::ProcessNotFound);
        }
        debug!("detaching from pid {}", pid);
        check(wrap_ptrace(libc::PTRACE_DETACH, pid, 0, 0))?;
        Ok(())
    }

    /// Request tracing of the calling process; runs on the forked child
    /// before exec. A failure to clear ASLR is only worth a warning.
    pub fn trace_me(&self, disable_aslr: bool) -> Result<()> {
        if disable_aslr {
            let persona = unsafe { libc::personality(0xffff_ffff) };
            if persona < 0
                || unsafe {
                    libc::personality(
                        (persona as u32 | libc::ADDR_NO_RANDOMIZE as u32) as libc::c_ulong,
                    )
                } < 0
            {
                warn!("unable to disable ASLR, error={:?}", Errno::last());
            }
        }
        check(wrap_ptrace(libc::PTRACE_TRACEME, 0, 0, 0))?;
        Ok(())
    }

    /// Set per-tracee options after the initial stop; clone events are
    /// needed to track thread creation.
    pub fn trace_that(&self, pid: pid_t) -> Result<()> {
        if pid <= 0 {
            return Err(ErrorCode::InvalidArgument);
        }
        let flags = libc::PTRACE_O_TRACECLONE as u64;
        if wrap_ptrace(libc::PTRACE_SETOPTIONS, pid, 0, flags) < 0 {
            warn!(
                "unable to set PTRACE_O_TRACECLONE on pid {}, error={:?}",
                pid,
                Errno::last()
            );
            return Err(ErrorCode::from(Errno::last()));
        }
        Ok(())
    }

    /// Block until an event is observed for `ptid`; any thread of the
    /// process qualifies (__WALL semantics).
    pub fn wait(&self, ptid: ProcessThreadId) -> Result<WaitStatus> {
        if !ptid.valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        waitpid(
            Pid::from_raw(ptid.effective_id()),
            Some(WaitPidFlag::__WALL),
        )
        .map_err(wait_error)
    }

    /// Block until any traced thread reports an event.
    pub fn wait_any(&self) -> Result<(pid_t, WaitStatus)> {
        let status = waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)).map_err(wait_error)?;
        let pid = status.pid().map(Pid::as_raw).unwrap_or(0);
        Ok((pid, status))
    }

    /// Deliver `signal`: thread-targeted when the tid is concrete,
    /// process-targeted otherwise.
    pub fn kill(&self, ptid: ProcessThreadId, signal: i32) -> Result<()> {
        if !ptid.valid() {
            return Err(ErrorCode::InvalidArgument);
        }

        let rc = if ptid.valid_tid() {
            if ptid.valid_pid() {
                unsafe { libc::syscall(libc::SYS_tgkill, ptid.pid, ptid.tid, signal) }
            } else {
                unsafe { libc::syscall(libc::SYS_tkill, ptid.tid, signal) }
            }
        } else {
            unsafe { libc::kill(ptid.pid, signal) as c_long }
        };

        if rc < 0 {
            return Err(ErrorCode::from(Errno::last()));
        }
        Ok(())
    }

    pub fn suspend(&self, ptid: ProcessThreadId) -> Result<()> {
        self.kill(ptid, libc::SIGSTOP)
    }

    pub fn read_memory(&self, ptid: ProcessThreadId, address: Address, buf: &mut [u8]) -> Result<usize> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let pid = ptid.effective_id();

        let mut nread = 0;
        while nread < buf.len() {
            let word = wrap_ptrace(libc::PTRACE_PEEKDATA, pid, address.value() + nread as u64, 0);
            if errno_value() != 0 {
                if nread == 0 {
                    return Err(ErrorCode::from(Errno::last()));
                }
                break;
            }
            let bytes = (word as usize).to_ne_bytes();
            let ncopy = WORD_SIZE.min(buf.len() - nread);
            buf[nread..nread + ncopy].copy_from_slice(&bytes[..ncopy]);
            nread += ncopy;
        }
        Ok(nread)
    }

    pub fn write_memory(&self, ptid: ProcessThreadId, address: Address, data: &[u8]) -> Result<usize> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let pid = ptid.effective_id();

        let mut nwritten = 0;
        while nwritten < data.len() {
            let remaining = data.len() - nwritten;
            let target = address.value() + nwritten as u64;

            let word = if remaining < WORD_SIZE {
                // Partial tail: merge with the debuggee's bytes.
                let existing = wrap_ptrace(libc::PTRACE_PEEKDATA, pid, target, 0);
                if errno_value() != 0 {
                    break;
                }
                let mut bytes = (existing as usize).to_ne_bytes();
                bytes[..remaining].copy_from_slice(&data[nwritten..]);
                usize::from_ne_bytes(bytes)
            } else {
                let mut bytes = [0u8; WORD_SIZE];
                bytes.copy_from_slice(&data[nwritten..nwritten + WORD_SIZE]);
                usize::from_ne_bytes(bytes)
            };

            wrap_ptrace(libc::PTRACE_POKEDATA, pid, target, word as u64);
            if errno_value() != 0 {
                break;
            }
            nwritten += remaining.min(WORD_SIZE);
        }

        if nwritten == 0 {
            return Err(ErrorCode::from(Errno::last()));
        }
        Ok(nwritten)
    }

    fn write_memory_exact(&self, ptid: ProcessThreadId, address: u64, data: &[u8]) -> Result<()> {
        if self.write_memory(ptid, Address::new(address), data)? != data.len() {
            return Err(ErrorCode::InvalidAddress);
        }
        Ok(())
    }

    /// Copy at most `max_length` bytes of a NUL-terminated string; a
    /// missing terminator within the window is reported as NameTooLong
    /// and is recoverable by retrying with a larger window.
    pub fn read_string(
        &self,
        ptid: ProcessThreadId,
        address: Address,
        max_length: usize,
    ) -> Result<String> {
        if !address.is_valid() {
            return Err(ErrorCode::InvalidArgument);
        }
        let pid = ptid.effective_id();

        let mut collected: Vec<u8> = Vec::with_capacity(max_length);
        while collected.len() < max_length {
            let word = wrap_ptrace(
                libc::PTRACE_PEEKDATA,
                pid,
                address.value() + collected.len() as u64,
                0,
            );
            if errno_value() != 0 {
                return Err(ErrorCode::from(Errno::last()));
            }
            let bytes = (word as usize).to_ne_bytes();
            let take = WORD_SIZE.min(max_length - collected.len());
            let chunk = &bytes[..take];
            match memchr::memchr(0, chunk) {
                Some(nul) => {
                    collected.extend_from_slice(&chunk[..nul]);
                    return Ok(String::from_utf8_lossy(&collected).into_owned());
                }
                None => collected.extend_from_slice(chunk),
            }
        }
        Err(ErrorCode::NameTooLong)
    }

    /// Patch PC before a resume when the caller supplied an address.
    fn prepare_address_for_resume(
        &self,
        ptid: ProcessThreadId,
        info: &ProcessInfo,
        address: Address,
    ) -> Result<()> {
        if !address.is_valid() {
            return Ok(());
        }
        let mut state = CpuState::new(info.arch, info.is_32bit());
        self.read_cpu_state(ptid, info, &mut state)?;
        state.set_pc(address.value());
        self.write_cpu_state(ptid, info, &state)
    }

    /// Hardware single-step. 32-bit ARM kernels do not honor this; the
    /// thread layer plants breakpoints through the software planner
    /// instead.
    pub fn step(
        &self,
        ptid: ProcessThreadId,
        info: &ProcessInfo,
        signal: i32,
        address: Address,
    ) -> Result<()> {
        if info.arch == crate::arch::CpuArch::Arm {
            return Err(ErrorCode::Unsupported);
        }
        self.prepare_address_for_resume(ptid, info, address)?;
        check(wrap_ptrace(
            libc::PTRACE_SINGLESTEP,
            ptid.effective_id(),
            0,
            signal as u64,
        ))?;
        Ok(())
    }

    pub fn resume(
        &self,
        ptid: ProcessThreadId,
        info: &ProcessInfo,
        signal: i32,
        address: Address,
    ) -> Result<()> {
        self.prepare_address_for_resume(ptid, info, address)?;
        check(wrap_ptrace(
            libc::PTRACE_CONT,
            ptid.effective_id(),
            0,
            signal as u64,
        ))?;
        Ok(())
    }

    pub fn get_siginfo(&self, ptid: ProcessThreadId) -> Result<libc::siginfo_t> {
        let mut si: libc::siginfo_t = unsafe { std::mem::zeroed() };
        check(wrap_ptrace(
            libc::PTRACE_GETSIGINFO,
            ptid.effective_id(),
            0,
            &mut si as *mut libc::siginfo_t as u64,
        ))?;
        Ok(si)
    }

    /// The ptrace event message; after a clone event this is the new tid.
    pub fn get_event_message(&self, ptid: ProcessThreadId) -> Result<u64> {
        let mut data: libc::c_ulong = 0;
        check(wrap_ptrace(
            libc::PTRACE_GETEVENTMSG,
            ptid.effective_id(),
            0,
            &mut data as *mut libc::c_ulong as u64,
        ))?;
        Ok(data as u64)
    }

    /// Execute injected code on the thread: save CPU state and the code
    /// bytes under PC, write the stub, run to its trailing trap, collect
    /// the return register, then put everything back. Once the text
    /// segment has been touched, any failure leaves the tracee in an
    /// unknown state and it is killed rather than resumed.
    pub fn execute(&self, ptid: ProcessThreadId, info: &ProcessInfo, code: &[u8]) -> Result<u64> {
        if !ptid.valid() || code.is_empty() {
            return Err(ErrorCode::InvalidArgument);
        }

        let mut saved_state = CpuState::new(info.arch, info.is_32bit());
        self.read_cpu_state(ptid, info, &mut saved_state)?;
        let pc = saved_state.pc();

        let mut saved_code = vec![0u8; code.len()];
        if self.read_memory(ptid, Address::new(pc), &mut saved_code)? != code.len() {
            return Err(ErrorCode::InvalidAddress);
        }

        let run = || -> Result<u64> {
            self.write_memory_exact(ptid, pc, code)?;
            self.resume(ptid, info, 0, Address::invalid())?;
            self.wait(ptid)?;

            let mut result_state = CpuState::new(info.arch, info.is_32bit());
            self.read_cpu_state(ptid, info, &mut result_state)?;
            let retval = result_state.retval();

            self.write_memory_exact(ptid, pc, &saved_code)?;
            self.write_cpu_state(ptid, info, &saved_state)?;
            Ok(retval)
        };

        let result = run();
        if result.is_err() {
            // The code segment is mutated and the thread state unknown.
            let _ = self.kill(ptid, libc::SIGKILL);
        }
        result
    }

    pub fn read_cpu_state(
        &self,
        ptid: ProcessThreadId,
        info: &ProcessInfo,
        state: &mut CpuState,
    ) -> Result<()> {
        let _ = info;
        native::read_cpu_state(ptid.effective_id(), state)
    }

    pub fn write_cpu_state(
        &self,
        ptid: ProcessThreadId,
        info: &ProcessInfo,
        state: &CpuState,
    ) -> Result<()> {
        let _ = info;
        native::write_cpu_state(ptid.effective_id(), state)
    }

    pub fn read_debug_reg(&self, tid: pid_t, idx: usize) -> Result<u64> {
        native::read_debug_reg(tid, idx)
    }

    pub fn write_debug_reg(&self, tid: pid_t, idx: usize, value: u64) -> Result<()> {
        native::write_debug_reg(tid, idx, value)
    }

    /// dr4 and dr5 are reserved and fault on access; they read as zero
    /// and are skipped on write.
    pub fn read_debug_registers(&self, tid: pid_t) -> Result<[u64; 8]> {
        let mut regs = [0u64; 8];
        for (idx, reg) in regs.iter_mut().enumerate() {
            if idx == 4 || idx == 5 {
                continue;
            }
            *reg = native::read_debug_reg(tid, idx)?;
        }
        Ok(regs)
    }

    pub fn write_debug_registers(&self, tid: pid_t, regs: &[u64; 8]) -> Result<()> {
        for (idx, reg) in regs.iter().enumerate() {
            if idx == 4 || idx == 5 {
                continue;
            }
            native::write_debug_reg(tid, idx, *reg)?;
        }
        Ok(())
    }

    pub fn max_hardware_breakpoints(&self, pid: pid_t) -> usize {
        native::max_hardware_breakpoints(pid)
    }

    pub fn max_hardware_watchpoints(&self, pid: pid_t) -> usize {
        native::max_hardware_watchpoints(pid)
    }

    pub fn max_watchpoint_size(&self, pid: pid_t) -> usize {
        native::max_watchpoint_size(pid)
    }

    pub fn write_hardware_breakpoint(
        &self,
        tid: pid_t,
        slot: usize,
        address: u64,
        ctrl: u32,
    ) -> Result<()> {
        native::write_hardware_stoppoint(tid, slot, address, ctrl, false)
    }

    pub fn write_hardware_watchpoint(
        &self,
        tid: pid_t,
        slot: usize,
        address: u64,
        ctrl: u32,
    ) -> Result<()> {
        native::write_hardware_stoppoint(tid, slot, address, ctrl, true)
    }
}

impl DebugRegisterAccess for Ptrace {
    fn read_dr(&mut self, tid: pid_t, idx: usize) -> Result<u64> {
        Ptrace::read_debug_reg(self, tid, idx)
    }

    fn write_dr(&mut self, tid: pid_t, idx: usize, value: u64) -> Result<()> {
        Ptrace::write_debug_reg(self, tid, idx, value)
    }

    fn write_breakpoint_slot(&mut self, tid: pid_t, slot: usize, address: u64, ctrl: u32) -> Result<()> {
        Ptrace::write_hardware_breakpoint(self, tid, slot, address, ctrl)
    }

    fn write_watchpoint_slot(&mut self, tid: pid_t, slot: usize, address: u64, ctrl: u32) -> Result<()> {
        Ptrace::write_hardware_watchpoint(self, tid, slot, address, ctrl)
    }
}

/// Debuggee memory access bound to one thread, for the collaborators
/// that only need the byte-transfer capability.
#[derive(Copy, Clone)]
pub struct PtraceMemory {
    ptid: ProcessThreadId,
}

impl PtraceMemory {
    pub fn new(ptid: ProcessThreadId) -> PtraceMemory {
        PtraceMemory { ptid }
    }
}

impl TraceeMemory for PtraceMemory {
    fn read_memory(&self, address: u64, buf: &mut [u8]) -> Result<usize> {
        Ptrace.read_memory(self.ptid, Address::new(address), buf)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<usize> {
        Ptrace.write_memory(self.ptid, Address::new(address), data)
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod native {
            use super::*;
            use crate::arch::x86::X86State;
            use crate::arch::x86_64::X64State;

            static_assertions::const_assert_eq!(
                std::mem::size_of::<libc::user_regs_struct>(),
                27 * 8
            );
            static_assertions::const_assert_eq!(
                std::mem::size_of::<libc::user_fpregs_struct>(),
                512
            );

            fn getregs(pid: pid_t) -> Result<libc::user_regs_struct> {
                let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
                check(wrap_ptrace(
                    libc::PTRACE_GETREGS,
                    pid,
                    0,
                    &mut regs as *mut _ as u64,
                ))?;
                Ok(regs)
            }

            fn setregs(pid: pid_t, regs: &libc::user_regs_struct) -> Result<()> {
                check(wrap_ptrace(
                    libc::PTRACE_SETREGS,
                    pid,
                    0,
                    regs as *const _ as u64,
                ))?;
                Ok(())
            }

            fn getfpregs(pid: pid_t) -> Result<libc::user_fpregs_struct> {
                let mut fpregs: libc::user_fpregs_struct = unsafe { std::mem::zeroed() };
                check(wrap_ptrace(
                    libc::PTRACE_GETFPREGS,
                    pid,
                    0,
                    &mut fpregs as *mut _ as u64,
                ))?;
                Ok(fpregs)
            }

            fn setfpregs(pid: pid_t, fpregs: &libc::user_fpregs_struct) -> Result<()> {
                check(wrap_ptrace(
                    libc::PTRACE_SETFPREGS,
                    pid,
                    0,
                    fpregs as *const _ as u64,
                ))?;
                Ok(())
            }

            fn user_to_state64(state: &mut X64State, user: &libc::user_regs_struct) {
                state.gp.rax = user.rax;
                state.gp.rcx = user.rcx;
                state.gp.rdx = user.rdx;
                state.gp.rbx = user.rbx;
                state.gp.rsi = user.rsi;
                state.gp.rdi = user.rdi;
                state.gp.rbp = user.rbp;
                state.gp.rsp = user.rsp;
                state.gp.r8 = user.r8;
                state.gp.r9 = user.r9;
                state.gp.r10 = user.r10;
                state.gp.r11 = user.r11;
                state.gp.r12 = user.r12;
                state.gp.r13 = user.r13;
                state.gp.r14 = user.r14;
                state.gp.r15 = user.r15;
                state.gp.rip = user.rip;
                state.gp.cs = (user.cs & 0xffff) as u32;
                state.gp.ss = (user.ss & 0xffff) as u32;
                state.gp.ds = (user.ds & 0xffff) as u32;
                state.gp.es = (user.es & 0xffff) as u32;
                state.gp.fs = (user.fs & 0xffff) as u32;
                state.gp.gs = (user.gs & 0xffff) as u32;
                state.gp.eflags = user.eflags;
                state.gp.orig_rax = user.orig_rax;
                state.gp.fs_base = user.fs_base;
                state.gp.gs_base = user.gs_base;
            }

            fn state64_to_user(user: &mut libc::user_regs_struct, state: &X64State) {
                user.rax = state.gp.rax;
                user.rcx = state.gp.rcx;
                user.rdx = state.gp.rdx;
                user.rbx = state.gp.rbx;
                user.rsi = state.gp.rsi;
                user.rdi = state.gp.rdi;
                user.rbp = state.gp.rbp;
                user.rsp = state.gp.rsp;
                user.r8 = state.gp.r8;
                user.r9 = state.gp.r9;
                user.r10 = state.gp.r10;
                user.r11 = state.gp.r11;
                user.r12 = state.gp.r12;
                user.r13 = state.gp.r13;
                user.r14 = state.gp.r14;
                user.r15 = state.gp.r15;
                user.rip = state.gp.rip;
                user.cs = u64::from(state.gp.cs);
                user.ss = u64::from(state.gp.ss);
                user.ds = u64::from(state.gp.ds);
                user.es = u64::from(state.gp.es);
                user.fs = u64::from(state.gp.fs);
                user.gs = u64::from(state.gp.gs);
                user.eflags = state.gp.eflags;
                user.orig_rax = state.gp.orig_rax;
                user.fs_base = state.gp.fs_base;
                user.gs_base = state.gp.gs_base;
            }

            fn fpregs_to_state64(state: &mut X64State, user: &libc::user_fpregs_struct) {
                state.x87.fstw = user.swd;
                state.x87.fctw = user.cwd;
                state.x87.ftag = user.ftw;
                state.x87.fop = user.fop;
                state.x87.firip = user.rip;
                state.x87.forip = user.rdp;

                let st_space: &[u8] = unsafe {
                    std::slice::from_raw_parts(user.st_space.as_ptr() as *const u8, 128)
                };
                for n in 0..8 {
                    state.x87.regs[n].copy_from_slice(&st_space[n * 16..n * 16 + 10]);
                }

                state.avx.mxcsr = user.mxcsr;
                state.avx.mxcsr_mask = user.mxcr_mask;
                let xmm_space: &[u8] = unsafe {
                    std::slice::from_raw_parts(user.xmm_space.as_ptr() as *const u8, 256)
                };
                for n in 0..16 {
                    state.avx.xmm_mut(n).copy_from_slice(&xmm_space[n * 16..(n + 1) * 16]);
                }
            }

            fn state64_to_fpregs(user: &mut libc::user_fpregs_struct, state: &X64State) {
                user.swd = state.x87.fstw;
                user.cwd = state.x87.fctw;
                user.ftw = state.x87.ftag;
                user.fop = state.x87.fop;
                user.rip = state.x87.firip;
                user.rdp = state.x87.forip;

                let st_space: &mut [u8] = unsafe {
                    std::slice::from_raw_parts_mut(user.st_space.as_mut_ptr() as *mut u8, 128)
                };
                for n in 0..8 {
                    st_space[n * 16..n * 16 + 10].copy_from_slice(&state.x87.regs[n]);
                }

                user.mxcsr = state.avx.mxcsr;
                user.mxcr_mask = state.avx.mxcsr_mask;
                let xmm_space: &mut [u8] = unsafe {
                    std::slice::from_raw_parts_mut(user.xmm_space.as_mut_ptr() as *mut u8, 256)
                };
                for n in 0..16 {
                    xmm_space[n * 16..(n + 1) * 16].copy_from_slice(state.avx.xmm(n));
                }
            }

            fn user_to_state32(state: &mut X86State, user: &libc::user_regs_struct) {
                state.gp.eax = user.rax as u32;
                state.gp.ecx = user.rcx as u32;
                state.gp.edx = user.rdx as u32;
                state.gp.ebx = user.rbx as u32;
                state.gp.esi = user.rsi as u32;
                state.gp.edi = user.rdi as u32;
                state.gp.ebp = user.rbp as u32;
                state.gp.esp = user.rsp as u32;
                state.gp.eip = user.rip as u32;
                state.gp.cs = (user.cs & 0xffff) as u32;
                state.gp.ss = (user.ss & 0xffff) as u32;
                state.gp.ds = (user.ds & 0xffff) as u32;
                state.gp.es = (user.es & 0xffff) as u32;
                state.gp.fs = (user.fs & 0xffff) as u32;
                state.gp.gs = (user.gs & 0xffff) as u32;
                state.gp.eflags = user.eflags as u32;
                state.gp.orig_eax = user.orig_rax as u32;
            }

            fn state32_to_user(user: &mut libc::user_regs_struct, state: &X86State) {
                user.rax = u64::from(state.gp.eax);
                user.rcx = u64::from(state.gp.ecx);
                user.rdx = u64::from(state.gp.edx);
                user.rbx = u64::from(state.gp.ebx);
                user.rsi = u64::from(state.gp.esi);
                user.rdi = u64::from(state.gp.edi);
                user.rbp = u64::from(state.gp.ebp);
                user.rsp = u64::from(state.gp.esp);
                user.rip = u64::from(state.gp.eip);
                user.cs = u64::from(state.gp.cs);
                user.ss = u64::from(state.gp.ss);
                user.ds = u64::from(state.gp.ds);
                user.es = u64::from(state.gp.es);
                user.fs = u64::from(state.gp.fs);
                user.gs = u64::from(state.gp.gs);
                user.eflags = u64::from(state.gp.eflags);
                user.orig_rax = u64::from(state.gp.orig_eax);
            }

            fn fpregs_to_state32(state: &mut X86State, user: &libc::user_fpregs_struct) {
                state.x87.fstw = user.swd;
                state.x87.fctw = user.cwd;
                state.x87.ftag = user.ftw;
                state.x87.fop = user.fop;
                state.x87.fiseg = (user.rip >> 32) as u32;
                state.x87.fioff = user.rip as u32;
                state.x87.foseg = (user.rdp >> 32) as u32;
                state.x87.fooff = user.rdp as u32;

                let st_space: &[u8] = unsafe {
                    std::slice::from_raw_parts(user.st_space.as_ptr() as *const u8, 128)
                };
                for n in 0..8 {
                    state.x87.regs[n].copy_from_slice(&st_space[n * 16..n * 16 + 10]);
                }

                state.avx.mxcsr = user.mxcsr;
                state.avx.mxcsr_mask = user.mxcr_mask;
                let xmm_space: &[u8] = unsafe {
                    std::slice::from_raw_parts(user.xmm_space.as_ptr() as *const u8, 256)
                };
                for n in 0..8 {
                    state.avx.xmm_mut(n).copy_from_slice(&xmm_space[n * 16..(n + 1) * 16]);
                }
            }

            fn state32_to_fpregs(user: &mut libc::user_fpregs_struct, state: &X86State) {
                user.swd = state.x87.fstw;
                user.cwd = state.x87.fctw;
                user.ftw = state.x87.ftag;
                user.fop = state.x87.fop;
                user.rip = (u64::from(state.x87.fiseg) << 32) | u64::from(state.x87.fioff);
                user.rdp = (u64::from(state.x87.foseg) << 32) | u64::from(state.x87.fooff);

                let st_space: &mut [u8] = unsafe {
                    std::slice::from_raw_parts_mut(user.st_space.as_mut_ptr() as *mut u8, 128)
                };
                for n in 0..8 {
                    st_space[n * 16..n * 16 + 10].copy_from_slice(&state.x87.regs[n]);
                }

                user.mxcsr = state.avx.mxcsr;
                user.mxcr_mask = state.avx.mxcsr_mask;
                let xmm_space: &mut [u8] = unsafe {
                    std::slice::from_raw_parts_mut(user.xmm_space.as_mut_ptr() as *mut u8, 256)
                };
                for n in 0..8 {
                    xmm_space[n * 16..(n + 1) * 16].copy_from_slice(state.avx.xmm(n));
                }
            }

            pub fn read_cpu_state(pid: pid_t, state: &mut CpuState) -> Result<()> {
                let regs = getregs(pid)?;
                let fpregs = getfpregs(pid)?;
                match state {
                    CpuState::X64(s) => {
                        user_to_state64(s, &regs);
                        fpregs_to_state64(s, &fpregs);
                        Ok(())
                    }
                    CpuState::X64Compat32(s) | CpuState::X86(s) => {
                        user_to_state32(s, &regs);
                        fpregs_to_state32(s, &fpregs);
                        Ok(())
                    }
                    _ => Err(ErrorCode::Unsupported),
                }
            }

            pub fn write_cpu_state(pid: pid_t, state: &CpuState) -> Result<()> {
                // Read-modify-write: the canonical form does not cover
                // every kernel field.
                let mut regs = getregs(pid)?;
                let mut fpregs = getfpregs(pid)?;
                match state {
                    CpuState::X64(s) => {
                        state64_to_user(&mut regs, s);
                        state64_to_fpregs(&mut fpregs, s);
                    }
                    CpuState::X64Compat32(s) | CpuState::X86(s) => {
                        state32_to_user(&mut regs, s);
                        state32_to_fpregs(&mut fpregs, s);
                    }
                    _ => return Err(ErrorCode::Unsupported),
                }
                setregs(pid, &regs)?;
                setfpregs(pid, &fpregs)
            }

            pub fn read_debug_reg(tid: pid_t, idx: usize) -> Result<u64> {
                let offset = memoffset::offset_of!(libc::user, u_debugreg) + idx * 8;
                let value = wrap_ptrace(libc::PTRACE_PEEKUSER, tid, offset as u64, 0);
                if errno_value() != 0 {
                    return Err(ErrorCode::from(Errno::last()));
                }
                Ok(value as u64)
            }

            pub fn write_debug_reg(tid: pid_t, idx: usize, value: u64) -> Result<()> {
                let offset = memoffset::offset_of!(libc::user, u_debugreg) + idx * 8;
                check(wrap_ptrace(libc::PTRACE_POKEUSER, tid, offset as u64, value))?;
                Ok(())
            }

            pub fn max_hardware_breakpoints(_pid: pid_t) -> usize {
                4
            }

            pub fn max_hardware_watchpoints(_pid: pid_t) -> usize {
                4
            }

            pub fn max_watchpoint_size(_pid: pid_t) -> usize {
                8
            }

            pub fn write_hardware_stoppoint(
                _tid: pid_t,
                _slot: usize,
                _address: u64,
                _ctrl: u32,
                _watch: bool,
            ) -> Result<()> {
                // Debug registers cover both roles here.
                Err(ErrorCode::Unsupported)
            }
        }
    } else if #[cfg(target_arch = "aarch64")] {
        mod native {
            use super::*;
            use crate::arch::arm::ArmState;
            use crate::arch::arm64::Arm64State;

            const NT_PRSTATUS: c_uint = 1;
            const NT_PRFPREG: c_uint = 2;
            const NT_ARM_HW_BREAK: c_uint = 0x402;
            const NT_ARM_HW_WATCH: c_uint = 0x403;

            #[repr(C)]
            #[derive(Copy, Clone)]
            struct UserPtRegs {
                regs: [u64; 31],
                sp: u64,
                pc: u64,
                pstate: u64,
            }

            #[repr(C, align(16))]
            #[derive(Copy, Clone)]
            struct UserFpsimdState {
                vregs: [[u8; 16]; 32],
                fpsr: u32,
                fpcr: u32,
            }

            static_assertions::const_assert_eq!(std::mem::size_of::<UserPtRegs>(), 272);
            static_assertions::const_assert_eq!(std::mem::size_of::<UserFpsimdState>(), 528);

            #[repr(C)]
            #[derive(Copy, Clone)]
            struct HwDebugRegPair {
                addr: u64,
                ctrl: u32,
                pad: u32,
            }

            #[repr(C)]
            #[derive(Copy, Clone)]
            struct UserHwDebugState {
                dbg_info: u32,
                pad: u32,
                dbg_regs: [HwDebugRegPair; 16],
            }

            fn get_regset<T: Copy>(pid: pid_t, kind: c_uint, value: &mut T) -> Result<()> {
                let mut iov = libc::iovec {
                    iov_base: value as *mut T as *mut c_void,
                    iov_len: std::mem::size_of::<T>(),
                };
                check(wrap_ptrace(
                    libc::PTRACE_GETREGSET,
                    pid,
                    u64::from(kind),
                    &mut iov as *mut libc::iovec as u64,
                ))?;
                Ok(())
            }

            fn set_regset<T: Copy>(pid: pid_t, kind: c_uint, value: &T) -> Result<()> {
                let mut iov = libc::iovec {
                    iov_base: value as *const T as *mut c_void,
                    iov_len: std::mem::size_of::<T>(),
                };
                check(wrap_ptrace(
                    libc::PTRACE_SETREGSET,
                    pid,
                    u64::from(kind),
                    &mut iov as *mut libc::iovec as u64,
                ))?;
                Ok(())
            }

            fn regs_to_state(state: &mut Arm64State, regs: &UserPtRegs, fp: &UserFpsimdState) {
                state.gp.x.copy_from_slice(&regs.regs);
                state.gp.sp = regs.sp;
                state.gp.pc = regs.pc;
                state.gp.cpsr = regs.pstate as u32;
                state.fpsimd.v = fp.vregs;
                state.fpsimd.fpsr = fp.fpsr;
                state.fpsimd.fpcr = fp.fpcr;
            }

            fn state_to_regs(regs: &mut UserPtRegs, fp: &mut UserFpsimdState, state: &Arm64State) {
                regs.regs.copy_from_slice(&state.gp.x);
                regs.sp = state.gp.sp;
                regs.pc = state.gp.pc;
                regs.pstate = u64::from(state.gp.cpsr);
                fp.vregs = state.fpsimd.v;
                fp.fpsr = state.fpsimd.fpsr;
                fp.fpcr = state.fpsimd.fpcr;
            }

            // A 32-bit thread under the 64-bit kernel reports r0-r15 in
            // the low slots of the 64-bit register file.
            fn regs_to_a32(state: &mut ArmState, regs: &UserPtRegs) {
                for n in 0..15 {
                    state.gp.regs[n] = regs.regs[n] as u32;
                }
                state.gp.regs[15] = regs.pc as u32;
                state.gp.cpsr = regs.pstate as u32;
            }

            fn a32_to_regs(regs: &mut UserPtRegs, state: &ArmState) {
                for n in 0..15 {
                    regs.regs[n] = u64::from(state.gp.regs[n]);
                }
                regs.pc = u64::from(state.gp.regs[15]);
                regs.pstate = u64::from(state.gp.cpsr);
            }

            pub fn read_cpu_state(pid: pid_t, state: &mut CpuState) -> Result<()> {
                let mut regs: UserPtRegs = unsafe { std::mem::zeroed() };
                get_regset(pid, NT_PRSTATUS, &mut regs)?;
                match state {
                    CpuState::Arm64(s) => {
                        let mut fp: UserFpsimdState = unsafe { std::mem::zeroed() };
                        get_regset(pid, NT_PRFPREG, &mut fp)?;
                        regs_to_state(s, &regs, &fp);
                        Ok(())
                    }
                    CpuState::Arm64A32(s) => {
                        regs_to_a32(s, &regs);
                        Ok(())
                    }
                    _ => Err(ErrorCode::Unsupported),
                }
            }

            pub fn write_cpu_state(pid: pid_t, state: &CpuState) -> Result<()> {
                let mut regs: UserPtRegs = unsafe { std::mem::zeroed() };
                get_regset(pid, NT_PRSTATUS, &mut regs)?;
                match state {
                    CpuState::Arm64(s) => {
                        let mut fp: UserFpsimdState = unsafe { std::mem::zeroed() };
                        get_regset(pid, NT_PRFPREG, &mut fp)?;
                        state_to_regs(&mut regs, &mut fp, s);
                        set_regset(pid, NT_PRSTATUS, &regs)?;
                        set_regset(pid, NT_PRFPREG, &fp)
                    }
                    CpuState::Arm64A32(s) => {
                        a32_to_regs(&mut regs, s);
                        set_regset(pid, NT_PRSTATUS, &regs)
                    }
                    _ => Err(ErrorCode::Unsupported),
                }
            }

            pub fn read_debug_reg(_tid: pid_t, _idx: usize) -> Result<u64> {
                Err(ErrorCode::Unsupported)
            }

            pub fn write_debug_reg(_tid: pid_t, _idx: usize, _value: u64) -> Result<()> {
                Err(ErrorCode::Unsupported)
            }

            fn hw_debug_slots(pid: pid_t, kind: c_uint) -> usize {
                let mut dbg: UserHwDebugState = unsafe { std::mem::zeroed() };
                match get_regset(pid, kind, &mut dbg) {
                    Ok(()) => (dbg.dbg_info & 0xff) as usize,
                    Err(_) => 0,
                }
            }

            pub fn max_hardware_breakpoints(pid: pid_t) -> usize {
                hw_debug_slots(pid, NT_ARM_HW_BREAK)
            }

            pub fn max_hardware_watchpoints(pid: pid_t) -> usize {
                hw_debug_slots(pid, NT_ARM_HW_WATCH)
            }

            pub fn max_watchpoint_size(_pid: pid_t) -> usize {
                8
            }

            pub fn write_hardware_stoppoint(
                tid: pid_t,
                slot: usize,
                address: u64,
                ctrl: u32,
                watch: bool,
            ) -> Result<()> {
                if slot >= 16 {
                    return Err(ErrorCode::InvalidArgument);
                }
                let kind = if watch { NT_ARM_HW_WATCH } else { NT_ARM_HW_BREAK };
                let mut dbg: UserHwDebugState = unsafe { std::mem::zeroed() };
                get_regset(tid, kind, &mut dbg)?;
                dbg.dbg_regs[slot].addr = address;
                dbg.dbg_regs[slot].ctrl = ctrl;
                set_regset(tid, kind, &dbg)
            }
        }
    } else if #[cfg(target_arch = "arm")] {
        mod native {
            use super::*;
            use crate::arch::arm::ArmState;

            const PTRACE_GETVFPREGS: c_uint = 27;
            const PTRACE_SETVFPREGS: c_uint = 28;
            const PTRACE_GETHBPREGS: c_uint = 29;
            const PTRACE_SETHBPREGS: c_uint = 30;

            // r0-r15, cpsr, orig_r0.
            #[repr(C)]
            #[derive(Copy, Clone)]
            struct PtRegs {
                uregs: [u32; 18],
            }

            #[repr(C)]
            #[derive(Copy, Clone)]
            struct VfpRegs {
                fpregs: [u64; 32],
                fpscr: u32,
            }

            pub fn read_cpu_state(pid: pid_t, state: &mut CpuState) -> Result<()> {
                let s = match state {
                    CpuState::Arm(s) => s,
                    _ => return Err(ErrorCode::Unsupported),
                };

                let mut regs: PtRegs = unsafe { std::mem::zeroed() };
                check(wrap_ptrace(
                    libc::PTRACE_GETREGS,
                    pid,
                    0,
                    &mut regs as *mut _ as u64,
                ))?;
                s.gp.regs.copy_from_slice(&regs.uregs[..16]);
                s.gp.cpsr = regs.uregs[16];

                let mut vfp: VfpRegs = unsafe { std::mem::zeroed() };
                check(wrap_ptrace(
                    PTRACE_GETVFPREGS,
                    pid,
                    0,
                    &mut vfp as *mut _ as u64,
                ))?;
                s.vfp.dbl.copy_from_slice(&vfp.fpregs);
                s.vfp.fpscr = vfp.fpscr;

                read_hw_debug_state(pid, s);
                Ok(())
            }

            fn read_hw_debug_state(pid: pid_t, s: &mut ArmState) {
                let (bps, wps, _) = hw_debug_caps(pid);
                for n in 0..bps {
                    s.hdr.bvr[n] = peek_hbp_reg(pid, ((n as i32) << 1) + 1).unwrap_or(0);
                    s.hdr.bcr[n] = peek_hbp_reg(pid, ((n as i32) << 1) + 2).unwrap_or(0);
                }
                for n in 0..wps {
                    s.hdr.wvr[n] = peek_hbp_reg(pid, -(((n as i32) << 1) + 1)).unwrap_or(0);
                    s.hdr.wcr[n] = peek_hbp_reg(pid, -(((n as i32) << 1) + 2)).unwrap_or(0);
                }
            }

            fn peek_hbp_reg(pid: pid_t, idx: i32) -> Result<u32> {
                let mut value: u32 = 0;
                check(wrap_ptrace(
                    PTRACE_GETHBPREGS,
                    pid,
                    idx as i64 as u64,
                    &mut value as *mut u32 as u64,
                ))?;
                Ok(value)
            }

            pub fn write_cpu_state(pid: pid_t, state: &CpuState) -> Result<()> {
                let s = match state {
                    CpuState::Arm(s) => s,
                    _ => return Err(ErrorCode::Unsupported),
                };

                let mut regs: PtRegs = unsafe { std::mem::zeroed() };
                check(wrap_ptrace(
                    libc::PTRACE_GETREGS,
                    pid,
                    0,
                    &mut regs as *mut _ as u64,
                ))?;
                regs.uregs[..16].copy_from_slice(&s.gp.regs);
                regs.uregs[16] = s.gp.cpsr;
                check(wrap_ptrace(
                    libc::PTRACE_SETREGS,
                    pid,
                    0,
                    &regs as *const _ as u64,
                ))?;

                let mut vfp: VfpRegs = unsafe { std::mem::zeroed() };
                vfp.fpregs.copy_from_slice(&s.vfp.dbl);
                vfp.fpscr = s.vfp.fpscr;
                check(wrap_ptrace(
                    PTRACE_SETVFPREGS,
                    pid,
                    0,
                    &vfp as *const _ as u64,
                ))?;
                Ok(())
            }

            pub fn read_debug_reg(_tid: pid_t, _idx: usize) -> Result<u64> {
                Err(ErrorCode::Unsupported)
            }

            pub fn write_debug_reg(_tid: pid_t, _idx: usize, _value: u64) -> Result<()> {
                Err(ErrorCode::Unsupported)
            }

            /// The capability word reports (breakpoints, watchpoints,
            /// max watched bytes); zero when the kernel lacks support.
            fn hw_debug_caps(pid: pid_t) -> (usize, usize, usize) {
                match peek_hbp_reg(pid, 0) {
                    Ok(value) if value >> 24 != 0 => {
                        let bps = (value & 0xff) as usize;
                        let wps = ((value >> 8) & 0xff) as usize;
                        let max_size = ((value >> 16) & 0xff) as usize;
                        (bps.min(32), wps.min(32), max_size)
                    }
                    _ => (0, 0, 0),
                }
            }

            pub fn max_hardware_breakpoints(pid: pid_t) -> usize {
                hw_debug_caps(pid).0
            }

            pub fn max_hardware_watchpoints(pid: pid_t) -> usize {
                hw_debug_caps(pid).1
            }

            pub fn max_watchpoint_size(pid: pid_t) -> usize {
                hw_debug_caps(pid).2
            }

            pub fn write_hardware_stoppoint(
                tid: pid_t,
                slot: usize,
                address: u64,
                ctrl: u32,
                watch: bool,
            ) -> Result<()> {
                let base = ((slot as i32) << 1) + 1;
                let (value_idx, ctrl_idx) = if watch {
                    (-base, -(base + 1))
                } else {
                    (base, base + 1)
                };

                let value = address as u32;
                check(wrap_ptrace(
                    PTRACE_SETHBPREGS,
                    tid,
                    value_idx as i64 as u64,
                    &value as *const u32 as u64,
                ))?;
                check(wrap_ptrace(
                    PTRACE_SETHBPREGS,
                    tid,
                    ctrl_idx as i64 as u64,
                    &ctrl as *const u32 as u64,
                ))?;
                Ok(())
            }
        }
    } else {
        mod native {
            use super::*;

            pub fn read_cpu_state(_pid: pid_t, _state: &mut CpuState) -> Result<()> {
                Err(ErrorCode::Unsupported)
            }

            pub fn write_cpu_state(_pid: pid_t, _state: &CpuState) -> Result<()> {
                Err(ErrorCode::Unsupported)
            }

            pub fn read_debug_reg(_tid: pid_t, _idx: usize) -> Result<u64> {
                Err(ErrorCode::Unsupported)
            }

            pub fn write_debug_reg(_tid: pid_t, _idx: usize, _value: u64) -> Result<()> {
                Err(ErrorCode::Unsupported)
            }

            pub fn max_hardware_breakpoints(_pid: pid_t) -> usize {
                0
            }

            pub fn max_hardware_watchpoints(_pid: pid_t) -> usize {
                0
            }

            pub fn max_watchpoint_size(_pid: pid_t) -> usize {
                0
            }

            pub fn write_hardware_stoppoint(
                _tid: pid_t,
                _slot: usize,
                _address: u64,
                _ctrl: u32,
                _watch: bool,
            ) -> Result<()> {
                Err(ErrorCode::Unsupported)
            }
        }
    }
}
