//! One debuggee thread: CPU state access, run-state transitions, and the
//! interpretation of wait statuses into [`StopInfo`].

use crate::arch::{CpuArch, CpuState};
use crate::breakpoint::software::SoftwareBreakpointManager;
use crate::error::{ErrorCode, Result};
use crate::host::ptrace::{Ptrace, PtraceMemory};
use crate::stop_info::{StopEvent, StopInfo, StopReason, ThreadState};
use crate::target::linux;
use crate::types::{Address, ProcessInfo, ProcessThreadId};
use libc::pid_t;
use nix::sys::wait::WaitStatus;

pub struct Thread {
    ptid: ProcessThreadId,
    state: ThreadState,
    stop_info: StopInfo,
    /// Set between a step request and the stop it produces; the next
    /// SIGTRAP is a trace event, not a breakpoint.
    single_stepping: bool,
    ptrace: Ptrace,
}

impl Thread {
    /// Threads come into existence stopped at an entry event, waiting for
    /// the debugger to let them go.
    pub fn new(pid: pid_t, tid: pid_t) -> Thread {
        debug!("[new thread {} (of process {})]", tid, pid);
        let mut stop_info = StopInfo::new();
        stop_info.event = StopEvent::Stop;
        stop_info.reason = StopReason::ThreadEntry;
        Thread {
            ptid: ProcessThreadId::new(pid, tid),
            state: ThreadState::Stopped,
            stop_info,
            single_stepping: false,
            ptrace: Ptrace::new(),
        }
    }

    pub fn tid(&self) -> pid_t {
        self.ptid.tid
    }

    pub fn ptid(&self) -> ProcessThreadId {
        self.ptid
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn stop_info(&self) -> &StopInfo {
        &self.stop_info
    }

    pub fn stop_info_mut(&mut self) -> &mut StopInfo {
        &mut self.stop_info
    }

    /// CPU the thread last ran on.
    pub fn core(&self) -> i32 {
        self.stop_info.core
    }

    pub fn read_cpu_state(&self, info: &ProcessInfo, state: &mut CpuState) -> Result<()> {
        self.ptrace.read_cpu_state(self.ptid, info, state)
    }

    pub fn write_cpu_state(&self, info: &ProcessInfo, state: &CpuState) -> Result<()> {
        self.ptrace.write_cpu_state(self.ptid, info, state)
    }

    /// Read-modify-write helper for partial register updates.
    pub fn modify_registers(
        &self,
        info: &ProcessInfo,
        action: impl FnOnce(&mut CpuState),
    ) -> Result<()> {
        let mut state = CpuState::new(info.arch, info.is_32bit());
        self.read_cpu_state(info, &mut state)?;
        action(&mut state);
        self.write_cpu_state(info, &state)
    }

    pub fn resume(&mut self, info: &ProcessInfo, signal: i32, address: Address) -> Result<()> {
        match self.state {
            ThreadState::Stopped | ThreadState::Stepped => {
                self.ptrace.resume(self.ptid, info, signal, address)?;
                self.single_stepping = false;
                self.state = ThreadState::Running;
                Ok(())
            }
            ThreadState::Running => Ok(()),
            ThreadState::Terminated | ThreadState::Invalid => Err(ErrorCode::ProcessNotFound),
        }
    }

    /// Single-step: hardware where the kernel provides it, otherwise the
    /// planner plants one-shot breakpoints and the thread is resumed
    /// normally.
    pub fn step(
        &mut self,
        info: &ProcessInfo,
        signal: i32,
        address: Address,
        breakpoints: &mut SoftwareBreakpointManager,
    ) -> Result<()> {
        if !self.state.is_paused() {
            return Err(ErrorCode::InvalidArgument);
        }

        let mut state = CpuState::new(info.arch, info.is_32bit());
        self.read_cpu_state(info, &mut state)?;

        if state.exec_arch() == CpuArch::Arm {
            let arm_state = match &state {
                CpuState::Arm(s) | CpuState::Arm64A32(s) => s,
                _ => return Err(ErrorCode::Unsupported),
            };
            let mut mem = PtraceMemory::new(self.ptid);
            crate::arch::arm::single_step::prepare_software_single_step(
                &mut mem,
                breakpoints,
                arm_state,
                address,
            )?;
            self.ptrace.resume(self.ptid, info, signal, Address::invalid())?;
        } else {
            self.ptrace.step(self.ptid, info, signal, address)?;
        }

        self.single_stepping = true;
        self.state = ThreadState::Running;
        Ok(())
    }

    /// Force a stop with SIGSTOP and consume the resulting event.
    pub fn suspend(&mut self) -> Result<()> {
        if self.state != ThreadState::Running {
            return Ok(());
        }
        self.ptrace.suspend(self.ptid)?;
        let status = self.ptrace.wait(self.ptid)?;
        self.update_stop_info(&status);
        if self.state == ThreadState::Terminated {
            return Err(ErrorCode::ProcessNotFound);
        }
        Ok(())
    }

    pub fn terminate(&mut self) -> Result<()> {
        self.ptrace.kill(self.ptid, libc::SIGKILL)
    }

    /// Classify a wait status into the thread's stop information and run
    /// state. Called from the process wait loop as soon as the kernel
    /// reports the event.
    pub fn update_stop_info(&mut self, status: &WaitStatus) {
        self.stop_info.clear();
        self.stop_info.core = linux::thread_core(self.ptid.pid, self.ptid.tid).unwrap_or(-1);

        match *status {
            WaitStatus::Exited(_, code) => {
                self.state = ThreadState::Terminated;
                self.stop_info.event = StopEvent::Exit;
                self.stop_info.status = code;
            }
            WaitStatus::Signaled(_, signal, _) => {
                self.state = ThreadState::Terminated;
                self.stop_info.event = StopEvent::Kill;
                self.stop_info.signal = signal as i32;
            }
            WaitStatus::Stopped(_, signal) => {
                self.stop_info.event = StopEvent::Stop;
                self.stop_info.signal = signal as i32;
                if signal == nix::sys::signal::Signal::SIGTRAP && self.single_stepping {
                    self.state = ThreadState::Stepped;
                    self.stop_info.reason = StopReason::Trace;
                } else {
                    self.state = ThreadState::Stopped;
                    self.stop_info.reason = if signal == nix::sys::signal::Signal::SIGTRAP {
                        StopReason::Trap
                    } else {
                        StopReason::SignalStop
                    };
                }
                self.single_stepping = false;
            }
            WaitStatus::PtraceEvent(_, signal, _) => {
                self.state = ThreadState::Stopped;
                self.stop_info.event = StopEvent::Stop;
                self.stop_info.signal = signal as i32;
                self.stop_info.reason = StopReason::Trap;
            }
            WaitStatus::PtraceSyscall(_) => {
                self.state = ThreadState::Stopped;
                self.stop_info.event = StopEvent::Stop;
                self.stop_info.signal = libc::SIGTRAP;
                self.stop_info.reason = StopReason::Trap;
            }
            WaitStatus::StillAlive | WaitStatus::Continued(_) => {}
        }
    }

    /// Adopt a stop observed before this thread's existence was known;
    /// used when a new thread's first stop races the clone event.
    pub fn mark_stopped(&mut self) {
        self.state = ThreadState::Stopped;
        self.stop_info.event = StopEvent::Stop;
        self.stop_info.reason = StopReason::ThreadEntry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    fn thread() -> Thread {
        Thread::new(100, 101)
    }

    #[test]
    fn initial_state_is_stopped_at_entry() {
        let t = thread();
        assert_eq!(t.state(), ThreadState::Stopped);
        assert_eq!(t.stop_info().event, StopEvent::Stop);
        assert_eq!(t.stop_info().reason, StopReason::ThreadEntry);
    }

    #[test]
    fn exit_classification() {
        let mut t = thread();
        t.update_stop_info(&WaitStatus::Exited(Pid::from_raw(101), 3));
        assert_eq!(t.state(), ThreadState::Terminated);
        assert_eq!(t.stop_info().event, StopEvent::Exit);
        assert_eq!(t.stop_info().status, 3);
    }

    #[test]
    fn kill_classification() {
        let mut t = thread();
        t.update_stop_info(&WaitStatus::Signaled(Pid::from_raw(101), Signal::SIGKILL, false));
        assert_eq!(t.state(), ThreadState::Terminated);
        assert_eq!(t.stop_info().event, StopEvent::Kill);
        assert_eq!(t.stop_info().signal, libc::SIGKILL);
    }

    #[test]
    fn signal_stop_classification() {
        let mut t = thread();
        t.update_stop_info(&WaitStatus::Stopped(Pid::from_raw(101), Signal::SIGSEGV));
        assert_eq!(t.state(), ThreadState::Stopped);
        assert_eq!(t.stop_info().event, StopEvent::Stop);
        assert_eq!(t.stop_info().signal, libc::SIGSEGV);
        assert_eq!(t.stop_info().reason, StopReason::SignalStop);
    }

    #[test]
    fn trap_vs_trace_classification() {
        let mut t = thread();
        t.update_stop_info(&WaitStatus::Stopped(Pid::from_raw(101), Signal::SIGTRAP));
        assert_eq!(t.state(), ThreadState::Stopped);
        assert_eq!(t.stop_info().reason, StopReason::Trap);

        // After a step request the same trap reads as a trace event.
        t.single_stepping = true;
        t.update_stop_info(&WaitStatus::Stopped(Pid::from_raw(101), Signal::SIGTRAP));
        assert_eq!(t.state(), ThreadState::Stepped);
        assert_eq!(t.stop_info().reason, StopReason::Trace);

        // The flag is consumed by the observation.
        t.update_stop_info(&WaitStatus::Stopped(Pid::from_raw(101), Signal::SIGTRAP));
        assert_eq!(t.state(), ThreadState::Stopped);
    }

    #[test]
    fn terminated_is_a_sink() {
        let mut t = thread();
        t.update_stop_info(&WaitStatus::Exited(Pid::from_raw(101), 0));
        let info = ProcessInfo {
            pid: 100,
            parent_pid: 1,
            name: String::new(),
            real_uid: 0,
            real_gid: 0,
            effective_uid: 0,
            effective_gid: 0,
            arch: CpuArch::X64,
            endian: crate::types::Endian::Little,
            pointer_size: 8,
        };
        assert_eq!(
            t.resume(&info, 0, Address::invalid()),
            Err(ErrorCode::ProcessNotFound)
        );
    }
}
