use crate::types::Address;

/// What the most recent wait observed for a thread.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopEvent {
    None,
    Stop,
    Exit,
    Kill,
}

/// Why a `Stop` event happened, as far as the engine can tell after
/// consulting the breakpoint managers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopReason {
    None,
    WriteWatchpoint,
    ReadWatchpoint,
    AccessWatchpoint,
    Breakpoint,
    Trace,
    SignalStop,
    Trap,
    ThreadSpawn,
    ThreadEntry,
    ThreadExit,
}

/// Per-thread stop information, set by the event-interpretation step and
/// consumed by the protocol layer.
#[derive(Clone, Debug)]
pub struct StopInfo {
    pub event: StopEvent,
    pub reason: StopReason,
    /// Exit code when `event == Exit`.
    pub status: i32,
    /// Signal number when stopped or killed by a signal.
    pub signal: i32,
    /// CPU the thread last ran on, -1 if unknown.
    pub core: i32,
    pub watchpoint_address: Address,
    pub watchpoint_index: i32,
}

impl StopInfo {
    pub fn new() -> StopInfo {
        StopInfo {
            event: StopEvent::None,
            reason: StopReason::None,
            status: 0,
            signal: 0,
            core: -1,
            watchpoint_address: Address::invalid(),
            watchpoint_index: -1,
        }
    }

    pub fn clear(&mut self) {
        *self = StopInfo::new();
    }
}

impl Default for StopInfo {
    fn default() -> StopInfo {
        StopInfo::new()
    }
}

/// Thread run-state machine.
///
/// ```text
/// Stopped|Stepped --resume--> Running
/// Stopped|Stepped --step----> Running   (next observation: Stepped)
/// Running --wait observes stop------> Stopped
/// Running --wait observes step trap-> Stepped
/// *       --wait observes exit/kill-> Terminated (sink)
/// ```
///
/// `Invalid` means "not yet queried" and is never observable externally;
/// threads come into existence stopped at an entry event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    Invalid,
    Running,
    Stopped,
    Stepped,
    Terminated,
}

impl ThreadState {
    pub fn is_paused(self) -> bool {
        self == ThreadState::Stopped || self == ThreadState::Stepped
    }
}
