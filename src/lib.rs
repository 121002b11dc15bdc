//! A ptrace-based debug engine.
//!
//! This crate is the part of a remote debug server that actually controls
//! the tracee: process and thread lifecycle, CPU state access, software
//! and hardware breakpoints, software single-stepping on ARM, and in-target
//! code injection for memory allocation. The GDB/LLDB wire protocol, the
//! process spawner and the command-line front end are upstream collaborators
//! and live elsewhere; they drive this engine through [`target::Process`].

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod arch;
pub mod breakpoint;
pub mod error;
pub mod host;
pub mod memory;
pub mod stop_info;
pub mod target;
pub mod types;

pub use crate::error::{ErrorCode, Result};
pub use crate::memory::TraceeMemory;
pub use crate::stop_info::{StopEvent, StopInfo, StopReason, ThreadState};
pub use crate::types::{Address, ProcessThreadId};
