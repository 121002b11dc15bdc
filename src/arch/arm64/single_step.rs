//! Software single-step for AArch64.
//!
//! The kernels this engine targets provide a working hardware single-step
//! on AArch64, so the software planner is not implemented; callers fall
//! back to PTRACE_SINGLESTEP. The branch decoder in
//! [`branching`](super::branching) already covers the successor analysis a
//! future implementation would need.

use crate::arch::arm64::Arm64State;
use crate::breakpoint::software::SoftwareBreakpointManager;
use crate::error::{ErrorCode, Result};
use crate::memory::TraceeMemory;
use crate::types::Address;

pub fn prepare_software_single_step(
    _mem: &mut dyn TraceeMemory,
    _manager: &mut SoftwareBreakpointManager,
    _state: &Arm64State,
    _address: Address,
) -> Result<()> {
    Err(ErrorCode::Unsupported)
}
