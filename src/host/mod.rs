pub mod ptrace;
pub mod syscalls;

lazy_static! {
    pub static ref PAGE_SIZE: usize =
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
}
