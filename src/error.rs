use nix::errno::Errno;
use std::fmt;

/// Error codes as defined by the GDB remoting documentation, plus some
/// others. Kernel-layer failures are translated into this enumeration and
/// bubble up unchanged; the engine itself never prints.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorCode {
    NoPermission,
    NotFound,
    ProcessNotFound,
    Interrupted,
    InvalidHandle,
    NoMemory,
    AccessDenied,
    InvalidAddress,
    Busy,
    AlreadyExist,
    NoDevice,
    NotDirectory,
    IsDirectory,
    InvalidArgument,
    TooManySystemFiles,
    TooManyFiles,
    FileTooBig,
    NoSpace,
    InvalidSeek,
    NotWriteable,
    NameTooLong,
    Unknown,
    Unsupported,
}

pub type Result<T> = std::result::Result<T, ErrorCode>;

impl ErrorCode {
    /// Translate a raw errno value, e.g. the negated result of an injected
    /// syscall.
    pub fn from_raw_errno(errno: i32) -> ErrorCode {
        ErrorCode::from(Errno::from_i32(errno))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NoPermission => "no permission",
            ErrorCode::NotFound => "not found",
            ErrorCode::ProcessNotFound => "process not found",
            ErrorCode::Interrupted => "interrupted",
            ErrorCode::InvalidHandle => "invalid handle",
            ErrorCode::NoMemory => "no memory",
            ErrorCode::AccessDenied => "access denied",
            ErrorCode::InvalidAddress => "invalid address",
            ErrorCode::Busy => "busy",
            ErrorCode::AlreadyExist => "already exists",
            ErrorCode::NoDevice => "no device",
            ErrorCode::NotDirectory => "not a directory",
            ErrorCode::IsDirectory => "is a directory",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::TooManySystemFiles => "too many open files in system",
            ErrorCode::TooManyFiles => "too many open files",
            ErrorCode::FileTooBig => "file too big",
            ErrorCode::NoSpace => "no space left",
            ErrorCode::InvalidSeek => "invalid seek",
            ErrorCode::NotWriteable => "not writeable",
            ErrorCode::NameTooLong => "name too long",
            ErrorCode::Unknown => "unknown error",
            ErrorCode::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ErrorCode {}

impl From<Errno> for ErrorCode {
    fn from(errno: Errno) -> ErrorCode {
        match errno {
            Errno::EPERM => ErrorCode::NoPermission,
            Errno::ENOENT => ErrorCode::NotFound,
            Errno::ESRCH => ErrorCode::ProcessNotFound,
            Errno::EINTR => ErrorCode::Interrupted,
            Errno::EBADF => ErrorCode::InvalidHandle,
            Errno::ENOMEM => ErrorCode::NoMemory,
            Errno::EACCES => ErrorCode::AccessDenied,
            Errno::EFAULT => ErrorCode::InvalidAddress,
            Errno::EBUSY => ErrorCode::Busy,
            Errno::EEXIST => ErrorCode::AlreadyExist,
            Errno::ENODEV => ErrorCode::NoDevice,
            Errno::ENOTDIR => ErrorCode::NotDirectory,
            Errno::EISDIR => ErrorCode::IsDirectory,
            Errno::EINVAL => ErrorCode::InvalidArgument,
            Errno::ENFILE => ErrorCode::TooManySystemFiles,
            Errno::EMFILE => ErrorCode::TooManyFiles,
            Errno::EFBIG => ErrorCode::FileTooBig,
            Errno::ENOSPC => ErrorCode::NoSpace,
            Errno::ESPIPE => ErrorCode::InvalidSeek,
            Errno::EROFS => ErrorCode::NotWriteable,
            Errno::ENAMETOOLONG => ErrorCode::NameTooLong,
            Errno::ENOSYS => ErrorCode::Unsupported,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<nix::Error> for ErrorCode {
    fn from(error: nix::Error) -> ErrorCode {
        match error {
            nix::Error::Sys(errno) => ErrorCode::from(errno),
            nix::Error::InvalidPath | nix::Error::InvalidUtf8 => ErrorCode::InvalidArgument,
            nix::Error::UnsupportedOperation => ErrorCode::Unsupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_translation() {
        assert_eq!(ErrorCode::from(Errno::ESRCH), ErrorCode::ProcessNotFound);
        assert_eq!(ErrorCode::from(Errno::EINVAL), ErrorCode::InvalidArgument);
        assert_eq!(ErrorCode::from(Errno::ENAMETOOLONG), ErrorCode::NameTooLong);
        assert_eq!(ErrorCode::from(Errno::EIO), ErrorCode::Unknown);
    }

    #[test]
    fn negated_syscall_results() {
        assert_eq!(ErrorCode::from_raw_errno(libc::ENOMEM), ErrorCode::NoMemory);
        assert_eq!(ErrorCode::from_raw_errno(libc::EACCES), ErrorCode::AccessDenied);
    }
}
