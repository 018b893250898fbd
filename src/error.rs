use core::fmt;

/// Error kinds returned by the kernel services the core calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    Unspecified,
    /// Environment doesn't exist or the caller may not touch it.
    BadEnv,
    Invalid,
    NoMem,
    NoFreeEnv,
    /// The environment faulted and was destroyed.
    Fault,
}

pub type SysResult<T> = Result<T, SysError>;

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SysError::Unspecified => "unspecified error",
            SysError::BadEnv => "bad environment",
            SysError::Invalid => "invalid parameter",
            SysError::NoMem => "out of memory",
            SysError::NoFreeEnv => "out of environments",
            SysError::Fault => "segmentation fault",
        };
        f.write_str(msg)
    }
}
