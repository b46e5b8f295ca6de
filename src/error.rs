use core::fmt;

/// Scheduler error types.
///
/// Invariant violations are not represented here: they halt the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Every process table slot is in use.
    NoProcessSlot,
    /// A kernel stack or address space could not be allocated.
    OutOfMemory,
    /// No process has the requested pid.
    NoSuchProcess,
    /// The caller has no children to wait for (or was killed while waiting).
    NoChildren,
}

/// Broad class of a [`SchedError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ResourceExhausted,
    NotFound,
}

impl SchedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SchedError::NoProcessSlot | SchedError::OutOfMemory => ErrorKind::ResourceExhausted,
            SchedError::NoSuchProcess | SchedError::NoChildren => ErrorKind::NotFound,
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedError::NoProcessSlot => write!(f, "Process table full"),
            SchedError::OutOfMemory => write!(f, "Out of memory"),
            SchedError::NoSuchProcess => write!(f, "No such process"),
            SchedError::NoChildren => write!(f, "No child processes"),
        }
    }
}

pub type SchedResult<T> = Result<T, SchedError>;
