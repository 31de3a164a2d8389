use thiserror::Error;

/// DOS error codes, reported to the guest in AX with CF set.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DosError {
    #[error("function number invalid")]
    FunctionInvalid = 0x01,
    #[error("file not found")]
    FileNotFound = 0x02,
    #[error("path not found")]
    PathNotFound = 0x03,
    #[error("too many open files")]
    TooManyOpenFiles = 0x04,
    #[error("access denied")]
    AccessDenied = 0x05,
    #[error("handle invalid")]
    InvalidHandle = 0x06,
    #[error("memory control block destroyed")]
    McbDestroyed = 0x07,
    #[error("insufficient memory")]
    InsufficientMemory = 0x08,
    #[error("memory block address invalid")]
    McbAddressInvalid = 0x09,
    #[error("environment invalid")]
    EnvironmentInvalid = 0x0A,
    #[error("format invalid")]
    FormatInvalid = 0x0B,
    #[error("access code invalid")]
    AccessCodeInvalid = 0x0C,
    #[error("data invalid")]
    DataInvalid = 0x0D,
    #[error("invalid drive")]
    InvalidDrive = 0x0F,
    #[error("attempted to remove current directory")]
    RemoveCurrentDir = 0x10,
    #[error("not same device")]
    NotSameDevice = 0x11,
    #[error("no more files")]
    NoMoreFiles = 0x12,
}

impl DosError {
    pub fn code(self) -> u16 {
        self as u16
    }
}

pub type DosResult<T> = Result<T, DosError>;

/// Failure of a stream operation. Guest mistakes stay recoverable; a host
/// I/O error on an already-open stream must halt the emulator instead of
/// corrupting guest state.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Dos(#[from] DosError),
    #[error("unrecoverable host i/o: {0}")]
    Unrecoverable(#[source] std::io::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Control signal handed back to the host emulator loop after an interrupt.
#[derive(Debug)]
pub enum Signal {
    /// Service completed, resume guest execution.
    Ok,
    /// The initial program terminated with this exit code.
    Halt(u8),
    /// Unrecoverable host failure, stop the machine.
    Abort(String),
}
