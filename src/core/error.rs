//! Connection errors.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Failed to create pipe: {0}")]
    PipeCreation(#[source] io::Error),

    #[error("Failed to create pseudo console: {0}")]
    PseudoConsoleCreation(#[source] io::Error),

    #[error("Failed to build process attribute list: {0}")]
    AttributeList(#[source] io::Error),

    #[error("Failed to launch process (error {code:#x}): {source}")]
    ProcessLaunch {
        code: u32,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write to pseudo console: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to resize pseudo console: {0}")]
    Resize(#[source] io::Error),

    #[error("Failed to start worker thread: {0}")]
    Worker(#[source] io::Error),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Session was already started")]
    AlreadyStarted,

    #[error("Pseudo consoles are only supported on Windows")]
    Unsupported,
}

impl ConnectionError {
    /// The OS error code behind a launch failure, if this is one.
    pub fn launch_error_code(&self) -> Option<u32> {
        match self {
            ConnectionError::ProcessLaunch { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Convert a Windows API error into an `io::Error` carrying the Win32 code.
#[cfg(windows)]
pub(crate) fn os_error(error: &windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error(win32_code(error) as i32)
}

/// Recover the Win32 error code from an HRESULT built with `HRESULT_FROM_WIN32`.
#[cfg(windows)]
pub(crate) fn win32_code(error: &windows::core::Error) -> u32 {
    const FACILITY_WIN32: u32 = 7;
    let hresult = error.code().0 as u32;
    if (hresult >> 16) & 0x1fff == FACILITY_WIN32 {
        hresult & 0xffff
    } else {
        hresult
    }
}
