//! ConPTY, child process and job object handle owners

use std::io;
use std::mem;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Console::{ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation, SetInformationJobObject,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};
use windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, ResumeThread, TerminateProcess, WaitForSingleObject, CREATE_SUSPENDED,
    EXTENDED_STARTUPINFO_PRESENT, INFINITE, PROCESS_INFORMATION,
};

use super::attributes::SessionAttributes;
use super::error::{os_error, win32_code, ConnectionError};
use super::pipe::{OwnedHandle, PipeEnd};

/// Exit code Windows reports for a process that is still running.
const STILL_ACTIVE: u32 = 259;

fn coord(rows: u16, cols: u16) -> COORD {
    COORD {
        X: cols.min(i16::MAX as u16) as i16,
        Y: rows.min(i16::MAX as u16) as i16,
    }
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Pseudo console handle, closed on drop
pub struct PseudoConsole {
    handle: HPCON,
}

// Safety: the HPCON is only passed to Resize/ClosePseudoConsole, which may be called from any thread
unsafe impl Send for PseudoConsole {}
unsafe impl Sync for PseudoConsole {}

impl PseudoConsole {
    /// Create a pseudo console reading from `input` and writing to `output`.
    ///
    /// The pseudo console duplicates both handles; the caller may close its
    /// copies as soon as this returns.
    pub fn create(rows: u16, cols: u16, input: &PipeEnd, output: &PipeEnd) -> io::Result<Self> {
        let handle =
            unsafe { CreatePseudoConsole(coord(rows, cols), input.raw(), output.raw(), 0) }.map_err(|e| os_error(&e))?;
        debug!("pseudo console created ({}x{})", cols, rows);
        Ok(Self { handle })
    }

    pub fn handle(&self) -> HPCON {
        self.handle
    }

    pub fn resize(&self, rows: u16, cols: u16) -> io::Result<()> {
        unsafe { ResizePseudoConsole(self.handle, coord(rows, cols)) }.map_err(|e| os_error(&e))
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        unsafe { ClosePseudoConsole(self.handle) };
        debug!("pseudo console closed");
    }
}

/// A launched child process
pub struct ChildProcess {
    process: OwnedHandle,
    thread: OwnedHandle,
    pid: u32,
}

impl ChildProcess {
    /// Launch `command_line` attached through `attributes`.
    ///
    /// With `suspended` set the primary thread does not run until
    /// [`resume`](Self::resume) is called.
    pub fn spawn(
        command_line: &str,
        starting_directory: Option<&Path>,
        attributes: &mut SessionAttributes,
        suspended: bool,
    ) -> Result<Self, ConnectionError> {
        let mut command = wide(command_line);
        let directory = starting_directory.map(|dir| wide(&dir.to_string_lossy()));
        let directory_ptr = directory.as_ref().map_or(PCWSTR::null(), |dir| PCWSTR(dir.as_ptr()));

        let mut flags = EXTENDED_STARTUPINFO_PRESENT;
        if suspended {
            flags = flags | CREATE_SUSPENDED;
        }

        let startup_info = attributes.startup_info();
        let mut info = PROCESS_INFORMATION::default();
        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(command.as_mut_ptr()),
                None,
                None,
                false,
                flags,
                None,
                directory_ptr,
                &startup_info.StartupInfo,
                &mut info,
            )
        }
        .map_err(|e| ConnectionError::ProcessLaunch {
            code: win32_code(&e),
            source: os_error(&e),
        })?;

        debug!("launched process {} ({})", info.dwProcessId, command_line);
        unsafe {
            Ok(Self {
                process: OwnedHandle::from_raw(info.hProcess),
                thread: OwnedHandle::from_raw(info.hThread),
                pid: info.dwProcessId,
            })
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn process_handle(&self) -> HANDLE {
        self.process.raw()
    }

    pub fn resume(&self) -> io::Result<()> {
        if unsafe { ResumeThread(self.thread.raw()) } == u32::MAX {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until the process exits.
    pub fn wait(&self) -> io::Result<()> {
        let result = unsafe { WaitForSingleObject(self.process.raw(), INFINITE) };
        if result == WAIT_OBJECT_0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Wait up to `timeout`; returns whether the process has exited.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let millis = timeout.as_millis().min(u128::from(INFINITE - 1)) as u32;
        let result = unsafe { WaitForSingleObject(self.process.raw(), millis) };
        result != WAIT_TIMEOUT
    }

    /// Exit code once the process has exited.
    pub fn exit_code(&self) -> Option<u32> {
        let mut code: u32 = 0;
        unsafe { GetExitCodeProcess(self.process.raw(), &mut code) }.ok()?;
        (code != STILL_ACTIVE).then_some(code)
    }

    pub fn terminate(&self, exit_code: u32) {
        if let Err(e) = unsafe { TerminateProcess(self.process.raw(), exit_code) } {
            warn!("failed to terminate process {}: {}", self.pid, e);
        }
    }
}

/// Job object that kills its processes when the last handle closes
pub struct JobObject(OwnedHandle);

impl JobObject {
    pub fn kill_on_close() -> io::Result<Self> {
        unsafe {
            let job = OwnedHandle::from_raw(CreateJobObjectW(None, PCWSTR::null()).map_err(|e| os_error(&e))?);

            let mut limits = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
            limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
            SetInformationJobObject(
                job.raw(),
                JobObjectExtendedLimitInformation,
                &limits as *const _ as *const _,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
            .map_err(|e| os_error(&e))?;

            Ok(Self(job))
        }
    }

    pub fn assign(&self, child: &ChildProcess) -> io::Result<()> {
        unsafe { AssignProcessToJobObject(self.0.raw(), child.process_handle()) }.map_err(|e| os_error(&e))
    }
}
