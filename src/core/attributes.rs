//! Process-launch attribute list binding a child to a pseudo console

use std::io;
use std::mem;

use windows::Win32::System::Console::HPCON;
use windows::Win32::System::Threading::{
    DeleteProcThreadAttributeList, InitializeProcThreadAttributeList, UpdateProcThreadAttribute,
    LPPROC_THREAD_ATTRIBUTE_LIST, STARTUPINFOEXW,
};

use super::error::os_error;

const PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE: usize = 0x00020016;

/// An initialized attribute list, deleted on drop
pub struct SessionAttributes {
    // usize storage keeps the list pointer-aligned
    buffer: Vec<usize>,
}

impl SessionAttributes {
    /// Build a one-entry list attaching the child's console to `console`.
    ///
    /// The pseudo console must stay open until the child has been created.
    pub fn for_pseudo_console(console: HPCON) -> io::Result<Self> {
        let mut size: usize = 0;
        unsafe {
            // Sizing call: fails with ERROR_INSUFFICIENT_BUFFER and reports the size.
            let _ = InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut size);
        }
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "attribute list size query failed"));
        }

        let word = mem::size_of::<usize>();
        let words = (size + word - 1) / word;
        let mut attributes = Self {
            buffer: vec![0usize; words],
        };
        unsafe {
            InitializeProcThreadAttributeList(attributes.list(), 1, 0, &mut size).map_err(|e| {
                // Nothing to delete yet.
                attributes.buffer = Vec::new();
                os_error(&e)
            })?;

            UpdateProcThreadAttribute(
                attributes.list(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
                Some(console.0 as *const _),
                mem::size_of::<HPCON>(),
                None,
                None,
            )
            .map_err(|e| os_error(&e))?;
        }
        Ok(attributes)
    }

    fn list(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_mut_ptr() as *mut _)
    }

    /// Extended startup info pointing at this list. Valid while `self` lives.
    pub fn startup_info(&mut self) -> STARTUPINFOEXW {
        let mut info = STARTUPINFOEXW {
            lpAttributeList: self.list(),
            ..Default::default()
        };
        info.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
        info
    }
}

impl Drop for SessionAttributes {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            unsafe { DeleteProcThreadAttributeList(self.list()) };
        }
    }
}
