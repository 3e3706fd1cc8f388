//! Console input reader
//!
//! Turns raw console input records into the UTF-16 text a pseudo console
//! expects on its input pipe:
//!
//! - only key-down records produce text, plus the Alt key-up that delivers
//!   an Alt+numpad composed character
//! - surrogate pairs split across records are put back together
//! - NUL with a scan code is a bare modifier press and is dropped
//! - window-size records go to a callback instead of into the text

use std::io;

use tracing::debug;

/// Virtual key code of the Alt key.
pub const VK_MENU: u16 = 0x12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyRecord {
    pub key_down: bool,
    pub virtual_key_code: u16,
    pub virtual_scan_code: u16,
    pub unicode_char: u16,
}

impl KeyRecord {
    /// A key-down record typing `unit` with no scan code.
    pub fn typed(unit: u16) -> Self {
        Self {
            key_down: true,
            unicode_char: unit,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowSize {
    pub columns: u16,
    pub rows: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRecord {
    Key(KeyRecord),
    WindowResize(WindowSize),
    /// Mouse, focus and menu records carry no text
    Other,
}

/// Where input records come from.
pub trait InputSource {
    /// Block until at least one record is available and append what was read.
    fn read_records(&mut self, records: &mut Vec<InputRecord>) -> io::Result<()>;
}

/// Key record filter and surrogate reassembly
#[derive(Debug, Default)]
pub struct KeyDecoder {
    high_surrogate: Option<u16>,
}

impl KeyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the text carried by `key`, if any, to `text`.
    pub fn push(&mut self, key: &KeyRecord, text: &mut Vec<u16>) {
        if !key.key_down && key.virtual_key_code != VK_MENU {
            return;
        }

        let unit = key.unicode_char;
        if is_high_surrogate(unit) {
            // Held back until its low half arrives.
            self.high_surrogate = Some(unit);
            return;
        }

        if is_low_surrogate(unit) {
            if let Some(high) = self.high_surrogate.take() {
                text.push(high);
            }
        } else {
            self.high_surrogate = None;
        }

        if unit != 0 || key.virtual_scan_code == 0 {
            text.push(unit);
        }
    }

    pub fn has_pending_surrogate(&self) -> bool {
        self.high_surrogate.is_some()
    }
}

type ResizeCallback = Box<dyn FnMut(WindowSize) + Send>;

pub struct InputReader<S> {
    source: S,
    records: Vec<InputRecord>,
    decoder: KeyDecoder,
    window_size_changed: Option<ResizeCallback>,
}

impl<S: InputSource> InputReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            records: Vec::new(),
            decoder: KeyDecoder::new(),
            window_size_changed: None,
        }
    }

    pub fn set_window_size_changed_callback<F>(&mut self, callback: F)
    where
        F: FnMut(WindowSize) + Send + 'static,
    {
        self.window_size_changed = Some(Box::new(callback));
    }

    /// Block until some text has been typed.
    ///
    /// Returns `None` once the source fails or runs dry; a high surrogate
    /// still waiting for its pair at that point is dropped.
    pub fn read(&mut self) -> Option<Vec<u16>> {
        let mut text = Vec::new();
        while text.is_empty() {
            self.records.clear();
            if let Err(e) = self.source.read_records(&mut self.records) {
                debug!("console input ended: {}", e);
                return None;
            }
            if self.records.is_empty() {
                debug!("console input returned no records");
                return None;
            }

            for record in self.records.drain(..) {
                match record {
                    InputRecord::WindowResize(size) => {
                        if let Some(callback) = self.window_size_changed.as_mut() {
                            callback(size);
                        }
                    }
                    InputRecord::Key(key) => self.decoder.push(&key, &mut text),
                    InputRecord::Other => {}
                }
            }
        }
        Some(text)
    }

    /// [`read`](Self::read), converted to a `String`.
    pub fn read_string(&mut self) -> Option<String> {
        self.read().map(|units| String::from_utf16_lossy(&units))
    }
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xD800..0xDC00).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
    (0xDC00..0xE000).contains(&unit)
}

#[cfg(windows)]
pub use self::console::ConsoleInput;

#[cfg(windows)]
mod console {
    use std::io;

    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{GetStdHandle, ReadConsoleInputW, INPUT_RECORD, STD_INPUT_HANDLE};

    use super::{InputRecord, InputSource, KeyRecord, WindowSize};
    use crate::core::error::os_error;

    const KEY_EVENT_TYPE: u16 = 0x0001;
    const WINDOW_BUFFER_SIZE_EVENT_TYPE: u16 = 0x0004;
    const BUFFER_SIZE: usize = 128;

    /// Input records read straight from a console input handle
    pub struct ConsoleInput {
        handle: HANDLE,
        buffer: Vec<INPUT_RECORD>,
    }

    // Safety: the handle is only used through ReadConsoleInputW, which is thread safe
    unsafe impl Send for ConsoleInput {}

    impl ConsoleInput {
        /// Read from this process's standard input console.
        pub fn stdin() -> io::Result<Self> {
            let handle = unsafe { GetStdHandle(STD_INPUT_HANDLE) }.map_err(|e| os_error(&e))?;
            Ok(Self::from_handle(handle))
        }

        /// Read from a console input handle the caller keeps open.
        pub fn from_handle(handle: HANDLE) -> Self {
            Self {
                handle,
                buffer: vec![INPUT_RECORD::default(); BUFFER_SIZE],
            }
        }
    }

    impl InputSource for ConsoleInput {
        fn read_records(&mut self, records: &mut Vec<InputRecord>) -> io::Result<()> {
            let mut read_count: u32 = 0;
            unsafe {
                ReadConsoleInputW(self.handle, &mut self.buffer, &mut read_count).map_err(|e| os_error(&e))?;
            }

            for raw in &self.buffer[..read_count as usize] {
                let record = match raw.EventType {
                    KEY_EVENT_TYPE => {
                        let key = unsafe { raw.Event.KeyEvent };
                        InputRecord::Key(KeyRecord {
                            key_down: key.bKeyDown.as_bool(),
                            virtual_key_code: key.wVirtualKeyCode,
                            virtual_scan_code: key.wVirtualScanCode,
                            unicode_char: unsafe { key.uChar.UnicodeChar },
                        })
                    }
                    WINDOW_BUFFER_SIZE_EVENT_TYPE => {
                        let size = unsafe { raw.Event.WindowBufferSizeEvent }.dwSize;
                        InputRecord::WindowResize(WindowSize {
                            columns: size.X.max(0) as u16,
                            rows: size.Y.max(0) as u16,
                        })
                    }
                    _ => InputRecord::Other,
                };
                records.push(record);
            }
            Ok(())
        }
    }
}
