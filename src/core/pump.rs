//! Output pump
//!
//! Drains the pseudo console's output pipe on a dedicated thread and hands
//! decoded text to a sink, in the order it was read.
//!
//! Two read strategies are supported:
//!
//! - **Blocking**: each iteration blocks in the OS read call until data
//!   arrives or the pipe breaks.
//! - **Polling**: the reader reports `WouldBlock` when nothing is ready and
//!   the pump sleeps for a fixed interval before asking again, until the
//!   pipe closes.

use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default read size: 512 UTF-16 units.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default sleep between polls when no output is ready.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Text encoding used on both pseudo console pipes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipeEncoding {
    #[default]
    Utf8,
    Utf16le,
}

impl PipeEncoding {
    pub fn encode(self, text: &str) -> Vec<u8> {
        match self {
            PipeEncoding::Utf8 => text.as_bytes().to_vec(),
            PipeEncoding::Utf16le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        }
    }

    pub fn encode_utf16(self, units: &[u16]) -> Vec<u8> {
        match self {
            PipeEncoding::Utf8 => String::from_utf16_lossy(units).into_bytes(),
            PipeEncoding::Utf16le => units.iter().copied().flat_map(u16::to_le_bytes).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStrategy {
    Blocking,
    Polling { interval: Duration },
}

impl Default for ReadStrategy {
    fn default() -> Self {
        ReadStrategy::Blocking
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PumpConfig {
    pub strategy: ReadStrategy,
    pub chunk_size: usize,
    pub encoding: PipeEncoding,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            strategy: ReadStrategy::Blocking,
            chunk_size: DEFAULT_CHUNK_SIZE,
            encoding: PipeEncoding::Utf8,
        }
    }
}

/// Why the pump stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpExit {
    /// The writing side went away
    EndOfStream,
    /// A read failed while the session was still open
    ReadFailed(ErrorKind),
    /// The session was closing when the read ended
    Cancelled,
}

/// Incremental decoder that carries partial sequences across reads
#[derive(Debug)]
pub struct TextDecoder {
    encoding: PipeEncoding,
    pending: Vec<u8>,
    high_surrogate: Option<u16>,
}

impl TextDecoder {
    pub fn new(encoding: PipeEncoding) -> Self {
        Self {
            encoding,
            pending: Vec::new(),
            high_surrogate: None,
        }
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match self.encoding {
            PipeEncoding::Utf8 => self.decode_utf8(),
            PipeEncoding::Utf16le => self.decode_utf16le(),
        }
    }

    /// Flush whatever is still held back; incomplete sequences become U+FFFD.
    pub fn finish(&mut self) -> String {
        let mut text = match self.encoding {
            PipeEncoding::Utf8 => self.decode_utf8(),
            PipeEncoding::Utf16le => self.decode_utf16le(),
        };
        if !self.pending.is_empty() || self.high_surrogate.is_some() {
            text.push(char::REPLACEMENT_CHARACTER);
        }
        self.pending.clear();
        self.high_surrogate = None;
        text
    }

    fn decode_utf8(&mut self) -> String {
        let mut text = String::new();
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = consumed + err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_up_to]));
                    match err.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_up_to + len;
                        }
                        None => {
                            consumed = valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        text
    }

    fn decode_utf16le(&mut self) -> String {
        let whole = self.pending.len() / 2 * 2;
        let mut units: Vec<u16> = self.high_surrogate.take().into_iter().collect();
        units.extend(
            self.pending[..whole]
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
        );
        self.pending.drain(..whole);

        if let Some(&last) = units.last() {
            if (0xD800..0xDC00).contains(&last) {
                self.high_surrogate = units.pop();
            }
        }

        char::decode_utf16(units)
            .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }
}

/// Run the read loop on the calling thread until the reader ends.
pub fn run<R, F>(mut reader: R, config: PumpConfig, closing: &AtomicBool, mut sink: F) -> PumpExit
where
    R: Read,
    F: FnMut(String),
{
    let mut buffer = vec![0u8; config.chunk_size.max(2)];
    let mut decoder = TextDecoder::new(config.encoding);

    let exit = loop {
        match reader.read(&mut buffer) {
            Ok(0) => break PumpExit::EndOfStream,
            Ok(n) => {
                let text = decoder.decode(&buffer[..n]);
                if !text.is_empty() {
                    sink(text);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => match config.strategy {
                ReadStrategy::Polling { interval } => thread::sleep(interval),
                ReadStrategy::Blocking => {
                    warn!("non-blocking read in blocking pump: {}", e);
                    break PumpExit::ReadFailed(e.kind());
                }
            },
            Err(e) if closing.load(Ordering::SeqCst) => {
                debug!("output read ended during close: {}", e);
                break PumpExit::Cancelled;
            }
            Err(e) if e.kind() == ErrorKind::BrokenPipe => break PumpExit::EndOfStream,
            Err(e) => {
                warn!("output read failed: {}", e);
                break PumpExit::ReadFailed(e.kind());
            }
        }
    };

    let rest = decoder.finish();
    if !rest.is_empty() {
        sink(rest);
    }
    debug!("output pump stopped: {:?}", exit);
    exit
}

/// Handle to a running pump thread
pub struct OutputPump {
    handle: Option<JoinHandle<PumpExit>>,
    thread_id: ThreadId,
}

impl OutputPump {
    pub fn spawn<R, F>(reader: R, config: PumpConfig, closing: Arc<AtomicBool>, sink: F) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        F: FnMut(String) + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name("conbridge-output".to_string())
            .spawn(move || run(reader, config, &closing, sink))?;
        let thread_id = handle.thread().id();
        Ok(Self {
            handle: Some(handle),
            thread_id,
        })
    }

    /// Wait for the pump to stop.
    ///
    /// Returns `None` without waiting when called from the pump thread itself,
    /// or when the thread panicked.
    pub fn join(mut self) -> Option<PumpExit> {
        if thread::current().id() == self.thread_id {
            debug!("output pump join skipped on its own thread");
            return None;
        }
        self.handle.take().and_then(|h| h.join().ok())
    }
}
