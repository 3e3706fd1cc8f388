//! Pseudo console session
//!
//! Owns a pseudo console, the two pipe ends the host keeps, and the child
//! process attached to it. Two worker threads run while connected:
//!
//! - the output pump, publishing decoded output as [`SessionEvent::Output`]
//! - the exit watcher, waiting on the child and publishing
//!   [`SessionEvent::Disconnected`] when it exits on its own
//!
//! Teardown happens in a fixed order: pseudo console, exit watcher, process
//! handles, input pipe, then the output pump is cancelled and joined.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use super::error::{ConnectionError, Result};
use super::events::{EventHub, SessionEvent};
use super::lock;
use super::pump::{PipeEncoding, PumpConfig, ReadStrategy, DEFAULT_CHUNK_SIZE};
use super::state::{ConnectionState, StateCell};

#[cfg(windows)]
use std::io::Write;
#[cfg(windows)]
use std::thread::{self, JoinHandle, ThreadId};
#[cfg(windows)]
use std::time::Duration;
#[cfg(windows)]
use tracing::warn;

#[cfg(windows)]
use super::attributes::SessionAttributes;
#[cfg(windows)]
use super::conpty::{ChildProcess, JobObject, PseudoConsole};
#[cfg(windows)]
use super::events::UNKNOWN_EXIT_CODE;
#[cfg(windows)]
use super::pipe::{PeekingReader, PipeChannel, PipeEnd, SharedReader};
#[cfg(windows)]
use super::pump::OutputPump;

/// How long close waits for the child to die with its pseudo console
/// before terminating it.
#[cfg(windows)]
const CLOSE_GRACE: Duration = Duration::from_secs(2);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// A process-wide unique id.
    pub fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Everything needed to start a session
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub command_line: String,
    pub starting_directory: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
    pub session_id: SessionId,
    pub encoding: PipeEncoding,
    pub strategy: ReadStrategy,
    pub chunk_size: usize,
    /// Put the child in a job object so its descendants die with the session
    pub kill_on_close: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new("cmd.exe")
    }
}

impl SessionOptions {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            starting_directory: None,
            rows: 24,
            cols: 80,
            session_id: SessionId::next(),
            encoding: PipeEncoding::default(),
            strategy: ReadStrategy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            kill_on_close: false,
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            strategy: self.strategy,
            chunk_size: self.chunk_size,
            encoding: self.encoding,
        }
    }
}

/// State shared with the worker threads
#[derive(Debug, Default)]
struct Shared {
    state: StateCell,
    events: EventHub,
    closing: Arc<AtomicBool>,
    exit_code: Mutex<Option<u32>>,
    startup_error: Mutex<Option<u32>>,
}

impl Shared {
    /// Move the state machine and announce the change.
    fn transition(&self, next: ConnectionState, exit_code: Option<u32>) -> bool {
        if !self.state.transition(next) {
            return false;
        }
        self.events.publish(SessionEvent::StateChanged {
            state: next,
            exit_code,
        });
        true
    }

    /// Like [`transition`](Self::transition), but only out of `expected`.
    fn transition_from(&self, expected: ConnectionState, next: ConnectionState, exit_code: Option<u32>) -> bool {
        if !self.state.transition_from(expected, next) {
            return false;
        }
        self.events.publish(SessionEvent::StateChanged {
            state: next,
            exit_code,
        });
        true
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// A worker thread that may be asked to join from itself
#[cfg(windows)]
struct Worker {
    handle: JoinHandle<()>,
    thread_id: ThreadId,
}

#[cfg(windows)]
impl Worker {
    fn spawn(name: &str, work: impl FnOnce() + Send + 'static) -> std::io::Result<Self> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(work)?;
        let thread_id = handle.thread().id();
        Ok(Self { handle, thread_id })
    }

    fn join(self) {
        if thread::current().id() == self.thread_id {
            debug!("join of {:?} skipped on its own thread", self.handle.thread().name());
            return;
        }
        let _ = self.handle.join();
    }
}

/// Resources held while the pseudo console is open
#[cfg(windows)]
struct Live {
    console: Option<PseudoConsole>,
    child: Option<Arc<ChildProcess>>,
    job: Option<JobObject>,
    input: Option<Arc<PipeEnd>>,
    output: Arc<PipeEnd>,
    pump: Option<OutputPump>,
    watcher: Option<Worker>,
}

#[cfg(not(windows))]
enum Live {}

pub struct PseudoConsoleSession {
    options: SessionOptions,
    shared: Arc<Shared>,
    live: Mutex<Option<Live>>,
    /// Last known (rows, cols)
    size: Mutex<(u16, u16)>,
}

impl PseudoConsoleSession {
    pub fn new(options: SessionOptions) -> Self {
        let size = (options.rows, options.cols);
        Self {
            options,
            shared: Arc::new(Shared::default()),
            live: Mutex::new(None),
            size: Mutex::new(size),
        }
    }

    pub fn id(&self) -> SessionId {
        self.options.session_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.is_closing()
    }

    /// Exit code of the child once it has exited.
    pub fn exit_code(&self) -> Option<u32> {
        *lock(&self.shared.exit_code)
    }

    /// OS error code of a failed process launch.
    pub fn startup_error_code(&self) -> Option<u32> {
        *lock(&self.shared.startup_error)
    }

    /// Last known (rows, cols).
    pub fn size(&self) -> (u16, u16) {
        *lock(&self.size)
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Title for the tab hosting this session: keep `previous` if there is one.
    pub fn tab_title(&self, previous: &str) -> String {
        if previous.is_empty() {
            self.options.command_line.clone()
        } else {
            previous.to_string()
        }
    }

    /// Launch the child and start the workers. Returns once both are running.
    pub fn start(&self) -> Result<()> {
        let mut live = lock(&self.live);
        if self.shared.is_closing() {
            return Err(ConnectionError::NotConnected);
        }
        if !self.shared.transition(ConnectionState::Connecting, None) {
            return Err(ConnectionError::AlreadyStarted);
        }
        info!(
            "{}: starting '{}' ({}x{})",
            self.id(),
            self.options.command_line,
            self.options.cols,
            self.options.rows
        );

        match self.launch() {
            Ok(started) => {
                *live = Some(started);
                Ok(())
            }
            Err(e) => {
                let code = e.launch_error_code();
                if code.is_some() {
                    *lock(&self.shared.startup_error) = code;
                }
                error!("{}: failed to start: {}", self.id(), e);
                self.shared.transition(ConnectionState::Failed, code);
                Err(e)
            }
        }
    }

    /// Send text to the child.
    pub fn write_input(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.write_bytes(&self.options.encoding.encode(text))
    }

    /// Send UTF-16 units, as produced by [`InputReader`](super::input::InputReader).
    pub fn write_input_utf16(&self, units: &[u16]) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        self.write_bytes(&self.options.encoding.encode_utf16(units))
    }

    /// Resize the pseudo console. Does nothing before start or while closing.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        *lock(&self.size) = (rows, cols);
        if self.shared.is_closing() {
            return Ok(());
        }
        self.resize_console(rows, cols)
    }

    /// Tear the session down and wait for the workers. Idempotent.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut live = lock(&self.live);
        let closing = self.shared.transition(ConnectionState::Closing, None);
        info!("{}: closing", self.id());

        if let Some(started) = live.take() {
            self.teardown(started);
        }
        if closing {
            let exit_code = *lock(&self.shared.exit_code);
            self.shared.transition(ConnectionState::Closed, exit_code);
        }
        debug!("{}: closed", self.id());
    }
}

#[cfg(windows)]
impl PseudoConsoleSession {
    fn launch(&self) -> Result<Live> {
        let (rows, cols) = self.size();

        let input = PipeChannel::create().map_err(ConnectionError::PipeCreation)?;
        let output = PipeChannel::create().map_err(ConnectionError::PipeCreation)?;
        let console =
            PseudoConsole::create(rows, cols, &input.read, &output.write).map_err(ConnectionError::PseudoConsoleCreation)?;

        // The pseudo console holds its own duplicates of these ends.
        let PipeChannel { read: console_input, write: input } = input;
        let PipeChannel { read: output, write: console_output } = output;
        drop(console_input);
        drop(console_output);

        let job = if self.options.kill_on_close {
            match JobObject::kill_on_close() {
                Ok(job) => Some(job),
                Err(e) => {
                    warn!("{}: job object unavailable: {}", self.id(), e);
                    None
                }
            }
        } else {
            None
        };

        let mut attributes =
            SessionAttributes::for_pseudo_console(console.handle()).map_err(ConnectionError::AttributeList)?;
        let child = ChildProcess::spawn(
            &self.options.command_line,
            self.options.starting_directory.as_deref(),
            &mut attributes,
            job.is_some(),
        )?;
        drop(attributes);

        if let Some(job) = &job {
            if let Err(e) = job.assign(&child) {
                warn!("{}: could not assign process {} to job: {}", self.id(), child.pid(), e);
            }
            if let Err(e) = child.resume() {
                child.terminate(UNKNOWN_EXIT_CODE);
                return Err(ConnectionError::ProcessLaunch {
                    code: e.raw_os_error().unwrap_or(0) as u32,
                    source: e,
                });
            }
        }
        info!("{}: process {} attached", self.id(), child.pid());

        let mut started = Live {
            console: Some(console),
            child: Some(Arc::new(child)),
            job,
            input: Some(Arc::new(input)),
            output: Arc::new(output),
            pump: None,
            watcher: None,
        };

        self.shared.transition(ConnectionState::Connected, None);
        if let Err(e) = self.spawn_workers(&mut started) {
            error!("{}: failed to start workers: {}", self.id(), e);
            self.shared.closing.store(true, Ordering::SeqCst);
            self.shared.transition(ConnectionState::Closing, None);
            self.teardown(started);
            self.shared.transition(ConnectionState::Closed, None);
            return Err(ConnectionError::Worker(e));
        }
        Ok(started)
    }

    fn spawn_workers(&self, started: &mut Live) -> std::io::Result<()> {
        let shared = Arc::clone(&self.shared);
        let sink = move |text: String| shared.events.publish(SessionEvent::Output(text));
        let config = self.options.pump_config();
        let closing = Arc::clone(&self.shared.closing);
        let output = Arc::clone(&started.output);
        started.pump = Some(match config.strategy {
            ReadStrategy::Blocking => OutputPump::spawn(SharedReader(output), config, closing, sink)?,
            ReadStrategy::Polling { .. } => OutputPump::spawn(PeekingReader::new(output), config, closing, sink)?,
        });

        if let Some(child) = &started.child {
            let shared = Arc::clone(&self.shared);
            let child = Arc::clone(child);
            let id = self.id();
            started.watcher = Some(Worker::spawn("conbridge-exit", move || watch_exit(id, &shared, &child))?);
        }
        Ok(())
    }

    fn teardown(&self, mut started: Live) {
        drop(started.console.take());

        if let Some(child) = &started.child {
            if !child.wait_timeout(CLOSE_GRACE) {
                warn!("{}: process {} outlived its console, terminating", self.id(), child.pid());
                child.terminate(UNKNOWN_EXIT_CODE);
            }
        }
        if let Some(watcher) = started.watcher.take() {
            watcher.join();
        }

        drop(started.child.take());
        drop(started.job.take());
        drop(started.input.take());

        started.output.cancel_io();
        if let Some(pump) = started.pump.take() {
            if let Some(exit) = pump.join() {
                debug!("{}: output pump finished: {:?}", self.id(), exit);
            }
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let input = lock(&self.live).as_ref().and_then(|started| started.input.clone());
        let Some(input) = input else {
            return if self.shared.is_closing() {
                Ok(())
            } else {
                Err(ConnectionError::NotConnected)
            };
        };

        let mut writer: &PipeEnd = &input;
        match writer.write_all(bytes) {
            Ok(()) => Ok(()),
            Err(e) if self.shared.is_closing() => {
                debug!("{}: write during close dropped: {}", self.id(), e);
                Ok(())
            }
            Err(e) => Err(ConnectionError::Write(e)),
        }
    }

    fn resize_console(&self, rows: u16, cols: u16) -> Result<()> {
        let live = lock(&self.live);
        let Some(console) = live.as_ref().and_then(|started| started.console.as_ref()) else {
            return Ok(());
        };
        debug!("{}: resize to {}x{}", self.id(), cols, rows);
        console.resize(rows, cols).map_err(ConnectionError::Resize)
    }
}

#[cfg(windows)]
fn watch_exit(id: SessionId, shared: &Shared, child: &ChildProcess) {
    let code = match child.wait() {
        Ok(()) => child.exit_code().unwrap_or(UNKNOWN_EXIT_CODE),
        Err(e) => {
            warn!("{}: waiting for process {} failed: {}", id, child.pid(), e);
            UNKNOWN_EXIT_CODE
        }
    };
    *lock(&shared.exit_code) = Some(code);

    if shared.is_closing() {
        debug!("{}: process {} exited during close ({})", id, child.pid(), code);
        return;
    }
    info!("{}: process {} exited with code {}", id, child.pid(), code);
    // A close that started after the check above owns the Closed transition.
    if shared.transition_from(ConnectionState::Connected, ConnectionState::Closed, Some(code)) {
        shared.events.publish(SessionEvent::Disconnected { exit_code: code });
    }
}

#[cfg(not(windows))]
impl PseudoConsoleSession {
    fn launch(&self) -> Result<Live> {
        Err(ConnectionError::Unsupported)
    }

    fn teardown(&self, started: Live) {
        match started {}
    }

    fn write_bytes(&self, _bytes: &[u8]) -> Result<()> {
        if self.shared.is_closing() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    fn resize_console(&self, _rows: u16, _cols: u16) -> Result<()> {
        Ok(())
    }
}

impl Drop for PseudoConsoleSession {
    fn drop(&mut self) {
        self.close();
    }
}
