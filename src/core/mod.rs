//! Pseudo console session components.
//!
//! - **session**: owns the pseudo console, its pipes and the child process
//! - **pump**: drains the output pipe on a worker thread and decodes text
//! - **input**: turns console input records into text for the input pipe
//! - **state** / **events**: connection state machine and event delivery
//! - **pipe**, **attributes**, **conpty**: Windows handle owners (Windows only)
//!
//! # Architecture
//!
//! ```text
//! PseudoConsoleSession
//! ├── StateCell + EventHub (shared with workers)
//! ├── PseudoConsole (ConPTY handle)
//! ├── ChildProcess (+ optional JobObject)
//! ├── input PipeEnd  <── write_input / InputReader
//! └── output PipeEnd ──> OutputPump ──> SessionEvent::Output
//! ```

pub mod error;
pub mod events;
pub mod input;
pub mod pump;
pub mod session;
pub mod state;

#[cfg(windows)]
pub mod attributes;
#[cfg(windows)]
pub mod conpty;
#[cfg(windows)]
pub mod pipe;

pub use error::{ConnectionError, Result};
pub use events::{SessionEvent, UNKNOWN_EXIT_CODE};
pub use pump::{PipeEncoding, PumpConfig, PumpExit, ReadStrategy};
pub use session::{PseudoConsoleSession, SessionId, SessionOptions};
pub use state::ConnectionState;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
