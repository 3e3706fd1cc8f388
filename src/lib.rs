//! conbridge - pseudo console host and text-buffer image compositor
//!
//! - [`core`]: pseudo console sessions (Windows ConPTY), output pump,
//!   console input decoding and session events
//! - [`buffer`]: image slices attached to text-buffer rows, with the copy and
//!   erase rules used when the buffer scrolls or is edited
//! - [`config`]: `~/.conbridge/config.toml`

pub mod buffer;
pub mod config;
pub mod core;
