//! Platform backends for the launch protocol.
//!
//! Each backend exposes the same surface: `spawn`, a `Process` wrapping the
//! OS process reference, and a `Pipe` wrapping one end of an anonymous
//! pipe. Everything above this module is platform-independent.

use crate::stdio::Stdio;

#[cfg(unix)]
pub(crate) mod unix;
#[cfg(unix)]
pub(crate) use unix as imp;

#[cfg(windows)]
pub(crate) mod windows;
#[cfg(windows)]
pub(crate) use windows as imp;

/// Per-stream policies handed to a backend, with `Default` already
/// resolved by the launch operation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StdioSpec {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

/// Parent-side pipe ends produced by a launch; `None` for streams that
/// were not piped.
#[derive(Debug)]
pub(crate) struct StdioPipes {
    pub stdin: Option<imp::Pipe>,
    pub stdout: Option<imp::Pipe>,
    pub stderr: Option<imp::Pipe>,
}
