//! Running child processes and their exit statuses.
//!
//! A [`Child`] owns the OS process reference and the parent-side ends of
//! any pipes the launch created. Exit statuses are cached: the OS process
//! entry can only be queried once, so the first successful `wait` or
//! `try_wait` stores the status and releases the process reference, and
//! every later call answers from the cache.

use std::fmt;
use std::io;

use tracing::debug;

use crate::error::{Result, SpellError};
use crate::sys::{StdioPipes, imp};

/// A launched, possibly already exited, child process.
///
/// The stream fields are `Some` only for streams launched with
/// [`Stdio::Piped`](crate::Stdio::Piped).
#[derive(Debug)]
pub struct Child {
    process: imp::Process,
    /// The child's standard input, when piped.
    pub stdin: Option<ChildStdin>,
    /// The child's standard output, when piped.
    pub stdout: Option<ChildStdout>,
    /// The child's standard error, when piped.
    pub stderr: Option<ChildStderr>,
}

impl Child {
    pub(crate) fn new(process: imp::Process, pipes: StdioPipes) -> Child {
        Child {
            process,
            stdin: pipes.stdin.map(|inner| ChildStdin { inner }),
            stdout: pipes.stdout.map(|inner| ChildStdout { inner }),
            stderr: pipes.stderr.map(|inner| ChildStderr { inner }),
        }
    }

    /// OS process id of the child.
    pub fn id(&self) -> u32 {
        self.process.id()
    }

    /// Polls without blocking. Returns `Ok(None)` while the child is still
    /// running.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        let status = self.process.try_wait().map_err(SpellError::Wait)?;
        Ok(status.map(ExitStatus))
    }

    /// Blocks until the child exits and returns its status.
    ///
    /// A piped stdin handle is closed first, so a child blocked reading
    /// stdin sees end-of-input instead of deadlocking against this call.
    /// Idempotent: repeated calls return the cached status.
    pub fn wait(&mut self) -> Result<ExitStatus> {
        drop(self.stdin.take());
        let status = ExitStatus(self.process.wait().map_err(SpellError::Wait)?);
        debug!("child {} finished: {}", self.id(), status);
        Ok(status)
    }

    /// Waits for the child to exit, then collects everything it wrote to
    /// its piped stdout and stderr.
    ///
    /// The drain takes only the bytes already buffered in the pipes; since
    /// the child has exited by then, that is its complete output.
    pub fn wait_with_output(mut self) -> Result<Output> {
        let status = self.wait()?;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(out) = self.stdout.as_mut() {
            stdout = out.inner.drain_buffered().map_err(SpellError::Collect)?;
        }
        if let Some(err) = self.stderr.as_mut() {
            stderr = err.inner.drain_buffered().map_err(SpellError::Collect)?;
        }
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }

    /// Forcefully terminates the child.
    ///
    /// Returns `Ok(true)` when the request was delivered to a still-running
    /// process and `Ok(false)` when the child had already exited. After a
    /// delivered kill, [`wait`](Child::wait) reports the forced
    /// termination, not a program-chosen exit code.
    pub fn kill(&mut self) -> Result<bool> {
        let delivered = self.process.kill().map_err(SpellError::Kill)?;
        debug!("kill requested for child {}: delivered={}", self.id(), delivered);
        Ok(delivered)
    }
}

/// Exit status of a finished child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(imp::ExitStatus);

impl ExitStatus {
    /// Whether the child exited with code zero.
    pub fn success(&self) -> bool {
        self.code() == Some(0)
    }

    /// The exit code the program chose. `None` on POSIX when the child was
    /// terminated by a signal instead of exiting.
    pub fn code(&self) -> Option<i32> {
        self.0.code()
    }

    /// The signal that terminated the child, if any.
    #[cfg(unix)]
    pub fn signal(&self) -> Option<i32> {
        self.0.signal()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code() {
            return write!(f, "exit code: {code}");
        }
        #[cfg(unix)]
        if let Some(signal) = self.0.signal() {
            return write!(f, "signaled: {signal}");
        }
        write!(f, "unknown exit status")
    }
}

/// Exit status plus collected stdout and stderr bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Write end of the pipe connected to a child's standard input.
#[derive(Debug)]
pub struct ChildStdin {
    pub(crate) inner: imp::Pipe,
}

impl io::Write for ChildStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read end of the pipe connected to a child's standard output.
#[derive(Debug)]
pub struct ChildStdout {
    pub(crate) inner: imp::Pipe,
}

impl io::Read for ChildStdout {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Read end of the pipe connected to a child's standard error.
#[derive(Debug)]
pub struct ChildStderr {
    pub(crate) inner: imp::Pipe,
}

impl io::Read for ChildStderr {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
