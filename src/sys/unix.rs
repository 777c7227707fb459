//! POSIX backend: fork + exec with a private failure-report pipe.
//!
//! Process creation on POSIX cannot report "the program did not start"
//! synchronously: by the time `execvp` fails, control has already split
//! into two processes. The backend therefore opens one extra `O_CLOEXEC`
//! pipe before forking. The child writes the 4-byte errno into it when
//! exec fails and exits with status 127; a successful exec closes the
//! write end automatically, so the parent reads either exactly 4 bytes
//! (launch failed, child reaped, error returned) or end-of-stream (launch
//! succeeded).
//!
//! Everything the child needs after `fork` is serialized to NUL-terminated
//! buffers beforehand; the child continuation performs only
//! async-signal-safe calls (`close`, `dup2`, `fcntl`, `chdir`, `execvp`,
//! `write`, `_exit`).

use std::ffi::{CStr, CString, OsStr, OsString};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Once;

use libc::{c_char, c_int};
use once_cell::sync::OnceCell;

use crate::env::Env;
use crate::stdio::Stdio;
use crate::sys::{StdioPipes, StdioSpec};

trait IsMinusOne {
    fn is_minus_one(&self) -> bool;
}

impl IsMinusOne for c_int {
    fn is_minus_one(&self) -> bool {
        *self == -1
    }
}

impl IsMinusOne for isize {
    fn is_minus_one(&self) -> bool {
        *self == -1
    }
}

fn cvt<T: IsMinusOne>(t: T) -> io::Result<T> {
    if t.is_minus_one() { Err(io::Error::last_os_error()) } else { Ok(t) }
}

fn cvt_r<T: IsMinusOne, F: FnMut() -> T>(mut f: F) -> io::Result<T> {
    loop {
        match cvt(f()) {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

fn os2c(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in string"))
}

/// One end of an anonymous pipe.
#[derive(Debug)]
pub(crate) struct Pipe(OwnedFd);

impl Pipe {
    fn raw(&self) -> RawFd {
        self.0.as_raw_fd()
    }

    fn into_inner(self) -> OwnedFd {
        self.0
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = cvt_r(|| unsafe {
            libc::read(self.0.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
        })?;
        Ok(n as usize)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = cvt_r(|| unsafe {
            libc::write(self.0.as_raw_fd(), buf.as_ptr().cast(), buf.len())
        })?;
        Ok(n as usize)
    }

    /// Reads exactly the bytes buffered in the pipe right now, without
    /// blocking for more.
    pub(crate) fn drain_buffered(&mut self) -> io::Result<Vec<u8>> {
        let mut available: c_int = 0;
        cvt(unsafe { libc::ioctl(self.0.as_raw_fd(), libc::FIONREAD, &mut available) })?;
        let mut buf = vec![0u8; available.max(0) as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// Both ends close on exec so they never outlive a launch in the child.
fn anon_pipe() -> io::Result<(Pipe, Pipe)> {
    let mut fds = [0; 2];
    cvt(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    Ok((
        Pipe(unsafe { OwnedFd::from_raw_fd(fds[0]) }),
        Pipe(unsafe { OwnedFd::from_raw_fd(fds[1]) }),
    ))
}

/// Descriptors bound for the child must sit above fds 0-2: the child
/// `dup2`s onto those targets in sequence, and a parent running with a
/// standard stream closed can otherwise be handed a pipe or null fd
/// inside the target range and see it clobbered before its own rewire.
fn dup_above_std_streams(fd: RawFd) -> io::Result<OwnedFd> {
    let lifted = cvt(unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 3) })?;
    Ok(unsafe { OwnedFd::from_raw_fd(lifted) })
}

fn ensure_above_std_streams(fd: OwnedFd) -> io::Result<OwnedFd> {
    if fd.as_raw_fd() > libc::STDERR_FILENO {
        return Ok(fd);
    }
    dup_above_std_streams(fd.as_raw_fd())
}

static NULL_DEVICE: OnceCell<OwnedFd> = OnceCell::new();

/// The shared `/dev/null` descriptor, opened read/write on first use and
/// kept until process exit. Children receive `dup2` copies of it.
fn null_device() -> io::Result<RawFd> {
    let fd = NULL_DEVICE.get_or_try_init(|| {
        let fd = cvt(unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) })?;
        Ok::<_, io::Error>(unsafe { OwnedFd::from_raw_fd(fd) })
    })?;
    Ok(fd.as_raw_fd())
}

static IGNORE_SIGCHLD: Once = Once::new();

pub(crate) fn ignore_sigchld() {
    IGNORE_SIGCHLD.call_once(|| unsafe {
        libc::signal(libc::SIGCHLD, libc::SIG_IGN);
    });
}

/// What the child should install on one of its standard streams.
enum ChildStdio {
    Inherit,
    Owned(OwnedFd),
    Null(RawFd),
}

impl ChildStdio {
    fn fd(&self) -> Option<RawFd> {
        match self {
            ChildStdio::Inherit => None,
            ChildStdio::Owned(fd) => Some(fd.as_raw_fd()),
            ChildStdio::Null(fd) => Some(*fd),
        }
    }
}

fn realize(policy: Stdio, child_reads: bool) -> io::Result<(Option<Pipe>, ChildStdio)> {
    match policy {
        Stdio::Inherit => Ok((None, ChildStdio::Inherit)),
        Stdio::Null => {
            let fd = null_device()?;
            if fd > libc::STDERR_FILENO {
                Ok((None, ChildStdio::Null(fd)))
            } else {
                Ok((None, ChildStdio::Owned(dup_above_std_streams(fd)?)))
            }
        }
        Stdio::Piped => {
            let (reader, writer) = anon_pipe()?;
            if child_reads {
                let theirs = ensure_above_std_streams(reader.into_inner())?;
                Ok((Some(writer), ChildStdio::Owned(theirs)))
            } else {
                let theirs = ensure_above_std_streams(writer.into_inner())?;
                Ok((Some(reader), ChildStdio::Owned(theirs)))
            }
        }
        Stdio::Default => unreachable!("stdio policy left unresolved by the launch operation"),
    }
}

fn env_block(env: &Env) -> io::Result<Vec<CString>> {
    env.iter()
        .map(|(k, v)| {
            let mut kv = Vec::with_capacity(k.len() + v.len() + 1);
            kv.extend_from_slice(k.as_bytes());
            kv.push(b'=');
            kv.extend_from_slice(v.as_bytes());
            CString::new(kv)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "nul byte in string"))
        })
        .collect()
}

pub(crate) fn spawn(
    program: &OsStr,
    args: &[OsString],
    env: Option<&Env>,
    cwd: &Path,
    spec: &StdioSpec,
) -> io::Result<(Process, StdioPipes)> {
    let (our_stdout, child_stdout) = realize(spec.stdout, false)?;
    let (our_stderr, child_stderr) = realize(spec.stderr, false)?;
    let (our_stdin, child_stdin) = realize(spec.stdin, true)?;

    // Serialize everything the child continuation will touch before fork.
    let program_c = os2c(program)?;
    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(program_c.clone());
    for arg in args {
        argv.push(os2c(arg)?);
    }
    let argv_ptrs: Vec<*const c_char> = argv
        .iter()
        .map(|a| a.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let envp = match env {
        Some(env) => Some(env_block(env)?),
        None => None,
    };
    let envp_ptrs: Option<Vec<*const c_char>> = envp.as_ref().map(|block| {
        block
            .iter()
            .map(|kv| kv.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect()
    });
    let cwd_c = os2c(cwd.as_os_str())?;

    let (mut err_read, err_write) = anon_pipe()?;
    let err_write = Pipe(ensure_above_std_streams(err_write.into_inner())?);

    let parent_ends = [
        our_stdin.as_ref().map(Pipe::raw),
        our_stdout.as_ref().map(Pipe::raw),
        our_stderr.as_ref().map(Pipe::raw),
        Some(err_read.raw()),
    ];

    let pid = cvt(unsafe { libc::fork() })?;
    if pid == 0 {
        // Child continuation. Nothing here returns to shared code.
        let failure = unsafe {
            child_after_fork(
                &child_stdin,
                &child_stdout,
                &child_stderr,
                parent_ends,
                &cwd_c,
                &program_c,
                argv_ptrs.as_ptr(),
                envp_ptrs.as_ref().map(|p| p.as_ptr()),
            )
        };
        let errno = failure.raw_os_error().unwrap_or(libc::EINVAL);
        report_failure_and_exit(err_write.raw(), errno);
    }

    // Parent continuation: release the child's ends, then read the exec
    // verdict.
    drop(child_stdin);
    drop(child_stdout);
    drop(child_stderr);
    drop(err_write);

    let mut process = Process { pid, status: None };
    let mut buf = [0u8; 4];
    match err_read.read(&mut buf) {
        Ok(0) => {}
        Ok(4) => {
            let errno = i32::from_ne_bytes(buf);
            let _ = process.wait();
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(n) => panic!("short read ({n} bytes) on the launch-failure pipe"),
        Err(e) => panic!("launch-failure pipe read failed: {e}"),
    }

    Ok((
        process,
        StdioPipes {
            stdin: our_stdin,
            stdout: our_stdout,
            stderr: our_stderr,
        },
    ))
}

/// Runs in the forked child; returns only when exec could not happen.
unsafe fn child_after_fork(
    stdin: &ChildStdio,
    stdout: &ChildStdio,
    stderr: &ChildStdio,
    parent_ends: [Option<RawFd>; 4],
    cwd: &CStr,
    program: &CStr,
    argv: *const *const c_char,
    envp: Option<*const *const c_char>,
) -> io::Error {
    for fd in parent_ends.into_iter().flatten() {
        unsafe { libc::close(fd) };
    }
    if let Err(e) = unsafe { rewire(stdin, libc::STDIN_FILENO) } {
        return e;
    }
    if let Err(e) = unsafe { rewire(stdout, libc::STDOUT_FILENO) } {
        return e;
    }
    if let Err(e) = unsafe { rewire(stderr, libc::STDERR_FILENO) } {
        return e;
    }
    if unsafe { libc::chdir(cwd.as_ptr()) } == -1 {
        return io::Error::last_os_error();
    }
    match envp {
        Some(envp) => unsafe { libc::execvpe(program.as_ptr(), argv, envp) },
        None => unsafe { libc::execvp(program.as_ptr(), argv) },
    };
    io::Error::last_os_error()
}

/// Installs one realized stream on fd 0, 1, or 2.
unsafe fn rewire(stdio: &ChildStdio, target: RawFd) -> io::Result<()> {
    let Some(fd) = stdio.fd() else {
        return Ok(());
    };
    if fd == target {
        // dup2 would be a no-op and leave close-on-exec set on the fd
        cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, 0) })?;
    } else {
        cvt_r(|| unsafe { libc::dup2(fd, target) })?;
    }
    Ok(())
}

fn report_failure_and_exit(fd: RawFd, errno: i32) -> ! {
    let bytes = errno.to_ne_bytes();
    loop {
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n != -1 || io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
            break;
        }
    }
    unsafe { libc::_exit(127) }
}

/// A forked child's process id plus its first observed exit status.
#[derive(Debug)]
pub(crate) struct Process {
    pid: libc::pid_t,
    status: Option<ExitStatus>,
}

impl Process {
    pub(crate) fn id(&self) -> u32 {
        self.pid as u32
    }

    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let mut raw = 0;
        let pid = cvt_r(|| unsafe { libc::waitpid(self.pid, &mut raw, libc::WNOHANG) })?;
        if pid == 0 {
            return Ok(None);
        }
        let status = ExitStatus(raw);
        self.status = Some(status);
        Ok(Some(status))
    }

    pub(crate) fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let mut raw = 0;
        cvt_r(|| unsafe { libc::waitpid(self.pid, &mut raw, 0) })?;
        let status = ExitStatus(raw);
        self.status = Some(status);
        Ok(status)
    }

    /// SIGKILL, reporting whether a still-running child received it.
    pub(crate) fn kill(&mut self) -> io::Result<bool> {
        if self.try_wait()?.is_some() {
            return Ok(false);
        }
        match cvt(unsafe { libc::kill(self.pid, libc::SIGKILL) }) {
            Ok(_) => Ok(true),
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Raw `waitpid` status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitStatus(c_int);

impl ExitStatus {
    pub(crate) fn code(&self) -> Option<i32> {
        libc::WIFEXITED(self.0).then(|| libc::WEXITSTATUS(self.0))
    }

    pub(crate) fn signal(&self) -> Option<i32> {
        libc::WIFSIGNALED(self.0).then(|| libc::WTERMSIG(self.0))
    }
}
