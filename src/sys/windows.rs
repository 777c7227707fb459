//! Windows backend: CreateProcessW with an explicit handle table.
//!
//! Process creation here is one atomic call that reports failure
//! synchronously, so no failure-report pipe exists on this platform. The
//! work is in handle inheritance: pipe ends destined for the child are
//! created inheritable, the parent-side ends are stripped of the inherit
//! flag, and spawns serialize on a process-wide lock so concurrent
//! launches cannot leak their transient inheritable ends into each
//! other's children. Arguments are joined into one quoted command line
//! and a configured environment becomes a sorted UTF-16 double-NUL block.

use std::ffi::{OsStr, OsString};
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle};
use std::path::Path;
use std::ptr;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_BROKEN_PIPE, GENERIC_READ, GENERIC_WRITE, HANDLE,
    HANDLE_FLAG_INHERIT, INVALID_HANDLE_VALUE, SetHandleInformation, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::Security::SECURITY_ATTRIBUTES;
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING, ReadFile, WriteFile,
};
use windows_sys::Win32::System::Console::{
    GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows_sys::Win32::System::Pipes::{CreatePipe, PeekNamedPipe};
use windows_sys::Win32::System::Threading::{
    CREATE_UNICODE_ENVIRONMENT, CreateProcessW, GetExitCodeProcess, INFINITE,
    PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOW, TerminateProcess,
    WaitForSingleObject,
};

use crate::env::Env;
use crate::stdio::Stdio;
use crate::sys::{StdioPipes, StdioSpec};

fn wide(s: &OsStr) -> io::Result<Vec<u16>> {
    let mut w: Vec<u16> = s.encode_wide().collect();
    if w.contains(&0) {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "nul value in string"));
    }
    w.push(0);
    Ok(w)
}

fn inheritable() -> SECURITY_ATTRIBUTES {
    SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: 1,
    }
}

// ReadFile and WriteFile take u32 lengths; a longer buffer gets a
// short read or write rather than a truncated length.
fn clamp_to_u32(len: usize) -> u32 {
    len.min(u32::MAX as usize) as u32
}

/// One end of an anonymous pipe.
#[derive(Debug)]
pub(crate) struct Pipe(OwnedHandle);

impl Pipe {
    fn raw(&self) -> HANDLE {
        self.0.as_raw_handle() as HANDLE
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut got: u32 = 0;
        let ok = unsafe {
            ReadFile(
                self.raw(),
                buf.as_mut_ptr().cast(),
                clamp_to_u32(buf.len()),
                &mut got,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            let e = io::Error::last_os_error();
            // the writer is gone and the pipe is empty, a clean end of stream
            if e.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) {
                return Ok(0);
            }
            return Err(e);
        }
        Ok(got as usize)
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut put: u32 = 0;
        let ok = unsafe {
            WriteFile(
                self.raw(),
                buf.as_ptr().cast(),
                clamp_to_u32(buf.len()),
                &mut put,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(put as usize)
    }

    /// Reads exactly the bytes buffered in the pipe right now, without
    /// blocking for more.
    pub(crate) fn drain_buffered(&mut self) -> io::Result<Vec<u8>> {
        let mut available: u32 = 0;
        let ok = unsafe {
            PeekNamedPipe(
                self.raw(),
                ptr::null_mut(),
                0,
                ptr::null_mut(),
                &mut available,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            let e = io::Error::last_os_error();
            if e.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) {
                return Ok(Vec::new());
            }
            return Err(e);
        }
        let mut buf = vec![0u8; available as usize];
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

/// Creates both ends inheritable; the caller strips the flag from the end
/// it keeps.
fn anon_pipe() -> io::Result<(Pipe, Pipe)> {
    let sa = inheritable();
    let mut read: HANDLE = 0;
    let mut write: HANDLE = 0;
    if unsafe { CreatePipe(&mut read, &mut write, &sa, 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    let read = Pipe(unsafe { OwnedHandle::from_raw_handle(read as _) });
    let write = Pipe(unsafe { OwnedHandle::from_raw_handle(write as _) });
    Ok((read, write))
}

fn clear_inherit(pipe: &Pipe) -> io::Result<()> {
    if unsafe { SetHandleInformation(pipe.raw(), HANDLE_FLAG_INHERIT, 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

static NULL_DEVICE: OnceCell<OwnedHandle> = OnceCell::new();

/// The shared `NUL` handle, opened read/write and inheritable on first use
/// and kept until process exit.
fn null_device() -> io::Result<HANDLE> {
    let handle = NULL_DEVICE.get_or_try_init(|| {
        let name: Vec<u16> = "NUL\0".encode_utf16().collect();
        let sa = inheritable();
        let h = unsafe {
            CreateFileW(
                name.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                &sa,
                OPEN_EXISTING,
                0,
                0,
            )
        };
        if h == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok::<_, io::Error>(unsafe { OwnedHandle::from_raw_handle(h as _) })
    })?;
    Ok(handle.as_raw_handle() as HANDLE)
}

/// Child reaping is handled by handle closure on this platform.
pub(crate) fn ignore_sigchld() {}

/// What the child should see on one of its standard handles.
enum ChildStdio {
    Inherit(HANDLE),
    Null(HANDLE),
    Owned(Pipe),
}

impl ChildStdio {
    fn raw(&self) -> HANDLE {
        match self {
            ChildStdio::Inherit(h) | ChildStdio::Null(h) => *h,
            ChildStdio::Owned(pipe) => pipe.raw(),
        }
    }
}

fn realize(policy: Stdio, stream: u32, child_reads: bool) -> io::Result<(Option<Pipe>, ChildStdio)> {
    match policy {
        Stdio::Inherit => Ok((None, ChildStdio::Inherit(unsafe { GetStdHandle(stream) }))),
        Stdio::Null => Ok((None, ChildStdio::Null(null_device()?))),
        Stdio::Piped => {
            let (read, write) = anon_pipe()?;
            let (ours, theirs) = if child_reads { (write, read) } else { (read, write) };
            clear_inherit(&ours)?;
            Ok((Some(ours), ChildStdio::Owned(theirs)))
        }
        Stdio::Default => unreachable!("stdio policy left unresolved by the launch operation"),
    }
}

/// Joins program and arguments into one command line with CommandLineToArgvW
/// quoting: arguments with spaces, tabs, or quotes are wrapped in quotes,
/// backslash runs before a quote are doubled, and embedded quotes escaped.
fn make_command_line(program: &OsStr, args: &[OsString]) -> io::Result<Vec<u16>> {
    let mut line = Vec::new();
    append_arg(&mut line, program, true)?;
    for arg in args {
        line.push(b' ' as u16);
        append_arg(&mut line, arg, false)?;
    }
    line.push(0);
    Ok(line)
}

fn append_arg(line: &mut Vec<u16>, arg: &OsStr, force_quote: bool) -> io::Result<()> {
    let arg: Vec<u16> = arg.encode_wide().collect();
    if arg.contains(&0) {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "nul value in string"));
    }
    let quote = force_quote
        || arg.is_empty()
        || arg.contains(&(b' ' as u16))
        || arg.contains(&(b'\t' as u16));
    if quote {
        line.push(b'"' as u16);
    }
    let mut backslashes: usize = 0;
    for &x in &arg {
        if x == b'\\' as u16 {
            backslashes += 1;
        } else {
            if x == b'"' as u16 {
                // double the run and add one more to escape the quote itself
                line.extend((0..=backslashes).map(|_| b'\\' as u16));
            }
            backslashes = 0;
        }
        line.push(x);
    }
    if quote {
        line.extend((0..backslashes).map(|_| b'\\' as u16));
        line.push(b'"' as u16);
    }
    Ok(())
}

/// Serializes the set into a NUL-separated, double-NUL-terminated UTF-16
/// block, sorted name-case-insensitively as the platform convention wants.
fn make_env_block(env: &Env) -> io::Result<Vec<u16>> {
    let mut entries: Vec<(&OsStr, &OsStr)> = env.iter().collect();
    entries.sort_by_key(|(k, _)| {
        k.encode_wide()
            .map(|c| {
                if (b'a' as u16..=b'z' as u16).contains(&c) {
                    c - (b'a' as u16 - b'A' as u16)
                } else {
                    c
                }
            })
            .collect::<Vec<u16>>()
    });
    let mut block = Vec::new();
    for (k, v) in entries {
        let key: Vec<u16> = k.encode_wide().collect();
        let value: Vec<u16> = v.encode_wide().collect();
        if key.contains(&0) || value.contains(&0) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "nul value in string"));
        }
        block.extend(key);
        block.push(b'=' as u16);
        block.extend(value);
        block.push(0);
    }
    if block.is_empty() {
        block.push(0);
    }
    block.push(0);
    Ok(block)
}

static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub(crate) fn spawn(
    program: &OsStr,
    args: &[OsString],
    env: Option<&Env>,
    cwd: &Path,
    spec: &StdioSpec,
) -> io::Result<(Process, StdioPipes)> {
    let mut cmdline = make_command_line(program, args)?;
    let env_block = match env {
        Some(env) => Some(make_env_block(env)?),
        None => None,
    };
    let cwd_w = wide(cwd.as_os_str())?;

    // Handle inheritance is process-global state: hold the lock from pipe
    // creation through CreateProcessW.
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let (our_stdout, child_stdout) = realize(spec.stdout, STD_OUTPUT_HANDLE, false)?;
    let (our_stderr, child_stderr) = realize(spec.stderr, STD_ERROR_HANDLE, false)?;
    let (our_stdin, child_stdin) = realize(spec.stdin, STD_INPUT_HANDLE, true)?;

    let mut si: STARTUPINFOW = unsafe { mem::zeroed() };
    si.cb = mem::size_of::<STARTUPINFOW>() as u32;
    si.dwFlags = STARTF_USESTDHANDLES;
    si.hStdInput = child_stdin.raw();
    si.hStdOutput = child_stdout.raw();
    si.hStdError = child_stderr.raw();
    let mut pi: PROCESS_INFORMATION = unsafe { mem::zeroed() };

    let ok = unsafe {
        CreateProcessW(
            ptr::null(),
            cmdline.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            1,
            CREATE_UNICODE_ENVIRONMENT,
            env_block
                .as_ref()
                .map_or(ptr::null(), |block| block.as_ptr().cast()),
            cwd_w.as_ptr(),
            &si,
            &mut pi,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }

    // The thread reference is never used; the child-side pipe ends drop at
    // the end of this scope, once the child holds its inherited copies.
    drop(unsafe { OwnedHandle::from_raw_handle(pi.hThread as _) });

    let process = Process {
        handle: Some(unsafe { OwnedHandle::from_raw_handle(pi.hProcess as _) }),
        pid: pi.dwProcessId,
        status: None,
    };
    Ok((
        process,
        StdioPipes {
            stdin: our_stdin,
            stdout: our_stdout,
            stderr: our_stderr,
        },
    ))
}

/// A spawned child's process handle plus its first observed exit status.
/// The handle is released when the status is first obtained.
#[derive(Debug)]
pub(crate) struct Process {
    handle: Option<OwnedHandle>,
    pid: u32,
    status: Option<ExitStatus>,
}

impl Process {
    fn raw(&self) -> Option<HANDLE> {
        self.handle.as_ref().map(|h| h.as_raw_handle() as HANDLE)
    }

    fn finish(&mut self, handle: HANDLE) -> io::Result<ExitStatus> {
        let mut code: u32 = 0;
        if unsafe { GetExitCodeProcess(handle, &mut code) } == 0 {
            return Err(io::Error::last_os_error());
        }
        let status = ExitStatus(code);
        self.status = Some(status);
        self.handle = None;
        Ok(status)
    }

    pub(crate) fn id(&self) -> u32 {
        self.pid
    }

    pub(crate) fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        let Some(handle) = self.raw() else {
            return Ok(self.status);
        };
        match unsafe { WaitForSingleObject(handle, 0) } {
            WAIT_OBJECT_0 => self.finish(handle).map(Some),
            WAIT_TIMEOUT => Ok(None),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub(crate) fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let Some(handle) = self.raw() else {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "process already reaped"));
        };
        match unsafe { WaitForSingleObject(handle, INFINITE) } {
            WAIT_OBJECT_0 => self.finish(handle),
            _ => Err(io::Error::last_os_error()),
        }
    }

    /// TerminateProcess, reporting whether a still-running child received
    /// it. The forced exit code is 1; the platform cannot distinguish it
    /// from a program that chose to exit with 1.
    pub(crate) fn kill(&mut self) -> io::Result<bool> {
        if self.try_wait()?.is_some() {
            return Ok(false);
        }
        let Some(handle) = self.raw() else {
            return Ok(false);
        };
        if unsafe { TerminateProcess(handle, 1) } == 0 {
            let e = io::Error::last_os_error();
            // the child exited between the poll above and the terminate call
            if e.raw_os_error() == Some(ERROR_ACCESS_DENIED as i32) && self.try_wait()?.is_some() {
                return Ok(false);
            }
            return Err(e);
        }
        Ok(true)
    }
}

/// Raw process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExitStatus(u32);

impl ExitStatus {
    pub(crate) fn code(&self) -> Option<i32> {
        Some(self.0 as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_to_string(line: &[u16]) -> String {
        String::from_utf16(&line[..line.len() - 1]).unwrap()
    }

    #[test]
    fn io_lengths_clamp_to_the_u32_range() {
        assert_eq!(clamp_to_u32(0), 0);
        assert_eq!(clamp_to_u32(16), 16);
        assert_eq!(clamp_to_u32(u32::MAX as usize), u32::MAX);
        assert_eq!(clamp_to_u32(usize::MAX), u32::MAX);
    }

    #[test]
    fn command_line_quotes_the_program_and_spaced_args() {
        let line = make_command_line(OsStr::new("prog"), &["plain".into(), "a b".into()]).unwrap();
        assert_eq!(line_to_string(&line), r#""prog" plain "a b""#);
    }

    #[test]
    fn command_line_escapes_quotes_and_backslash_runs() {
        let line = make_command_line(OsStr::new("p"), &[r#"say "hi""#.into()]).unwrap();
        assert_eq!(line_to_string(&line), r#""p" "say \"hi\"""#);

        let line = make_command_line(OsStr::new("p"), &[r"end b\".into()]).unwrap();
        assert_eq!(line_to_string(&line), r#""p" "end b\\""#);

        let line = make_command_line(OsStr::new("p"), &[r"C:\dir\sub".into()]).unwrap();
        assert_eq!(line_to_string(&line), r#""p" C:\dir\sub"#);
    }

    #[test]
    fn command_line_quotes_empty_args() {
        let line = make_command_line(OsStr::new("p"), &["".into()]).unwrap();
        assert_eq!(line_to_string(&line), r#""p" """#);
    }

    #[test]
    fn env_block_is_sorted_and_double_terminated() {
        let mut env = Env::new();
        env.set("beta", "2");
        env.set("ALPHA", "1");
        let block = make_env_block(&env).unwrap();
        let text = String::from_utf16(&block).unwrap();
        assert_eq!(text, "ALPHA=1\0beta=2\0\0");
    }

    #[test]
    fn empty_env_block_is_two_nuls() {
        let block = make_env_block(&Env::new()).unwrap();
        assert_eq!(block, vec![0, 0]);
    }
}
