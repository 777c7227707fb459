//! Process builders and the launch operations.
//!
//! A [`Spell`] accumulates a program name, arguments, an optional
//! environment set, a working directory, and per-stream stdio policies.
//! Nothing touches the OS until one of the launch operations runs:
//!
//! - [`cast`](Spell::cast) launches and returns the running [`Child`];
//!   unset stdio policies become `Inherit`.
//! - [`cast_status`](Spell::cast_status) launches, waits, and returns the
//!   [`ExitStatus`]; unset policies become `Inherit`.
//! - [`cast_output`](Spell::cast_output) launches, waits, and returns the
//!   [`Output`] with collected stdout and stderr; unset policies become
//!   `Piped` on all three streams, so the child is isolated from the
//!   parent's terminal and its stdin is writable until the wait begins.
//!
//! Launching never consumes the builder; one `Spell` may be cast any
//! number of times, each producing an independent child.
//!
//! # Environment states
//!
//! A builder distinguishes three environment states. Untouched, the child
//! inherits the parent's environment verbatim. The first call to
//! [`env`](Spell::env), [`envs`](Spell::envs),
//! [`env_remove`](Spell::env_remove), or [`env_mut`](Spell::env_mut)
//! materializes a snapshot of the parent environment, which later calls
//! mutate. [`env_clear`](Spell::env_clear) instead installs an empty set,
//! so the child starts from a blank slate.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use tracing::{debug, error};

use crate::child::{Child, ExitStatus, Output};
use crate::cmdline;
use crate::env::Env;
use crate::error::{Result, SpellError};
use crate::stdio::Stdio;
use crate::sys::{StdioSpec, imp};


/// Builder for launching a child process.
#[derive(Debug, Clone)]
pub struct Spell {
    program: OsString,
    args: Vec<OsString>,
    env: Option<Env>,
    cwd: PathBuf,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
}

impl Spell {
    /// Creates a builder for `program` with no arguments, the parent's
    /// environment, the parent's current directory, and default stdio
    /// policies.
    pub fn new(program: impl AsRef<OsStr>) -> Spell {
        Spell {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: None,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            stdin: Stdio::Default,
            stdout: Stdio::Default,
            stderr: Stdio::Default,
        }
    }

    /// Builds a `Spell` from a single command line.
    ///
    /// Tokenization is shell-like but minimal: whitespace separates
    /// tokens, a backslash escapes the next character literally, and
    /// single or double quotes suppress splitting until the matching
    /// quote. The first token names the program, the rest become
    /// arguments.
    ///
    /// ```
    /// use spellcast::Spell;
    ///
    /// let spell = Spell::from_string("echo 'Hello World'");
    /// assert_eq!(spell.get_program(), std::ffi::OsStr::new("echo"));
    /// assert_eq!(spell.get_args().len(), 1);
    /// assert_eq!(spell.get_args()[0], "Hello World");
    /// ```
    pub fn from_string(line: &str) -> Spell {
        let mut tokens = cmdline::split(line).into_iter();
        let mut spell = Spell::new(tokens.next().unwrap_or_default());
        spell.args = tokens.map(OsString::from).collect();
        spell
    }

    /// Appends one argument.
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Spell {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends every argument in the iterator.
    pub fn args<I, S>(&mut self, args: I) -> &mut Spell
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Sets one environment variable for the child.
    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Spell {
        self.env_mut().set(key.as_ref(), value.as_ref());
        self
    }

    /// Sets every `(key, value)` pair in the iterator.
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Spell
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self.env(key, value);
        }
        self
    }

    /// Removes one environment variable from the child's environment.
    pub fn env_remove(&mut self, key: impl AsRef<OsStr>) -> &mut Spell {
        self.env_mut().remove(key.as_ref());
        self
    }

    /// Gives the child an empty environment, discarding anything inherited
    /// or previously set. Later [`env`](Spell::env) calls add to the blank
    /// slate.
    pub fn env_clear(&mut self) -> &mut Spell {
        match &mut self.env {
            Some(env) => env.clear(),
            None => self.env = Some(Env::new()),
        }
        self
    }

    /// Mutable view of the child's environment set, materializing a
    /// snapshot of the parent environment on first touch.
    pub fn env_mut(&mut self) -> &mut Env {
        self.env.get_or_insert_with(Env::capture)
    }

    /// The configured environment set; `None` while the builder still
    /// inherits the parent environment verbatim.
    pub fn get_env(&self) -> Option<&Env> {
        self.env.as_ref()
    }

    /// Sets the child's working directory.
    ///
    /// Relative paths resolve against the builder's current value at the
    /// time of this call, and the result is stored lexically normalized.
    /// The directory is not required to exist until launch.
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Spell {
        self.cwd = self.cwd.join(dir).clean();
        self
    }

    /// The directory the child will start in.
    pub fn get_current_dir(&self) -> &Path {
        &self.cwd
    }

    /// The program to launch.
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// The arguments configured so far, excluding the program itself.
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Mutable access to the argument list.
    pub fn args_mut(&mut self) -> &mut Vec<OsString> {
        &mut self.args
    }

    /// Sets the stdin policy.
    pub fn stdin(&mut self, policy: Stdio) -> &mut Spell {
        self.stdin = policy;
        self
    }

    /// Sets the stdout policy.
    pub fn stdout(&mut self, policy: Stdio) -> &mut Spell {
        self.stdout = policy;
        self
    }

    /// Sets the stderr policy.
    pub fn stderr(&mut self, policy: Stdio) -> &mut Spell {
        self.stderr = policy;
        self
    }

    /// Launches the child and returns its handle.
    ///
    /// ```no_run
    /// use spellcast::Spell;
    ///
    /// let mut child = Spell::new("sleep").arg("5").cast()?;
    /// child.kill()?;
    /// # Ok::<(), spellcast::SpellError>(())
    /// ```
    pub fn cast(&self) -> Result<Child> {
        self.do_cast(Stdio::Inherit)
    }

    /// Launches the child and waits for it to finish.
    pub fn cast_status(&self) -> Result<ExitStatus> {
        let mut child = self.do_cast(Stdio::Inherit)?;
        child.wait()
    }

    /// Launches the child, waits for it to finish, and collects its
    /// output.
    ///
    /// ```no_run
    /// use spellcast::Spell;
    ///
    /// let output = Spell::new("echo").arg("hello").cast_output()?;
    /// assert!(output.status.success());
    /// # Ok::<(), spellcast::SpellError>(())
    /// ```
    pub fn cast_output(&self) -> Result<Output> {
        self.do_cast(Stdio::Piped)?.wait_with_output()
    }

    fn do_cast(&self, default: Stdio) -> Result<Child> {
        let spec = StdioSpec {
            stdin: self.stdin.resolve(default),
            stdout: self.stdout.resolve(default),
            stderr: self.stderr.resolve(default),
        };
        debug!("casting '{}' {:?}", self.program.to_string_lossy(), self.args);
        match imp::spawn(&self.program, &self.args, self.env.as_ref(), &self.cwd, &spec) {
            Ok((process, pipes)) => Ok(Child::new(process, pipes)),
            Err(source) => {
                error!(
                    "failed to launch '{}': {}",
                    self.program.to_string_lossy(),
                    source
                );
                Err(SpellError::Launch {
                    program: self.program.to_string_lossy().into_owned(),
                    source,
                })
            }
        }
    }
}
