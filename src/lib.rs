//! Spellcast: reusable child-process launching with explicit pipe ownership.
//!
//! [`Spell`] is a builder describing one program launch: arguments,
//! environment, working directory, and a stdio policy per standard stream.
//! A builder stays usable after launching, so one `Spell` can cast any number
//! of children. Three operations cover the common shapes: [`Spell::cast`]
//! hands back a [`Child`] to manage, [`Spell::cast_status`] waits for the
//! exit status, and [`Spell::cast_output`] captures stdout and stderr to
//! completion.
//!
//! ```no_run
//! use spellcast::Spell;
//!
//! fn main() -> spellcast::Result<()> {
//!     let output = Spell::new("git").args(["status", "--short"]).cast_output()?;
//!     if output.status.success() {
//!         print!("{}", String::from_utf8_lossy(&output.stdout));
//!     }
//!     Ok(())
//! }
//! ```

mod child;
mod cmdline;
mod env;
mod error;
mod spell;
mod stdio;
mod sys;

pub use child::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus, Output};
pub use env::Env;
pub use error::{Result, SpellError};
pub use spell::Spell;
pub use stdio::Stdio;

/// Opts this process out of child reaping, letting the OS collect exited
/// children automatically.
///
/// On POSIX this sets the `SIGCHLD` disposition to `SIG_IGN`, once, for the
/// whole process. It is incompatible with the wait family: after this call
/// [`Child::wait`], [`Child::try_wait`], and [`Child::wait_with_output`]
/// report `ECHILD` because the kernel discards exit statuses as children
/// terminate. Call it only when no launch in the process needs a status.
/// On Windows it does nothing.
pub fn ignore_sigchld() {
    sys::imp::ignore_sigchld();
}
