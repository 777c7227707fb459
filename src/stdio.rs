//! Per-stream redirection policy for a child's standard streams.

/// Redirection mode applied independently to stdin, stdout, and stderr.
///
/// `Default` defers the choice to the launch operation: [`cast`] and
/// [`cast_status`] treat it as `Inherit`, while [`cast_output`] treats it
/// as `Piped` so collected output is isolated from the parent's terminal.
///
/// [`cast`]: crate::Spell::cast
/// [`cast_status`]: crate::Spell::cast_status
/// [`cast_output`]: crate::Spell::cast_output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stdio {
    /// Resolved to `Inherit` or `Piped` by the launch operation.
    #[default]
    Default,
    /// The child shares the parent's stream.
    Inherit,
    /// A fresh pipe connects the stream to the parent.
    Piped,
    /// The stream reads from or writes to the platform's null device.
    Null,
}

impl Stdio {
    /// Replaces `Default` with the launch operation's default policy.
    pub(crate) fn resolve(self, default: Stdio) -> Stdio {
        match self {
            Stdio::Default => default,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolves_to_the_operation_default() {
        assert_eq!(Stdio::Default.resolve(Stdio::Inherit), Stdio::Inherit);
        assert_eq!(Stdio::Default.resolve(Stdio::Piped), Stdio::Piped);
    }

    #[test]
    fn explicit_policies_survive_resolution() {
        assert_eq!(Stdio::Null.resolve(Stdio::Piped), Stdio::Null);
        assert_eq!(Stdio::Piped.resolve(Stdio::Inherit), Stdio::Piped);
        assert_eq!(Stdio::Inherit.resolve(Stdio::Piped), Stdio::Inherit);
    }
}
