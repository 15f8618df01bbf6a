//! Remote command rendering and execution.
//!
//! A command block from the document runs as one logical shell invocation on
//! the remote host. The executor wraps the block, streams its merged output
//! while it runs, and reports the elapsed wall-clock time afterwards. The
//! remote exit status is returned but not interpreted here.

use std::io::Write;
use std::time::{Duration, Instant};

use shell_escape::unix::escape;

use crate::document::ShellCommand;
use crate::transport::{ShellSession, TransportError};

/// Outcome of one remote command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandReport {
    /// Remote exit status, when the transport reported one.
    pub exit_status: Option<i32>,
    /// Wall-clock time from issue to stream close.
    pub elapsed: Duration,
}

/// Renders a command block as a single shell invocation.
///
/// Embedded double quotes are escaped so the whole block survives the outer
/// quoting. When `privileged` is set the invocation is prefixed with `sudo`,
/// and with `sudo -u <user>` when an execution user is also given; the user
/// is ignored without the privilege flag.
#[must_use]
pub fn render_remote_command(text: &str, privileged: bool, user: Option<&str>) -> String {
    let escaped = text.replace('"', "\\\"");
    let wrapped = format!("sh -c \"{escaped}\"");
    match (privileged, user) {
        (true, Some(user)) => format!("sudo -u {} {wrapped}", escape(user.into())),
        (true, None) => format!("sudo {wrapped}"),
        (false, _) => wrapped,
    }
}

/// Runs one named command over the live session, streaming merged output into
/// `output`. Blocks until the remote command completes.
///
/// # Errors
///
/// Returns [`TransportError`] when the channel fails; a non-zero remote exit
/// is not an error at this layer.
pub fn run_command<S: ShellSession>(
    session: &mut S,
    command: &ShellCommand,
    output: &mut dyn Write,
) -> Result<CommandReport, TransportError> {
    tracing::info!(
        command = %command.name,
        sudo = command.sudo,
        user = ?command.user,
        "running remote command"
    );

    let rendered = render_remote_command(&command.run, command.sudo, command.user.as_deref());
    let started = Instant::now();
    let exit_status = session.exec_streamed(&rendered, output)?;
    let elapsed = started.elapsed();

    tracing::info!(
        command = %command.name,
        exit_status = ?exit_status,
        elapsed = ?elapsed,
        "remote command finished"
    );
    Ok(CommandReport {
        exit_status,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn wraps_block_in_single_invocation() {
        let rendered = render_remote_command("echo hello", false, None);
        assert_eq!(rendered, "sh -c \"echo hello\"");
    }

    #[test]
    fn escapes_embedded_quotes() {
        let rendered = render_remote_command("echo \"quoted\"", false, None);
        assert_eq!(rendered, "sh -c \"echo \\\"quoted\\\"\"");
    }

    #[test]
    fn prefixes_sudo_when_privileged() {
        let rendered = render_remote_command("apt-get update", true, None);
        assert_eq!(rendered, "sudo sh -c \"apt-get update\"");
    }

    #[test]
    fn prefixes_execution_user_when_privileged() {
        let rendered = render_remote_command("whoami", true, Some("deploy"));
        assert_eq!(rendered, "sudo -u deploy sh -c \"whoami\"");
    }

    #[test]
    fn ignores_user_without_privilege() {
        let rendered = render_remote_command("whoami", false, Some("deploy"));
        assert_eq!(rendered, "sh -c \"whoami\"");
    }

    #[rstest]
    #[case("line1\nline2", "sh -c \"line1\nline2\"")]
    #[case("a \"b\" c", "sh -c \"a \\\"b\\\" c\"")]
    fn preserves_multi_line_blocks(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(render_remote_command(input, false, None), expected);
    }
}
