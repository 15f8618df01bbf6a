//! Configuration step dispatch.
//!
//! Steps run strictly in document order, each completing before the next
//! begins. The step kind is an exhaustive enum match; unknown kinds never get
//! this far because the document parser rejects them. The reboot handler
//! tears the connection down in a fixed order and re-establishes it before
//! the following step.

use std::io::Write;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::connection::{ConnectionError, ConnectionManager};
use crate::document::Step;
use crate::executor;
use crate::provider::Provider;
use crate::replicate::{self, ReplicateError};
use crate::transport::{ShellSession, ShellTransport, TransportError};

const REBOOT_COMMAND: &str = "sudo reboot";
const REBOOT_GRACE: Duration = Duration::from_secs(10);

/// Errors raised while executing configuration steps.
#[derive(Debug, Error)]
pub enum StepError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when a shell command cannot be issued or streamed.
    #[error("command \"{name}\" failed: {source}")]
    Command {
        /// Name of the failing command.
        name: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },
    /// Raised in fail-fast mode when a command exits non-zero.
    #[error("command \"{name}\" exited with status {status}")]
    CommandFailed {
        /// Name of the failing command.
        name: String,
        /// Remote exit status.
        status: i32,
    },
    /// Raised when the file-transfer sub-session cannot be provided.
    #[error("file transfer unavailable: {0}")]
    Transfer(#[source] TransportError),
    /// Raised when folder replication fails.
    #[error(transparent)]
    Replicate(#[from] ReplicateError),
    /// Raised when the reboot command cannot be issued.
    #[error("reboot command failed: {0}")]
    Reboot(#[source] TransportError),
    /// Raised when the post-reboot reconnect fails.
    #[error("reconnect after reboot failed: {0}")]
    Reconnect(#[source] ConnectionError<E>),
}

/// Runs the ordered step list against the live connection.
#[derive(Clone, Copy, Debug)]
pub struct StepDispatcher {
    fail_fast: bool,
    reboot_grace: Duration,
}

impl StepDispatcher {
    /// Creates a dispatcher. With `fail_fast` set, a non-zero remote exit
    /// aborts the sequence; by default exit codes are ignored.
    #[must_use]
    pub const fn new(fail_fast: bool) -> Self {
        Self {
            fail_fast,
            reboot_grace: REBOOT_GRACE,
        }
    }

    /// Overrides the reboot grace period, primarily for tests.
    #[must_use]
    pub const fn with_reboot_grace(mut self, grace: Duration) -> Self {
        self.reboot_grace = grace;
        self
    }

    /// Executes `steps` in order. Each step fully completes, including all
    /// its sub-commands and sub-copies, before the next begins.
    ///
    /// # Errors
    ///
    /// Returns [`StepError`] on the first failing step; later steps do not
    /// run.
    pub async fn run<P, T>(
        &self,
        steps: &[Step],
        provider: &P,
        name: &str,
        connection: &mut ConnectionManager<T>,
        output: &mut dyn Write,
    ) -> Result<(), StepError<P::Error>>
    where
        P: Provider,
        T: ShellTransport,
    {
        for step in steps {
            match step {
                Step::Shell { commands } => {
                    for command in commands {
                        let session = connection
                            .session_mut()
                            .ok_or_else(|| StepError::Command {
                                name: command.name.clone(),
                                source: TransportError::NotConnected,
                            })?;
                        let report = executor::run_command(session, command, output).map_err(
                            |source| StepError::Command {
                                name: command.name.clone(),
                                source,
                            },
                        )?;
                        if self.fail_fast {
                            if let Some(status) = report.exit_status {
                                if status != 0 {
                                    return Err(StepError::CommandFailed {
                                        name: command.name.clone(),
                                        status,
                                    });
                                }
                            }
                        }
                    }
                }
                Step::CopyFolder { folders } => {
                    let transfer = connection.file_transfer_mut().map_err(StepError::Transfer)?;
                    replicate::copy_folders(transfer, folders)?;
                }
                Step::Reboot => self.reboot(provider, name, connection).await?,
            }
        }
        Ok(())
    }

    /// Reboots the instance and re-establishes the connection. The transfer
    /// sub-session is closed before the reboot command is issued, and the
    /// reconnect skips the first-boot settle delay.
    async fn reboot<P, T>(
        &self,
        provider: &P,
        name: &str,
        connection: &mut ConnectionManager<T>,
    ) -> Result<(), StepError<P::Error>>
    where
        P: Provider,
        T: ShellTransport,
    {
        tracing::info!(system = %name, "rebooting instance");
        connection.close_file_transfer();
        connection
            .session_mut()
            .ok_or_else(|| StepError::Reboot(TransportError::NotConnected))?
            .exec_detached(REBOOT_COMMAND)
            .map_err(StepError::Reboot)?;
        connection.disconnect();

        sleep(self.reboot_grace).await;
        connection
            .wait_for_shell(provider, name, false)
            .await
            .map_err(StepError::Reconnect)?;
        tracing::info!(system = %name, "reconnected after reboot");
        Ok(())
    }
}
