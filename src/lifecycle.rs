//! Top-level instance lifecycle state machine.
//!
//! Drives one instance from absent to configured: create-or-find, wait for
//! the provider to report it running, apply the document's wait policy, wait
//! for shell reachability, then execute the configuration steps. Also hosts
//! the terminate, report, snapshot, and interactive-shell operations, all of
//! which rediscover the instance by its Name tag.

use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::time::sleep;

use crate::connection::{ConnectionError, ConnectionManager, Credentials};
use crate::dispatch::{StepDispatcher, StepError};
use crate::document::{Document, WaitPolicy};
use crate::locator::InstanceLocator;
use crate::provider::Provider;
use crate::transport::ShellTransport;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(10);
const IMAGE_INITIAL_WAIT: Duration = Duration::from_secs(90);
const IMAGE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const HEALTHY_STATUS: &str = "ok";
const IMAGE_AVAILABLE_STATE: &str = "available";

/// Intervals governing the controller's own polling loops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleTiming {
    /// Cadence of health-status polls under the `ok` wait policy.
    pub health_poll_interval: Duration,
    /// Unconditional wait before the first image-state poll.
    pub image_initial_wait: Duration,
    /// Cadence of image-state polls.
    pub image_poll_interval: Duration,
}

impl Default for LifecycleTiming {
    fn default() -> Self {
        Self {
            health_poll_interval: HEALTH_POLL_INTERVAL,
            image_initial_wait: IMAGE_INITIAL_WAIT,
            image_poll_interval: IMAGE_POLL_INTERVAL,
        }
    }
}

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when rediscovering the instance fails.
    #[error("instance lookup failed: {0}")]
    Locate(#[source] E),
    /// Raised when the create request fails.
    #[error("failed to launch instance: {0}")]
    Launch(#[source] E),
    /// Raised when waiting on the provider fails.
    #[error("wait on provider failed: {0}")]
    Wait(#[source] E),
    /// Raised when image capture or its polling fails.
    #[error("image capture failed: {0}")]
    Snapshot(#[source] E),
    /// Raised when termination fails.
    #[error("failed to terminate instance: {0}")]
    Terminate(#[source] E),
    /// Raised when establishing the shell connection fails.
    #[error(transparent)]
    Connection(#[from] ConnectionError<E>),
    /// Raised when a configuration step fails.
    #[error(transparent)]
    Steps(#[from] StepError<E>),
    /// Raised when an operation requires a running instance and none exists.
    #[error("\"{name}\" is NOT running")]
    NotRunning {
        /// System name that was looked up.
        name: String,
    },
    /// Raised when the running instance has no public address to connect to.
    #[error("\"{name}\" has no public address")]
    NoPublicAddress {
        /// System name that was looked up.
        name: String,
    },
}

/// Outcome of a bring-up call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BringUpOutcome {
    /// An instance was already running; nothing was done.
    AlreadyRunning {
        /// Identifier of the existing instance.
        instance_id: String,
    },
    /// A new instance was provisioned and configured.
    Provisioned {
        /// Identifier of the new instance.
        instance_id: String,
    },
}

/// External shell-client invocation for the interactive shell operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshInvocation {
    /// Program to run.
    pub program: String,
    /// Arguments, ending with `user@host`.
    pub args: Vec<String>,
}

impl SshInvocation {
    /// Builds a spawnable command from the invocation.
    #[must_use]
    pub fn into_command(self) -> std::process::Command {
        let mut command = std::process::Command::new(self.program);
        command.args(self.args);
        command
    }
}

/// Drives the full lifecycle for one system document.
pub struct LifecycleController<P, T>
where
    P: Provider,
    T: ShellTransport,
{
    provider: P,
    document: Document,
    connection: ConnectionManager<T>,
    dispatcher: StepDispatcher,
    timing: LifecycleTiming,
}

impl<P, T> LifecycleController<P, T>
where
    P: Provider,
    T: ShellTransport,
{
    /// Creates a controller for `document`, connecting shells through
    /// `transport` on `ssh_port`.
    #[must_use]
    pub fn new(provider: P, transport: T, document: Document, ssh_port: u16) -> Self {
        let credentials = Credentials {
            username: document.connection.username.clone(),
            private_key: document.connection.private_key.clone(),
        };
        let dispatcher = StepDispatcher::new(document.fail_fast);
        Self {
            provider,
            document,
            connection: ConnectionManager::new(transport, credentials, ssh_port),
            dispatcher,
            timing: LifecycleTiming::default(),
        }
    }

    /// Overrides the controller polling intervals, primarily for tests.
    #[must_use]
    pub const fn with_timing(mut self, timing: LifecycleTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Overrides the connection wait timing, primarily for tests.
    #[must_use]
    pub fn with_connect_timing(mut self, timing: crate::connection::ConnectTiming) -> Self {
        self.connection = self.connection.with_timing(timing);
        self
    }

    /// Overrides the reboot grace period, primarily for tests.
    #[must_use]
    pub const fn with_reboot_grace(mut self, grace: Duration) -> Self {
        self.dispatcher = self.dispatcher.with_reboot_grace(grace);
        self
    }

    /// Brings the system up: a no-op when an instance already runs, otherwise
    /// launch, wait, connect, and run the configuration steps. Remote command
    /// output streams into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] on any provider, connection, or step
    /// failure.
    pub async fn bring_up(
        &mut self,
        output: &mut dyn Write,
    ) -> Result<BringUpOutcome, LifecycleError<P::Error>> {
        let name = self.document.name().to_owned();
        let locator = InstanceLocator::new(&self.provider);

        if let Some(existing) = locator
            .running_instance(&name)
            .await
            .map_err(LifecycleError::Locate)?
        {
            tracing::info!(system = %name, instance_id = %existing.id, "already running, nothing to do");
            return Ok(BringUpOutcome::AlreadyRunning {
                instance_id: existing.id,
            });
        }

        let spec = self.document.launch_spec();
        let instance_id = self
            .provider
            .launch(&spec)
            .await
            .map_err(LifecycleError::Launch)?;
        self.provider
            .wait_until_running(&instance_id)
            .await
            .map_err(LifecycleError::Wait)?;

        self.apply_wait_policy(&instance_id).await?;

        self.connection
            .wait_for_shell(&self.provider, &name, true)
            .await?;

        self.dispatcher
            .run(
                &self.document.steps,
                &self.provider,
                &name,
                &mut self.connection,
                output,
            )
            .await?;

        self.connection.disconnect();
        tracing::info!(system = %name, instance_id = %instance_id, "provisioning complete");
        Ok(BringUpOutcome::Provisioned { instance_id })
    }

    async fn apply_wait_policy(
        &self,
        instance_id: &str,
    ) -> Result<(), LifecycleError<P::Error>> {
        match self.document.wait_for {
            WaitPolicy::Fixed(seconds) => {
                tracing::info!(seconds, "fixed wait after reaching running state");
                sleep(Duration::from_secs(seconds)).await;
            }
            WaitPolicy::UntilHealthy => loop {
                let status = self
                    .provider
                    .health_status(instance_id)
                    .await
                    .map_err(LifecycleError::Wait)?;
                if status.as_deref() == Some(HEALTHY_STATUS) {
                    tracing::info!(instance_id = %instance_id, "health checks report ok");
                    break;
                }
                tracing::debug!(instance_id = %instance_id, status = ?status, "health not ok yet");
                sleep(self.timing.health_poll_interval).await;
            },
        }
        Ok(())
    }

    /// Terminates the running instance and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] when no instance runs, or the
    /// provider failure otherwise.
    pub async fn destroy(&self) -> Result<String, LifecycleError<P::Error>> {
        let name = self.document.name();
        let instance = self.require_running(name).await?;
        self.provider
            .terminate(&instance.id)
            .await
            .map_err(LifecycleError::Terminate)?;
        Ok(instance.id)
    }

    /// Returns the identifier of the running instance.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] when no instance runs.
    pub async fn report(&self) -> Result<String, LifecycleError<P::Error>> {
        let name = self.document.name();
        Ok(self.require_running(name).await?.id)
    }

    /// Captures a machine image of the running instance without rebooting it
    /// and waits for the image to become available. Returns `None` when no
    /// instance is running; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the capture or its polling fails.
    pub async fn save_image(&self) -> Result<Option<String>, LifecycleError<P::Error>> {
        let name = self.document.name();
        let locator = InstanceLocator::new(&self.provider);
        let Some(instance) = locator
            .running_instance(name)
            .await
            .map_err(LifecycleError::Locate)?
        else {
            tracing::info!(system = %name, "not running, nothing to snapshot");
            return Ok(None);
        };

        let image_name = format!("{name}-{}", Utc::now().format("%Y%m%d%H%M%S"));
        let image_id = self
            .provider
            .create_image(&instance.id, &image_name)
            .await
            .map_err(LifecycleError::Snapshot)?;
        tracing::info!(image = %image_name, image_id = %image_id, "image capture requested");

        sleep(self.timing.image_initial_wait).await;
        loop {
            let state = self
                .provider
                .image_state(&image_id)
                .await
                .map_err(LifecycleError::Snapshot)?;
            if state.as_deref() == Some(IMAGE_AVAILABLE_STATE) {
                break;
            }
            tracing::debug!(image_id = %image_id, state = ?state, "image not available yet");
            sleep(self.timing.image_poll_interval).await;
        }

        tracing::info!(image_id = %image_id, "image available");
        Ok(Some(image_id))
    }

    /// Builds the external shell-client invocation for the running instance.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] when no instance runs, and
    /// [`LifecycleError::NoPublicAddress`] when it has no public address.
    pub async fn ssh_invocation(&self) -> Result<SshInvocation, LifecycleError<P::Error>> {
        let name = self.document.name();
        let instance = self.require_running(name).await?;
        let address = instance
            .public_ip
            .ok_or_else(|| LifecycleError::NoPublicAddress {
                name: name.to_owned(),
            })?;

        Ok(SshInvocation {
            program: String::from("ssh"),
            args: vec![
                String::from("-i"),
                self.document.connection.private_key.to_string(),
                format!("{}@{address}", self.document.connection.username),
            ],
        })
    }

    async fn require_running(
        &self,
        name: &str,
    ) -> Result<crate::provider::InstanceSummary, LifecycleError<P::Error>> {
        let locator = InstanceLocator::new(&self.provider);
        locator
            .running_instance(name)
            .await
            .map_err(LifecycleError::Locate)?
            .ok_or_else(|| LifecycleError::NotRunning {
                name: name.to_owned(),
            })
    }
}
