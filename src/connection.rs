//! Shell connection ownership and reconnect-after-reboot.
//!
//! One connection manager per invocation owns the single live shell session
//! and its lazily-opened file-transfer sub-session. Establishing a session is
//! a two-phase wait: first for the instance to expose a public address, then
//! for the shell service to accept the connection. Identity failures abort
//! immediately; socket and protocol failures are retried within a bounded
//! attempt budget.

use std::net::IpAddr;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;

use crate::locator::InstanceLocator;
use crate::provider::Provider;
use crate::transport::{ConnectTarget, ShellSession, ShellTransport, TransportError};

const ADDRESS_POLL_INTERVAL: Duration = Duration::from_secs(2);
const ADDRESS_ATTEMPTS: u32 = 60;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const CONNECT_ATTEMPTS: u32 = 60;
const SETTLE_DELAY: Duration = Duration::from_secs(10);

/// Intervals and budgets governing the shell wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectTiming {
    /// Interval between public-address polls.
    pub address_poll_interval: Duration,
    /// Attempt budget for the public-address poll.
    pub address_attempts: u32,
    /// Interval between connection attempts.
    pub connect_retry_interval: Duration,
    /// Attempt budget for connection attempts.
    pub connect_attempts: u32,
    /// Pause before the first connection attempt on first boot, letting the
    /// remote system finish start-of-day initialisation. Not applied after
    /// reboots.
    pub settle_delay: Duration,
}

impl Default for ConnectTiming {
    fn default() -> Self {
        Self {
            address_poll_interval: ADDRESS_POLL_INTERVAL,
            address_attempts: ADDRESS_ATTEMPTS,
            connect_retry_interval: CONNECT_RETRY_INTERVAL,
            connect_attempts: CONNECT_ATTEMPTS,
            settle_delay: SETTLE_DELAY,
        }
    }
}

/// Shell credentials taken from the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    /// Remote user to connect as.
    pub username: String,
    /// Path to the private key.
    pub private_key: Utf8PathBuf,
}

/// Errors raised while establishing or using the shell connection.
#[derive(Debug, Error)]
pub enum ConnectionError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the instance never exposes a public address within the
    /// attempt budget.
    #[error("no public address for \"{name}\" after {attempts} attempts")]
    AddressTimeout {
        /// System name being waited on.
        name: String,
        /// Attempt budget that was exhausted.
        attempts: u32,
    },
    /// Raised on identity failures that retrying cannot fix.
    #[error("shell connection failed: {0}")]
    Unrecoverable(#[source] TransportError),
    /// Raised when the connection attempt budget is exhausted. Carries the
    /// instance state re-queried for diagnostic context.
    #[error(
        "shell connection not established after {attempts} attempts \
         (instance state: {instance_state}): {source}"
    )]
    Exhausted {
        /// Attempt budget that was exhausted.
        attempts: u32,
        /// Instance state at the time of failure.
        instance_state: String,
        /// Last transient failure observed.
        #[source]
        source: TransportError,
    },
    /// Raised when a provider query inside the wait fails.
    #[error("provider query failed: {0}")]
    Provider(#[source] E),
}

/// Owns the single live shell session and its file-transfer sub-session.
pub struct ConnectionManager<T: ShellTransport> {
    transport: T,
    credentials: Credentials,
    port: u16,
    timing: ConnectTiming,
    session: Option<T::Session>,
    transfer: Option<<T::Session as ShellSession>::FileTransfer>,
}

impl<T: ShellTransport> ConnectionManager<T> {
    /// Creates a manager with no live session.
    #[must_use]
    pub fn new(transport: T, credentials: Credentials, port: u16) -> Self {
        Self {
            transport,
            credentials,
            port,
            timing: ConnectTiming::default(),
            session: None,
            transfer: None,
        }
    }

    /// Overrides the wait timing, primarily to keep tests fast.
    #[must_use]
    pub const fn with_timing(mut self, timing: ConnectTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Whether a shell session is currently live.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Mutable access to the live session, when one exists.
    pub fn session_mut(&mut self) -> Option<&mut T::Session> {
        self.session.as_mut()
    }

    /// Mutable access to the file-transfer sub-session, opening it on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] without a live session, or
    /// the transport failure when the sub-session cannot be opened.
    pub fn file_transfer_mut(
        &mut self,
    ) -> Result<&mut <T::Session as ShellSession>::FileTransfer, TransportError> {
        if self.transfer.is_none() {
            let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;
            self.transfer = Some(session.open_file_transfer()?);
        }
        self.transfer.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Closes the file-transfer sub-session. A no-op when never opened.
    pub fn close_file_transfer(&mut self) {
        self.transfer = None;
    }

    /// Drops the file-transfer sub-session and the shell session.
    pub fn disconnect(&mut self) {
        self.transfer = None;
        self.session = None;
    }

    /// Establishes a fresh shell session, waiting first for the instance to
    /// expose a public address and then for the shell service to accept the
    /// connection. `settle_first` applies the first-boot settle delay and is
    /// skipped on reboot-driven reconnects.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when either wait exhausts its budget, on
    /// the first identity failure, or when a provider query fails.
    pub async fn wait_for_shell<P: Provider>(
        &mut self,
        provider: &P,
        name: &str,
        settle_first: bool,
    ) -> Result<(), ConnectionError<P::Error>> {
        let locator = InstanceLocator::new(provider);
        let address = self.wait_for_address(&locator, name).await?;

        if settle_first {
            tracing::debug!(delay = ?self.timing.settle_delay, "settle before first connect");
            sleep(self.timing.settle_delay).await;
        }

        self.connect_with_retries(&locator, name, address).await
    }

    async fn wait_for_address<P: Provider>(
        &self,
        locator: &InstanceLocator<'_, P>,
        name: &str,
    ) -> Result<IpAddr, ConnectionError<P::Error>> {
        for _ in 0..self.timing.address_attempts {
            if let Some(address) = locator
                .public_address(name)
                .await
                .map_err(ConnectionError::Provider)?
            {
                tracing::debug!(%address, "public address assigned");
                return Ok(address);
            }
            sleep(self.timing.address_poll_interval).await;
        }

        Err(ConnectionError::AddressTimeout {
            name: name.to_owned(),
            attempts: self.timing.address_attempts,
        })
    }

    async fn connect_with_retries<P: Provider>(
        &mut self,
        locator: &InstanceLocator<'_, P>,
        name: &str,
        address: IpAddr,
    ) -> Result<(), ConnectionError<P::Error>> {
        self.disconnect();
        let target = ConnectTarget {
            host: address,
            port: self.port,
            username: self.credentials.username.clone(),
            private_key: self.credentials.private_key.clone(),
        };

        let mut last_error = TransportError::NotConnected;
        for attempt in 1..=self.timing.connect_attempts {
            match self.transport.connect(&target) {
                Ok(session) => {
                    tracing::info!(%address, attempt, "shell reachable");
                    self.session = Some(session);
                    return Ok(());
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(attempt, error = %err, "shell not ready yet");
                    last_error = err;
                    sleep(self.timing.connect_retry_interval).await;
                }
                Err(err) => return Err(ConnectionError::Unrecoverable(err)),
            }
        }

        let instance_state = match locator.running_instance(name).await {
            Ok(Some(instance)) => instance.state,
            Ok(None) => String::from("absent"),
            Err(_) => String::from("unknown"),
        };
        Err(ConnectionError::Exhausted {
            attempts: self.timing.connect_attempts,
            instance_state,
            source: last_error,
        })
    }
}
