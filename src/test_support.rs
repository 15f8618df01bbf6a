//! Test support utilities shared across unit and integration tests.
//!
//! The fakes here stand in for the provider API and the shell transport so
//! lifecycle behaviour can be driven deterministically, without network
//! access. Responses are seeded FIFO; call recordings are exposed for
//! assertions.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::provider::{InstanceSummary, LaunchSpec, Provider, ProviderFuture};
use crate::transport::{
    ConnectTarget, FileTransfer, ShellSession, ShellTransport, TransportError,
};

/// Error type returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake provider error: {0}")]
pub struct FakeProviderError(pub String);

#[derive(Debug, Default)]
struct FakeProviderState {
    describes: VecDeque<Vec<InstanceSummary>>,
    health: VecDeque<Option<String>>,
    image_states: VecDeque<Option<String>>,
    launches: Vec<LaunchSpec>,
    created_images: Vec<(String, String)>,
    terminated: Vec<String>,
    health_polls: u32,
    running_waits: u32,
}

/// Scripted provider double.
///
/// Describe responses are consumed FIFO; once a single response remains it is
/// repeated, which keeps polling loops stable without seeding one entry per
/// poll. Health and image-state queues behave the same way but default to
/// `ok`/`available` when empty so waits terminate.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeProviderState>>,
}

impl FakeProvider {
    /// Creates a provider with no seeded responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeProviderState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seeds the next describe-instances response.
    pub fn push_describe(&self, instances: Vec<InstanceSummary>) {
        self.lock().describes.push_back(instances);
    }

    /// Seeds the next health-status response.
    pub fn push_health(&self, status: Option<&str>) {
        self.lock().health.push_back(status.map(str::to_owned));
    }

    /// Seeds the next image-state response.
    pub fn push_image_state(&self, state: Option<&str>) {
        self.lock().image_states.push_back(state.map(str::to_owned));
    }

    /// Launch requests recorded so far.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.lock().launches.clone()
    }

    /// Image captures recorded so far, as `(instance_id, image_name)`.
    #[must_use]
    pub fn created_images(&self) -> Vec<(String, String)> {
        self.lock().created_images.clone()
    }

    /// Instances terminated so far.
    #[must_use]
    pub fn terminated(&self) -> Vec<String> {
        self.lock().terminated.clone()
    }

    /// Number of health-status polls observed.
    #[must_use]
    pub fn health_polls(&self) -> u32 {
        self.lock().health_polls
    }

    /// Number of wait-until-running calls observed.
    #[must_use]
    pub fn running_waits(&self) -> u32 {
        self.lock().running_waits
    }

    fn next_describe(&self) -> Vec<InstanceSummary> {
        let mut state = self.lock();
        match state.describes.len() {
            0 => Vec::new(),
            1 => state.describes.front().cloned().unwrap_or_default(),
            _ => state.describes.pop_front().unwrap_or_default(),
        }
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn instances_by_name<'a>(
        &'a self,
        _name: &'a str,
    ) -> ProviderFuture<'a, Vec<InstanceSummary>, Self::Error> {
        Box::pin(async move { Ok(self.next_describe()) })
    }

    fn launch<'a>(&'a self, spec: &'a LaunchSpec) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            self.lock().launches.push(spec.clone());
            Ok(String::from("i-fake"))
        })
    }

    fn wait_until_running<'a>(
        &'a self,
        _instance_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.lock().running_waits += 1;
            Ok(())
        })
    }

    fn health_status<'a>(
        &'a self,
        _instance_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.health_polls += 1;
            Ok(state
                .health
                .pop_front()
                .unwrap_or_else(|| Some(String::from("ok"))))
        })
    }

    fn create_image<'a>(
        &'a self,
        instance_id: &'a str,
        image_name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            self.lock()
                .created_images
                .push((instance_id.to_owned(), image_name.to_owned()));
            Ok(String::from("ami-fake"))
        })
    }

    fn image_state<'a>(
        &'a self,
        _image_id: &'a str,
    ) -> ProviderFuture<'a, Option<String>, Self::Error> {
        Box::pin(async move {
            Ok(self
                .lock()
                .image_states
                .pop_front()
                .unwrap_or_else(|| Some(String::from("available"))))
        })
    }

    fn terminate<'a>(&'a self, instance_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.lock().terminated.push(instance_id.to_owned());
            Ok(())
        })
    }
}

/// Observable transport activity, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A session was established.
    Connected {
        /// Monotonic session number, starting at 1.
        session: u32,
    },
    /// A session was dropped.
    SessionClosed {
        /// Session the event belongs to.
        session: u32,
    },
    /// A streamed command was executed.
    Exec {
        /// Session the command ran on.
        session: u32,
        /// Rendered command string.
        command: String,
    },
    /// A detached command was issued.
    DetachedExec {
        /// Session the command ran on.
        session: u32,
        /// Rendered command string.
        command: String,
    },
    /// A file-transfer sub-session was opened.
    TransferOpened {
        /// Session the sub-session belongs to.
        session: u32,
    },
    /// A file-transfer sub-session was dropped.
    TransferClosed {
        /// Session the sub-session belonged to.
        session: u32,
    },
    /// A file was uploaded.
    Put {
        /// Local source path.
        local: Utf8PathBuf,
        /// Remote destination path.
        remote: Utf8PathBuf,
    },
    /// A remote directory was created.
    Mkdir {
        /// Remote directory path.
        remote: Utf8PathBuf,
    },
}

/// One scripted response for a streamed command.
#[derive(Clone, Debug, Default)]
pub struct ExecScript {
    /// Lines written to the caller's sink.
    pub lines: Vec<String>,
    /// Exit status reported after the stream closes.
    pub exit_status: Option<i32>,
}

#[derive(Debug, Default)]
struct FakeTransportState {
    events: Vec<TransportEvent>,
    connect_errors: VecDeque<TransportError>,
    exec_scripts: VecDeque<ExecScript>,
    put_errors: VecDeque<TransportError>,
    mkdir_errors: VecDeque<TransportError>,
    next_session: u32,
}

/// Scripted transport double.
///
/// Connect attempts succeed unless an error was seeded; streamed commands
/// consume seeded [`ExecScript`]s (defaulting to no output and exit 0); put
/// and mkdir calls consume seeded errors the same way. Session and transfer
/// drops are recorded so teardown ordering can be asserted.
#[derive(Clone, Debug, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeTransport {
    /// Creates a transport with no seeded behaviour.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeTransportState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seeds a failure for the next connect attempt.
    pub fn push_connect_error(&self, error: TransportError) {
        self.lock().connect_errors.push_back(error);
    }

    /// Seeds output and exit status for the next streamed command.
    pub fn push_exec_script(&self, lines: &[&str], exit_status: Option<i32>) {
        self.lock().exec_scripts.push_back(ExecScript {
            lines: lines.iter().map(|line| (*line).to_owned()).collect(),
            exit_status,
        });
    }

    /// Seeds a failure for the next put call.
    pub fn push_put_error(&self, error: TransportError) {
        self.lock().put_errors.push_back(error);
    }

    /// Seeds a failure for the next mkdir call.
    pub fn push_mkdir_error(&self, error: TransportError) {
        self.lock().mkdir_errors.push_back(error);
    }

    /// Snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TransportEvent> {
        self.lock().events.clone()
    }
}

impl ShellTransport for FakeTransport {
    type Session = FakeSession;

    fn connect(&self, _target: &ConnectTarget) -> Result<Self::Session, TransportError> {
        let mut state = self.lock();
        if let Some(error) = state.connect_errors.pop_front() {
            return Err(error);
        }
        state.next_session += 1;
        let session = state.next_session;
        state.events.push(TransportEvent::Connected { session });
        Ok(FakeSession {
            id: session,
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handle produced by [`FakeTransport`].
#[derive(Debug)]
pub struct FakeSession {
    id: u32,
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeSession {
    fn lock(&self) -> MutexGuard<'_, FakeTransportState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ShellSession for FakeSession {
    type FileTransfer = FakeFileTransfer;

    fn exec_streamed(
        &mut self,
        command: &str,
        output: &mut dyn Write,
    ) -> Result<Option<i32>, TransportError> {
        let script = {
            let mut state = self.lock();
            state.events.push(TransportEvent::Exec {
                session: self.id,
                command: command.to_owned(),
            });
            state.exec_scripts.pop_front().unwrap_or_else(|| ExecScript {
                lines: Vec::new(),
                exit_status: Some(0),
            })
        };
        for line in &script.lines {
            writeln!(output, "{line}").ok();
        }
        Ok(script.exit_status)
    }

    fn exec_detached(&mut self, command: &str) -> Result<(), TransportError> {
        self.lock().events.push(TransportEvent::DetachedExec {
            session: self.id,
            command: command.to_owned(),
        });
        Ok(())
    }

    fn open_file_transfer(&mut self) -> Result<Self::FileTransfer, TransportError> {
        self.lock()
            .events
            .push(TransportEvent::TransferOpened { session: self.id });
        Ok(FakeFileTransfer {
            session: self.id,
            state: Arc::clone(&self.state),
        })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.lock()
            .events
            .push(TransportEvent::SessionClosed { session: self.id });
    }
}

/// File-transfer handle produced by [`FakeSession`].
#[derive(Debug)]
pub struct FakeFileTransfer {
    session: u32,
    state: Arc<Mutex<FakeTransportState>>,
}

impl FakeFileTransfer {
    fn lock(&self) -> MutexGuard<'_, FakeTransportState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl FileTransfer for FakeFileTransfer {
    fn put(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.events.push(TransportEvent::Put {
            local: local.to_path_buf(),
            remote: remote.to_path_buf(),
        });
        match state.put_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn mkdir(&mut self, remote: &Utf8Path) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.events.push(TransportEvent::Mkdir {
            remote: remote.to_path_buf(),
        });
        match state.mkdir_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for FakeFileTransfer {
    fn drop(&mut self) {
        self.lock()
            .events
            .push(TransportEvent::TransferClosed { session: self.session });
    }
}
