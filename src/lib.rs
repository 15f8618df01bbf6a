//! Core library for the `sysup` single-instance provisioner.
//!
//! One declarative document describes one logical system; the crate brings
//! the matching compute instance up, waits for it to become reachable over a
//! shell, and executes the document's ordered configuration steps against the
//! live connection. Terminate, report, snapshot, and interactive-shell
//! operations round out the lifecycle.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod document;
pub mod ec2;
pub mod executor;
pub mod lifecycle;
pub mod locator;
pub mod provider;
pub mod replicate;
pub mod ssh;
pub mod test_support;
pub mod transport;

pub use config::{AppConfig, AppConfigError};
pub use connection::{ConnectTiming, ConnectionError, ConnectionManager, Credentials};
pub use dispatch::{StepDispatcher, StepError};
pub use document::{
    ConnectionSettings, CopySpec, Document, DocumentError, ShellCommand, Step, Tag, WaitPolicy,
};
pub use ec2::{Ec2Error, Ec2Provider};
pub use executor::{CommandReport, render_remote_command};
pub use lifecycle::{
    BringUpOutcome, LifecycleController, LifecycleError, LifecycleTiming, SshInvocation,
};
pub use locator::InstanceLocator;
pub use provider::{BlockDeviceSpec, InstanceSummary, LaunchSpec, Provider, ProviderFuture};
pub use replicate::ReplicateError;
pub use ssh::Ssh2Transport;
pub use transport::{
    ConnectTarget, FileTransfer, ShellSession, ShellTransport, TransportError,
};
