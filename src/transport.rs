//! Shell and file-transfer transport abstraction.
//!
//! The connection manager and the step handlers only ever see these traits;
//! the libssh2 implementation lives in [`crate::ssh`] and test doubles in
//! [`crate::test_support`]. The error taxonomy distinguishes conditions that
//! are worth retrying (socket and protocol failures while a host boots) from
//! those that are not (bad host keys, rejected credentials).

use std::io::Write;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// Endpoint and credentials for one shell connection attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Public address of the instance.
    pub host: IpAddr,
    /// TCP port the shell service listens on.
    pub port: u16,
    /// Remote user to authenticate as.
    pub username: String,
    /// Path to the private key used for authentication.
    pub private_key: Utf8PathBuf,
}

/// Errors raised by transport implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Host key negotiation failed; retrying cannot change the outcome.
    #[error("host key rejected: {message}")]
    HostKey {
        /// Diagnostic from the transport library.
        message: String,
    },
    /// Authentication was rejected; retrying cannot change the outcome.
    #[error("authentication failed for {username}: {message}")]
    Auth {
        /// User the connection was attempted as.
        username: String,
        /// Diagnostic from the transport library.
        message: String,
    },
    /// Transport protocol failure, typically while the remote service is
    /// still starting.
    #[error("transport protocol error: {message}")]
    Protocol {
        /// Diagnostic from the transport library.
        message: String,
    },
    /// Low-level socket failure, typically before the remote port is open.
    #[error("socket error: {message}")]
    Socket {
        /// Operating system diagnostic.
        message: String,
    },
    /// Remote path does not exist; raised by transfers into absent
    /// directories.
    #[error("remote path missing: {path}")]
    Missing {
        /// Remote path the operation targeted.
        path: Utf8PathBuf,
    },
    /// File transfer failure other than a missing path.
    #[error("file transfer failed for {path}: {message}")]
    Transfer {
        /// Remote path the operation targeted.
        path: Utf8PathBuf,
        /// Diagnostic from the transport library.
        message: String,
    },
    /// Local file could not be read for upload.
    #[error("local file {path} unreadable: {message}")]
    Local {
        /// Local path that failed to read.
        path: Utf8PathBuf,
        /// Operating system diagnostic.
        message: String,
    },
    /// No live shell session to run the operation on.
    #[error("no live shell session")]
    NotConnected,
}

impl TransportError {
    /// Whether the condition may clear on its own and is worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Socket { .. })
    }
}

/// Factory for shell sessions.
pub trait ShellTransport {
    /// Concrete session type produced by this transport.
    type Session: ShellSession;

    /// Opens an authenticated shell session to `target`. A single attempt;
    /// retry policy belongs to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] classified per the taxonomy above.
    fn connect(&self, target: &ConnectTarget) -> Result<Self::Session, TransportError>;
}

/// One live shell session.
pub trait ShellSession {
    /// File-transfer handle type opened from this session.
    type FileTransfer: FileTransfer;

    /// Runs `command`, streaming merged stdout/stderr line-by-line into
    /// `output`. Blocks until the remote command exits and its stream closes,
    /// then returns the remote exit status when the transport reports one.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the channel cannot be opened or the
    /// stream read fails.
    fn exec_streamed(
        &mut self,
        command: &str,
        output: &mut dyn Write,
    ) -> Result<Option<i32>, TransportError>;

    /// Issues `command` without waiting for output or exit status. Used for
    /// commands expected to sever the connection, such as a reboot.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the command cannot be issued.
    fn exec_detached(&mut self, command: &str) -> Result<(), TransportError>;

    /// Opens a file-transfer sub-session on this connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the sub-session cannot be opened.
    fn open_file_transfer(&mut self) -> Result<Self::FileTransfer, TransportError>;
}

/// One live file-transfer sub-session.
pub trait FileTransfer {
    /// Uploads the local file at `local` to `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Missing`] when an intermediate remote
    /// directory does not exist, other [`TransportError`] variants otherwise.
    fn put(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), TransportError>;

    /// Creates the remote directory `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when creation fails, including when the
    /// directory already exists; callers decide whether that matters.
    fn mkdir(&mut self, remote: &Utf8Path) -> Result<(), TransportError>;
}
