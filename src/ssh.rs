//! libssh2 implementation of the shell transport.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use camino::Utf8Path;
use ssh2::{ErrorCode, ExtendedData, Session, Sftp};

use crate::transport::{
    ConnectTarget, FileTransfer, ShellSession, ShellTransport, TransportError,
};

// libssh2 session error codes used for triage.
const ERR_KEX_FAILURE: i32 = -5;
const ERR_PUBLICKEY_UNVERIFIED: i32 = -16;
const ERR_AUTHENTICATION_FAILED: i32 = -18;
const ERR_HOSTKEY_INIT: i32 = -34;
const ERR_HOSTKEY_SIGN: i32 = -35;

// SFTP status codes signalling an absent remote path.
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_NO_SUCH_PATH: i32 = 10;

/// Transport backed by libssh2 over a plain TCP stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ssh2Transport;

impl Ssh2Transport {
    /// Creates the transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn classify_session_error(username: &str, err: &ssh2::Error) -> TransportError {
    match err.code() {
        ErrorCode::Session(ERR_AUTHENTICATION_FAILED | ERR_PUBLICKEY_UNVERIFIED) => {
            TransportError::Auth {
                username: username.to_owned(),
                message: err.to_string(),
            }
        }
        ErrorCode::Session(ERR_KEX_FAILURE | ERR_HOSTKEY_INIT | ERR_HOSTKEY_SIGN) => {
            TransportError::HostKey {
                message: err.to_string(),
            }
        }
        _ => TransportError::Protocol {
            message: err.to_string(),
        },
    }
}

fn protocol_error(err: &ssh2::Error) -> TransportError {
    TransportError::Protocol {
        message: err.to_string(),
    }
}

impl ShellTransport for Ssh2Transport {
    type Session = Ssh2Session;

    fn connect(&self, target: &ConnectTarget) -> Result<Self::Session, TransportError> {
        let tcp = TcpStream::connect((target.host, target.port)).map_err(|err| {
            TransportError::Socket {
                message: err.to_string(),
            }
        })?;

        let mut session = Session::new().map_err(|err| protocol_error(&err))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|err| classify_session_error(&target.username, &err))?;
        session
            .userauth_pubkey_file(
                &target.username,
                None,
                target.private_key.as_std_path(),
                None,
            )
            .map_err(|err| classify_session_error(&target.username, &err))?;

        if !session.authenticated() {
            return Err(TransportError::Auth {
                username: target.username.clone(),
                message: String::from("session not authenticated after key exchange"),
            });
        }

        tracing::debug!(host = %target.host, user = %target.username, "shell session established");
        Ok(Ssh2Session { session })
    }
}

/// Live libssh2 session.
pub struct Ssh2Session {
    session: Session,
}

impl ShellSession for Ssh2Session {
    type FileTransfer = Ssh2FileTransfer;

    fn exec_streamed(
        &mut self,
        command: &str,
        output: &mut dyn Write,
    ) -> Result<Option<i32>, TransportError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| protocol_error(&err))?;
        channel
            .handle_extended_data(ExtendedData::Merge)
            .map_err(|err| protocol_error(&err))?;
        channel.exec(command).map_err(|err| protocol_error(&err))?;

        {
            let reader = BufReader::new(&mut channel);
            for line in reader.lines() {
                let line = line.map_err(|err| TransportError::Socket {
                    message: err.to_string(),
                })?;
                writeln!(output, "{line}").ok();
            }
        }

        channel.wait_close().ok();
        Ok(channel.exit_status().ok())
    }

    fn exec_detached(&mut self, command: &str) -> Result<(), TransportError> {
        let mut channel = self
            .session
            .channel_session()
            .map_err(|err| protocol_error(&err))?;
        channel.exec(command).map_err(|err| protocol_error(&err))?;
        // The remote end may sever the connection at any point from here on.
        channel.send_eof().ok();
        channel.close().ok();
        Ok(())
    }

    fn open_file_transfer(&mut self) -> Result<Self::FileTransfer, TransportError> {
        let sftp = self.session.sftp().map_err(|err| protocol_error(&err))?;
        Ok(Ssh2FileTransfer { sftp })
    }
}

/// SFTP sub-session opened from a live shell session.
pub struct Ssh2FileTransfer {
    sftp: Sftp,
}

impl FileTransfer for Ssh2FileTransfer {
    fn put(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), TransportError> {
        let bytes = std::fs::read(local).map_err(|err| TransportError::Local {
            path: local.to_owned(),
            message: err.to_string(),
        })?;

        let mut file = self
            .sftp
            .create(remote.as_std_path())
            .map_err(|err| classify_sftp_error(remote, &err))?;
        file.write_all(&bytes)
            .map_err(|err| TransportError::Transfer {
                path: remote.to_owned(),
                message: err.to_string(),
            })?;
        Ok(())
    }

    fn mkdir(&mut self, remote: &Utf8Path) -> Result<(), TransportError> {
        self.sftp
            .mkdir(remote.as_std_path(), 0o755)
            .map_err(|err| classify_sftp_error(remote, &err))
    }
}

fn classify_sftp_error(remote: &Utf8Path, err: &ssh2::Error) -> TransportError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE | SFTP_NO_SUCH_PATH) => TransportError::Missing {
            path: remote.to_owned(),
        },
        _ => TransportError::Transfer {
            path: remote.to_owned(),
            message: err.to_string(),
        },
    }
}
