// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The SSH [`Connector`] and [`Transport`] used against real signing hosts.

use std::{
    io::{self, Read},
    net::TcpStream,
    thread,
    time::{Duration, Instant},
};

use ssh2::{Channel, CheckResult, KnownHostFileKind, Session};

use crate::{
    config::SessionCredentials,
    error::{CommandError, ConnectionError},
    session::{CommandOutput, Connector, Transport},
};

/// Opens password-authenticated SSH sessions.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    timeout: Option<Duration>,
}

impl SshConnector {
    /// Create a connector whose sessions give up on any blocking operation after `timeout`.
    ///
    /// With no timeout, a hung remote command blocks forever.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Connector for SshConnector {
    type Transport = SshTransport;

    fn connect(&self, credentials: &SessionCredentials) -> Result<SshTransport, ConnectionError> {
        let host = credentials.host.clone();
        let handshake_error = |error: ssh2::Error| ConnectionError::Handshake {
            host: host.clone(),
            reason: error.message().to_string(),
        };

        let tcp = TcpStream::connect((credentials.host.as_str(), credentials.port)).map_err(
            |source| ConnectionError::Io {
                host: host.clone(),
                source,
            },
        )?;
        tracing::debug!(peer = ?tcp.peer_addr().ok(), "TCP connection established");

        let mut session = Session::new().map_err(handshake_error)?;
        if let Some(timeout) = self.timeout {
            session.set_timeout(timeout.as_millis().try_into().unwrap_or(u32::MAX));
        }
        session.set_tcp_stream(tcp);
        session.handshake().map_err(handshake_error)?;

        if let Some(known_hosts) = &credentials.known_hosts {
            let (key, _) = session.host_key().ok_or_else(|| ConnectionError::Handshake {
                host: host.clone(),
                reason: "the server presented no host key".to_string(),
            })?;
            let mut hosts = session.known_hosts().map_err(handshake_error)?;
            hosts
                .read_file(known_hosts, KnownHostFileKind::OpenSSH)
                .map_err(handshake_error)?;
            let result = hosts.check_port(&credentials.host, credentials.port, key);
            if let Some(failure) = host_key_failure(result) {
                return Err(ConnectionError::Handshake {
                    host: host.clone(),
                    reason: format!("{failure} in {}", known_hosts.display()),
                });
            }
            tracing::debug!("Host key verified");
        } else {
            tracing::warn!(
                host = credentials.host,
                "No known_hosts file configured; the host key is not verified"
            );
        }

        let authentication_error = || ConnectionError::Authentication {
            host: credentials.host.clone(),
            user: credentials.user.clone(),
        };
        session
            .userauth_password(&credentials.user, credentials.password.expose())
            .map_err(|_| authentication_error())?;
        if !session.authenticated() {
            return Err(authentication_error());
        }

        Ok(SshTransport {
            session,
            timeout: self.timeout,
        })
    }
}

/// Why a known_hosts check failed, or `None` if the host key matched.
fn host_key_failure(result: CheckResult) -> Option<&'static str> {
    match result {
        CheckResult::Match => None,
        CheckResult::Mismatch => Some("the host key does not match"),
        CheckResult::NotFound => Some("the host is not listed"),
        CheckResult::Failure => Some("the host key could not be checked"),
    }
}

/// An authenticated SSH session. Each command runs on its own channel.
pub struct SshTransport {
    session: Session,
    timeout: Option<Duration>,
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn transport_error(error: impl std::fmt::Display) -> CommandError {
    CommandError::Transport(error.to_string())
}

impl Transport for SshTransport {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, CommandError> {
        let mut channel = self.session.channel_session().map_err(transport_error)?;
        channel.exec(command).map_err(transport_error)?;

        // Standard output and standard error share the channel window, so a command that fills
        // one while the other is being read to the end would stall. Read both as data arrives.
        self.session.set_blocking(false);
        let streams = read_streams(&channel, self.timeout);
        self.session.set_blocking(true);
        let (stdout, stderr) = streams?;

        channel.wait_close().map_err(transport_error)?;
        let status = channel.exit_status().map_err(transport_error)?;

        Ok(
            CommandOutput::new(String::from_utf8_lossy(&stdout), String::from_utf8_lossy(&stderr))
                .with_status(status),
        )
    }

    fn close(&mut self) -> Result<(), CommandError> {
        self.session
            .disconnect(None, "signing run complete", None)
            .map_err(transport_error)
    }
}

/// Read standard output and standard error of a non-blocking channel until the remote end
/// closes them.
fn read_streams(
    channel: &Channel,
    timeout: Option<Duration>,
) -> Result<(Vec<u8>, Vec<u8>), CommandError> {
    let started = Instant::now();
    let mut stdout_stream = channel.stream(0);
    let mut stderr_stream = channel.stderr();
    let (mut stdout, mut stderr) = (vec![], vec![]);

    loop {
        let read = read_available(&mut stdout_stream, &mut stdout).map_err(transport_error)?
            + read_available(&mut stderr_stream, &mut stderr).map_err(transport_error)?;
        if read > 0 {
            continue;
        }
        if channel.eof() {
            return Ok((stdout, stderr));
        }
        if timeout.is_some_and(|timeout| started.elapsed() > timeout) {
            return Err(CommandError::Transport(
                "timed out waiting for command output".to_string(),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Append whatever `reader` has ready to `buffer` and return how many bytes that was.
///
/// Stops at end of stream or when the reader would block.
fn read_available(reader: &mut impl Read, buffer: &mut Vec<u8>) -> io::Result<usize> {
    let mut chunk = [0; 16 * 1024];
    let mut total = 0;
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(total),
            Ok(read) => {
                buffer.extend_from_slice(&chunk[..read]);
                total += read;
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}
