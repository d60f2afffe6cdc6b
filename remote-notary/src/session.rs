// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Remote sessions on signing hosts.
//!
//! A [`RemoteSession`] owns a single connection to one host for the duration of a signing run.
//! The connection is closed exactly once: either explicitly with [`RemoteSession::close`], at the
//! end of [`RemoteSession::scoped`], or when the session is dropped.
//!
//! Every command runs in a fresh remote process, so state that should last for the session
//! (exported environment values and the working directory) is kept here and prepended to each
//! command. That prefix routinely contains credentials and is never logged.

use std::{borrow::Cow, fmt::Write};

use tracing::instrument;

use crate::{
    config::{Secret, SessionCredentials},
    error::{CommandError, ConnectionError},
};

const REDACTED: &str = "[redacted]";

/// The outcome of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, decoded and trimmed.
    pub stdout: String,
    /// Standard error, decoded and trimmed.
    pub stderr: String,
    /// The remote process's exit status, if the transport reports one.
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn new(stdout: impl AsRef<str>, stderr: impl AsRef<str>) -> Self {
        Self {
            stdout: stdout.as_ref().trim().to_string(),
            stderr: stderr.as_ref().trim().to_string(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    /// Fail if the transport reported a non-zero exit status.
    ///
    /// `step` names the operation in the error; it must not contain the command text.
    pub fn ensure_success(self, step: &'static str) -> Result<Self, CommandError> {
        match self.status {
            Some(status) if status != 0 => Err(CommandError::ExitStatus { step, status }),
            _ => Ok(self),
        }
    }

    /// Lines of standard output followed by lines of standard error.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// Runs commands on a connected remote host.
pub trait Transport {
    /// Run `command` and block until it exits and its output has been read.
    fn exec(&mut self, command: &str) -> Result<CommandOutput, CommandError>;

    /// Release the connection. [`RemoteSession`] calls this at most once.
    fn close(&mut self) -> Result<(), CommandError>;
}

/// Opens connections to remote hosts.
pub trait Connector {
    type Transport: Transport;

    fn connect(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<Self::Transport, ConnectionError>;
}

/// Replaces known secret values in text before it is logged.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    secrets: Vec<Secret>,
}

impl Redactor {
    /// Register a value to redact. Empty values are ignored.
    pub fn add(&mut self, secret: &Secret) {
        if secret.expose().is_empty() || self.secrets.contains(secret) {
            return;
        }
        self.secrets.push(secret.clone());
        // Longest first, so a secret containing another secret is replaced whole.
        self.secrets
            .sort_by_key(|secret| std::cmp::Reverse(secret.expose().len()));
    }

    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut text = Cow::Borrowed(text);
        for secret in &self.secrets {
            if text.contains(secret.expose()) {
                text = Cow::Owned(text.replace(secret.expose(), REDACTED));
            }
        }
        text
    }
}

/// Quote a string for a POSIX shell, leaving it bare when that is unambiguous.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars().all(|c| {
        c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%' | ':' | '+' | '=')
    }) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Quote a remote path, keeping a leading `~/` outside the quotes so it still expands.
pub fn escape_path(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some("") => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_escape(rest)),
        None if path == "~" => path.to_string(),
        None => shell_escape(path),
    }
}

/// A connection to a single remote host.
pub struct RemoteSession<T: Transport> {
    transport: T,
    host: String,
    environment: Vec<(String, String)>,
    working_directory: Option<String>,
    redactor: Redactor,
    closed: bool,
}

impl<T: Transport> RemoteSession<T> {
    /// Connect to the host named in `credentials`.
    ///
    /// The session password is registered for redaction.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if the host can't be reached or rejects the credentials.
    #[instrument(skip_all, err, fields(host = %credentials.host, user = %credentials.user))]
    pub fn open<C>(connector: &C, credentials: &SessionCredentials) -> Result<Self, ConnectionError>
    where
        C: Connector<Transport = T>,
    {
        tracing::info!(port = credentials.port, "Connecting to signing host");
        let transport = connector.connect(credentials)?;
        tracing::info!("Successfully connected to signing host");

        let mut session = Self::new(transport, credentials.host.clone());
        session.redact(&credentials.password);
        Ok(session)
    }

    /// Wrap an already connected transport.
    pub fn new(transport: T, host: impl Into<String>) -> Self {
        Self {
            transport,
            host: host.into(),
            environment: vec![],
            working_directory: None,
            redactor: Redactor::default(),
            closed: false,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Never log `secret`, even in the output of non-sensitive commands.
    pub fn redact(&mut self, secret: &Secret) {
        self.redactor.add(secret);
    }

    /// Export `name` for every subsequent command in this session.
    pub fn set_env(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .environment
            .iter_mut()
            .find(|(existing, _)| existing == name)
        {
            Some((_, existing)) => *existing = value,
            None => self.environment.push((name.to_string(), value)),
        }
    }

    /// Export a secret `name` for every subsequent command and redact it from all logs.
    pub fn set_secret_env(&mut self, name: &str, value: Secret) {
        self.redactor.add(&value);
        self.set_env(name, value.expose());
    }

    /// Run every subsequent command in `directory`.
    pub fn set_working_directory(&mut self, directory: &str) {
        tracing::debug!(directory, "Changing working directory");
        self.working_directory = Some(directory.to_string());
    }

    /// Run a command and wait for it to complete.
    ///
    /// Unless `sensitive` is set, the command is logged before it runs and any output is logged
    /// afterwards, with registered secrets redacted. Sensitive commands log neither their text
    /// nor their output.
    ///
    /// A non-zero exit status is not an error here; see [`CommandOutput::ensure_success`].
    ///
    /// # Errors
    ///
    /// Transport failures are returned as-is; nothing is retried.
    pub fn run(&mut self, command: &str, sensitive: bool) -> Result<CommandOutput, CommandError> {
        if self.closed {
            return Err(CommandError::Closed);
        }

        if sensitive {
            tracing::debug!(host = self.host, "Running sensitive command");
        } else {
            tracing::info!(
                host = self.host,
                command = %self.redactor.redact(command),
                "Running command"
            );
        }

        let rendered = self.render(command);
        let output = self.transport.exec(&rendered).inspect_err(|error| {
            tracing::error!(
                host = self.host,
                error = %self.redactor.redact(&error.to_string()),
                "Remote command failed"
            );
        })?;

        if !sensitive {
            if !output.stdout.is_empty() {
                tracing::info!(stdout = %self.redactor.redact(&output.stdout), "Command output");
            }
            if !output.stderr.is_empty() {
                tracing::warn!(stderr = %self.redactor.redact(&output.stderr), "Command error output");
            }
        }
        tracing::debug!(status = ?output.status, "Command finished");

        Ok(output)
    }

    fn render(&self, command: &str) -> String {
        let mut rendered = String::new();
        if !self.environment.is_empty() {
            rendered.push_str("export");
            for (name, value) in &self.environment {
                let _ = write!(rendered, " {name}={}", shell_escape(value));
            }
            rendered.push_str(" && ");
        }
        if let Some(directory) = &self.working_directory {
            let _ = write!(rendered, "cd {} && ", escape_path(directory));
        }
        rendered.push_str(command);
        rendered
    }

    /// Close the connection. Calling this more than once has no further effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.transport.close() {
            Ok(()) => tracing::info!(host = self.host, "Connection closed"),
            Err(error) => {
                tracing::warn!(host = self.host, %error, "Connection did not close cleanly")
            }
        }
    }

    /// Run `f` with this session and close the session afterwards, whatever `f` returns.
    pub fn scoped<R, E, F>(mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Self) -> Result<R, E>,
    {
        let result = f(&mut self);
        self.close();
        result
    }
}

impl<T: Transport> Drop for RemoteSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}
