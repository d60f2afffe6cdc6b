// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Error types for configuration, remote sessions, and signing runs.

use std::path::PathBuf;

use crate::config::SigningType;

/// Errors that occur while loading or validating the configuration.
///
/// None of these are worth retrying without first changing the configuration file or the
/// command-line arguments.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The signing type is not one of the supported types.
    ///
    /// This is checked before any field in the configuration is examined.
    #[error("unknown signing type '{0}'; expected one of: mac, windows, gpg")]
    UnknownSigningType(String),

    /// One or more required fields are absent.
    ///
    /// Every missing field is listed, in the order the required set is assembled, so an operator
    /// can fix the configuration in one pass.
    #[error(
        "the following required fields are missing in the configuration file: {}",
        .0.join(", ")
    )]
    MissingFields(Vec<String>),

    /// The `ssh_config` table has no entry for the requested signing type.
    #[error("SSH configuration for {0} is missing")]
    MissingSessionBlock(SigningType),

    /// The configuration file could not be read.
    #[error("failed to read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not well-formed TOML or JSON, or its top level is not a table.
    #[error("configuration file is invalid: {0}")]
    Parse(String),

    /// All required fields are present, but at least one of them has the wrong type.
    #[error("configuration is invalid: {0}")]
    Invalid(String),
}

/// Errors that occur while opening a remote session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The TCP connection to the host could not be established.
    ///
    /// This is likely a temporary networking issue, although it may be because the configured
    /// host or port is incorrect, in which case retrying will never succeed.
    #[error("failed to connect to {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The SSH handshake failed, or the host key could not be verified.
    #[error("SSH handshake with {host} failed: {reason}")]
    Handshake { host: String, reason: String },

    /// The host rejected the configured user and password.
    ///
    /// Retrying will not help.
    #[error("authentication failed when connecting to {host} as {user}")]
    Authentication { host: String, user: String },
}

/// Errors that occur while running a command in an open remote session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The command could not be started, or its output could not be read.
    ///
    /// This usually means the connection dropped mid-command. The command is not retried; the
    /// whole signing run must be started again.
    #[error("remote command failed at the transport level: {0}")]
    Transport(String),

    /// The remote process exited with a non-zero status.
    ///
    /// The message names the workflow step, never the command text, since the command may
    /// include credentials.
    #[error("remote step '{step}' exited with status {status}")]
    ExitStatus { step: &'static str, status: i32 },

    /// The session was already closed.
    #[error("the remote session is closed")]
    Closed,
}

/// Errors that occur when structured data is expected in command output but not found.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExtractionError {
    /// The registry client's push output contained no `Digest:` line.
    ///
    /// The push may or may not have happened; either way there is no record of what was
    /// signed, so the run cannot be reported as successful.
    #[error("no line beginning with 'Digest:' found in the push output")]
    DigestNotFound,
}

/// Errors [`crate::transfer::push`] may return.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PushError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

/// Errors a signing run may return.
///
/// The run is all-or-nothing: there is no partial success to report alongside any of these.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WorkflowError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Push(#[from] PushError),
}
