// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Utilities for testing remote-notary: a scripted signing host and configuration fixtures.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use remote_notary::{
    config::{self, RawConfig, SessionCredentials, SigningConfig},
    error::{CommandError, ConnectionError},
    session::{CommandOutput, Connector, Transport},
    transfer::ContentDigest,
};

pub mod secrets {
    //! Secret values used in the fixture configuration; tests assert these never reach logs.
    pub const REGISTRY_PASSWORD: &str = "registry-pw-7f3a9c";
    pub const SSH_PASSWORD: &str = "ssh-pw-51d0e2";
    pub const MAC_VM_PASSWORD: &str = "vm-pw-c8b4a1";
    pub const KEYCHAIN_PASSWORD: &str = "keychain-pw-0e6d3b";
    pub const NOTARIZATION_PASSWORD: &str = "notary-pw-9a2f7e";

    pub const ALL: [&str; 5] = [
        REGISTRY_PASSWORD,
        SSH_PASSWORD,
        MAC_VM_PASSWORD,
        KEYCHAIN_PASSWORD,
        NOTARIZATION_PASSWORD,
    ];
}

pub const UNSIGNED_DIGEST: &str = "sha256:0ddba11";
pub const SIGNED_DIGEST: &str = "sha256:5ca1ab1e";
pub const SIGNING_IDENTITY: &str = "Developer ID Application: Example Corp (ABCDE12345)";

/// A configuration valid for every signing type.
pub fn config_toml() -> String {
    format!(
        r#"registry_repository = "quay.io/example/artifacts"
registry_username = "example+signer"
registry_password = "{registry}"
staging_directory = "/Users/signer/unsigned"

mac_vm_ip = "192.0.2.10"
mac_vm_user = "signer"
mac_vm_password = "{vm}"
keychain_password = "{keychain}"
signing_identity = "{identity}"
notarization_username = "notary@example.com"
notarization_password = "{notary}"

[ssh_config.mac]
host = "127.0.0.1"
port = 1
user = "signer"
password = "{ssh}"

[ssh_config.windows]
host = "127.0.0.1"
port = 1
user = "signer"
password = "{ssh}"

[ssh_config.gpg]
host = "127.0.0.1"
port = 1
user = "signer"
password = "{ssh}"
"#,
        registry = secrets::REGISTRY_PASSWORD,
        vm = secrets::MAC_VM_PASSWORD,
        keychain = secrets::KEYCHAIN_PASSWORD,
        identity = SIGNING_IDENTITY,
        notary = secrets::NOTARIZATION_PASSWORD,
        ssh = secrets::SSH_PASSWORD,
    )
}

/// The fixture configuration as a raw mapping, before validation.
pub fn raw_config() -> RawConfig {
    let (_dir, path) =
        write_config("config.toml", &config_toml()).expect("failed to write the fixture");
    config::load_raw(&path).expect("the fixture configuration is valid")
}

/// The fixture configuration validated for `signing_type`, with the unsigned digest attached.
pub fn signing_config(signing_type: &str) -> SigningConfig {
    config::validate(raw_config(), signing_type)
        .expect("the fixture configuration is valid for every signing type")
        .with_unsigned_digest(ContentDigest::new(UNSIGNED_DIGEST))
}

/// Write `contents` to a configuration file in a new temporary directory.
///
/// The directory is removed when the returned [`tempfile::TempDir`] is dropped.
pub fn write_config(file_name: &str, contents: &str) -> anyhow::Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(file_name);
    std::fs::write(&path, contents)?;
    Ok((dir, path))
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    Disconnect,
}

#[derive(Debug, Default)]
struct HostState {
    commands: Vec<String>,
    replies: Vec<(String, Reply)>,
    reject_authentication: bool,
    connections: usize,
    closes: usize,
}

/// A scripted signing host.
///
/// Every command the host receives is recorded. A command gets the reply of the first
/// registered pattern it contains, or empty output with exit status 0 if none match. Clones
/// share the same host.
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host whose `oras push` reports [`SIGNED_DIGEST`].
    pub fn with_push_digest() -> Self {
        let host = Self::new();
        host.respond(
            "oras push",
            CommandOutput::new(
                format!(
                    "Uploading 8c2e1d app.app\nUploaded  8c2e1d app.app\nPushed [registry] quay.io/example/artifacts\nDigest: {SIGNED_DIGEST}"
                ),
                "",
            )
            .with_status(0),
        );
        host
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().expect("mock host state lock poisoned")
    }

    /// Reply with `output` to commands containing `pattern`.
    pub fn respond(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.state()
            .replies
            .push((pattern.to_string(), Reply::Output(output)));
        self
    }

    /// Drop the connection when a command contains `pattern`.
    pub fn disconnect_on(&self, pattern: &str) -> &Self {
        self.state()
            .replies
            .push((pattern.to_string(), Reply::Disconnect));
        self
    }

    /// Reject every connection attempt's credentials.
    pub fn reject_authentication(&self) -> &Self {
        self.state().reject_authentication = true;
        self
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector { host: self.clone() }
    }

    /// Every command received, in order, exactly as the host saw it.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// The index of the first received command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.state()
            .commands
            .iter()
            .position(|command| command.contains(pattern))
    }

    pub fn received(&self, pattern: &str) -> bool {
        self.position(pattern).is_some()
    }

    pub fn connections(&self) -> usize {
        self.state().connections
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

/// Connects to a [`MockHost`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    host: MockHost,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, credentials: &SessionCredentials) -> Result<MockTransport, ConnectionError> {
        let mut state = self.host.state();
        if state.reject_authentication {
            return Err(ConnectionError::Authentication {
                host: credentials.host.clone(),
                user: credentials.user.clone(),
            });
        }
        state.connections += 1;
        Ok(MockTransport {
            host: self.host.clone(),
        })
    }
}

/// An open connection to a [`MockHost`].
#[derive(Debug)]
pub struct MockTransport {
    host: MockHost,
}

impl Transport for MockTransport {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, CommandError> {
        let mut state = self.host.state();
        state.commands.push(command.to_string());
        let reply = state
            .replies
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());
        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Disconnect) => Err(CommandError::Transport(
                "connection reset by peer".to_string(),
            )),
            None => Ok(CommandOutput::default().with_status(0)),
        }
    }

    fn close(&mut self) -> Result<(), CommandError> {
        self.host.state().closes += 1;
        Ok(())
    }
}
