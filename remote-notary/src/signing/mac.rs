// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Signing and notarizing macOS application bundles with codesign and altool.

use crate::{
    config::MacConfig,
    error::CommandError,
    session::{escape_path, shell_escape, RemoteSession, Transport},
    transfer::{SIGNED_DIRECTORY, STALE_ARTIFACTS},
};

use super::SigningOutcome;

/// The archive submitted for notarization, created in the working directory.
const NOTARIZATION_ARCHIVE: &str = "app.zip";

pub(super) fn sign<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &MacConfig,
) -> Result<SigningOutcome, CommandError> {
    tracing::info!(
        vm = config.mac_vm_ip,
        vm_user = config.mac_vm_user,
        identity = config.signing_identity,
        "Signing macOS application bundles"
    );
    session.redact(&config.mac_vm_password);
    session.redact(&config.keychain_password);
    session.redact(&config.notarization_password);

    run_sequence(session, config).inspect_err(|error| {
        tracing::error!(%error, "An error occurred during the Mac signing process");
    })?;

    Ok(SigningOutcome::Signed)
}

fn run_sequence<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &MacConfig,
) -> Result<(), CommandError> {
    unlock_keychain(session, config)?;
    sign_binaries(session, config)?;
    archive_binaries(session)?;
    notarize_binaries(session, config)?;
    stage_binaries(session)
}

fn unlock_keychain<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &MacConfig,
) -> Result<(), CommandError> {
    session
        .run(
            &format!(
                "security unlock-keychain -p {} login.keychain",
                shell_escape(config.keychain_password.expose())
            ),
            true,
        )?
        .ensure_success("unlock keychain")?;
    Ok(())
}

fn sign_binaries<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &MacConfig,
) -> Result<(), CommandError> {
    session
        .run(
            &format!(
                "codesign --force --options runtime --sign {} *.app",
                shell_escape(&config.signing_identity)
            ),
            false,
        )?
        .ensure_success("sign")?;
    Ok(())
}

// Symlinks inside the bundles must survive, hence -y.
fn archive_binaries<T: Transport>(session: &mut RemoteSession<T>) -> Result<(), CommandError> {
    session
        .run(
            &format!("rm -f {NOTARIZATION_ARCHIVE} && zip -qry {NOTARIZATION_ARCHIVE} *.app"),
            false,
        )?
        .ensure_success("archive for notarization")?;
    Ok(())
}

fn notarize_binaries<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &MacConfig,
) -> Result<(), CommandError> {
    session
        .run(
            &format!(
                "xcrun altool --notarize-app --primary-bundle-id {} --username {} --password {} --file {NOTARIZATION_ARCHIVE}",
                shell_escape(&config.notarization_bundle_id),
                shell_escape(&config.notarization_username),
                shell_escape(config.notarization_password.expose()),
            ),
            true,
        )?
        .ensure_success("notarize")?;
    tracing::info!(
        bundle_id = config.notarization_bundle_id,
        "Submitted archive for notarization"
    );
    Ok(())
}

// Everything in the signed directory gets pushed, so it must hold only this run's bundles.
fn stage_binaries<T: Transport>(session: &mut RemoteSession<T>) -> Result<(), CommandError> {
    let signed = escape_path(SIGNED_DIRECTORY);
    session
        .run(
            &format!("rm -rf {signed} && mkdir -p {signed} && cp -R *.app {signed}/"),
            false,
        )?
        .ensure_success("stage signed artifacts")?;
    Ok(())
}

pub(super) fn remove_binaries<T: Transport>(
    session: &mut RemoteSession<T>,
) -> Result<(), CommandError> {
    session
        .run(
            &format!(
                "rm -rf {STALE_ARTIFACTS} {}",
                escape_path(SIGNED_DIRECTORY)
            ),
            false,
        )?
        .ensure_success("remove binaries")?;
    Ok(())
}
