// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Signing steps for each [`SigningType`].
//!
//! Each signing type runs a fixed sequence of remote commands in the session's working
//! directory, which holds the pulled artifacts. The first failing command aborts the sequence.

use tracing::instrument;

use crate::{
    config::{SigningConfig, SigningType, Variant},
    error::CommandError,
    session::{RemoteSession, Transport},
};

mod gpg;
mod mac;
mod windows;

/// What a signing sequence accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum SigningOutcome {
    /// Signed artifacts are staged in [`crate::transfer::SIGNED_DIRECTORY`] and ready to push.
    Signed,
    /// The signing type is accepted, but signing it is not implemented yet. Nothing was signed
    /// and nothing should be pushed.
    NotImplemented(SigningType),
}

/// Whether [`dispatch`] signs anything for `signing_type`.
///
/// Artifacts are only pulled for signing types that are implemented, since nothing would
/// sign or remove them otherwise.
pub fn is_implemented(signing_type: SigningType) -> bool {
    match signing_type {
        SigningType::Mac => true,
        SigningType::Windows | SigningType::Gpg => false,
    }
}

/// Run the signing sequence for the configured signing type.
///
/// # Errors
///
/// The first failing command's error is returned unchanged after it has been logged.
#[instrument(skip_all, err, fields(signing_type = %config.signing_type()))]
pub fn dispatch<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &SigningConfig,
) -> Result<SigningOutcome, CommandError> {
    match config.variant() {
        Variant::Mac(mac) => mac::sign(session, mac),
        Variant::Windows => windows::sign(session),
        Variant::Gpg => gpg::sign(session),
    }
}

/// Remove artifacts the signing sequence left on the signing host.
///
/// This runs after the signed artifacts have been pushed, or after a failed run.
#[instrument(skip_all, err, fields(signing_type = %config.signing_type()))]
pub fn cleanup<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &SigningConfig,
) -> Result<(), CommandError> {
    match config.variant() {
        Variant::Mac(_) => mac::remove_binaries(session),
        Variant::Windows | Variant::Gpg => Ok(()),
    }
}
