// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! GPG-signed checksum files.

use crate::{
    config::SigningType,
    error::CommandError,
    session::{RemoteSession, Transport},
};

use super::SigningOutcome;

// TODO: write a checksum file for the pulled artifacts and produce a detached signature for it.
pub(super) fn sign<T: Transport>(
    session: &mut RemoteSession<T>,
) -> Result<SigningOutcome, CommandError> {
    tracing::warn!(
        host = session.host(),
        "GPG signing is not implemented; no checksum files were created"
    );
    Ok(SigningOutcome::NotImplemented(SigningType::Gpg))
}
