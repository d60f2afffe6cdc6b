// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Windows Authenticode signing.

use crate::{
    config::SigningType,
    error::CommandError,
    session::{RemoteSession, Transport},
};

use super::SigningOutcome;

// TODO: copy the signing script to the Windows host and run it against the pulled artifacts.
pub(super) fn sign<T: Transport>(
    session: &mut RemoteSession<T>,
) -> Result<SigningOutcome, CommandError> {
    tracing::warn!(
        host = session.host(),
        "Windows signing is not implemented; no artifacts were signed"
    );
    Ok(SigningOutcome::NotImplemented(SigningType::Windows))
}
