// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! A complete signing run: pull, sign, push, clean up.

use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::{SigningConfig, SigningType},
    error::{ConfigError, WorkflowError},
    session::{Connector, RemoteSession, Transport},
    signing::{self, SigningOutcome},
    transfer::{self, ContentDigest, SIGNED_DIRECTORY},
};

/// The result of a successful signing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// The signed artifacts were pushed; `digest` addresses them in the registry.
    Signed { digest: ContentDigest },
    /// The signing type isn't implemented, so nothing was signed or pushed.
    NotImplemented { signing_type: SigningType },
}

/// Sign the artifacts at the configuration's unsigned digest.
///
/// One session is opened to the signing host and it is closed before this returns, whether or
/// not the run succeeds. Once the unsigned artifacts are pulled, the signing type's cleanup
/// runs after the push, or after the failure that ended the run. Nothing is pulled for signing
/// types that aren't implemented.
///
/// # Errors
///
/// Any configuration, connection, command, or push error ends the run.
#[instrument(
    skip_all,
    err,
    fields(run_id = %Uuid::now_v7(), signing_type = %config.signing_type())
)]
pub fn run<C: Connector>(
    config: &SigningConfig,
    connector: &C,
) -> Result<RunReport, WorkflowError> {
    let unsigned_digest = config
        .unsigned_digest()
        .ok_or_else(|| ConfigError::MissingFields(vec!["unsigned_digest".to_string()]))?;

    let mut session = RemoteSession::open(connector, config.session())?;
    for secret in config.secrets() {
        session.redact(secret);
    }

    session.scoped(|session| -> Result<RunReport, WorkflowError> {
        if !signing::is_implemented(config.signing_type()) {
            return sign_and_push(session, config);
        }

        tracing::info!("Pulling unsigned binaries...");
        transfer::pull(session, config.registry(), unsigned_digest)?;

        let signed = sign_and_push(session, config);
        let cleaned = signing::cleanup(session, config);
        match (signed, cleaned) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), cleaned) => {
                if let Err(cleanup_error) = cleaned {
                    tracing::warn!(error = %cleanup_error, "Cleanup after the failed run also failed");
                }
                Err(error)
            }
        }
    })
}

fn sign_and_push<T: Transport>(
    session: &mut RemoteSession<T>,
    config: &SigningConfig,
) -> Result<RunReport, WorkflowError> {
    match signing::dispatch(session, config)? {
        SigningOutcome::Signed => {
            tracing::info!("Pushing signed binaries...");
            let digest = transfer::push(session, config.registry(), SIGNED_DIRECTORY)?;
            tracing::info!(%digest, "Signing process completed");
            Ok(RunReport::Signed { digest })
        }
        SigningOutcome::NotImplemented(signing_type) => {
            tracing::warn!(
                %signing_type,
                "Signing is not implemented for this signing type; nothing was pushed"
            );
            Ok(RunReport::NotImplemented { signing_type })
        }
    }
}
