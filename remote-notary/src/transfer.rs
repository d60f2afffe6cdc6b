// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Moving artifacts between the OCI registry and a signing host.
//!
//! All registry traffic happens on the signing host through its own `oras` client; nothing
//! here talks to the registry directly.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    config::RegistryConfig,
    error::{CommandError, ExtractionError, PushError},
    session::{escape_path, shell_escape, RemoteSession, Transport},
};

/// The directory on the signing host that signed artifacts are staged in before they're pushed.
pub const SIGNED_DIRECTORY: &str = "~/signed";

/// Files a signing run creates in the staging directory; removed before every pull.
pub const STALE_ARTIFACTS: &str = "*.app app.zip";

/// The marker oras prints before the digest of a pushed manifest.
pub const DIGEST_MARKER: &str = "Digest:";

/// A content address for a set of artifacts in the registry, e.g. `sha256:3b1f...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Find the first line starting with [`DIGEST_MARKER`] and return its second field.
///
/// A marker line with nothing after the marker is skipped.
pub fn extract_digest<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<ContentDigest> {
    lines
        .into_iter()
        .filter(|line| line.starts_with(DIGEST_MARKER))
        .find_map(|line| line.split_whitespace().nth(1))
        .map(ContentDigest::new)
}

/// Pull the unsigned artifacts at `digest` into the staging directory.
///
/// The registry credentials are exported for the rest of the session, and the staging
/// directory becomes the session's working directory, so later signing steps operate on the
/// pulled artifacts. Bundles and archives an earlier run left in the staging directory are
/// removed first, so only the pulled artifacts are signed.
///
/// # Errors
///
/// Any transport failure or non-zero exit status is returned.
#[instrument(skip_all, err, fields(repository = registry.repository, %digest))]
pub fn pull<T: Transport>(
    session: &mut RemoteSession<T>,
    registry: &RegistryConfig,
    digest: &ContentDigest,
) -> Result<(), CommandError> {
    session.set_env("ORAS_USERNAME", &registry.username);
    session.set_secret_env("ORAS_PASSWORD", registry.password.clone());

    session
        .run(
            &format!("mkdir -p {}", escape_path(&registry.staging_directory)),
            false,
        )?
        .ensure_success("create staging directory")?;
    session.set_working_directory(&registry.staging_directory);
    session
        .run(&format!("rm -rf {STALE_ARTIFACTS}"), false)?
        .ensure_success("clear staging directory")?;

    let reference = format!("{}@{}", registry.repository, digest);
    session
        .run(
            &format!(
                "{} pull {}",
                escape_path(&registry.oras_path),
                shell_escape(&reference)
            ),
            false,
        )?
        .ensure_success("pull unsigned artifacts")?;

    tracing::info!("Pulled unsigned artifacts");
    Ok(())
}

/// Push every application bundle in `signed_directory` and return the digest oras reports.
///
/// # Errors
///
/// [`PushError::Extraction`] if the output, standard output and standard error both, has no
/// digest line. Transport failures and non-zero exit statuses are [`PushError::Command`].
#[instrument(skip_all, err, fields(repository = registry.repository))]
pub fn push<T: Transport>(
    session: &mut RemoteSession<T>,
    registry: &RegistryConfig,
    signed_directory: &str,
) -> Result<ContentDigest, PushError> {
    let output = session
        .run(
            &format!(
                "{} push {} {}/*.app",
                escape_path(&registry.oras_path),
                shell_escape(&registry.repository),
                escape_path(signed_directory.trim_end_matches('/')),
            ),
            false,
        )?
        .ensure_success("push signed artifacts")?;

    let digest = extract_digest(output.lines()).ok_or(ExtractionError::DigestNotFound)?;
    tracing::info!(%digest, "Pushed signed artifacts");
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_among_other_lines() {
        let output = "Uploading 1a2b3c app.app\nUploaded  app.app\nPushed [registry] quay.io/org/repo\nDigest: abc123\n";
        assert_eq!(
            extract_digest(output.lines()),
            Some(ContentDigest::new("abc123"))
        );
    }

    #[test]
    fn first_digest_line_wins() {
        let output = ["Digest: first", "Digest: second"];
        assert_eq!(extract_digest(output), Some(ContentDigest::new("first")));
    }

    #[test]
    fn no_digest_is_none_not_empty() {
        assert_eq!(extract_digest("Pushed\nDone".lines()), None);
        assert_eq!(extract_digest("".lines()), None);
        assert_eq!(extract_digest(["Digest:"]), None);
        assert_eq!(extract_digest(["  Digest: indented"]), None);
    }

    #[test]
    fn digest_must_start_the_line() {
        let output = ["Manifest Digest: nope", "Digest: sha256:feed extra"];
        assert_eq!(extract_digest(output), Some(ContentDigest::new("sha256:feed")));
    }
}
