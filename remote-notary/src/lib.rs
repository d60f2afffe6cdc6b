// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

/*!
# remote-notary

Sign and notarize software artifacts on a remote signing host.

Artifacts travel through an OCI registry. A signing run connects to the signing host over SSH,
has the host pull the unsigned artifacts by digest using its own `oras` client, runs the
signing steps for the requested [`config::SigningType`], and has the host push the signed
artifacts back to the registry. The digest of the pushed artifacts identifies the signed result.

## Signing types

* **mac** -
  Unlock the login keychain, sign every application bundle with `codesign` using the hardened
  runtime, and submit the bundles for notarization.

* **windows** and **gpg** -
  Accepted and validated, but not implemented. Runs for these types report
  [`workflow::RunReport::NotImplemented`] and push nothing.

## Crate features

* **cli** -
  Include the command-line interface and the `remote-notary` binary. This is a default feature.
*/

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod session;
pub mod signing;
pub mod ssh;
pub mod transfer;
pub mod workflow;
