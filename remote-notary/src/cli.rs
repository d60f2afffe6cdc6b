// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! The command-line interface of the `remote-notary` binary.

use std::path::PathBuf;

use clap::Parser;

/// Sign and notarize artifacts on a remote signing host.
///
/// Unsigned artifacts are pulled from an OCI registry onto the signing host, signed there, and
/// the signed artifacts are pushed back to the registry. The digest of the signed artifacts is
/// printed on success.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// A set of one or more comma-separated directives to filter logs.
    ///
    /// The general format is "target_name[span_name{field=value}]=level" where level is
    /// one of TRACE, DEBUG, INFO, WARN, ERROR.
    ///
    /// Details: https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[arg(
        long,
        env = "REMOTE_NOTARY_LOG",
        default_value = "WARN,remote_notary=INFO"
    )]
    pub log_filter: String,

    /// Write logs to this file, appending to it, rather than to standard error.
    #[arg(long, env = "REMOTE_NOTARY_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Pull, sign, and push a set of artifacts.
    Sign {
        /// Path to the configuration file with secrets.
        ///
        /// The file is read as TOML unless its extension is ".json". Run the `config`
        /// subcommand for an example.
        config: PathBuf,

        /// Digest of the unsigned artifacts in the registry.
        #[arg(long)]
        unsigned_digest: String,

        /// Type of signing to perform: mac, windows, or gpg.
        #[arg(long, value_name = "mac|windows|gpg")]
        signing_type: String,
    },
    /// Validate a configuration file for a signing type without connecting to any host.
    CheckConfig {
        /// Path to the configuration file with secrets.
        config: PathBuf,

        /// Type of signing to validate the configuration for: mac, windows, or gpg.
        #[arg(long, value_name = "mac|windows|gpg")]
        signing_type: String,
    },
    /// Print an example configuration file.
    Config,
}
