// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use std::{fs::File, sync::Mutex};

use anyhow::Context;
use clap::Parser;
use remote_notary::{
    cli::{Cli, Command},
    config::{self, SigningConfig},
    error::ConfigError,
    ssh::SshConnector,
    transfer::ContentDigest,
    workflow::{self, RunReport},
};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt};

fn main() -> anyhow::Result<()> {
    let opts = Cli::parse();

    // Unfortunately we can't use clap's value_parser since EnvFilter does not
    // implement Clone.
    let log_filter = EnvFilter::builder().parse(&opts.log_filter).context(
        "REMOTE_NOTARY_LOG contains an invalid log directive; refer to \
            https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/\
            filter/struct.EnvFilter.html#directives for format details.",
    )?;
    let (stderr_layer, file_layer) = match &opts.log_file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (None, Some(file_layer))
        }
        None => {
            let stderr_layer = tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_writer(std::io::stderr);
            (Some(stderr_layer), None)
        }
    };
    let registry = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(log_filter);
    tracing::subscriber::set_global_default(registry)
        .expect("Programming error: set_global_default should only be called once.");

    match opts.command {
        Command::Config => {
            println!("{}", config::EXAMPLE_CONFIG);
        }
        Command::CheckConfig {
            config: path,
            signing_type,
        } => {
            let config = load_config(&path, &signing_type)?;
            println!(
                "# This is the validated configuration with secrets redacted\n\n{config}\n# This concludes the configuration.\n"
            );
        }
        Command::Sign {
            config: path,
            unsigned_digest,
            signing_type,
        } => {
            let config = load_config(&path, &signing_type)?;
            let unsigned_digest = unsigned_digest.trim();
            if unsigned_digest.is_empty() {
                return Err(ConfigError::MissingFields(vec!["unsigned_digest".to_string()]).into());
            }
            let config = config.with_unsigned_digest(ContentDigest::new(unsigned_digest));

            let connector = SshConnector::new(config.command_timeout());
            let report = workflow::run(&config, &connector).inspect_err(|error| {
                tracing::error!(%error, "An error occurred during the signing process");
            })?;
            match report {
                RunReport::Signed { digest } => println!("{digest}"),
                RunReport::NotImplemented { signing_type } => eprintln!(
                    "Signing for '{signing_type}' is not implemented yet; nothing was signed or pushed."
                ),
            }
        }
    }

    Ok(())
}

fn load_config(path: &std::path::Path, signing_type: &str) -> anyhow::Result<SigningConfig> {
    let config = config::load_raw(path)
        .and_then(|raw| config::validate(raw, signing_type))
        .inspect_err(|error| tracing::error!(%error, "Configuration is invalid"))?;
    Ok(config)
}
