// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Exercise the `remote-notary` binary's exit statuses and output.
//!
//! None of these runs reach a signing host: validation fails first, or the fixture's
//! session port refuses the connection.

use std::process::{Command, Output};

use assert_cmd::cargo::CommandCargoExt;
use remote_notary_test::{config_toml, raw_config, secrets, write_config, UNSIGNED_DIGEST};

fn remote_notary(args: &[&str]) -> anyhow::Result<Output> {
    let mut command = Command::cargo_bin("remote-notary")?;
    command
        .env_remove("REMOTE_NOTARY_LOG")
        .env_remove("REMOTE_NOTARY_LOG_FILE")
        .args(args);
    Ok(command.output()?)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn example_config_passes_validation() -> anyhow::Result<()> {
    let example = remote_notary(&["config"])?;
    assert!(example.status.success());
    let (_dir, path) = write_config("config.toml", &String::from_utf8(example.stdout)?)?;

    for signing_type in ["mac", "windows", "win", "gpg"] {
        let output = remote_notary(&[
            "check-config",
            path.to_str().unwrap(),
            "--signing-type",
            signing_type,
        ])?;
        assert!(output.status.success(), "{signing_type}: {}", stderr(&output));
        let stdout = String::from_utf8(output.stdout)?;
        assert!(stdout.contains("<redacted>"));
        assert!(!stdout.contains("app-specific-password"));
    }

    Ok(())
}

// Validation fails before any connection is attempted.
#[test]
fn missing_signing_identity_fails_before_connecting() -> anyhow::Result<()> {
    let contents = config_toml()
        .lines()
        .filter(|line| !line.starts_with("signing_identity"))
        .collect::<Vec<_>>()
        .join("\n");
    let (_dir, path) = write_config("config.toml", &contents)?;

    let output = remote_notary(&[
        "sign",
        path.to_str().unwrap(),
        "--unsigned-digest",
        UNSIGNED_DIGEST,
        "--signing-type",
        "mac",
    ])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("signing_identity"), "{stderr}");
    assert!(!stderr.contains("Connecting to signing host"), "{stderr}");

    // The same file is fine for a type that doesn't need Mac fields.
    let output = remote_notary(&[
        "check-config",
        path.to_str().unwrap(),
        "--signing-type",
        "gpg",
    ])?;
    assert!(output.status.success());

    Ok(())
}

#[test]
fn unknown_signing_type_exits_with_failure() -> anyhow::Result<()> {
    let (_dir, path) = write_config("config.toml", &config_toml())?;

    let output = remote_notary(&[
        "sign",
        path.to_str().unwrap(),
        "--unsigned-digest",
        UNSIGNED_DIGEST,
        "--signing-type",
        "linux",
    ])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("unknown signing type 'linux'"));
    Ok(())
}

#[test]
fn unreadable_config_exits_with_failure() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("absent.toml");

    let output = remote_notary(&[
        "check-config",
        path.to_str().unwrap(),
        "--signing-type",
        "mac",
    ])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("failed to read configuration file"));
    Ok(())
}

#[test]
fn empty_unsigned_digest_is_rejected() -> anyhow::Result<()> {
    let (_dir, path) = write_config("config.toml", &config_toml())?;

    let output = remote_notary(&[
        "sign",
        path.to_str().unwrap(),
        "--unsigned-digest",
        " ",
        "--signing-type",
        "gpg",
    ])?;

    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr(&output);
    assert!(stderr.contains("unsigned_digest"), "{stderr}");
    assert!(!stderr.contains("Connecting to signing host"), "{stderr}");
    Ok(())
}

#[test]
fn json_config_is_accepted() -> anyhow::Result<()> {
    let contents = serde_json::Value::Object(raw_config()).to_string();
    let (_dir, path) = write_config("config.json", &contents)?;

    let output = remote_notary(&[
        "check-config",
        path.to_str().unwrap(),
        "--signing-type",
        "mac",
    ])?;

    assert!(output.status.success(), "{}", stderr(&output));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("quay.io/example/artifacts"));
    for secret in secrets::ALL {
        assert!(!stdout.contains(secret));
    }
    Ok(())
}

// The fixture points every session at 127.0.0.1:1, where nothing listens.
#[test]
fn unreachable_host_exits_with_failure() -> anyhow::Result<()> {
    let (_dir, path) = write_config("config.toml", &config_toml())?;

    let output = remote_notary(&[
        "--log-filter",
        "DEBUG",
        "sign",
        path.to_str().unwrap(),
        "--unsigned-digest",
        UNSIGNED_DIGEST,
        "--signing-type",
        "windows",
    ])?;

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    let stderr = stderr(&output);
    assert!(stderr.contains("Connecting to signing host"), "{stderr}");
    assert!(stderr.contains("failed to connect to 127.0.0.1"), "{stderr}");
    for secret in secrets::ALL {
        assert!(!stderr.contains(secret), "{secret} was logged");
    }
    Ok(())
}
