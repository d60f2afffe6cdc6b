// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

use remote_notary::{
    config::{self, SigningType},
    error::{CommandError, ConnectionError, ConfigError, ExtractionError, PushError, WorkflowError},
    session::{CommandOutput, RemoteSession},
    transfer::ContentDigest,
    workflow::{self, RunReport},
};
use remote_notary_test::{
    raw_config, secrets, signing_config, MockHost, SIGNED_DIGEST, SIGNING_IDENTITY,
};

const MAC_COMMANDS: [&str; 3] = ["security unlock-keychain", "codesign", "xcrun altool"];

fn cleaned_up(host: &MockHost) -> bool {
    host.commands()
        .last()
        .is_some_and(|command| command.ends_with("rm -rf *.app app.zip ~/signed"))
}

// A mac run pulls, signs, notarizes, pushes, and cleans up, in that order.
#[test]
#[tracing_test::traced_test]
fn mac_signing_run() -> anyhow::Result<()> {
    let host = MockHost::with_push_digest();
    let config = signing_config("mac");

    let report = workflow::run(&config, &host.connector())?;

    assert_eq!(
        report,
        RunReport::Signed {
            digest: ContentDigest::new(SIGNED_DIGEST)
        }
    );
    let order = [
        "oras pull",
        "security unlock-keychain",
        "codesign --force --options runtime",
        "xcrun altool --notarize-app",
        "oras push",
    ]
    .map(|pattern| host.position(pattern).unwrap_or_else(|| panic!("{pattern} never ran")));
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{order:?}");
    assert!(cleaned_up(&host));

    assert_eq!(host.connections(), 1);
    assert_eq!(host.closes(), 1);
    assert!(logs_contain("Signing process completed"));
    assert!(logs_contain(SIGNED_DIGEST));

    Ok(())
}

#[test]
fn pull_exports_credentials_and_changes_directory() -> anyhow::Result<()> {
    let host = MockHost::with_push_digest();
    workflow::run(&signing_config("mac"), &host.connector())?;

    let commands = host.commands();
    let pull = &commands[host.position("oras pull").unwrap()];
    assert_eq!(
        pull,
        &format!(
            "export ORAS_USERNAME=example+signer ORAS_PASSWORD={} && cd /Users/signer/unsigned && oras pull 'quay.io/example/artifacts@sha256:0ddba11'",
            secrets::REGISTRY_PASSWORD
        )
    );
    assert!(commands[0].ends_with("mkdir -p /Users/signer/unsigned"));

    let codesign = &commands[host.position("codesign").unwrap()];
    assert!(codesign.ends_with(&format!(
        "codesign --force --options runtime --sign '{SIGNING_IDENTITY}' *.app"
    )));
    let push = &commands[host.position("oras push").unwrap()];
    assert!(push.ends_with("oras push quay.io/example/artifacts ~/signed/*.app"));
    assert!(cleaned_up(&host));

    Ok(())
}

// Leftovers from an earlier run are removed before the pull and before staging, so only this
// run's bundles are signed and pushed.
#[test]
fn leftovers_are_never_pushed() -> anyhow::Result<()> {
    let host = MockHost::with_push_digest();
    workflow::run(&signing_config("mac"), &host.connector())?;

    let expected = [
        "mkdir -p /Users/signer/unsigned",
        "rm -rf *.app app.zip",
        "oras pull 'quay.io/example/artifacts@sha256:0ddba11'",
        "login.keychain",
        "*.app",
        "rm -f app.zip && zip -qry app.zip *.app",
        "--file app.zip",
        "rm -rf ~/signed && mkdir -p ~/signed && cp -R *.app ~/signed/",
        "oras push quay.io/example/artifacts ~/signed/*.app",
        "rm -rf *.app app.zip ~/signed",
    ];
    let commands = host.commands();
    assert_eq!(commands.len(), expected.len(), "{commands:#?}");
    for (command, suffix) in commands.iter().zip(expected) {
        assert!(command.ends_with(suffix), "{command} should end with {suffix}");
    }
    Ok(())
}

// The host receives credentials, but they never reach the logs.
#[test]
#[tracing_test::traced_test]
fn secrets_are_never_logged() -> anyhow::Result<()> {
    let host = MockHost::with_push_digest();
    host.respond(
        "codesign",
        CommandOutput::new(
            format!("warning: {} appears in output", secrets::REGISTRY_PASSWORD),
            format!("note: {}", secrets::NOTARIZATION_PASSWORD),
        )
        .with_status(0),
    );

    workflow::run(&signing_config("mac"), &host.connector())?;

    assert!(host.received(secrets::KEYCHAIN_PASSWORD));
    assert!(host.received(secrets::NOTARIZATION_PASSWORD));
    assert!(host.received(secrets::REGISTRY_PASSWORD));
    for secret in secrets::ALL {
        assert!(!logs_contain(secret), "{secret} was logged");
    }
    assert!(logs_contain("[redacted] appears in output"));
    assert!(logs_contain("Running sensitive command"));

    Ok(())
}

#[test]
#[tracing_test::traced_test]
fn missing_push_digest_is_an_error() {
    let host = MockHost::new();
    host.respond(
        "oras push",
        CommandOutput::new("Pushed [registry] quay.io/example/artifacts", "").with_status(0),
    );

    let result = workflow::run(&signing_config("mac"), &host.connector());

    assert!(matches!(
        result,
        Err(WorkflowError::Push(PushError::Extraction(
            ExtractionError::DigestNotFound
        )))
    ));
    assert!(cleaned_up(&host));
    assert_eq!(host.closes(), 1);
}

#[test]
fn digest_on_stderr_is_found() -> anyhow::Result<()> {
    let host = MockHost::new();
    host.respond(
        "oras push",
        CommandOutput::new("", "Digest: sha256:e44e").with_status(0),
    );

    let report = workflow::run(&signing_config("mac"), &host.connector())?;

    assert_eq!(
        report,
        RunReport::Signed {
            digest: ContentDigest::new("sha256:e44e")
        }
    );
    Ok(())
}

// A dropped connection mid-sequence aborts the run, but the session is still closed once.
#[test]
#[tracing_test::traced_test]
fn transport_failure_aborts_and_closes() {
    let host = MockHost::with_push_digest();
    host.disconnect_on("codesign");

    let result = workflow::run(&signing_config("mac"), &host.connector());

    assert!(matches!(
        result,
        Err(WorkflowError::Command(CommandError::Transport(_)))
    ));
    assert!(!host.received("xcrun altool"));
    assert!(!host.received("oras push"));
    assert_eq!(host.closes(), 1);
    assert!(logs_contain("An error occurred during the Mac signing process"));
}

#[test]
fn failed_notarization_is_not_pushed() {
    let host = MockHost::with_push_digest();
    host.respond(
        "xcrun altool",
        CommandOutput::new("", "Error: unable to upload").with_status(1),
    );

    let result = workflow::run(&signing_config("mac"), &host.connector());

    assert!(matches!(
        result,
        Err(WorkflowError::Command(CommandError::ExitStatus {
            step: "notarize",
            status: 1
        }))
    ));
    assert!(!host.received("oras push"));
    assert!(cleaned_up(&host));
    assert_eq!(host.closes(), 1);
}

#[test]
fn failed_pull_skips_signing() {
    let host = MockHost::with_push_digest();
    host.respond("oras pull", CommandOutput::new("", "not found").with_status(1));

    let result = workflow::run(&signing_config("mac"), &host.connector());

    assert!(matches!(
        result,
        Err(WorkflowError::Command(CommandError::ExitStatus {
            step: "pull unsigned artifacts",
            ..
        }))
    ));
    for pattern in MAC_COMMANDS {
        assert!(!host.received(pattern));
    }
    assert_eq!(host.closes(), 1);
}

// Windows and GPG signing are accepted, but visibly do nothing. Nothing is pulled either, so
// no artifacts are left behind in the staging directory.
#[test]
#[tracing_test::traced_test]
fn unimplemented_types_sign_nothing() -> anyhow::Result<()> {
    for signing_type in [SigningType::Windows, SigningType::Gpg] {
        let host = MockHost::with_push_digest();

        let report = workflow::run(&signing_config(signing_type.as_str()), &host.connector())?;

        assert_eq!(report, RunReport::NotImplemented { signing_type });
        assert_eq!(host.commands(), Vec::<String>::new(), "{signing_type}");
        assert_eq!(host.connections(), 1);
        assert_eq!(host.closes(), 1);
    }
    assert!(logs_contain("Windows signing is not implemented"));
    assert!(logs_contain("GPG signing is not implemented"));

    Ok(())
}

#[test]
fn rejected_authentication_opens_no_session() {
    let host = MockHost::new();
    host.reject_authentication();

    let result = workflow::run(&signing_config("mac"), &host.connector());

    assert!(matches!(
        result,
        Err(WorkflowError::Connection(ConnectionError::Authentication { .. }))
    ));
    assert!(host.commands().is_empty());
    assert_eq!(host.closes(), 0);
}

#[test]
fn missing_unsigned_digest_opens_no_session() {
    let host = MockHost::with_push_digest();
    let config = config::validate(raw_config(), "mac").unwrap();

    let result = workflow::run(&config, &host.connector());

    assert!(matches!(
        result,
        Err(WorkflowError::Config(ConfigError::MissingFields(fields))) if fields == ["unsigned_digest"]
    ));
    assert_eq!(host.connections(), 0);
}

// A session opened directly is closed when dropped, even if nobody calls close.
#[test]
fn dropped_session_closes_once() -> anyhow::Result<()> {
    let host = MockHost::new();
    let config = signing_config("gpg");
    {
        let mut session = RemoteSession::open(&host.connector(), config.session())?;
        session.run("uname -a", false)?;
        session.close();
    }
    {
        let mut session = RemoteSession::open(&host.connector(), config.session())?;
        session.run("uname -a", false)?;
    }

    assert_eq!(host.connections(), 2);
    assert_eq!(host.closes(), 2);
    Ok(())
}
