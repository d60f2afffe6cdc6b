// SPDX-License-Identifier: MIT
// Copyright (c) Microsoft Corporation.

//! Configuration loading and validation.
//!
//! Validation happens in two passes. The first pass works on the raw mapping read from the file
//! and only checks that every required field is present, so that all missing fields can be
//! reported at once. The second pass deserializes the fields into [`SigningConfig`].

use std::{fmt, path::Path, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::ConfigError, transfer::ContentDigest};

/// The configuration file contents before validation.
///
/// TOML and JSON files are both read into this form so that field checks don't depend on the
/// file format.
pub type RawConfig = Map<String, Value>;

/// Fields required regardless of the signing type.
pub const BASE_REQUIRED_FIELDS: [&str; 4] = [
    "registry_repository",
    "registry_username",
    "registry_password",
    "ssh_config",
];

/// Older names for some required fields, as `(name, older name)`.
///
/// Configuration files written for the earlier signing scripts use these; either name
/// satisfies the presence check, and missing fields are reported by their current name.
pub const FIELD_ALIASES: [(&str, &str); 3] = [
    ("registry_repository", "oci_registry_repo"),
    ("registry_username", "quay_username"),
    ("registry_password", "quay_password"),
];

/// Fields required in addition to [`BASE_REQUIRED_FIELDS`] for macOS signing.
pub const MAC_REQUIRED_FIELDS: [&str; 7] = [
    "mac_vm_ip",
    "mac_vm_user",
    "mac_vm_password",
    "keychain_password",
    "signing_identity",
    "notarization_username",
    "notarization_password",
];

/// An example configuration, valid for every signing type.
pub const EXAMPLE_CONFIG: &str = r#"# The repository holding both unsigned and signed artifacts.
registry_repository = "quay.io/example/artifacts"
registry_username = "example+signer"
registry_password = "registry-token"

# Path to the oras binary on the signing hosts.
oras_path = "oras"
# Where unsigned artifacts are pulled to on the signing host.
staging_directory = "/Users/macos-signing/pk-testing/unsigned/"
# Uncomment to give up on any single remote command after this many seconds.
# command_timeout_secs = 3600

mac_vm_ip = "192.0.2.10"
mac_vm_user = "macos-signing"
mac_vm_password = "vm-password"
keychain_password = "keychain-password"
signing_identity = "Developer ID Application: Example Corp (ABCDE12345)"
notarization_username = "notary@example.com"
notarization_password = "app-specific-password"
notarization_bundle_id = "com.example.app"

[ssh_config.mac]
host = "192.0.2.10"
user = "macos-signing"
password = "vm-password"

[ssh_config.windows]
host = "192.0.2.20"
user = "signer"
password = "windows-password"

[ssh_config.gpg]
host = "192.0.2.30"
user = "signer"
password = "gpg-password"
"#;

/// A value that must never appear in logs.
///
/// The [`fmt::Debug`] and [`fmt::Display`] implementations, as well as serialization, print a
/// placeholder rather than the value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value. Do not pass the result to a logging macro.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl Serialize for Secret {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("<redacted>")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // The default visitor errors quote the unexpected value, which would leak a
        // mistyped password into the error message.
        struct SecretVisitor;

        impl serde::de::Visitor<'_> for SecretVisitor {
            type Value = Secret;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Secret, E> {
                Ok(Secret::new(value))
            }

            fn visit_string<E: serde::de::Error>(self, value: String) -> Result<Secret, E> {
                Ok(Secret(value))
            }

            fn visit_bool<E: serde::de::Error>(self, _: bool) -> Result<Secret, E> {
                Err(E::custom("expected a string secret, found a boolean"))
            }

            fn visit_i64<E: serde::de::Error>(self, _: i64) -> Result<Secret, E> {
                Err(E::custom("expected a string secret, found a number"))
            }

            fn visit_u64<E: serde::de::Error>(self, _: u64) -> Result<Secret, E> {
                Err(E::custom("expected a string secret, found a number"))
            }

            fn visit_f64<E: serde::de::Error>(self, _: f64) -> Result<Secret, E> {
                Err(E::custom("expected a string secret, found a number"))
            }
        }

        deserializer.deserialize_any(SecretVisitor)
    }
}

/// The kinds of signing this tool knows about.
///
/// Only [`SigningType::Mac`] performs any signing at the moment; the others are accepted and
/// validated, but their signing steps are placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningType {
    Mac,
    Windows,
    Gpg,
}

impl SigningType {
    pub const ALL: [SigningType; 3] = [SigningType::Mac, SigningType::Windows, SigningType::Gpg];

    pub fn as_str(&self) -> &'static str {
        match self {
            SigningType::Mac => "mac",
            SigningType::Windows => "windows",
            SigningType::Gpg => "gpg",
        }
    }

    /// Fields this signing type requires beyond [`BASE_REQUIRED_FIELDS`].
    pub fn extra_required_fields(&self) -> &'static [&'static str] {
        match self {
            SigningType::Mac => &MAC_REQUIRED_FIELDS,
            SigningType::Windows => &[],
            SigningType::Gpg => &[],
        }
    }

    /// Keys that may name this signing type's entry in the `ssh_config` table.
    fn session_keys(&self) -> &'static [&'static str] {
        match self {
            SigningType::Mac => &["mac"],
            SigningType::Windows => &["windows", "win"],
            SigningType::Gpg => &["gpg"],
        }
    }
}

impl FromStr for SigningType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mac" => Ok(SigningType::Mac),
            "windows" | "win" => Ok(SigningType::Windows),
            "gpg" => Ok(SigningType::Gpg),
            other => Err(ConfigError::UnknownSigningType(other.to_string())),
        }
    }
}

impl fmt::Display for SigningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The credentials used to open a remote session for one signing type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    /// The hostname or IP address of the signing host.
    pub host: String,
    /// The SSH port; the default is 22.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// The user to authenticate as.
    pub user: String,
    /// The user's password.
    #[serde(alias = "secret")]
    pub password: Secret,
    /// An OpenSSH known_hosts file to verify the host key against.
    ///
    /// If this is not set, the host key is not verified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<PathBuf>,
}

/// Where artifacts live and how to reach them from the signing hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// The OCI repository for both unsigned and signed artifacts, e.g. "quay.io/org/repo".
    #[serde(rename = "registry_repository", alias = "oci_registry_repo")]
    pub repository: String,
    #[serde(rename = "registry_username", alias = "quay_username")]
    pub username: String,
    #[serde(rename = "registry_password", alias = "quay_password")]
    pub password: Secret,
    /// The oras binary on the signing host. Defaults to "oras", resolved via the remote `PATH`.
    #[serde(default = "default_oras_path")]
    pub oras_path: String,
    /// The directory on the signing host that unsigned artifacts are pulled to and signed in.
    #[serde(default = "default_staging_directory")]
    pub staging_directory: String,
}

/// Settings for signing and notarizing macOS application bundles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacConfig {
    pub mac_vm_ip: String,
    pub mac_vm_user: String,
    pub mac_vm_password: Secret,
    /// The password for the login keychain holding the signing certificate.
    pub keychain_password: Secret,
    /// The codesign identity, e.g. "Developer ID Application: Example Corp (ABCDE12345)".
    pub signing_identity: String,
    pub notarization_username: String,
    pub notarization_password: Secret,
    /// The primary bundle ID to submit for notarization.
    #[serde(default = "default_bundle_id")]
    pub notarization_bundle_id: String,
}

/// The signing-type-specific part of the configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Variant {
    Mac(MacConfig),
    Windows,
    Gpg,
}

impl Variant {
    pub fn signing_type(&self) -> SigningType {
        match self {
            Variant::Mac(_) => SigningType::Mac,
            Variant::Windows => SigningType::Windows,
            Variant::Gpg => SigningType::Gpg,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Options {
    #[serde(default)]
    command_timeout_secs: Option<u64>,
}

/// A validated configuration for a single signing run.
///
/// This is created by [`validate`] and doesn't change afterwards, except for attaching the
/// digest of the artifacts to sign with [`SigningConfig::with_unsigned_digest`].
#[derive(Debug, Clone, Serialize)]
pub struct SigningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    command_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unsigned_digest: Option<ContentDigest>,
    #[serde(flatten)]
    registry: RegistryConfig,
    ssh: SessionCredentials,
    signing: Variant,
}

impl SigningConfig {
    /// Attach the digest of the unsigned artifacts.
    pub fn with_unsigned_digest(mut self, digest: ContentDigest) -> Self {
        if let Some(previous) = self.unsigned_digest.replace(digest) {
            tracing::warn!(%previous, "Replacing previously set unsigned digest");
        }
        self
    }

    pub fn unsigned_digest(&self) -> Option<&ContentDigest> {
        self.unsigned_digest.as_ref()
    }

    pub fn signing_type(&self) -> SigningType {
        self.signing.signing_type()
    }

    pub fn registry(&self) -> &RegistryConfig {
        &self.registry
    }

    /// The credentials for the signing host of this configuration's signing type.
    pub fn session(&self) -> &SessionCredentials {
        &self.ssh
    }

    pub fn variant(&self) -> &Variant {
        &self.signing
    }

    /// The longest any single remote command may run, if limited.
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// Every secret value in the configuration.
    pub fn secrets(&self) -> Vec<&Secret> {
        let mut secrets = vec![&self.registry.password, &self.ssh.password];
        if let Variant::Mac(mac) = &self.signing {
            secrets.extend([
                &mac.mac_vm_password,
                &mac.keychain_password,
                &mac.notarization_password,
            ]);
        }
        secrets
    }
}

impl fmt::Display for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            toml::ser::to_string_pretty(&self).unwrap_or_default()
        )
    }
}

/// Read a configuration file without validating it.
///
/// Files with a `.json` extension are parsed as JSON; anything else is parsed as TOML.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file can't be read and [`ConfigError::Parse`] if it is
/// malformed or its top level isn't a table.
pub fn load_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(path=%path.display(), "Read from configuration file");

    let is_json = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let value = if is_json {
        // serde_json errors only carry a position, never the offending text.
        serde_json::from_str::<Value>(&contents)
            .map_err(|error| ConfigError::Parse(error.to_string()))?
    } else {
        // The TOML error's Display includes the offending line, which may hold a password.
        toml::from_str::<Value>(&contents).map_err(|error| {
            let line = error
                .span()
                .map(|span| contents[..span.start.min(contents.len())].lines().count().max(1));
            match line {
                Some(line) => ConfigError::Parse(format!("{} (line {line})", error.message())),
                None => ConfigError::Parse(error.message().to_string()),
            }
        })?
    };

    match value {
        Value::Object(raw) => Ok(raw),
        _ => Err(ConfigError::Parse(
            "the top level of the configuration must be a table".to_string(),
        )),
    }
}

/// The full set of required fields for a signing type, in reporting order.
pub fn required_fields(signing_type: SigningType) -> Vec<&'static str> {
    BASE_REQUIRED_FIELDS
        .iter()
        .chain(signing_type.extra_required_fields())
        .copied()
        .collect()
}

/// The required fields absent from `raw`, in the order of [`required_fields`].
pub fn missing_fields(raw: &RawConfig, signing_type: SigningType) -> Vec<String> {
    required_fields(signing_type)
        .into_iter()
        .filter(|field| !has_field(raw, field))
        .map(String::from)
        .collect()
}

fn has_field(raw: &RawConfig, field: &str) -> bool {
    raw.contains_key(field)
        || FIELD_ALIASES
            .iter()
            .any(|(name, older)| *name == field && raw.contains_key(*older))
}

/// Validate a raw configuration for the given signing type.
///
/// The signing type is checked first; an unknown type fails before any field is examined.
/// Next, every missing required field is collected and reported together. Finally, the
/// `ssh_config` table must contain an entry for the signing type.
///
/// # Errors
///
/// Each failed check has its own [`ConfigError`] variant. If all fields are present but one
/// has the wrong type, [`ConfigError::Invalid`] is returned.
pub fn validate(raw: RawConfig, signing_type: &str) -> Result<SigningConfig, ConfigError> {
    let signing_type = SigningType::from_str(signing_type)?;

    let missing = missing_fields(&raw, signing_type);
    if !missing.is_empty() {
        return Err(ConfigError::MissingFields(missing));
    }

    let session_blocks = raw
        .get("ssh_config")
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::Invalid("ssh_config must be a table".to_string()))?;
    let session = signing_type
        .session_keys()
        .iter()
        .find_map(|key| session_blocks.get(*key))
        .ok_or(ConfigError::MissingSessionBlock(signing_type))?;
    let ssh = SessionCredentials::deserialize(session)
        .map_err(|error| ConfigError::Invalid(format!("ssh_config.{signing_type}: {error}")))?;

    let raw = Value::Object(raw);
    let registry = RegistryConfig::deserialize(&raw).map_err(invalid)?;
    let options = Options::deserialize(&raw).map_err(invalid)?;
    let signing = match signing_type {
        SigningType::Mac => Variant::Mac(MacConfig::deserialize(&raw).map_err(invalid)?),
        SigningType::Windows => Variant::Windows,
        SigningType::Gpg => Variant::Gpg,
    };

    Ok(SigningConfig {
        command_timeout_secs: options.command_timeout_secs,
        unsigned_digest: None,
        registry,
        ssh,
        signing,
    })
}

fn invalid(error: serde_json::Error) -> ConfigError {
    ConfigError::Invalid(error.to_string())
}

fn default_ssh_port() -> u16 {
    22
}

fn default_oras_path() -> String {
    "oras".to_string()
}

fn default_staging_directory() -> String {
    "/Users/macos-signing/pk-testing/unsigned/".to_string()
}

fn default_bundle_id() -> String {
    "com.example.app".to_string()
}
