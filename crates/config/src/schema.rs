//! Config schema types (instances, authentication).
use std::{collections::BTreeMap, fmt, str::FromStr};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LecternConfig {
    /// Instance used when `--instance` is not given.
    pub default_instance: Option<String>,
    pub instances: BTreeMap<String, InstanceConfig>,
    pub auth: AuthConfig,
}

/// Credentials for one LMS instance.
///
/// Read-only input to the authentication core; nothing in the auth path
/// writes these back.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Filled in from the map key by [`crate::resolve_instance`].
    #[serde(skip)]
    pub name: String,
    pub base_url: String,
    pub client_id: String,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
}

impl fmt::Debug for InstanceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Authentication settings shared by all instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: FlowMode,
    /// Local callback port; the redirect URL is `http://localhost:<port>/oauth/callback`.
    pub callback_port: u16,
    pub scopes: Vec<String>,
    pub storage: StorageBackend,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: FlowMode::Auto,
            callback_port: 8080,
            scopes: Vec::new(),
            storage: StorageBackend::Auto,
        }
    }
}

/// How the authorization code reaches the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    /// Local callback server, falling back to manual entry.
    #[default]
    Auto,
    /// Local callback server only.
    Local,
    /// Operator pastes the code.
    Oob,
}

impl FromStr for FlowMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "local" => Ok(Self::Local),
            "oob" | "manual" => Ok(Self::Oob),
            other => Err(format!("unknown flow mode: {other} (expected auto, local, oob)")),
        }
    }
}

impl fmt::Display for FlowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Local => "local",
            Self::Oob => "oob",
        })
    }
}

/// Where tokens are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keyring, degrading to the encrypted file store.
    #[default]
    Auto,
    Keyring,
    File,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            other => Err(format!(
                "unknown storage backend: {other} (expected auto, keyring, file)"
            )),
        }
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_toml() {
        let cfg: LecternConfig = toml::from_str(
            r#"
default_instance = "school"

[instances.school]
base_url = "https://canvas.example.edu"
client_id = "10000000000042"
client_secret = "s3cret"

[auth]
mode = "oob"
callback_port = 9090
scopes = ["url:GET|/api/v1/courses"]
storage = "file"
"#,
        )
        .unwrap();

        assert_eq!(cfg.default_instance.as_deref(), Some("school"));
        let inst = &cfg.instances["school"];
        assert_eq!(inst.base_url, "https://canvas.example.edu");
        assert_eq!(
            inst.client_secret.as_ref().map(|s| s.expose_secret().as_str()),
            Some("s3cret")
        );
        assert_eq!(cfg.auth.mode, FlowMode::Oob);
        assert_eq!(cfg.auth.callback_port, 9090);
        assert_eq!(cfg.auth.storage, StorageBackend::File);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg: LecternConfig = toml::from_str("").unwrap();
        assert!(cfg.instances.is_empty());
        assert_eq!(cfg.auth.mode, FlowMode::Auto);
        assert_eq!(cfg.auth.callback_port, 8080);
        assert_eq!(cfg.auth.storage, StorageBackend::Auto);
    }

    #[test]
    fn debug_redacts_client_secret() {
        let inst = InstanceConfig {
            client_secret: Some(Secret::new("hunter2".into())),
            ..Default::default()
        };
        let dbg = format!("{inst:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn flow_mode_from_str() {
        assert_eq!("LOCAL".parse::<FlowMode>().unwrap(), FlowMode::Local);
        assert_eq!("manual".parse::<FlowMode>().unwrap(), FlowMode::Oob);
        assert!("device".parse::<FlowMode>().is_err());
        assert_eq!(FlowMode::Oob.to_string(), "oob");
    }
}
