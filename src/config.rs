//! # Configuration Module
//!
//! Loads the secrets blob that binds the node to its Wi-Fi network and
//! cloud identity.
//!
//! The blob is read once at boot. The resulting [`Configuration`] is
//! immutable and is passed by reference to whoever needs it.
//!
//! ## File Shape
//!
//! ```json
//! {
//!   "Authentication": {"ClientId": "...", "ClientSecret": "...", "Resource": "...", "Uri": "https://.../oauth2/token"},
//!   "ServiceBus":     {"ConnectionString": "https://.../messages"},
//!   "Network":        {"Ssid": "...", "Password": "..."}
//! }
//! ```

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{error, info};
use url::Url;

use crate::error::{Result, TelemetryNodeError};

/// Default location of the secrets blob
pub const DEFAULT_SECRETS_PATH: &str = "/secrets.json";

/// Wi-Fi credentials
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredentials {
    pub ssid: String,
    pub password: String,
}

/// OAuth 2.0 client-credentials identity
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub resource: String,
    pub token_endpoint_uri: String,
}

/// Node configuration bound at boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub network: NetworkCredentials,
    pub auth: AuthCredentials,
    pub endpoint_uri: String,
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("resource", &self.resource)
            .field("token_endpoint_uri", &self.token_endpoint_uri)
            .finish()
    }
}

// On-disk layout of the secrets blob
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecretsFile {
    authentication: AuthenticationSection,
    service_bus: ServiceBusSection,
    network: NetworkSection,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationSection {
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    uri: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceBusSection {
    #[serde(default)]
    connection_string: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSection {
    #[serde(default)]
    ssid: String,
    #[serde(default)]
    password: String,
}

impl Configuration {
    /// Load the secrets blob from a file
    ///
    /// The whole file is read into memory and the handle is released before
    /// decoding starts.
    ///
    /// # Errors
    ///
    /// - `ConfigMissing`: the file does not exist
    /// - `ConfigMalformed`: the file is not valid JSON of the expected shape,
    ///   a required field is empty, or an endpoint is not an absolute URL
    /// - `Io`: the file exists but cannot be read
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use gps_telemetry_node::config::Configuration;
    ///
    /// let config = Configuration::load("/secrets.json")?;
    /// println!("Binding to network {}", config.network.ssid);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                error!("Secrets file not found at {}", path.display());
                return Err(TelemetryNodeError::ConfigMissing(path.display().to_string()));
            }
            Err(e) => return Err(TelemetryNodeError::Io(e)),
        };

        info!("Secrets file found at {} ({} bytes)", path.display(), bytes.len());

        Self::from_slice(&bytes).inspect_err(|e| error!("{}", e))
    }

    /// Decode a secrets blob from raw bytes
    ///
    /// # Errors
    ///
    /// Returns `ConfigMalformed` if decoding or validation fails
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let file: SecretsFile = serde_json::from_slice(bytes)
            .map_err(|e| TelemetryNodeError::ConfigMalformed(e.to_string()))?;

        let config = Configuration {
            network: NetworkCredentials {
                ssid: file.network.ssid,
                password: file.network.password,
            },
            auth: AuthCredentials {
                client_id: file.authentication.client_id,
                client_secret: file.authentication.client_secret,
                resource: file.authentication.resource,
                token_endpoint_uri: file.authentication.uri,
            },
            endpoint_uri: file.service_bus.connection_string,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate that every field is populated and endpoints are usable
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("Authentication.ClientId", &self.auth.client_id),
            ("Authentication.ClientSecret", &self.auth.client_secret),
            ("Authentication.Resource", &self.auth.resource),
            ("Authentication.Uri", &self.auth.token_endpoint_uri),
            ("ServiceBus.ConnectionString", &self.endpoint_uri),
            ("Network.Ssid", &self.network.ssid),
            ("Network.Password", &self.network.password),
        ] {
            if value.trim().is_empty() {
                return Err(TelemetryNodeError::ConfigMalformed(format!(
                    "{} cannot be empty",
                    name
                )));
            }
        }

        for (name, value) in [
            ("Authentication.Uri", &self.auth.token_endpoint_uri),
            ("ServiceBus.ConnectionString", &self.endpoint_uri),
        ] {
            let url = Url::parse(value).map_err(|e| {
                TelemetryNodeError::ConfigMalformed(format!("{} is not a valid URL: {}", name, e))
            })?;
            if url.scheme() != "https" && url.scheme() != "http" {
                return Err(TelemetryNodeError::ConfigMalformed(format!(
                    "{} must use http or https, got {}",
                    name,
                    url.scheme()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_SECRETS: &str = r#"{
        "Authentication": {
            "ClientId": "node-42",
            "ClientSecret": "s3cr3t",
            "Resource": "https://servicebus.azure.net",
            "Uri": "https://login.example.com/tenant/oauth2/token"
        },
        "ServiceBus": {"ConnectionString": "https://bus.example.com/telemetry/messages"},
        "Network": {"Ssid": "fleet-ap", "Password": "hunter22"}
    }"#;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_load_valid_secrets() {
        let temp_file = write_temp(VALID_SECRETS);
        let config = Configuration::load(temp_file.path()).unwrap();

        assert_eq!(config.network.ssid, "fleet-ap");
        assert_eq!(config.network.password, "hunter22");
        assert_eq!(config.auth.client_id, "node-42");
        assert_eq!(config.auth.client_secret, "s3cr3t");
        assert_eq!(config.auth.resource, "https://servicebus.azure.net");
        assert_eq!(
            config.auth.token_endpoint_uri,
            "https://login.example.com/tenant/oauth2/token"
        );
        assert_eq!(config.endpoint_uri, "https://bus.example.com/telemetry/messages");
    }

    #[test]
    fn test_decoding_is_deterministic() {
        let first = Configuration::from_slice(VALID_SECRETS.as_bytes()).unwrap();
        let second = Configuration::from_slice(VALID_SECRETS.as_bytes()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");

        match Configuration::load(&path) {
            Err(TelemetryNodeError::ConfigMissing(p)) => assert!(p.ends_with("secrets.json")),
            other => panic!("Expected ConfigMissing, got: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_json() {
        let temp_file = write_temp("{ \"Authentication\": ");
        let result = Configuration::load(temp_file.path());
        assert!(matches!(result, Err(TelemetryNodeError::ConfigMalformed(_))));
    }

    #[test]
    fn test_missing_section() {
        let result = Configuration::from_slice(
            br#"{"Authentication": {"ClientId": "a", "ClientSecret": "b", "Resource": "c", "Uri": "https://x/token"},
                "Network": {"Ssid": "s", "Password": "p"}}"#,
        );
        assert!(matches!(result, Err(TelemetryNodeError::ConfigMalformed(_))));
    }

    #[test]
    fn test_empty_field_rejected() {
        let secrets = VALID_SECRETS.replace("\"fleet-ap\"", "\"\"");
        match Configuration::from_slice(secrets.as_bytes()) {
            Err(TelemetryNodeError::ConfigMalformed(msg)) => assert!(msg.contains("Network.Ssid")),
            other => panic!("Expected ConfigMalformed, got: {:?}", other),
        }
    }

    #[test]
    fn test_absent_field_rejected() {
        let secrets = VALID_SECRETS.replace("\"ClientSecret\": \"s3cr3t\",", "");
        match Configuration::from_slice(secrets.as_bytes()) {
            Err(TelemetryNodeError::ConfigMalformed(msg)) => {
                assert!(msg.contains("Authentication.ClientSecret"))
            }
            other => panic!("Expected ConfigMalformed, got: {:?}", other),
        }
    }

    #[test]
    fn test_relative_endpoint_rejected() {
        let secrets = VALID_SECRETS.replace(
            "https://bus.example.com/telemetry/messages",
            "bus.example.com/messages",
        );
        let result = Configuration::from_slice(secrets.as_bytes());
        assert!(matches!(result, Err(TelemetryNodeError::ConfigMalformed(_))));
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        let secrets = VALID_SECRETS.replace(
            "https://login.example.com/tenant/oauth2/token",
            "ftp://login.example.com/token",
        );
        let result = Configuration::from_slice(secrets.as_bytes());
        assert!(matches!(result, Err(TelemetryNodeError::ConfigMalformed(_))));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Configuration::from_slice(VALID_SECRETS.as_bytes()).unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("fleet-ap"));
        assert!(!rendered.contains("hunter22"));
        assert!(!rendered.contains("s3cr3t"));
    }
}
