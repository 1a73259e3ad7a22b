//! Driver configuration.
//!
//! The configuration is assembled once, either from a YAML file or from
//! command-line flags, and handed to the [`Driver`](crate::Driver) by value.
//! Nothing in the crate mutates it afterwards; values that depend on other
//! fields (kickstart URL, profile name, key path) are computed on demand.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{DriverError, Result};

/// Name of this driver, used as prefix for flags, env vars and profile names.
pub const DRIVER_NAME: &str = "ov";

/// Default OneView REST API version.
pub const DEFAULT_API_VERSION: u32 = 1800;

/// Default OneView user.
pub const DEFAULT_ONEVIEW_USER: &str = "administrator";

/// Default SSH user on the provisioned host.
pub const DEFAULT_SSH_USER: &str = "root";

/// Default SSH port on the provisioned host.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Port the Docker daemon listens on for [`ProvisioningConfig::docker_url`].
pub const DOCKER_PORT: u16 = 2376;

const PROFILE_PURPOSE: &str = "docker-machine";

const REDACTED: &str = "<redacted>";

/// HPE OneView connection and target settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OneViewConfig {
    /// OneView endpoint URL.
    #[serde(default)]
    pub endpoint: String,
    /// REST API version sent as `X-API-Version`.
    #[serde(default = "default_api_version")]
    pub api_version: u32,
    /// OneView user.
    #[serde(default = "default_oneview_user")]
    pub user: String,
    /// OneView password.
    #[serde(default)]
    pub password: String,
    /// Optional authentication domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Server profile template the new profile is created from.
    #[serde(default)]
    pub server_profile_template: String,
    /// Server hardware name, exactly as OneView displays it.
    #[serde(default)]
    pub server_hardware: String,
    /// Verify the OneView TLS certificate.
    #[serde(default)]
    pub verify_tls: bool,
}

/// Settings for the server being installed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// IP address the installed OS comes up on.
    #[serde(default)]
    pub address: String,
    /// Password of the SSH user after installation.
    #[serde(default)]
    pub root_password: String,
    /// Base URL holding `<address>.iso` kickstart images.
    #[serde(default)]
    pub kickstart_base_url: String,
    /// OS installer image URL.
    #[serde(default)]
    pub os_url: String,
    /// Verify the iLO TLS certificate. iLOs ship self-signed certificates,
    /// so this is an explicit opt-in.
    #[serde(default)]
    pub bmc_verify_tls: bool,
}

/// Per-machine settings supplied by the caller rather than the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Logical machine name.
    pub name: String,
    /// Directory where machine artifacts (SSH keys) are stored.
    pub store_path: PathBuf,
    /// SSH user on the installed host.
    pub ssh_user: String,
    /// SSH port on the installed host.
    pub ssh_port: u16,
}

impl MachineConfig {
    /// Machine settings with the default SSH user and port.
    #[must_use]
    pub fn new(name: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            store_path: store_path.into(),
            ssh_user: DEFAULT_SSH_USER.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
        }
    }
}

/// Layout of the YAML configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// OneView section.
    pub oneview: OneViewConfig,
    /// Server section.
    pub server: ServerConfig,
}

impl ConfigFile {
    /// Load a configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Validation(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents).map_err(|e| match e {
            DriverError::Validation(msg) => {
                DriverError::Validation(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    /// Copy with passwords replaced, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [&mut copy.oneview.password, &mut copy.server.root_password] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        copy
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    /// Returns error if the YAML does not match the expected layout.
    pub fn parse(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| DriverError::Validation(format!("Failed to parse config: {e}")))
    }
}

/// Complete, immutable input of one lifecycle operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// OneView settings.
    pub oneview: OneViewConfig,
    /// Server settings.
    pub server: ServerConfig,
    /// Machine settings.
    pub machine: MachineConfig,
}

impl ProvisioningConfig {
    /// Combine the file/flag sections with the machine settings.
    #[must_use]
    pub fn new(file: ConfigFile, machine: MachineConfig) -> Self {
        let config = Self {
            oneview: file.oneview,
            server: file.server,
            machine,
        };
        debug!(
            endpoint = %config.oneview.endpoint,
            hardware = %config.oneview.server_hardware,
            address = %config.server.address,
            machine = %config.machine.name,
            "Driver configuration assembled"
        );
        config
    }

    /// Kickstart image URL: `{kickstart_base_url}/{address}.iso`.
    #[must_use]
    pub fn kickstart_url(&self) -> String {
        format!(
            "{}/{}.iso",
            self.server.kickstart_base_url.trim_end_matches('/'),
            self.server.address.trim()
        )
    }

    /// Server profile name: `ov-docker-machine-{machine}`.
    #[must_use]
    pub fn profile_name(&self) -> String {
        format!("{DRIVER_NAME}-{PROFILE_PURPOSE}-{}", self.machine.name)
    }

    /// Path of the generated private key; the public key sits next to it
    /// with a `.pub` suffix.
    #[must_use]
    pub fn ssh_key_path(&self) -> PathBuf {
        self.machine
            .store_path
            .join("machines")
            .join(&self.machine.name)
            .join("id_ed25519")
    }

    /// Docker endpoint of the installed host: `tcp://{address}:2376`.
    ///
    /// # Errors
    /// Returns error if the server address is empty.
    pub fn docker_url(&self) -> Result<String> {
        let address = self.address()?;
        Ok(format!("tcp://{address}:{DOCKER_PORT}"))
    }

    /// Server address.
    ///
    /// # Errors
    /// Returns error if the server address is empty.
    pub fn address(&self) -> Result<&str> {
        let address = self.server.address.trim();
        if address.is_empty() {
            return Err(DriverError::Validation(
                "server address is not configured".into(),
            ));
        }
        Ok(address)
    }

    /// Check every field required before anything is created.
    ///
    /// # Errors
    /// Returns a [`DriverError::Validation`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        require_url("oneview endpoint", &self.oneview.endpoint)?;
        require("oneview user", &self.oneview.user)?;
        require("oneview password", &self.oneview.password)?;
        require(
            "oneview server-profile-template",
            &self.oneview.server_profile_template,
        )?;
        require("oneview server-hardware", &self.oneview.server_hardware)?;
        if self.oneview.api_version == 0 {
            return Err(DriverError::Validation(
                "oneview api-version must be set".into(),
            ));
        }
        self.address()?;
        require("server root-password", &self.server.root_password)?;
        require_url("server os-url", &self.server.os_url)?;
        require_url("server kickstart-base-url", &self.server.kickstart_base_url)?;
        require("machine name", &self.machine.name)?;
        if self.machine.ssh_port == 0 {
            return Err(DriverError::Validation("ssh port must not be 0".into()));
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DriverError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn require_url(field: &str, value: &str) -> Result<()> {
    require(field, value)?;
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| DriverError::Validation(format!("{field} is not a valid URL: {e}")))
}

fn default_api_version() -> u32 {
    DEFAULT_API_VERSION
}

fn default_oneview_user() -> String {
    DEFAULT_ONEVIEW_USER.to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_config() -> ProvisioningConfig {
        let file = ConfigFile {
            oneview: OneViewConfig {
                endpoint: "https://oneview.example".into(),
                api_version: DEFAULT_API_VERSION,
                user: DEFAULT_ONEVIEW_USER.into(),
                password: "secret".into(),
                domain: None,
                server_profile_template: "RHEL-template".into(),
                server_hardware: "SGH652SV73, bay 5".into(),
                verify_tls: false,
            },
            server: ServerConfig {
                address: "10.0.0.5".into(),
                root_password: "password".into(),
                kickstart_base_url: "http://web01/ks".into(),
                os_url: "http://web01/iso/os.iso".into(),
                bmc_verify_tls: false,
            },
        };
        ProvisioningConfig::new(file, MachineConfig::new("node-1", "/tmp/ov-driver"))
    }

    #[test]
    fn test_kickstart_url_derivation() {
        let mut config = sample_config();
        config.server.kickstart_base_url = "http://h/b".into();
        config.server.address = "1.2.3.4".into();
        assert_eq!(config.kickstart_url(), "http://h/b/1.2.3.4.iso");

        config.server.kickstart_base_url = "http://h/b/".into();
        assert_eq!(config.kickstart_url(), "http://h/b/1.2.3.4.iso");

        config.server.address = " 1.2.3.4\n".into();
        assert_eq!(config.kickstart_url(), "http://h/b/1.2.3.4.iso");
        assert_eq!(config.address().unwrap(), "1.2.3.4");
    }

    #[test]
    fn test_profile_name_and_key_path() {
        let config = sample_config();
        assert_eq!(config.profile_name(), "ov-docker-machine-node-1");
        assert_eq!(
            config.ssh_key_path(),
            PathBuf::from("/tmp/ov-driver/machines/node-1/id_ed25519")
        );
    }

    #[test]
    fn test_docker_url() {
        let config = sample_config();
        assert_eq!(config.docker_url().unwrap(), "tcp://10.0.0.5:2376");

        let mut config = sample_config();
        config.server.address = String::new();
        assert!(matches!(
            config.docker_url(),
            Err(DriverError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_reports_first_missing_field() {
        assert!(sample_config().validate().is_ok());

        let mut config = sample_config();
        config.oneview.server_hardware = "  ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server-hardware"));

        let mut config = sample_config();
        config.server.os_url = "not a url".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("os-url"));

        let mut config = sample_config();
        config.machine.ssh_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml_with_defaults() {
        let yaml = r#"
oneview:
  endpoint: https://192.168.2.6
  password: password
  server-profile-template: Rancher-template
  server-hardware: "SGH652SV73, bay 5"
server:
  address: 172.16.1.50
  root-password: password
  kickstart-base-url: http://172.16.1.120/ks
  os-url: http://172.16.1.120/CentOS-7-x86_64-Minimal-2003.iso
"#;
        let file = ConfigFile::parse(yaml).unwrap();
        assert_eq!(file.oneview.api_version, DEFAULT_API_VERSION);
        assert_eq!(file.oneview.user, DEFAULT_ONEVIEW_USER);
        assert_eq!(file.oneview.domain, None);
        assert!(!file.server.bmc_verify_tls);
        assert_eq!(file.oneview.server_hardware, "SGH652SV73, bay 5");

        let config = ProvisioningConfig::new(file, MachineConfig::new("rancher", "/tmp"));
        assert_eq!(
            config.kickstart_url(),
            "http://172.16.1.120/ks/172.16.1.50.iso"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_redacted_hides_passwords() {
        let config = sample_config();
        let file = ConfigFile {
            oneview: config.oneview,
            server: config.server,
        };
        let yaml = serde_yaml::to_string(&file.redacted()).unwrap();
        assert!(!yaml.contains("secret"));
        assert!(!yaml.contains("root-password: password"));
        assert!(yaml.contains("SGH652SV73, bay 5"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ConfigFile::load(Path::new("/nonexistent/ov.yaml")).unwrap_err();
        assert!(matches!(err, DriverError::Validation(_)));
    }
}
