//! ov-driver CLI - provision HPE servers through OneView and iLO virtual media.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ov_driver::config::{
    ConfigFile, MachineConfig, OneViewConfig, ProvisioningConfig, ServerConfig,
    DEFAULT_API_VERSION, DEFAULT_ONEVIEW_USER, DEFAULT_SSH_PORT, DEFAULT_SSH_USER,
};
use ov_driver::OneViewDriver;

/// Provision and manage bare metal HPE servers.
#[derive(Parser)]
#[command(name = "ov-driver")]
#[command(about = "Provision HPE servers through OneView and iLO virtual media")]
#[command(version)]
struct Cli {
    /// YAML configuration file (or set `OV_YAML`). Exclusive with the
    /// individual `--ov-*` flags.
    #[arg(long = "ov-yaml", env = "OV_YAML")]
    yaml: Option<PathBuf>,

    #[command(flatten)]
    flags: ConfigFlags,

    /// Machine name.
    #[arg(long, env = "OV_MACHINE_NAME", default_value = "default")]
    machine_name: String,

    /// Directory for machine artifacts such as SSH keys.
    #[arg(long, env = "MACHINE_STORAGE_PATH", default_value = ".docker/machine")]
    store_path: PathBuf,

    /// SSH user on the installed host.
    #[arg(long = "ov-ssh-user", env = "OV_SSH_USER", default_value = DEFAULT_SSH_USER)]
    ssh_user: String,

    /// SSH port on the installed host.
    #[arg(long = "ov-ssh-port", env = "OV_SSH_PORT", default_value_t = DEFAULT_SSH_PORT)]
    ssh_port: u16,

    /// Enable debug logging (or set `OV_DEBUG`).
    #[arg(
        long = "ov-debug",
        env = "OV_DEBUG",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Individual configuration flags, used when no YAML file is given.
#[derive(Args)]
struct ConfigFlags {
    /// OneView endpoint URL.
    #[arg(long = "ov-oneview-endpoint", env = "OV_ONEVIEW_ENDPOINT", conflicts_with = "yaml")]
    oneview_endpoint: Option<String>,

    /// OneView REST API version.
    #[arg(long = "ov-oneview-api-version", env = "OV_ONEVIEW_API_VERSION", conflicts_with = "yaml")]
    oneview_api_version: Option<u32>,

    /// OneView user.
    #[arg(long = "ov-oneview-user", env = "OV_ONEVIEW_USER", conflicts_with = "yaml")]
    oneview_user: Option<String>,

    /// OneView password.
    #[arg(long = "ov-oneview-password", env = "OV_ONEVIEW_PASSWORD", conflicts_with = "yaml")]
    oneview_password: Option<String>,

    /// OneView authentication domain.
    #[arg(long = "ov-oneview-domain", env = "OV_ONEVIEW_DOMAIN", conflicts_with = "yaml")]
    oneview_domain: Option<String>,

    /// Server profile template name.
    #[arg(
        long = "ov-oneview-server-profile-template",
        env = "OV_ONEVIEW_SERVER_PROFILE_TEMPLATE",
        conflicts_with = "yaml"
    )]
    server_profile_template: Option<String>,

    /// Server hardware name, e.g. "SGH652SV73, bay 5".
    #[arg(
        long = "ov-oneview-server-hardware",
        env = "OV_ONEVIEW_SERVER_HARDWARE",
        conflicts_with = "yaml"
    )]
    server_hardware: Option<String>,

    /// Verify the OneView TLS certificate.
    #[arg(
        long = "ov-oneview-verify-tls",
        env = "OV_ONEVIEW_VERIFY_TLS",
        conflicts_with = "yaml",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    oneview_verify_tls: bool,

    /// Address the installed OS comes up on.
    #[arg(long = "ov-server-address", env = "OV_SERVER_ADDRESS", conflicts_with = "yaml")]
    server_address: Option<String>,

    /// Root password of the installed OS.
    #[arg(long = "ov-server-root-password", env = "OV_SERVER_ROOT_PASSWORD", conflicts_with = "yaml")]
    root_password: Option<String>,

    /// Base URL of the per-host kickstart images.
    #[arg(
        long = "ov-server-kickstart-base-url",
        env = "OV_SERVER_KICKSTART_BASE_URL",
        conflicts_with = "yaml"
    )]
    kickstart_base_url: Option<String>,

    /// OS installer image URL.
    #[arg(long = "ov-server-os-url", env = "OV_SERVER_OS_URL", conflicts_with = "yaml")]
    os_url: Option<String>,

    /// Verify the iLO TLS certificate.
    #[arg(
        long = "ov-server-bmc-verify-tls",
        env = "OV_SERVER_BMC_VERIFY_TLS",
        conflicts_with = "yaml",
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new()
    )]
    bmc_verify_tls: bool,
}

impl ConfigFlags {
    fn into_config_file(self) -> ConfigFile {
        ConfigFile {
            oneview: OneViewConfig {
                endpoint: self.oneview_endpoint.unwrap_or_default(),
                api_version: self.oneview_api_version.unwrap_or(DEFAULT_API_VERSION),
                user: self
                    .oneview_user
                    .unwrap_or_else(|| DEFAULT_ONEVIEW_USER.to_string()),
                password: self.oneview_password.unwrap_or_default(),
                domain: self.oneview_domain,
                server_profile_template: self.server_profile_template.unwrap_or_default(),
                server_hardware: self.server_hardware.unwrap_or_default(),
                verify_tls: self.oneview_verify_tls,
            },
            server: ServerConfig {
                address: self.server_address.unwrap_or_default(),
                root_password: self.root_password.unwrap_or_default(),
                kickstart_base_url: self.kickstart_base_url.unwrap_or_default(),
                os_url: self.os_url.unwrap_or_default(),
                bmc_verify_tls: self.bmc_verify_tls,
            },
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install the OS and the driver SSH key on the server.
    Create,

    /// Delete the server profile.
    Remove,

    /// Power on.
    Start,

    /// Power off.
    Stop,

    /// Power off, then on.
    Restart,

    /// Power off immediately.
    Kill,

    /// Print the power state.
    State,

    /// Print the Docker endpoint URL.
    Url,

    /// Print the host address.
    Ip,

    /// Validate configuration, credentials and image URLs.
    PreCreateCheck,

    /// Print the effective configuration with passwords redacted.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let file = match &cli.yaml {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => cli.flags.into_config_file(),
    };

    if matches!(cli.command, Commands::ShowConfig) {
        print!("{}", serde_yaml::to_string(&file.redacted())?);
        return Ok(());
    }

    let mut machine = MachineConfig::new(&cli.machine_name, &cli.store_path);
    machine.ssh_user = cli.ssh_user;
    machine.ssh_port = cli.ssh_port;
    let config = ProvisioningConfig::new(file, machine);

    let mut driver =
        OneViewDriver::from_config(config).context("Failed to initialize ov driver")?;

    match cli.command {
        Commands::Create => {
            driver.create().await.context("Create failed")?;
            info!(machine = %driver.machine_name(), url = %driver.url()?, "Machine created");
        }
        Commands::Remove => driver.remove().await.context("Remove failed")?,
        Commands::Start => {
            let state = driver.start().await.context("Start failed")?;
            println!("{state}");
        }
        Commands::Stop => {
            let state = driver.stop().await.context("Stop failed")?;
            println!("{state}");
        }
        Commands::Restart => {
            let state = driver.restart().await.context("Restart failed")?;
            println!("{state}");
        }
        Commands::Kill => {
            let state = driver.kill().await.context("Kill failed")?;
            println!("{state}");
        }
        Commands::State => println!("{}", driver.state().await?),
        Commands::Url => println!("{}", driver.url()?),
        Commands::Ip => println!("{}", driver.ip()?),
        Commands::PreCreateCheck => {
            driver.pre_create_check().await?;
            println!("OK");
        }
        Commands::ShowConfig => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flag_on_command_line() {
        let cli = Cli::try_parse_from(["ov-driver", "--ov-debug", "url"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Url));
    }

    // Env-driven flags share process state, so they are exercised in one test.
    #[test]
    fn test_boolean_flags_from_environment() {
        std::env::set_var("OV_DEBUG", "1");
        std::env::set_var("OV_SERVER_BMC_VERIFY_TLS", "true");
        let cli = Cli::try_parse_from(["ov-driver", "url"]).unwrap();
        assert!(cli.debug);
        assert!(cli.flags.bmc_verify_tls);
        assert!(!cli.flags.oneview_verify_tls);

        std::env::set_var("OV_DEBUG", "0");
        std::env::set_var("OV_SERVER_BMC_VERIFY_TLS", "false");
        let cli = Cli::try_parse_from(["ov-driver", "state"]).unwrap();
        assert!(!cli.debug);
        assert!(!cli.flags.bmc_verify_tls);

        std::env::remove_var("OV_DEBUG");
        std::env::remove_var("OV_SERVER_BMC_VERIFY_TLS");
    }
}
