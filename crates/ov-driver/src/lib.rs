//! Bare metal provisioning of HPE servers for docker-machine.
//!
//! This crate installs an operating system on a physical HPE server and
//! hands it over ready for SSH: it creates a server profile on HPE OneView,
//! mounts an installer image and a per-host kickstart image through iLO
//! virtual media, powers the server on, waits for the installed OS to answer
//! over SSH and installs a freshly generated key.
//!
//! # Example
//!
//! ```rust,ignore
//! use ov_driver::config::{ConfigFile, MachineConfig, ProvisioningConfig};
//! use ov_driver::OneViewDriver;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let file = ConfigFile::load("ov.yaml".as_ref())?;
//!     let config = ProvisioningConfig::new(file, MachineConfig::new("node-1", "/var/lib/ov"));
//!
//!     let mut driver = OneViewDriver::from_config(config)?;
//!     driver.pre_create_check().await?;
//!     driver.create().await?;
//!
//!     println!("{}", driver.url()?);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod providers;
pub mod state;

pub use config::{ConfigFile, MachineConfig, ProvisioningConfig};
pub use driver::{Driver, OneViewDriver};
pub use error::{DriverError, Result};
pub use providers::{HardwareManager, MediaController, MediaSlot, PowerAction};
pub use state::{HostState, ProvisionStage};
