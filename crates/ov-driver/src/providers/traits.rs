//! Provider traits and common types for the fleet manager and the BMC.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};
use crate::state::HostState;

/// Power transition requested from the fleet manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerAction {
    /// Power the server on.
    On,
    /// Power the server off.
    Off,
}

impl PowerAction {
    /// OneView `powerState` value for this action.
    #[must_use]
    pub fn as_power_state(self) -> &'static str {
        match self {
            Self::On => "On",
            Self::Off => "Off",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_power_state())
    }
}

/// Management processor address reported for a hardware unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpAddress {
    /// IP address.
    pub address: String,
    /// Address type (`DHCP`, `Static`, `LinkLocal`, ...).
    pub kind: String,
}

/// A hardware unit resolved by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareRef {
    /// Name as displayed by OneView.
    pub name: String,
    /// Resource URI.
    pub uri: String,
    /// Power state at resolution time.
    pub power_state: String,
    /// Management processor model (`iLO4`, `iLO5`, ...).
    pub mp_model: String,
    /// Management processor addresses.
    pub mp_addresses: Vec<MpAddress>,
}

impl HardwareRef {
    /// First management processor address that is not link-local.
    #[must_use]
    pub fn management_address(&self) -> Option<&str> {
        self.mp_addresses
            .iter()
            .find(|a| !a.kind.eq_ignore_ascii_case("LinkLocal") && !a.address.is_empty())
            .map(|a| a.address.as_str())
    }
}

/// Credentials for one BMC, proxied by the fleet manager.
#[derive(Clone, PartialEq, Eq)]
pub struct BmcSession {
    /// BMC address (IP or host name).
    pub address: String,
    /// Base URL of the BMC's Redfish service, e.g. `https://10.0.0.21`.
    pub base_url: String,
    /// Session token sent as `X-Auth-Token`.
    pub token: String,
    /// Management processor model as reported by the fleet manager.
    pub model: String,
}

impl fmt::Debug for BmcSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmcSession")
            .field("address", &self.address)
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// An opened Redfish session on a BMC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedfishSession {
    /// The BMC credentials the session was opened with.
    pub bmc: BmcSession,
    /// URI of the session resource, when the BMC exposes it.
    pub session_uri: Option<String>,
}

/// Logical virtual media slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSlot {
    /// Virtual DVD drive.
    Dvd,
    /// Virtual floppy drive.
    Floppy,
}

impl MediaSlot {
    /// The Redfish media type that identifies this slot.
    #[must_use]
    pub fn media_type(self) -> &'static str {
        match self {
            Self::Dvd => "DVD",
            Self::Floppy => "Floppy",
        }
    }
}

impl fmt::Display for MediaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dvd => write!(f, "dvd"),
            Self::Floppy => write!(f, "floppy"),
        }
    }
}

impl FromStr for MediaSlot {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dvd" => Ok(Self::Dvd),
            "floppy" => Ok(Self::Floppy),
            other => Err(DriverError::Validation(format!(
                "unknown virtual media slot: {other}"
            ))),
        }
    }
}

/// Fleet manager operations: hardware lookup, profiles and power.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HardwareManager: Send + Sync {
    /// Check that the endpoint is reachable and accepts the credentials.
    async fn check_connection(&self) -> Result<()>;

    /// Resolve a hardware unit by its display name.
    async fn resolve_hardware(&self, name: &str) -> Result<HardwareRef>;

    /// Create a server profile from a template, bound to `hardware`.
    async fn create_profile(
        &self,
        profile_name: &str,
        template_name: &str,
        hardware: &HardwareRef,
    ) -> Result<()>;

    /// Delete a server profile by name.
    async fn delete_profile(&self, profile_name: &str) -> Result<()>;

    /// Issue a power transition and read the power state back once.
    async fn set_power(&self, hardware: &HardwareRef, action: PowerAction) -> Result<HostState>;

    /// Current power state.
    async fn power_state(&self, hardware: &HardwareRef) -> Result<HostState>;

    /// BMC credentials for the hardware unit.
    async fn bmc_session(&self, hardware: &HardwareRef) -> Result<BmcSession>;
}

/// BMC virtual media operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaController: Send + Sync {
    /// Open a Redfish session on the BMC.
    async fn open_session(&self, bmc: &BmcSession) -> Result<RedfishSession>;

    /// Mount `image_url` in `slot`.
    async fn insert_media(
        &self,
        session: &RedfishSession,
        slot: MediaSlot,
        image_url: &str,
    ) -> Result<()>;

    /// Eject whatever is mounted in `slot`.
    async fn eject_media(&self, session: &RedfishSession, slot: MediaSlot) -> Result<()>;

    /// Log the session out. Failures are logged by the implementation.
    async fn close_session(&self, session: RedfishSession);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_slot_parse_and_display() {
        assert_eq!("DVD".parse::<MediaSlot>().unwrap(), MediaSlot::Dvd);
        assert_eq!("floppy".parse::<MediaSlot>().unwrap(), MediaSlot::Floppy);
        assert!("usb".parse::<MediaSlot>().is_err());
        assert_eq!(MediaSlot::Floppy.to_string(), "floppy");
        assert_eq!(MediaSlot::Dvd.media_type(), "DVD");
    }

    #[test]
    fn test_bmc_session_debug_redacts_token() {
        let session = BmcSession {
            address: "10.0.0.21".into(),
            base_url: "https://10.0.0.21".into(),
            token: "abcdef".into(),
            model: "iLO5".into(),
        };
        let debug = format!("{session:?}");
        assert!(!debug.contains("abcdef"));
        assert!(debug.contains("iLO5"));
    }
}
