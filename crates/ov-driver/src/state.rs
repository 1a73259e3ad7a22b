//! Host lifecycle states.
//!
//! [`ProvisionStage`] tracks how far `create` got on this driver instance;
//! it lives in memory only. [`HostState`] is the externally visible power
//! status, re-queried from OneView on every call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Provisioning stages, in the order `create` walks through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    /// Required configuration is missing.
    Unconfigured,
    /// Configuration validated, nothing created yet.
    Configured,
    /// Server profile exists on OneView.
    ProfileCreated,
    /// Installer and kickstart images mounted.
    MediaMounted,
    /// Power-on issued.
    PoweredOn,
    /// Waiting for the installed OS to answer over SSH.
    OsInstalling,
    /// Driver public key appended to the host.
    KeysInjected,
    /// Host is installed and reachable with the driver key.
    Ready,
    /// Server profile deleted.
    Removed,
}

impl ProvisionStage {
    /// The stage `create` moves to after this one.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Unconfigured => Self::Unconfigured,
            Self::Configured => Self::ProfileCreated,
            Self::ProfileCreated => Self::MediaMounted,
            Self::MediaMounted => Self::PoweredOn,
            Self::PoweredOn => Self::OsInstalling,
            Self::OsInstalling => Self::KeysInjected,
            Self::KeysInjected | Self::Ready => Self::Ready,
            Self::Removed => Self::Removed,
        }
    }

    /// Whether `create` may start from this stage.
    #[must_use]
    pub fn can_create(self) -> bool {
        !matches!(self, Self::Unconfigured)
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::ProfileCreated => "profile_created",
            Self::MediaMounted => "media_mounted",
            Self::PoweredOn => "powered_on",
            Self::OsInstalling => "os_installing",
            Self::KeysInjected => "keys_injected",
            Self::Ready => "ready",
            Self::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Power status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    /// Powered on.
    Running,
    /// Powered off.
    Stopped,
    /// Power state unknown or in transition.
    Error,
}

impl HostState {
    /// Map a OneView `powerState` value. Anything other than `On`/`Off`
    /// (including `Unknown`, `PoweringOn`, `Resetting`) is `Error`.
    #[must_use]
    pub fn from_power_state(value: &str) -> Self {
        if value.eq_ignore_ascii_case("on") {
            Self::Running
        } else if value.eq_ignore_ascii_case("off") {
            Self::Stopped
        } else {
            Self::Error
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Error => write!(f, "Error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progression() {
        let mut stage = ProvisionStage::Configured;
        let mut seen = vec![stage];
        while stage != ProvisionStage::Ready {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                ProvisionStage::Configured,
                ProvisionStage::ProfileCreated,
                ProvisionStage::MediaMounted,
                ProvisionStage::PoweredOn,
                ProvisionStage::OsInstalling,
                ProvisionStage::KeysInjected,
                ProvisionStage::Ready,
            ]
        );
        assert_eq!(ProvisionStage::Removed.next(), ProvisionStage::Removed);
        assert!(!ProvisionStage::Unconfigured.can_create());
    }

    #[test]
    fn test_power_state_mapping() {
        assert_eq!(HostState::from_power_state("On"), HostState::Running);
        assert_eq!(HostState::from_power_state("off"), HostState::Stopped);
        assert_eq!(HostState::from_power_state("Unknown"), HostState::Error);
        assert_eq!(HostState::from_power_state("PoweringOff"), HostState::Error);
        assert_eq!(HostState::from_power_state(""), HostState::Error);
    }
}
