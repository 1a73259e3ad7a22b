//! Clients for the systems a host is provisioned through.
//!
//! [`oneview`] talks to HPE OneView (profiles, power, BMC credentials) and
//! [`ilo`] drives iLO virtual media over Redfish.

pub mod ilo;
pub mod oneview;
mod traits;

pub use traits::{
    BmcSession, HardwareManager, HardwareRef, MediaController, MediaSlot, MpAddress, PowerAction,
    RedfishSession,
};

#[cfg(test)]
pub use traits::{MockHardwareManager, MockMediaController};
