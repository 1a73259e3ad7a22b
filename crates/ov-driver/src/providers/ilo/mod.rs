//! HPE iLO virtual media.
//!
//! Implements the [`MediaController`](super::MediaController) trait over
//! Redfish for iLO 4 and iLO 5.

mod client;
mod models;

pub use client::IloMedia;
pub use models::*;
