//! HPE OneView fleet manager.
//!
//! Implements the [`HardwareManager`](super::HardwareManager) trait on top
//! of the OneView REST API: hardware lookup, server profiles, power and
//! the iLO credentials OneView proxies through its remote console URL.

mod client;
mod models;

pub use client::{parse_remote_console_url, OneView, OneViewSession};
pub use models::*;
