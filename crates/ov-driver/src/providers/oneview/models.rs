//! OneView REST API request and response models.
//!
//! Only the fields the driver reads are modelled; everything else in the
//! resources is ignored on deserialization.

use serde::{Deserialize, Serialize};

// ============================================================================
// Version and login
// ============================================================================

/// `GET /rest/version` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiVersion {
    /// Highest API version the appliance accepts.
    pub current_version: u32,
    /// Lowest API version the appliance accepts.
    pub minimum_version: u32,
}

/// `POST /rest/login-sessions` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest<'a> {
    /// User name.
    pub user_name: &'a str,
    /// Password.
    pub password: &'a str,
    /// Authentication directory, omitted for local users.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_login_domain: Option<&'a str>,
}

/// `POST /rest/login-sessions` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Session token sent back in the `Auth` header.
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

// ============================================================================
// Collections
// ============================================================================

/// Paged collection wrapper.
#[derive(Debug, Deserialize)]
pub struct Collection<T> {
    /// Collection members.
    #[serde(default = "Vec::new")]
    pub members: Vec<T>,
}

// ============================================================================
// Server hardware
// ============================================================================

/// Server hardware resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHardware {
    /// Display name.
    pub name: String,
    /// Resource URI.
    pub uri: String,
    /// Power state (`On`, `Off`, `Unknown`, ...).
    #[serde(default)]
    pub power_state: String,
    /// Management processor model.
    #[serde(default)]
    pub mp_model: String,
    /// Management processor host information.
    #[serde(default)]
    pub mp_host_info: Option<MpHostInfo>,
}

/// Management processor host information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpHostInfo {
    /// Addresses the management processor answers on.
    #[serde(default, rename = "mpIpAddresses")]
    pub mp_ip_addresses: Vec<MpIpAddress>,
}

/// One management processor address.
#[derive(Debug, Clone, Deserialize)]
pub struct MpIpAddress {
    /// IP address.
    pub address: String,
    /// Address type.
    #[serde(rename = "type", default)]
    pub address_type: String,
}

/// `GET {hardware}/remoteConsoleUrl` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConsoleUrl {
    /// `hplocons://addr=<ip>&sessionkey=<token>`.
    pub remote_console_url: String,
}

/// `PUT {hardware}/powerState` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerStateRequest {
    /// Target power state.
    pub power_state: String,
    /// How the power button is pressed.
    pub power_control: String,
}

// ============================================================================
// Profiles and templates
// ============================================================================

/// Named resource with a URI (templates and profiles).
#[derive(Debug, Clone, Deserialize)]
pub struct NamedResource {
    /// Display name.
    pub name: String,
    /// Resource URI.
    pub uri: String,
}

// ============================================================================
// Tasks
// ============================================================================

/// Asynchronous task resource.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task state (`Running`, `Completed`, `Error`, ...).
    pub task_state: String,
    /// Error details for failed tasks.
    #[serde(default)]
    pub task_errors: Vec<TaskError>,
}

/// Error attached to a failed task.
#[derive(Debug, Deserialize)]
pub struct TaskError {
    /// Human readable message.
    #[serde(default)]
    pub message: String,
}

/// Outcome of a task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Still running.
    Pending,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
}

impl Task {
    /// Classify the task state.
    #[must_use]
    pub fn outcome(&self) -> TaskOutcome {
        match self.task_state.as_str() {
            "Completed" | "Warning" => TaskOutcome::Succeeded,
            "Error" | "Terminated" | "Killed" => TaskOutcome::Failed,
            _ => TaskOutcome::Pending,
        }
    }

    /// Joined error messages.
    #[must_use]
    pub fn error_message(&self) -> String {
        if self.task_errors.is_empty() {
            return format!("task ended in state {}", self.task_state);
        }
        self.task_errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Error body returned by OneView on failed requests.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Error code, e.g. `DUPLICATE_NAME` or `RESOURCE_NOT_FOUND`.
    #[serde(default)]
    pub error_code: String,
    /// Message.
    #[serde(default)]
    pub message: String,
}
