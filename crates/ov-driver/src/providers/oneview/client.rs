//! HPE OneView API client implementation.

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::models::{
    ApiVersion, Collection, ErrorBody, LoginRequest, LoginResponse, NamedResource,
    PowerStateRequest, RemoteConsoleUrl, ServerHardware, Task, TaskOutcome,
};
use crate::config::OneViewConfig;
use crate::error::{DriverError, Result};
use crate::providers::traits::{
    BmcSession, HardwareManager, HardwareRef, MpAddress, PowerAction,
};
use crate::state::HostState;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Polling interval for asynchronous OneView tasks.
const TASK_POLL_INTERVAL_SECS: u64 = 5;

/// Upper bound on how long a profile task may run.
const TASK_TIMEOUT_SECS: u64 = 30 * 60;

/// Prefix of the remote console URL OneView hands out for iLOs.
const REMOTE_CONSOLE_SCHEME: &str = "hplocons://";

/// HPE OneView fleet manager.
///
/// Every [`HardwareManager`] operation logs in, performs its calls and logs
/// out again; nothing is cached between operations.
#[derive(Clone)]
pub struct OneView {
    /// HTTP client.
    client: Client,
    /// Connection settings.
    config: OneViewConfig,
    /// Polling interval for asynchronous tasks.
    task_poll_interval: Duration,
    /// Upper bound for asynchronous tasks.
    task_timeout: Duration,
}

impl OneView {
    /// Create a new OneView client.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(config: OneViewConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            config,
            task_poll_interval: Duration::from_secs(TASK_POLL_INTERVAL_SECS),
            task_timeout: Duration::from_secs(TASK_TIMEOUT_SECS),
        })
    }

    /// Override task polling, mostly useful against test appliances.
    #[must_use]
    pub fn with_task_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.task_poll_interval = interval;
        self.task_timeout = timeout;
        self
    }

    fn base_url(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    /// Check the API version and log in.
    ///
    /// # Errors
    /// Returns [`DriverError::Connection`] if the endpoint is unreachable,
    /// the API version is outside the supported range or the credentials
    /// are rejected.
    pub async fn connect(&self) -> Result<OneViewSession> {
        let base_url = self.base_url().to_string();
        let api_version = self.config.api_version;
        debug!(endpoint = %base_url, api_version, "Connecting to OneView");

        let response = self
            .client
            .get(format!("{base_url}/rest/version"))
            .send()
            .await
            .map_err(|e| DriverError::Connection(format!("{base_url}: {e}")))?;
        if !response.status().is_success() {
            return Err(DriverError::Connection(format!(
                "{base_url}: version query returned {}",
                response.status()
            )));
        }
        let version: ApiVersion = response
            .json()
            .await
            .map_err(|e| DriverError::Connection(format!("{base_url}: bad version body: {e}")))?;
        if api_version < version.minimum_version || api_version > version.current_version {
            return Err(DriverError::Connection(format!(
                "API version {api_version} not supported by {base_url} (supported {}..={})",
                version.minimum_version, version.current_version
            )));
        }

        let login = LoginRequest {
            user_name: &self.config.user,
            password: &self.config.password,
            auth_login_domain: self.config.domain.as_deref().filter(|d| !d.is_empty()),
        };
        let response = self
            .client
            .post(format!("{base_url}/rest/login-sessions"))
            .header("X-API-Version", api_version.to_string())
            .json(&login)
            .send()
            .await
            .map_err(|e| DriverError::Connection(format!("{base_url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DriverError::Connection(format!(
                "login as {} rejected ({status}): {text}",
                self.config.user
            )));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| DriverError::Connection(format!("{base_url}: bad login body: {e}")))?;

        debug!(endpoint = %base_url, api_version, "Connected to OneView");
        Ok(OneViewSession {
            client: self.client.clone(),
            base_url,
            api_version: api_version.to_string(),
            token: login.session_id,
            task_poll_interval: self.task_poll_interval,
            task_timeout: self.task_timeout,
        })
    }

    /// Run `f` inside a fresh session, logging out on every exit path.
    async fn with_session<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(OneViewSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.connect().await?;
        let result = f(session.clone()).await;
        session.logout().await;
        result
    }
}

/// An authenticated OneView session.
#[derive(Clone)]
pub struct OneViewSession {
    client: Client,
    base_url: String,
    api_version: String,
    token: String,
    task_poll_interval: Duration,
    task_timeout: Duration,
}

impl std::fmt::Debug for OneViewSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneViewSession")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("token", &"<redacted>")
            .field("task_poll_interval", &self.task_poll_interval)
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}

impl OneViewSession {
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-API-Version", &self.api_version)
            .header("Auth", &self.token)
    }

    /// Make an authenticated GET request.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET request");

        let response = self
            .authorized(self.client.get(&url))
            .query(query)
            .send()
            .await?;

        Self::handle_response(path, response).await
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        path: &str,
        response: Response,
    ) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, path = %path, "Failed to parse response");
                DriverError::Serialization(e)
            })
        } else {
            Err(Self::status_error(path, status, &text))
        }
    }

    /// Map a failed status to the error taxonomy.
    fn status_error(path: &str, status: StatusCode, text: &str) -> DriverError {
        let message = serde_json::from_str::<ErrorBody>(text)
            .ok()
            .filter(|body| !body.message.is_empty())
            .map_or_else(
                || text.to_string(),
                |body| format!("{} ({})", body.message, body.error_code),
            );
        match status {
            StatusCode::NOT_FOUND => DriverError::NotFound {
                kind: "resource",
                name: path.to_string(),
            },
            StatusCode::CONFLICT => DriverError::Conflict(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                DriverError::Connection(format!("{path}: {status}: {message}"))
            }
            _ => DriverError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Check status of a mutating request and return its task location.
    async fn accepted(path: &str, response: Response) -> Result<Option<String>> {
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if status.is_success() {
            Ok(location)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Self::status_error(path, status, &text))
        }
    }

    async fn find_by_name<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        name: &str,
    ) -> Result<Vec<T>> {
        let filter = format!("\"name='{name}'\"");
        let page: Collection<T> = self.get(collection, &[("filter", filter)]).await?;
        Ok(page.members)
    }

    /// Resolve server hardware by name. Exactly one match is required.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] for no match and
    /// [`DriverError::Conflict`] for several.
    pub async fn find_hardware(&self, name: &str) -> Result<ServerHardware> {
        let members: Vec<ServerHardware> = self
            .find_by_name::<ServerHardware>("/rest/server-hardware", name)
            .await?
            .into_iter()
            .filter(|h| h.name == name)
            .collect();
        exactly_one(members, "server hardware", name)
    }

    /// Resolve a server profile template by name.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] if the template does not exist.
    pub async fn find_template(&self, name: &str) -> Result<NamedResource> {
        let members: Vec<NamedResource> = self
            .find_by_name::<NamedResource>("/rest/server-profile-templates", name)
            .await?
            .into_iter()
            .filter(|t| t.name == name)
            .collect();
        exactly_one(members, "server profile template", name)
    }

    /// Look up a server profile by name.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub async fn find_profile(&self, name: &str) -> Result<Option<NamedResource>> {
        let members = self
            .find_by_name::<NamedResource>("/rest/server-profiles", name)
            .await?;
        Ok(members.into_iter().find(|p| p.name == name))
    }

    /// Create a profile from `template` assigned to `hardware_uri`.
    ///
    /// # Errors
    /// Returns [`DriverError::Conflict`] if a profile with this name exists.
    pub async fn create_profile(
        &self,
        profile_name: &str,
        template_name: &str,
        hardware_uri: &str,
    ) -> Result<()> {
        if let Some(existing) = self.find_profile(profile_name).await? {
            return Err(DriverError::Conflict(format!(
                "server profile {profile_name} already exists at {}",
                existing.uri
            )));
        }

        let template = self.find_template(template_name).await?;
        let mut profile: Value = self
            .get(&format!("{}/new-profile", template.uri), &[])
            .await?;
        let Some(fields) = profile.as_object_mut() else {
            return Err(DriverError::Api {
                status: 200,
                message: format!("{}/new-profile did not return an object", template.uri),
            });
        };
        fields.insert("name".into(), Value::String(profile_name.to_string()));
        fields.insert(
            "serverHardwareUri".into(),
            Value::String(hardware_uri.to_string()),
        );

        let path = "/rest/server-profiles";
        let response = self
            .authorized(self.client.post(self.url(path)))
            .json(&profile)
            .send()
            .await?;
        if let Some(task) = Self::accepted(path, response).await? {
            self.wait_for_task(&task).await?;
        }
        Ok(())
    }

    /// Delete a profile by name.
    ///
    /// # Errors
    /// Returns [`DriverError::NotFound`] if the profile does not exist.
    pub async fn delete_profile(&self, profile_name: &str) -> Result<()> {
        let profile = self
            .find_profile(profile_name)
            .await?
            .ok_or_else(|| DriverError::NotFound {
                kind: "server profile",
                name: profile_name.to_string(),
            })?;

        let response = self
            .authorized(self.client.delete(self.url(&profile.uri)))
            .send()
            .await?;
        if let Some(task) = Self::accepted(&profile.uri, response).await? {
            self.wait_for_task(&task).await?;
        }
        Ok(())
    }

    /// Request a power transition without waiting for it to land.
    ///
    /// # Errors
    /// Returns error if OneView rejects the request.
    pub async fn request_power(&self, hardware_uri: &str, action: PowerAction) -> Result<()> {
        let path = format!("{hardware_uri}/powerState");
        let body = PowerStateRequest {
            power_state: action.as_power_state().to_string(),
            power_control: "MomentaryPress".to_string(),
        };
        let response = self
            .authorized(self.client.put(self.url(&path)))
            .json(&body)
            .send()
            .await?;
        Self::accepted(&path, response).await?;
        Ok(())
    }

    /// Fetch a hardware resource by URI.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn hardware(&self, hardware_uri: &str) -> Result<ServerHardware> {
        self.get(hardware_uri, &[]).await
    }

    /// Fetch the remote console URL of a hardware unit.
    ///
    /// # Errors
    /// Returns error if the request fails.
    pub async fn remote_console_url(&self, hardware_uri: &str) -> Result<String> {
        let console: RemoteConsoleUrl = self
            .get(&format!("{hardware_uri}/remoteConsoleUrl"), &[])
            .await?;
        Ok(console.remote_console_url)
    }

    /// Poll a task until it finishes.
    async fn wait_for_task(&self, task_uri: &str) -> Result<()> {
        info!(task = %task_uri, "Waiting for OneView task");
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let task: Task = self.get(task_uri, &[]).await?;
            debug!(
                task = %task_uri,
                state = %task.task_state,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling task"
            );

            match task.outcome() {
                TaskOutcome::Succeeded => return Ok(()),
                TaskOutcome::Failed => {
                    return Err(DriverError::Api {
                        status: 0,
                        message: format!("task {task_uri} failed: {}", task.error_message()),
                    })
                }
                TaskOutcome::Pending => {}
            }

            if start.elapsed() >= self.task_timeout {
                return Err(DriverError::Timeout {
                    target: format!("OneView task {task_uri}"),
                    attempts,
                    timeout_secs: self.task_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.task_poll_interval).await;
        }
    }

    /// End the session. Failures are logged only.
    pub async fn logout(self) {
        let url = format!("{}/rest/login-sessions", self.base_url);
        match self.authorized(self.client.delete(&url)).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Logged out of OneView");
            }
            Ok(response) => {
                warn!(status = %response.status(), "OneView logout rejected");
            }
            Err(e) => warn!(error = %e, "OneView logout failed"),
        }
    }
}

fn exactly_one<T>(mut members: Vec<T>, kind: &'static str, name: &str) -> Result<T> {
    match members.len() {
        0 => Err(DriverError::NotFound {
            kind,
            name: name.to_string(),
        }),
        1 => Ok(members.remove(0)),
        n => Err(DriverError::Conflict(format!(
            "{n} resources of type {kind} are named {name}"
        ))),
    }
}

/// Split `hplocons://addr=<ip>&sessionkey=<token>` into address and token.
///
/// The address is optional; callers fall back to the management processor
/// addresses OneView reports for the hardware.
///
/// # Errors
/// Returns [`DriverError::Connection`] if the session key is missing.
pub fn parse_remote_console_url(url: &str) -> Result<(Option<String>, String)> {
    let params = url.strip_prefix(REMOTE_CONSOLE_SCHEME).unwrap_or(url);
    let mut address = None;
    let mut token = None;
    for pair in params.split('&') {
        match pair.split_once('=') {
            Some(("addr", value)) if !value.is_empty() => address = Some(value.to_string()),
            Some(("sessionkey", value)) if !value.is_empty() => token = Some(value.to_string()),
            _ => {}
        }
    }
    let token = token.ok_or_else(|| {
        DriverError::Connection("Could not retrieve iLO token from remote console URL".into())
    })?;
    Ok((address, token))
}

fn to_hardware_ref(hardware: ServerHardware) -> HardwareRef {
    let mp_addresses = hardware
        .mp_host_info
        .map(|info| {
            info.mp_ip_addresses
                .into_iter()
                .map(|a| MpAddress {
                    address: a.address,
                    kind: a.address_type,
                })
                .collect()
        })
        .unwrap_or_default();

    HardwareRef {
        name: hardware.name,
        uri: hardware.uri,
        power_state: hardware.power_state,
        mp_model: hardware.mp_model,
        mp_addresses,
    }
}

#[async_trait]
impl HardwareManager for OneView {
    async fn check_connection(&self) -> Result<()> {
        self.with_session(|_| async { Ok(()) }).await
    }

    async fn resolve_hardware(&self, name: &str) -> Result<HardwareRef> {
        let hardware = self
            .with_session(|s| async move { s.find_hardware(name).await })
            .await?;
        debug!(hardware = %hardware.name, uri = %hardware.uri, model = %hardware.mp_model, "Resolved hardware");
        Ok(to_hardware_ref(hardware))
    }

    async fn create_profile(
        &self,
        profile_name: &str,
        template_name: &str,
        hardware: &HardwareRef,
    ) -> Result<()> {
        info!(
            profile = %profile_name,
            template = %template_name,
            hardware = %hardware.name,
            "Creating server profile"
        );
        self.with_session(|s| async move {
            s.create_profile(profile_name, template_name, &hardware.uri)
                .await
        })
        .await?;
        info!(profile = %profile_name, "Server profile created");
        Ok(())
    }

    async fn delete_profile(&self, profile_name: &str) -> Result<()> {
        info!(profile = %profile_name, "Deleting server profile");
        self.with_session(|s| async move { s.delete_profile(profile_name).await })
            .await?;
        info!(profile = %profile_name, "Server profile deleted");
        Ok(())
    }

    async fn set_power(&self, hardware: &HardwareRef, action: PowerAction) -> Result<HostState> {
        info!(hardware = %hardware.name, action = %action, "Requesting power transition");
        let current = self
            .with_session(|s| async move {
                s.request_power(&hardware.uri, action).await?;
                s.hardware(&hardware.uri).await
            })
            .await?;
        let state = HostState::from_power_state(&current.power_state);
        debug!(hardware = %hardware.name, power_state = %current.power_state, state = %state, "Power state after request");
        Ok(state)
    }

    async fn power_state(&self, hardware: &HardwareRef) -> Result<HostState> {
        let current = self
            .with_session(|s| async move { s.hardware(&hardware.uri).await })
            .await?;
        debug!(hardware = %hardware.name, power_state = %current.power_state, "Read power state");
        Ok(HostState::from_power_state(&current.power_state))
    }

    async fn bmc_session(&self, hardware: &HardwareRef) -> Result<BmcSession> {
        let console = self
            .with_session(|s| async move { s.remote_console_url(&hardware.uri).await })
            .await?;
        let (console_address, token) = parse_remote_console_url(&console)?;
        let address = console_address
            .or_else(|| hardware.management_address().map(str::to_string))
            .ok_or_else(|| DriverError::Connection("Could not retrieve iLO address".into()))?;
        debug!(hardware = %hardware.name, bmc = %address, model = %hardware.mp_model, "Retrieved iLO session");
        Ok(BmcSession {
            base_url: format!("https://{address}"),
            address,
            token,
            model: hardware.mp_model.clone(),
        })
    }
}
