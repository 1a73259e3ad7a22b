//! Host lifecycle orchestration.
//!
//! [`Driver`] sequences the fleet manager, the BMC and the remote shell
//! into the docker-machine verbs. It owns no network code of its own apart
//! from the image probes in [`Driver::pre_create_check`].

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, error, info, warn};

use crate::config::{ProvisioningConfig, DRIVER_NAME};
use crate::error::{DriverError, Result, ResultExt};
use crate::host::{
    generate_key_pair, inject_public_key, wait_until_reachable, KeyPair, PollPolicy,
    RemoteShell, ShellTarget, Ssh2Shell,
};
use crate::providers::ilo::IloMedia;
use crate::providers::oneview::OneView;
use crate::providers::{
    HardwareManager, HardwareRef, MediaController, MediaSlot, PowerAction, RedfishSession,
};
use crate::state::{HostState, ProvisionStage};

/// Timeout for the image URL probes in [`Driver::pre_create_check`].
const IMAGE_PROBE_TIMEOUT_SECS: u64 = 5;

/// The production driver: OneView, iLO Redfish and libssh2.
pub type OneViewDriver = Driver<OneView, IloMedia, Ssh2Shell>;

impl OneViewDriver {
    /// Build the production driver from a configuration.
    ///
    /// # Errors
    /// Returns error if an HTTP client cannot be created.
    pub fn from_config(config: ProvisioningConfig) -> Result<Self> {
        let hardware = OneView::new(config.oneview.clone())?;
        let media = IloMedia::new(config.server.bmc_verify_tls)?;
        Self::new(config, hardware, media, Ssh2Shell)
    }
}

/// Provisions and manages one bare metal host.
pub struct Driver<H, M, S> {
    config: ProvisioningConfig,
    hardware: H,
    media: M,
    shell: S,
    stage: ProvisionStage,
    install_policy: PollPolicy,
    keys: Option<KeyPair>,
    http: Client,
}

impl<H, M, S> Driver<H, M, S>
where
    H: HardwareManager,
    M: MediaController,
    S: RemoteShell,
{
    /// Create a driver. An invalid configuration leaves the driver in
    /// [`ProvisionStage::Unconfigured`], where `create` is refused.
    ///
    /// # Errors
    /// Returns error if the HTTP client for image probes cannot be created.
    pub fn new(config: ProvisioningConfig, hardware: H, media: M, shell: S) -> Result<Self> {
        let stage = match config.validate() {
            Ok(()) => ProvisionStage::Configured,
            Err(e) => {
                warn!(machine = %config.machine.name, error = %e, "Driver configuration incomplete");
                ProvisionStage::Unconfigured
            }
        };
        let http = Client::builder()
            .timeout(Duration::from_secs(IMAGE_PROBE_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            config,
            hardware,
            media,
            shell,
            stage,
            install_policy: PollPolicy::default(),
            keys: None,
            http,
        })
    }

    /// Override how long `create` waits for the OS installation.
    #[must_use]
    pub fn with_install_policy(mut self, policy: PollPolicy) -> Self {
        self.install_policy = policy;
        self
    }

    /// Current provisioning stage.
    #[must_use]
    pub fn stage(&self) -> ProvisionStage {
        self.stage
    }

    /// The configuration this driver was built with.
    #[must_use]
    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Key pair generated by the last successful `create`.
    #[must_use]
    pub fn key_pair(&self) -> Option<&KeyPair> {
        self.keys.as_ref()
    }

    /// Driver name, `ov`.
    #[must_use]
    pub fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    /// Logical machine name.
    #[must_use]
    pub fn machine_name(&self) -> &str {
        &self.config.machine.name
    }

    /// SSH user on the installed host.
    #[must_use]
    pub fn ssh_username(&self) -> &str {
        &self.config.machine.ssh_user
    }

    /// Host address.
    ///
    /// # Errors
    /// Returns [`DriverError::Validation`] if no address is configured.
    pub fn ip(&self) -> Result<String> {
        self.config.address().map(str::to_string)
    }

    /// SSH host name; the configured address.
    ///
    /// # Errors
    /// Returns [`DriverError::Validation`] if no address is configured.
    pub fn ssh_hostname(&self) -> Result<String> {
        self.ip()
    }

    /// SSH port.
    ///
    /// # Errors
    /// Returns [`DriverError::Validation`] if the port is 0.
    pub fn ssh_port(&self) -> Result<u16> {
        match self.config.machine.ssh_port {
            0 => Err(DriverError::Validation("ssh port is not set".into())),
            port => Ok(port),
        }
    }

    /// Docker endpoint, `tcp://{address}:2376`.
    ///
    /// # Errors
    /// Returns [`DriverError::Validation`] if no address is configured.
    pub fn url(&self) -> Result<String> {
        self.config.docker_url()
    }

    fn shell_target(&self) -> Result<ShellTarget> {
        Ok(ShellTarget {
            host: self.ip()?,
            port: self.ssh_port()?,
            user: self.config.machine.ssh_user.clone(),
            password: self.config.server.root_password.clone(),
        })
    }

    fn advance(&mut self) {
        let next = self.stage.next();
        debug!(machine = %self.config.machine.name, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }

    async fn resolve_hardware(&self) -> Result<HardwareRef> {
        self.hardware
            .resolve_hardware(&self.config.oneview.server_hardware)
            .await
            .during("resolve hardware")
    }

    /// Check everything `create` depends on without changing anything:
    /// the configuration, OneView credentials and both image URLs.
    ///
    /// # Errors
    /// Returns the first failed check.
    pub async fn pre_create_check(&self) -> Result<()> {
        let result = async {
            self.config.validate()?;
            self.hardware
                .check_connection()
                .await
                .during("check OneView connection")?;
            self.probe_image(&self.config.server.os_url).await?;
            self.probe_image(&self.config.kickstart_url()).await
        }
        .await;

        match &result {
            Ok(()) => info!(machine = %self.machine_name(), "Pre-create checks passed"),
            Err(e) => error!(machine = %self.machine_name(), error = %e, "Pre-create check failed"),
        }
        result
    }

    async fn probe_image(&self, url: &str) -> Result<()> {
        let unreachable =
            |detail: String| DriverError::Validation(format!("image {url} is not reachable: {detail}"));

        let mut response = self
            .http
            .head(url)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| unreachable(e.to_string()))?;
        }

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(unreachable(status.to_string()));
        }
        debug!(url = %url, status = %status, "Image reachable");
        Ok(())
    }

    /// Provision the host: profile, virtual media, power on, wait for the
    /// installed OS and install a fresh SSH key.
    ///
    /// The server profile is left in place when a later step fails.
    ///
    /// # Errors
    /// Returns the first failure. A failed eject is only returned when
    /// everything else succeeded.
    pub async fn create(&mut self) -> Result<()> {
        if !self.stage.can_create() {
            let err = DriverError::Validation(format!(
                "machine {} is not configured: {}",
                self.config.machine.name,
                self.config
                    .validate()
                    .err()
                    .map_or_else(|| "unknown reason".to_string(), |e| e.to_string())
            ));
            error!(machine = %self.machine_name(), error = %err, "Create refused");
            return Err(err);
        }

        self.stage = ProvisionStage::Configured;
        info!(
            machine = %self.config.machine.name,
            hardware = %self.config.oneview.server_hardware,
            "Creating host"
        );

        let result = self.provision().await;
        match &result {
            Ok(()) => info!(machine = %self.config.machine.name, "Host is ready"),
            Err(e) => error!(
                machine = %self.config.machine.name,
                stage = %self.stage,
                error = %e,
                "Create failed"
            ),
        }
        result
    }

    async fn provision(&mut self) -> Result<()> {
        let hardware = self.resolve_hardware().await?;
        let profile = self.config.profile_name();
        self.hardware
            .create_profile(
                &profile,
                &self.config.oneview.server_profile_template,
                &hardware,
            )
            .await
            .during("create server profile")?;
        self.advance();

        let bmc = self
            .hardware
            .bmc_session(&hardware)
            .await
            .during("retrieve BMC credentials")?;
        let session = self
            .media
            .open_session(&bmc)
            .await
            .during("open BMC session")?;

        let mut mounted = Vec::new();
        let outcome = self.install(&hardware, &session, &mut mounted).await;
        let released = self.release_media(&session, &mounted).await;
        self.media.close_session(session).await;

        // A failed eject only matters when everything before it succeeded.
        outcome?;
        released?;
        self.advance();
        Ok(())
    }

    /// Everything that runs while virtual media is mounted.
    async fn install(
        &mut self,
        hardware: &HardwareRef,
        session: &RedfishSession,
        mounted: &mut Vec<MediaSlot>,
    ) -> Result<()> {
        let images = [
            (MediaSlot::Dvd, self.config.server.os_url.clone()),
            (MediaSlot::Floppy, self.config.kickstart_url()),
        ];
        for (slot, image) in images {
            self.media
                .insert_media(session, slot, &image)
                .await
                .during("insert virtual media")?;
            mounted.push(slot);
        }
        self.advance();

        let state = self
            .hardware
            .set_power(hardware, PowerAction::On)
            .await
            .during("power on")?;
        debug!(hardware = %hardware.name, state = %state, "Power on requested");
        self.advance();

        let target = self.shell_target()?;
        self.advance();
        wait_until_reachable(&self.shell, &target, &self.install_policy)
            .await
            .during("wait for OS installation")?;

        let keys = generate_key_pair(&self.config.ssh_key_path()).during("generate SSH keys")?;
        inject_public_key(&self.shell, &target, &keys.public_key)
            .await
            .during("install SSH key")?;
        self.keys = Some(keys);
        self.advance();
        Ok(())
    }

    /// Eject `mounted` in reverse order. Every slot is attempted; the first
    /// failure is returned.
    async fn release_media(&self, session: &RedfishSession, mounted: &[MediaSlot]) -> Result<()> {
        let mut first_failure = None;
        for slot in mounted.iter().rev() {
            if let Err(e) = self.media.eject_media(session, *slot).await {
                warn!(machine = %self.config.machine.name, slot = %slot, error = %e, "Eject failed");
                first_failure.get_or_insert(e);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Delete the server profile. The host is not powered off first.
    ///
    /// # Errors
    /// Returns error if the profile cannot be deleted.
    pub async fn remove(&mut self) -> Result<()> {
        let profile = self.config.profile_name();
        info!(machine = %self.config.machine.name, profile = %profile, "Removing host");
        self.hardware
            .delete_profile(&profile)
            .await
            .during("delete server profile")
            .inspect_err(|e| error!(profile = %profile, error = %e, "Remove failed"))?;
        self.stage = ProvisionStage::Removed;
        Ok(())
    }

    async fn power(&self, action: PowerAction, verb: &'static str) -> Result<HostState> {
        let hardware = self.resolve_hardware().await?;
        let state = self
            .hardware
            .set_power(&hardware, action)
            .await
            .during(verb)
            .inspect_err(|e| error!(hardware = %hardware.name, error = %e, "Power {verb} failed"))?;
        info!(hardware = %hardware.name, action = %action, state = %state, "Power transition requested");
        Ok(state)
    }

    /// Power the host on. Does not wait for the transition.
    ///
    /// # Errors
    /// Returns error if OneView rejects the request.
    pub async fn start(&self) -> Result<HostState> {
        self.power(PowerAction::On, "start").await
    }

    /// Power the host off. Does not wait for the transition.
    ///
    /// # Errors
    /// Returns error if OneView rejects the request.
    pub async fn stop(&self) -> Result<HostState> {
        self.power(PowerAction::Off, "stop").await
    }

    /// Power the host off; the same request as [`Driver::stop`].
    ///
    /// # Errors
    /// Returns error if OneView rejects the request.
    pub async fn kill(&self) -> Result<HostState> {
        self.power(PowerAction::Off, "kill").await
    }

    /// Stop, then start.
    ///
    /// # Errors
    /// Returns the first failure; `start` is not attempted if `stop` fails.
    pub async fn restart(&self) -> Result<HostState> {
        self.stop().await?;
        self.start().await
    }

    /// Current power state.
    ///
    /// # Errors
    /// Returns error if OneView cannot be queried.
    pub async fn state(&self) -> Result<HostState> {
        let hardware = self.resolve_hardware().await?;
        self.hardware
            .power_state(&hardware)
            .await
            .during("query power state")
    }
}
