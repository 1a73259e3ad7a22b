//! iLO Redfish virtual media client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::models::{
    BmcGeneration, MediaSchema, MemberList, RawVirtualMedia, SessionResource, VirtualDevices,
};
use crate::error::{DriverError, Result};
use crate::providers::traits::{BmcSession, MediaController, MediaSlot, RedfishSession};

/// Default timeout for Redfish requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const SERVICE_ROOT: &str = "/redfish/v1/";
const MANAGERS: &str = "/redfish/v1/Managers/";
const SESSIONS: &str = "/redfish/v1/SessionService/Sessions/";

#[derive(Debug, Clone, Copy)]
enum MediaAction {
    Insert,
    Eject,
}

/// iLO virtual media over Redfish, authenticated with a token proxied by
/// OneView.
#[derive(Clone)]
pub struct IloMedia {
    client: Client,
}

impl IloMedia {
    /// Create a new iLO client. Certificates are only verified when
    /// `verify_tls` is set.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(verify_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    fn request(&self, bmc: &BmcSession, method: Method, path: &str) -> RequestBuilder {
        let url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", bmc.base_url.trim_end_matches('/'))
        };
        debug!(method = %method, url = %url, "Redfish request");
        self.client
            .request(method, url)
            .header("X-Auth-Token", &bmc.token)
    }

    async fn get_text(&self, bmc: &BmcSession, path: &str) -> Result<String> {
        let response = self.request(bmc, Method::GET, path).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status.is_success() {
            Ok(text)
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(DriverError::Connection(format!(
                "iLO {} rejected the session token ({status})",
                bmc.address
            )))
        } else {
            Err(DriverError::Api {
                status: status.as_u16(),
                message: format!("GET {path}: {text}"),
            })
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        bmc: &BmcSession,
        path: &str,
    ) -> Result<T> {
        let text = self.get_text(bmc, path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Enumerate the virtual media devices of the first manager.
    ///
    /// # Errors
    /// Returns [`DriverError::UnsupportedModel`] before any request if the
    /// BMC generation is unknown.
    pub async fn discover(&self, session: &RedfishSession) -> Result<VirtualDevices> {
        let bmc = &session.bmc;
        let generation: BmcGeneration = bmc.model.parse()?;

        let managers: MemberList = self.get_json(bmc, MANAGERS).await?;
        let manager = managers
            .members
            .first()
            .ok_or_else(|| DriverError::NotFound {
                kind: "iLO manager",
                name: bmc.address.clone(),
            })?;

        let media_path = format!("{}/VirtualMedia/", manager.id.trim_end_matches('/'));
        let media: MemberList = self.get_json(bmc, &media_path).await?;

        let mut devices = VirtualDevices::default();
        for member in &media.members {
            let body = self.get_text(bmc, &member.id).await?;
            let device = RawVirtualMedia::parse(generation, &body)?.normalize();
            for slot in device.slots() {
                debug!(bmc = %bmc.address, model = %bmc.model, slot = %slot, id = %device.id, "Virtual media detected");
            }
            devices.record(device);
        }
        Ok(devices)
    }

    async fn run_action(
        &self,
        session: &RedfishSession,
        slot: MediaSlot,
        action: MediaAction,
        body: Value,
    ) -> Result<()> {
        let fail = |message: String| match action {
            MediaAction::Insert => DriverError::Mount { slot, message },
            MediaAction::Eject => DriverError::Eject { slot, message },
        };

        let devices = self.discover(session).await.map_err(|e| match e {
            DriverError::UnsupportedModel(_) => e,
            other => fail(other.to_string()),
        })?;
        let device = devices
            .get(slot)
            .ok_or_else(|| fail(format!("no {slot} device on iLO {}", session.bmc.address)))?;
        let target = match action {
            MediaAction::Insert => device.insert_target.as_deref(),
            MediaAction::Eject => device.eject_target.as_deref(),
        }
        .ok_or_else(|| fail(format!("{} exposes no {action:?} action", device.id)))?;

        let response = self
            .request(&session.bmc, Method::POST, target)
            .json(&body)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let text = response.text().await.unwrap_or_default();
            return Err(fail(format!("iLO returned {status}: {text}")));
        }
        Ok(())
    }

    /// Find the session resource our token belongs to.
    async fn find_my_session(&self, bmc: &BmcSession) -> Result<Option<String>> {
        let sessions: MemberList = self.get_json(bmc, SESSIONS).await?;
        for member in &sessions.members {
            let resource: SessionResource = self.get_json(bmc, &member.id).await?;
            if resource.is_mine() {
                return Ok(Some(resource.id));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MediaController for IloMedia {
    async fn open_session(&self, bmc: &BmcSession) -> Result<RedfishSession> {
        self.get_text(bmc, SERVICE_ROOT)
            .await
            .map_err(|e| match e {
                DriverError::Connection(_) => e,
                other => DriverError::Connection(format!("iLO {}: {other}", bmc.address)),
            })?;
        let session_uri = match self.find_my_session(bmc).await {
            Ok(uri) => uri,
            Err(e) => {
                warn!(bmc = %bmc.address, error = %e, "Could not locate iLO session resource");
                None
            }
        };
        debug!(bmc = %bmc.address, session = ?session_uri, "Opened iLO session");
        Ok(RedfishSession {
            bmc: bmc.clone(),
            session_uri,
        })
    }

    async fn insert_media(
        &self,
        session: &RedfishSession,
        slot: MediaSlot,
        image_url: &str,
    ) -> Result<()> {
        info!(bmc = %session.bmc.address, slot = %slot, image = %image_url, "Inserting virtual media");
        self.run_action(session, slot, MediaAction::Insert, json!({ "Image": image_url }))
            .await
    }

    async fn eject_media(&self, session: &RedfishSession, slot: MediaSlot) -> Result<()> {
        info!(bmc = %session.bmc.address, slot = %slot, "Ejecting virtual media");
        self.run_action(session, slot, MediaAction::Eject, json!({}))
            .await
    }

    async fn close_session(&self, session: RedfishSession) {
        let Some(uri) = session.session_uri.as_deref() else {
            debug!(bmc = %session.bmc.address, "No iLO session resource to delete");
            return;
        };
        match self
            .request(&session.bmc, Method::DELETE, uri)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(bmc = %session.bmc.address, "Closed iLO session");
            }
            Ok(response) => {
                warn!(bmc = %session.bmc.address, status = %response.status(), "iLO session logout rejected");
            }
            Err(e) => warn!(bmc = %session.bmc.address, error = %e, "iLO session logout failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const ILO5_INSERT: &str = "/redfish/v1/Managers/1/VirtualMedia/2/Actions/VirtualMedia.InsertMedia/";
    const ILO5_EJECT: &str = "/redfish/v1/Managers/1/VirtualMedia/2/Actions/VirtualMedia.EjectMedia/";

    fn bmc(server: &MockServer, model: &str) -> BmcSession {
        BmcSession {
            address: "10.0.0.21".into(),
            base_url: server.uri(),
            token: "tok".into(),
            model: model.into(),
        }
    }

    fn session(server: &MockServer, model: &str) -> RedfishSession {
        RedfishSession {
            bmc: bmc(server, model),
            session_uri: None,
        }
    }

    async fn mount_json(server: &MockServer, at: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(at))
            .and(header("X-Auth-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn ilo5() -> MockServer {
        let server = MockServer::start().await;
        mount_json(
            &server,
            MANAGERS,
            json!({"Members": [{"@odata.id": "/redfish/v1/Managers/1/"}]}),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/Managers/1/VirtualMedia/",
            json!({"Members": [
                {"@odata.id": "/redfish/v1/Managers/1/VirtualMedia/1/"},
                {"@odata.id": "/redfish/v1/Managers/1/VirtualMedia/2/"}
            ]}),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/Managers/1/VirtualMedia/1/",
            json!({
                "@odata.id": "/redfish/v1/Managers/1/VirtualMedia/1/",
                "MediaTypes": ["Floppy", "USBStick"],
                "Actions": {
                    "#VirtualMedia.InsertMedia": {
                        "target": "/redfish/v1/Managers/1/VirtualMedia/1/Actions/VirtualMedia.InsertMedia/"
                    },
                    "#VirtualMedia.EjectMedia": {
                        "target": "/redfish/v1/Managers/1/VirtualMedia/1/Actions/VirtualMedia.EjectMedia/"
                    }
                }
            }),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/Managers/1/VirtualMedia/2/",
            json!({
                "@odata.id": "/redfish/v1/Managers/1/VirtualMedia/2/",
                "MediaTypes": ["CD", "DVD"],
                "Actions": {
                    "#VirtualMedia.InsertMedia": {"target": ILO5_INSERT},
                    "#VirtualMedia.EjectMedia": {"target": ILO5_EJECT}
                }
            }),
        )
        .await;
        server
    }

    #[tokio::test]
    async fn test_discover_ilo5_devices() {
        let server = ilo5().await;
        let devices = IloMedia::new(false)
            .unwrap()
            .discover(&session(&server, "iLO5"))
            .await
            .unwrap();

        let dvd = devices.get(MediaSlot::Dvd).unwrap();
        assert_eq!(dvd.insert_target.as_deref(), Some(ILO5_INSERT));
        let floppy = devices.get(MediaSlot::Floppy).unwrap();
        assert_eq!(floppy.id, "/redfish/v1/Managers/1/VirtualMedia/1/");
    }

    #[tokio::test]
    async fn test_unsupported_model_fetches_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = IloMedia::new(false)
            .unwrap()
            .discover(&session(&server, "iLO3"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedModel(_)));
    }

    #[tokio::test]
    async fn test_insert_then_eject_posts_once_each() {
        let server = ilo5().await;
        Mock::given(method("POST"))
            .and(path(ILO5_INSERT))
            .and(body_json(json!({"Image": "http://web01/iso/os.iso"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ILO5_EJECT))
            .and(body_json(json!({})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ilo = IloMedia::new(false).unwrap();
        let session = session(&server, "iLO5");
        ilo.insert_media(&session, MediaSlot::Dvd, "http://web01/iso/os.iso")
            .await
            .unwrap();
        ilo.eject_media(&session, MediaSlot::Dvd).await.unwrap();

        let posts: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(posts, vec![ILO5_INSERT.to_string(), ILO5_EJECT.to_string()]);
    }

    #[tokio::test]
    async fn test_failed_discovery_maps_to_slot_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MANAGERS))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ilo = IloMedia::new(false).unwrap();
        let session = session(&server, "iLO5");
        let err = ilo
            .insert_media(&session, MediaSlot::Floppy, "http://web01/ks/10.0.0.5.iso")
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Mount { slot: MediaSlot::Floppy, .. }));

        let err = ilo.eject_media(&session, MediaSlot::Dvd).await.unwrap_err();
        assert!(matches!(err, DriverError::Eject { slot: MediaSlot::Dvd, .. }));
    }

    #[tokio::test]
    async fn test_ilo4_insert_uses_oem_action() {
        let server = MockServer::start().await;
        let insert = "/redfish/v1/Managers/1/VirtualMedia/1/Actions/Oem/Hp/HpiLOVirtualMedia.InsertVirtualMedia/";
        mount_json(
            &server,
            MANAGERS,
            json!({"Members": [{"@odata.id": "/redfish/v1/Managers/1/"}]}),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/Managers/1/VirtualMedia/",
            json!({"Members": [{"@odata.id": "/redfish/v1/Managers/1/VirtualMedia/1/"}]}),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/Managers/1/VirtualMedia/1/",
            json!({
                "@odata.id": "/redfish/v1/Managers/1/VirtualMedia/1/",
                "MediaTypes": ["Floppy"],
                "Oem": {"Hp": {"Actions": {
                    "#HpiLOVirtualMedia.InsertVirtualMedia": {"target": insert}
                }}}
            }),
        )
        .await;
        Mock::given(method("POST"))
            .and(path(insert))
            .and(body_json(json!({"Image": "http://web01/ks/10.0.0.5.iso"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        IloMedia::new(false)
            .unwrap()
            .insert_media(
                &session(&server, "iLO4"),
                MediaSlot::Floppy,
                "http://web01/ks/10.0.0.5.iso",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_actions_map_to_slot_errors() {
        let server = ilo5().await;
        Mock::given(method("POST"))
            .and(path(ILO5_INSERT))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ILO5_EJECT))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ilo = IloMedia::new(false).unwrap();
        let session = session(&server, "iLO5");
        let err = ilo
            .insert_media(&session, MediaSlot::Dvd, "http://web01/iso/os.iso")
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Mount { slot: MediaSlot::Dvd, .. }));

        let err = ilo.eject_media(&session, MediaSlot::Dvd).await.unwrap_err();
        assert!(matches!(err, DriverError::Eject { slot: MediaSlot::Dvd, .. }));
    }

    #[tokio::test]
    async fn test_open_and_close_own_session() {
        let server = MockServer::start().await;
        mount_json(&server, SERVICE_ROOT, json!({"RedfishVersion": "1.6.0"})).await;
        mount_json(
            &server,
            SESSIONS,
            json!({"Members": [
                {"@odata.id": "/redfish/v1/SessionService/Sessions/admin1/"},
                {"@odata.id": "/redfish/v1/SessionService/Sessions/ov2/"}
            ]}),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/SessionService/Sessions/admin1/",
            json!({
                "@odata.id": "/redfish/v1/SessionService/Sessions/admin1/",
                "Oem": {"Hpe": {"MySession": false}}
            }),
        )
        .await;
        mount_json(
            &server,
            "/redfish/v1/SessionService/Sessions/ov2/",
            json!({
                "@odata.id": "/redfish/v1/SessionService/Sessions/ov2/",
                "Oem": {"Hpe": {"MySession": true}}
            }),
        )
        .await;
        Mock::given(method("DELETE"))
            .and(path("/redfish/v1/SessionService/Sessions/ov2/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let ilo = IloMedia::new(false).unwrap();
        let session = ilo.open_session(&bmc(&server, "iLO5")).await.unwrap();
        assert_eq!(
            session.session_uri.as_deref(),
            Some("/redfish/v1/SessionService/Sessions/ov2/")
        );
        ilo.close_session(session).await;
    }

    #[tokio::test]
    async fn test_open_session_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SERVICE_ROOT))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = IloMedia::new(false)
            .unwrap()
            .open_session(&bmc(&server, "iLO5"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
    }

    #[tokio::test]
    async fn test_open_session_unavailable_service_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(SERVICE_ROOT))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = IloMedia::new(false)
            .unwrap()
            .open_session(&bmc(&server, "iLO5"))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Connection(ref msg) if msg.contains("10.0.0.21")));
    }

    #[tokio::test]
    async fn test_open_session_unreachable_bmc() {
        let unreachable = BmcSession {
            address: "127.0.0.1".into(),
            base_url: "http://127.0.0.1:1".into(),
            token: "tok".into(),
            model: "iLO5".into(),
        };
        let err = IloMedia::new(false)
            .unwrap()
            .open_session(&unreachable)
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Connection(_)));
    }
}
