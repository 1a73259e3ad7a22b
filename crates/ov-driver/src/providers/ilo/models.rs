//! iLO Redfish wire schemas.
//!
//! iLO 4 and iLO 5 describe the same virtual media devices with different
//! JSON shapes. Each generation gets its own schema type; both normalize to
//! [`VirtualMedia`] so nothing past this module cares which one answered.

use std::str::FromStr;

use serde::Deserialize;

use crate::error::{DriverError, Result};
use crate::providers::traits::MediaSlot;

// ============================================================================
// Generic Redfish resources
// ============================================================================

/// `{"@odata.id": "..."}` reference.
#[derive(Debug, Clone, Deserialize)]
pub struct OdataRef {
    /// Resource path.
    #[serde(rename = "@odata.id")]
    pub id: String,
}

/// Collection of resource references.
#[derive(Debug, Deserialize)]
pub struct MemberList {
    /// Members.
    #[serde(rename = "Members", default)]
    pub members: Vec<OdataRef>,
}

/// Action descriptor; only the target is used.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionTarget {
    /// Path the action is POSTed to.
    #[serde(default)]
    pub target: String,
}

/// A session resource, as listed under `SessionService/Sessions`.
#[derive(Debug, Deserialize)]
pub struct SessionResource {
    /// Resource path.
    #[serde(rename = "@odata.id")]
    pub id: String,
    /// Vendor extension carrying the `MySession` flag.
    #[serde(rename = "Oem", default)]
    pub oem: SessionOem,
}

/// `Oem` block of a session resource.
#[derive(Debug, Default, Deserialize)]
pub struct SessionOem {
    /// iLO 5.
    #[serde(rename = "Hpe")]
    pub hpe: Option<SessionFlags>,
    /// iLO 4.
    #[serde(rename = "Hp")]
    pub hp: Option<SessionFlags>,
}

/// Vendor session flags.
#[derive(Debug, Default, Deserialize)]
pub struct SessionFlags {
    /// Whether the session belongs to the requesting token.
    #[serde(rename = "MySession", default)]
    pub my_session: bool,
}

impl SessionResource {
    /// Whether this is the session our token authenticates.
    #[must_use]
    pub fn is_mine(&self) -> bool {
        [&self.oem.hpe, &self.oem.hp]
            .into_iter()
            .flatten()
            .any(|flags| flags.my_session)
    }
}

// ============================================================================
// Generations
// ============================================================================

/// Supported iLO generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BmcGeneration {
    /// iLO 4 (`Oem.Hp` actions).
    Ilo4,
    /// iLO 5 (standard Redfish actions).
    Ilo5,
}

impl FromStr for BmcGeneration {
    type Err = DriverError;

    fn from_str(model: &str) -> Result<Self> {
        if model.eq_ignore_ascii_case("iLO4") {
            Ok(Self::Ilo4)
        } else if model.eq_ignore_ascii_case("iLO5") {
            Ok(Self::Ilo5)
        } else {
            Err(DriverError::UnsupportedModel(model.to_string()))
        }
    }
}

// ============================================================================
// Virtual media schemas
// ============================================================================

/// iLO 4 virtual media resource.
#[derive(Debug, Deserialize)]
pub struct Ilo4VirtualMedia {
    /// Resource path.
    #[serde(rename = "@odata.id")]
    pub id: String,
    /// Media the device accepts.
    #[serde(rename = "MediaTypes", default)]
    pub media_types: Vec<String>,
    /// Vendor block holding the actions.
    #[serde(rename = "Oem", default)]
    pub oem: Ilo4Oem,
}

/// `Oem` block of an iLO 4 virtual media resource.
#[derive(Debug, Default, Deserialize)]
pub struct Ilo4Oem {
    /// HP extension.
    #[serde(rename = "Hp", default)]
    pub hp: Ilo4OemHp,
}

/// `Oem.Hp` block.
#[derive(Debug, Default, Deserialize)]
pub struct Ilo4OemHp {
    /// Insert and eject actions.
    #[serde(rename = "Actions", default)]
    pub actions: Ilo4Actions,
}

/// iLO 4 virtual media actions.
#[derive(Debug, Default, Deserialize)]
pub struct Ilo4Actions {
    /// Insert action.
    #[serde(rename = "#HpiLOVirtualMedia.InsertVirtualMedia")]
    pub insert: Option<ActionTarget>,
    /// Eject action.
    #[serde(rename = "#HpiLOVirtualMedia.EjectVirtualMedia")]
    pub eject: Option<ActionTarget>,
}

/// iLO 5 virtual media resource.
#[derive(Debug, Deserialize)]
pub struct Ilo5VirtualMedia {
    /// Resource path.
    #[serde(rename = "@odata.id")]
    pub id: String,
    /// Media the device accepts.
    #[serde(rename = "MediaTypes", default)]
    pub media_types: Vec<String>,
    /// Insert and eject actions.
    #[serde(rename = "Actions", default)]
    pub actions: Ilo5Actions,
}

/// iLO 5 virtual media actions.
#[derive(Debug, Default, Deserialize)]
pub struct Ilo5Actions {
    /// Insert action.
    #[serde(rename = "#VirtualMedia.InsertMedia")]
    pub insert: Option<ActionTarget>,
    /// Eject action.
    #[serde(rename = "#VirtualMedia.EjectMedia")]
    pub eject: Option<ActionTarget>,
}

/// A virtual media resource decoded with its generation's schema.
#[derive(Debug)]
pub enum RawVirtualMedia {
    /// iLO 4 schema.
    Gen4(Ilo4VirtualMedia),
    /// iLO 5 schema.
    Gen5(Ilo5VirtualMedia),
}

impl RawVirtualMedia {
    /// Decode a resource body with the schema for `generation`.
    ///
    /// # Errors
    /// Returns error if the body does not match the schema.
    pub fn parse(generation: BmcGeneration, body: &str) -> Result<Self> {
        Ok(match generation {
            BmcGeneration::Ilo4 => Self::Gen4(serde_json::from_str(body)?),
            BmcGeneration::Ilo5 => Self::Gen5(serde_json::from_str(body)?),
        })
    }
}

/// Conversion of a generation-specific schema into [`VirtualMedia`].
pub trait MediaSchema {
    /// Normalized view of the device.
    fn normalize(self) -> VirtualMedia;
}

fn target(action: Option<ActionTarget>) -> Option<String> {
    action.map(|a| a.target).filter(|t| !t.is_empty())
}

impl MediaSchema for Ilo4VirtualMedia {
    fn normalize(self) -> VirtualMedia {
        let actions = self.oem.hp.actions;
        VirtualMedia {
            id: self.id,
            media_types: self.media_types,
            insert_target: target(actions.insert),
            eject_target: target(actions.eject),
        }
    }
}

impl MediaSchema for Ilo5VirtualMedia {
    fn normalize(self) -> VirtualMedia {
        VirtualMedia {
            id: self.id,
            media_types: self.media_types,
            insert_target: target(self.actions.insert),
            eject_target: target(self.actions.eject),
        }
    }
}

impl MediaSchema for RawVirtualMedia {
    fn normalize(self) -> VirtualMedia {
        match self {
            Self::Gen4(media) => media.normalize(),
            Self::Gen5(media) => media.normalize(),
        }
    }
}

// ============================================================================
// Normalized view
// ============================================================================

/// A virtual media device, independent of iLO generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMedia {
    /// Resource path.
    pub id: String,
    /// Media the device accepts.
    pub media_types: Vec<String>,
    /// Path of the insert action.
    pub insert_target: Option<String>,
    /// Path of the eject action.
    pub eject_target: Option<String>,
}

impl VirtualMedia {
    /// Slots this device can serve.
    pub fn slots(&self) -> impl Iterator<Item = MediaSlot> + '_ {
        [MediaSlot::Dvd, MediaSlot::Floppy]
            .into_iter()
            .filter(|slot| self.media_types.iter().any(|t| t == slot.media_type()))
    }
}

/// The DVD and floppy devices of one BMC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualDevices {
    /// Virtual DVD drive.
    pub dvd: Option<VirtualMedia>,
    /// Virtual floppy drive.
    pub floppy: Option<VirtualMedia>,
}

impl VirtualDevices {
    /// File a device under every slot its media types cover. A later device
    /// replaces an earlier one for the same slot.
    pub fn record(&mut self, media: VirtualMedia) {
        for slot in media.slots().collect::<Vec<_>>() {
            match slot {
                MediaSlot::Dvd => self.dvd = Some(media.clone()),
                MediaSlot::Floppy => self.floppy = Some(media.clone()),
            }
        }
    }

    /// Device serving `slot`.
    #[must_use]
    pub fn get(&self, slot: MediaSlot) -> Option<&VirtualMedia> {
        match slot {
            MediaSlot::Dvd => self.dvd.as_ref(),
            MediaSlot::Floppy => self.floppy.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ILO4_DVD: &str = r##"{
        "@odata.id": "/redfish/v1/Managers/1/VirtualMedia/2/",
        "MediaTypes": ["CD", "DVD"],
        "Oem": {"Hp": {"Actions": {
            "#HpiLOVirtualMedia.InsertVirtualMedia": {
                "target": "/redfish/v1/Managers/1/VirtualMedia/2/Actions/Oem/Hp/HpiLOVirtualMedia.InsertVirtualMedia/"
            },
            "#HpiLOVirtualMedia.EjectVirtualMedia": {
                "target": "/redfish/v1/Managers/1/VirtualMedia/2/Actions/Oem/Hp/HpiLOVirtualMedia.EjectVirtualMedia/"
            }
        }}}
    }"##;

    const ILO5_DVD: &str = r##"{
        "@odata.id": "/redfish/v1/Managers/1/VirtualMedia/2/",
        "MediaTypes": ["CD", "DVD"],
        "Actions": {
            "#VirtualMedia.InsertMedia": {
                "target": "/redfish/v1/Managers/1/VirtualMedia/2/Actions/VirtualMedia.InsertMedia/"
            },
            "#VirtualMedia.EjectMedia": {
                "target": "/redfish/v1/Managers/1/VirtualMedia/2/Actions/VirtualMedia.EjectMedia/"
            }
        }
    }"##;

    #[test]
    fn test_generations_normalize_to_same_shape() {
        let gen4 = RawVirtualMedia::parse(BmcGeneration::Ilo4, ILO4_DVD)
            .unwrap()
            .normalize();
        let gen5 = RawVirtualMedia::parse(BmcGeneration::Ilo5, ILO5_DVD)
            .unwrap()
            .normalize();

        assert_eq!(gen4.id, gen5.id);
        assert_eq!(gen4.media_types, gen5.media_types);
        assert!(gen4
            .insert_target
            .as_deref()
            .unwrap()
            .ends_with("HpiLOVirtualMedia.InsertVirtualMedia/"));
        assert!(gen5
            .eject_target
            .as_deref()
            .unwrap()
            .ends_with("VirtualMedia.EjectMedia/"));
        assert_eq!(gen4.slots().collect::<Vec<_>>(), vec![MediaSlot::Dvd]);
        assert_eq!(gen5.slots().collect::<Vec<_>>(), vec![MediaSlot::Dvd]);
    }

    #[test]
    fn test_wrong_schema_has_no_actions() {
        let media = RawVirtualMedia::parse(BmcGeneration::Ilo4, ILO5_DVD)
            .unwrap()
            .normalize();
        assert!(media.insert_target.is_none());
        assert!(media.eject_target.is_none());
    }

    #[test]
    fn test_generation_from_model() {
        assert_eq!("iLO4".parse::<BmcGeneration>().unwrap(), BmcGeneration::Ilo4);
        assert_eq!("ilo5".parse::<BmcGeneration>().unwrap(), BmcGeneration::Ilo5);
        assert!(matches!(
            "iLO6".parse::<BmcGeneration>(),
            Err(DriverError::UnsupportedModel(model)) if model == "iLO6"
        ));
    }

    #[test]
    fn test_record_classifies_by_media_type() {
        let mut devices = VirtualDevices::default();
        devices.record(VirtualMedia {
            id: "/vm/1".into(),
            media_types: vec!["Floppy".into(), "USBStick".into()],
            insert_target: None,
            eject_target: None,
        });
        devices.record(VirtualMedia {
            id: "/vm/2".into(),
            media_types: vec!["CD".into(), "DVD".into()],
            insert_target: None,
            eject_target: None,
        });

        assert_eq!(devices.get(MediaSlot::Floppy).unwrap().id, "/vm/1");
        assert_eq!(devices.get(MediaSlot::Dvd).unwrap().id, "/vm/2");
    }

    #[test]
    fn test_my_session_flag() {
        let ilo5: SessionResource = serde_json::from_str(
            r#"{"@odata.id": "/s/1", "Oem": {"Hpe": {"MySession": true}}}"#,
        )
        .unwrap();
        let ilo4: SessionResource = serde_json::from_str(
            r#"{"@odata.id": "/s/2", "Oem": {"Hp": {"MySession": false}}}"#,
        )
        .unwrap();
        assert!(ilo5.is_mine());
        assert!(!ilo4.is_mine());
    }
}
