//! Access points: user-visible desktop integration artefacts.
//!
//! Each variant matches one XML element inside `<access-points>`. The
//! default-handler variants reference a capability by id; their conflict ids
//! come from the capability they make default, so two apps competing for the
//! same file extension or URL scheme collide even when their registration
//! ids differ.

use crate::capabilities::CapabilityList;
use crate::xml::XmlElement;

/// The kind of system default a [`AccessPoint::Default`] claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultKind {
    /// Default handler for file extensions
    FileType,
    /// Default handler for a URL scheme
    UrlProtocol,
    /// Default AutoPlay handler
    AutoPlay,
    /// Context menu entry
    ContextMenu,
    /// System default program (mail client, browser, ...)
    DefaultProgram,
}

impl DefaultKind {
    fn tag(self) -> &'static str {
        match self {
            DefaultKind::FileType => "file-type",
            DefaultKind::UrlProtocol => "url-protocol",
            DefaultKind::AutoPlay => "auto-play",
            DefaultKind::ContextMenu => "context-menu",
            DefaultKind::DefaultProgram => "default-program",
        }
    }
}

/// One access point, tagged the way it appears in the XML.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPoint {
    /// Register all of the app's capabilities with the desktop environment
    CapabilityRegistration,
    /// An entry in the application menu
    MenuEntry {
        /// Menu category path; `None` for the top level
        category: Option<String>,
        /// Display name of the entry
        name: String,
    },
    /// An icon on the desktop
    DesktopIcon {
        /// Display name of the icon
        name: String,
    },
    /// An entry in the "Send To" menu
    SendTo {
        /// Display name of the entry
        name: String,
    },
    /// A command-line alias
    AppAlias {
        /// The alias binary name
        name: String,
        /// Feed command the alias runs; `None` for the main command
        command: Option<String>,
    },
    /// Launch on session start
    AutoStart {
        /// Registration name
        name: String,
        /// Feed command to run; `None` for the main command
        command: Option<String>,
    },
    /// Make one of the app's capabilities the system default handler
    Default {
        /// Which kind of default this is
        kind: DefaultKind,
        /// Id of the capability being made default
        capability: String,
    },
}

impl AccessPoint {
    /// Conflict ids this access point claims, given the owning app's
    /// capability lists.
    ///
    /// Two access points conflict exactly when their id sets intersect.
    pub fn conflict_ids(&self, capabilities: &[CapabilityList]) -> Vec<String> {
        match self {
            AccessPoint::CapabilityRegistration => capabilities
                .iter()
                .flat_map(|list| &list.entries)
                .flat_map(|cap| cap.registration_conflict_ids())
                .collect(),
            AccessPoint::MenuEntry { category, name } => {
                let category = category.as_deref().unwrap_or("");
                vec![format!("menu:{category}/{name}")]
            }
            AccessPoint::DesktopIcon { name } => vec![format!("desktop:{name}")],
            AccessPoint::SendTo { name } => vec![format!("send-to:{name}")],
            AccessPoint::AppAlias { name, .. } => vec![format!("alias:{name}")],
            AccessPoint::AutoStart { name, .. } => vec![format!("autostart:{name}")],
            AccessPoint::Default { capability, .. } => capabilities
                .iter()
                .filter_map(|list| list.get(capability))
                .flat_map(|cap| cap.default_conflict_ids())
                .collect(),
        }
    }

    /// The XML tag of this access point.
    pub fn tag(&self) -> &'static str {
        match self {
            AccessPoint::CapabilityRegistration => "capability-registration",
            AccessPoint::MenuEntry { .. } => "menu-entry",
            AccessPoint::DesktopIcon { .. } => "desktop-icon",
            AccessPoint::SendTo { .. } => "send-to",
            AccessPoint::AppAlias { .. } => "alias",
            AccessPoint::AutoStart { .. } => "auto-start",
            AccessPoint::Default { kind, .. } => kind.tag(),
        }
    }

    pub(crate) fn from_element(el: &XmlElement) -> Option<AccessPoint> {
        let default = |kind| {
            el.attr("capability").map(|capability| AccessPoint::Default {
                kind,
                capability: capability.to_owned(),
            })
        };
        match el.name.as_str() {
            "capability-registration" => Some(AccessPoint::CapabilityRegistration),
            "menu-entry" => Some(AccessPoint::MenuEntry {
                category: el.attr("category").map(str::to_owned),
                name: el.attr("name")?.to_owned(),
            }),
            "desktop-icon" => Some(AccessPoint::DesktopIcon {
                name: el.attr("name")?.to_owned(),
            }),
            "send-to" => Some(AccessPoint::SendTo {
                name: el.attr("name")?.to_owned(),
            }),
            "alias" => Some(AccessPoint::AppAlias {
                name: el.attr("name")?.to_owned(),
                command: el.attr("command").map(str::to_owned),
            }),
            "auto-start" => Some(AccessPoint::AutoStart {
                name: el.attr("name")?.to_owned(),
                command: el.attr("command").map(str::to_owned),
            }),
            "file-type" => default(DefaultKind::FileType),
            "url-protocol" => default(DefaultKind::UrlProtocol),
            "auto-play" => default(DefaultKind::AutoPlay),
            "context-menu" => default(DefaultKind::ContextMenu),
            "default-program" => default(DefaultKind::DefaultProgram),
            _ => None,
        }
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::new(self.tag());
        match self {
            AccessPoint::CapabilityRegistration => {}
            AccessPoint::MenuEntry { category, name } => {
                if let Some(category) = category {
                    el.set_attr("category", category);
                }
                el.set_attr("name", name);
            }
            AccessPoint::DesktopIcon { name } | AccessPoint::SendTo { name } => {
                el.set_attr("name", name);
            }
            AccessPoint::AppAlias { name, command }
            | AccessPoint::AutoStart { name, command } => {
                el.set_attr("name", name);
                if let Some(command) = command {
                    el.set_attr("command", command);
                }
            }
            AccessPoint::Default { capability, .. } => {
                el.set_attr("capability", capability);
            }
        }
        el
    }
}

/// The `<access-points>` element of an app entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPointList {
    /// The access points themselves
    pub entries: Vec<AccessPoint>,
    /// Access-point elements we don't understand, preserved round-trip
    pub unknown: Vec<XmlElement>,
}

impl AccessPointList {
    pub(crate) fn from_element(el: &XmlElement) -> AccessPointList {
        let mut list = AccessPointList::default();
        for child in &el.children {
            match AccessPoint::from_element(child) {
                Some(point) => list.entries.push(point),
                None => list.unknown.push(child.clone()),
            }
        }
        list
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::new("access-points");
        for point in &self.entries {
            el.push(point.to_element());
        }
        for unknown in &self.unknown {
            el.push(unknown.clone());
        }
        el
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Capability;

    fn caps() -> Vec<CapabilityList> {
        vec![CapabilityList {
            os: None,
            entries: vec![
                Capability::FileType {
                    id: "myapp.txt".into(),
                    extensions: vec![".txt".into(), ".text".into()],
                },
                Capability::UrlProtocol {
                    id: "myapp.web".into(),
                    prefixes: vec!["web+my".into()],
                },
            ],
            unknown: Vec::new(),
        }]
    }

    #[test]
    fn registration_claims_progids() {
        let ids = AccessPoint::CapabilityRegistration.conflict_ids(&caps());
        assert_eq!(ids, vec!["progid:myapp.txt", "progid:myapp.web"]);
    }

    #[test]
    fn default_claims_the_resource() {
        let point = AccessPoint::Default {
            kind: DefaultKind::FileType,
            capability: "myapp.txt".into(),
        };
        assert_eq!(
            point.conflict_ids(&caps()),
            vec!["file-ext:.txt", "file-ext:.text"]
        );
    }

    #[test]
    fn default_for_missing_capability_claims_nothing() {
        let point = AccessPoint::Default {
            kind: DefaultKind::AutoPlay,
            capability: "nope".into(),
        };
        assert!(point.conflict_ids(&caps()).is_empty());
    }
}
