//! Capabilities an application declares in its feed metadata.
//!
//! A capability describes something the application *can* do (open a file
//! type, handle a URL scheme, ...). Whether the capability is actually
//! registered with the desktop environment, and whether the app becomes the
//! *default* handler, is decided by the access points in the app list.

use crate::xml::XmlElement;

/// A list of capabilities, optionally scoped to one OS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityList {
    /// OS this list applies to; `None` means any
    pub os: Option<String>,
    /// The capabilities themselves
    pub entries: Vec<Capability>,
    /// Capability elements we don't understand, preserved round-trip
    pub unknown: Vec<XmlElement>,
}

/// One capability, tagged the way it appears in the XML.
#[derive(Debug, Clone, PartialEq)]
pub enum Capability {
    /// Can open files with the given extensions
    FileType {
        /// Stable registration id (e.g. a ProgID)
        id: String,
        /// File extensions including the leading dot
        extensions: Vec<String>,
    },
    /// Can handle URLs with the given scheme prefixes
    UrlProtocol {
        /// Stable registration id
        id: String,
        /// URL scheme prefixes (e.g. `http`); empty falls back to the id
        prefixes: Vec<String>,
    },
    /// Can react to removable-media events
    AutoPlay {
        /// Stable registration id
        id: String,
        /// AutoPlay event names
        events: Vec<String>,
    },
    /// Adds an entry to the context menu of some target class
    ContextMenu {
        /// Stable registration id
        id: String,
        /// What the menu applies to (e.g. `files`, `directories`)
        target: String,
    },
    /// Can act as a system default program for a service
    DefaultProgram {
        /// Stable registration id
        id: String,
        /// Service name (e.g. `Mail`, `Browser`)
        service: String,
    },
}

impl Capability {
    /// The registration id shared by all capability kinds.
    pub fn id(&self) -> &str {
        match self {
            Capability::FileType { id, .. }
            | Capability::UrlProtocol { id, .. }
            | Capability::AutoPlay { id, .. }
            | Capability::ContextMenu { id, .. }
            | Capability::DefaultProgram { id, .. } => id,
        }
    }

    /// Conflict ids claimed by *registering* this capability.
    ///
    /// Registration competes on the id namespace only; becoming the default
    /// handler competes on the resource itself (see
    /// [`Capability::default_conflict_ids`]).
    pub fn registration_conflict_ids(&self) -> Vec<String> {
        vec![format!("progid:{}", self.id())]
    }

    /// Conflict ids claimed by making this capability the *default* handler.
    pub fn default_conflict_ids(&self) -> Vec<String> {
        match self {
            Capability::FileType { extensions, .. } => extensions
                .iter()
                .map(|ext| format!("file-ext:{ext}"))
                .collect(),
            Capability::UrlProtocol { id, prefixes } => {
                if prefixes.is_empty() {
                    vec![format!("url-protocol:{id}")]
                } else {
                    prefixes
                        .iter()
                        .map(|p| format!("url-protocol:{p}"))
                        .collect()
                }
            }
            Capability::AutoPlay { events, .. } => events
                .iter()
                .map(|e| format!("autoplay-event:{e}"))
                .collect(),
            Capability::ContextMenu { id, target } => {
                vec![format!("context-menu:{target}/{id}")]
            }
            Capability::DefaultProgram { service, .. } => {
                vec![format!("default-program:{service}")]
            }
        }
    }

    pub(crate) fn from_element(el: &XmlElement) -> Option<Capability> {
        let cap = match el.name.as_str() {
            "file-type" => Capability::FileType {
                id: el.attr("id")?.to_owned(),
                extensions: el
                    .children_named("extension")
                    .filter_map(|c| c.attr("value"))
                    .map(str::to_owned)
                    .collect(),
            },
            "url-protocol" => Capability::UrlProtocol {
                id: el.attr("id")?.to_owned(),
                prefixes: el
                    .children_named("prefix")
                    .filter_map(|c| c.attr("value"))
                    .map(str::to_owned)
                    .collect(),
            },
            "auto-play" => Capability::AutoPlay {
                id: el.attr("id")?.to_owned(),
                events: el
                    .children_named("event")
                    .filter_map(|c| c.attr("name"))
                    .map(str::to_owned)
                    .collect(),
            },
            "context-menu" => Capability::ContextMenu {
                id: el.attr("id")?.to_owned(),
                target: el.attr("target").unwrap_or("files").to_owned(),
            },
            "default-program" => Capability::DefaultProgram {
                id: el.attr("id")?.to_owned(),
                service: el.attr("service")?.to_owned(),
            },
            _ => return None,
        };
        Some(cap)
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        match self {
            Capability::FileType { id, extensions } => {
                let mut el = XmlElement::new("file-type");
                el.set_attr("id", id);
                for ext in extensions {
                    let mut child = XmlElement::new("extension");
                    child.set_attr("value", ext);
                    el.push(child);
                }
                el
            }
            Capability::UrlProtocol { id, prefixes } => {
                let mut el = XmlElement::new("url-protocol");
                el.set_attr("id", id);
                for prefix in prefixes {
                    let mut child = XmlElement::new("prefix");
                    child.set_attr("value", prefix);
                    el.push(child);
                }
                el
            }
            Capability::AutoPlay { id, events } => {
                let mut el = XmlElement::new("auto-play");
                el.set_attr("id", id);
                for event in events {
                    let mut child = XmlElement::new("event");
                    child.set_attr("name", event);
                    el.push(child);
                }
                el
            }
            Capability::ContextMenu { id, target } => {
                let mut el = XmlElement::new("context-menu");
                el.set_attr("id", id);
                el.set_attr("target", target);
                el
            }
            Capability::DefaultProgram { id, service } => {
                let mut el = XmlElement::new("default-program");
                el.set_attr("id", id);
                el.set_attr("service", service);
                el
            }
        }
    }
}

impl CapabilityList {
    /// Find a capability by id across all kinds.
    pub fn get(&self, id: &str) -> Option<&Capability> {
        self.entries.iter().find(|c| c.id() == id)
    }

    pub(crate) fn from_element(el: &XmlElement) -> CapabilityList {
        let mut list = CapabilityList {
            os: el.attr("os").map(str::to_owned),
            ..Default::default()
        };
        for child in &el.children {
            match Capability::from_element(child) {
                Some(cap) => list.entries.push(cap),
                None => list.unknown.push(child.clone()),
            }
        }
        list
    }

    pub(crate) fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::new("capabilities");
        if let Some(os) = &self.os {
            el.set_attr("os", os);
        }
        for cap in &self.entries {
            el.push(cap.to_element());
        }
        for unknown in &self.unknown {
            el.push(unknown.clone());
        }
        el
    }
}
