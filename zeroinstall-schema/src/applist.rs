//! The app list: every application the user has added, integrated or not.

use std::collections::BTreeSet;

use crate::access_points::AccessPointList;
use crate::capabilities::CapabilityList;
use crate::errors::{Result, SchemaError};
use crate::xml::{self, XmlElement};

/// XML namespace of the app-list document.
pub const APP_LIST_NS: &str = "http://0install.de/schema/desktop-integration/app-list";

/// Attributes and elements we don't understand, preserved round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlExtra {
    /// Unknown attributes in document order
    pub attrs: Vec<(String, String)>,
    /// Unknown child elements in document order
    pub elements: Vec<XmlElement>,
}

/// One application the user has added.
///
/// The entry exists as soon as the app is added; `access_points` stays `None`
/// until the app is integrated into the desktop environment for the first
/// time.
#[derive(Debug, Clone, PartialEq)]
pub struct AppEntry {
    /// Identity of the app; unique within one list
    pub interface_uri: String,
    /// Display name
    pub name: String,
    /// Whether background updates are allowed
    pub auto_update: bool,
    /// Only realise this entry on hosts whose name matches
    pub hostname_regex: Option<String>,
    /// Solver requirements, opaque to this layer
    pub requirements: Option<XmlElement>,
    /// Capabilities declared by the app's feed
    pub capability_lists: Vec<CapabilityList>,
    /// Desktop integration; `None` = never integrated
    pub access_points: Option<AccessPointList>,
    /// Unix seconds of the last modification
    pub timestamp: i64,
    /// Unrecognized XML carried along for round-trip
    pub extra: XmlExtra,
}

impl AppEntry {
    /// A fresh, un-integrated entry.
    pub fn new(interface_uri: impl Into<String>, name: impl Into<String>) -> Self {
        AppEntry {
            interface_uri: interface_uri.into(),
            name: name.into(),
            auto_update: true,
            hostname_regex: None,
            requirements: None,
            capability_lists: Vec::new(),
            access_points: None,
            timestamp: 0,
            extra: XmlExtra::default(),
        }
    }

    /// Union of conflict ids over all of this entry's access points.
    pub fn conflict_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        if let Some(points) = &self.access_points {
            for point in &points.entries {
                ids.extend(point.conflict_ids(&self.capability_lists));
            }
        }
        ids
    }

    const KNOWN_ATTRS: &'static [&'static str] =
        &["interface", "name", "auto-update", "hostname", "timestamp"];
    const KNOWN_CHILDREN: &'static [&'static str] =
        &["requirements", "capabilities", "access-points"];

    fn from_element(el: &XmlElement) -> Result<AppEntry> {
        let interface_uri = el.require_attr("interface")?.to_owned();
        let timestamp = match el.attr("timestamp") {
            Some(raw) => raw.parse().map_err(|_| SchemaError::InvalidData {
                message: format!("bad timestamp on app {interface_uri}: {raw:?}"),
            })?,
            None => 0,
        };
        let mut entry = AppEntry {
            name: el.attr("name").unwrap_or(&interface_uri).to_owned(),
            auto_update: el.attr("auto-update") != Some("false"),
            hostname_regex: el.attr("hostname").map(str::to_owned),
            requirements: el.child("requirements").cloned(),
            capability_lists: el
                .children_named("capabilities")
                .map(CapabilityList::from_element)
                .collect(),
            access_points: el.child("access-points").map(AccessPointList::from_element),
            timestamp,
            interface_uri,
            extra: XmlExtra::default(),
        };
        for (k, v) in &el.attrs {
            if !Self::KNOWN_ATTRS.contains(&k.as_str()) {
                entry.extra.attrs.push((k.clone(), v.clone()));
            }
        }
        for child in &el.children {
            if !Self::KNOWN_CHILDREN.contains(&child.name.as_str()) {
                entry.extra.elements.push(child.clone());
            }
        }
        Ok(entry)
    }

    fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::new("app");
        el.set_attr("interface", &self.interface_uri);
        el.set_attr("name", &self.name);
        if !self.auto_update {
            el.set_attr("auto-update", "false");
        }
        if let Some(hostname) = &self.hostname_regex {
            el.set_attr("hostname", hostname);
        }
        el.set_attr("timestamp", self.timestamp.to_string());
        for (k, v) in &self.extra.attrs {
            el.set_attr(k, v);
        }
        if let Some(requirements) = &self.requirements {
            el.push(requirements.clone());
        }
        for list in &self.capability_lists {
            el.push(list.to_element());
        }
        if let Some(points) = &self.access_points {
            el.push(points.to_element());
        }
        for unknown in &self.extra.elements {
            el.push(unknown.clone());
        }
        el
    }
}

/// An ordered set of [`AppEntry`] values with unique interface URIs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppList {
    /// The entries, in user order
    pub entries: Vec<AppEntry>,
    /// Unrecognized XML carried along for round-trip
    pub extra: XmlExtra,
}

impl AppList {
    /// Look up an entry by interface URI.
    pub fn get(&self, interface_uri: &str) -> Option<&AppEntry> {
        self.entries
            .iter()
            .find(|e| e.interface_uri == interface_uri)
    }

    /// Mutable lookup by interface URI.
    pub fn get_mut(&mut self, interface_uri: &str) -> Option<&mut AppEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.interface_uri == interface_uri)
    }

    /// Whether an entry with this interface URI exists.
    pub fn contains(&self, interface_uri: &str) -> bool {
        self.get(interface_uri).is_some()
    }

    /// Parse an app-list document.
    pub fn from_xml(input: &str) -> Result<AppList> {
        let root = xml::parse(input)?;
        if root.name != "app-list" {
            return Err(SchemaError::InvalidData {
                message: format!("expected <app-list> root, found <{}>", root.name),
            });
        }
        if let Some(ns) = root.attr("xmlns") {
            if ns != APP_LIST_NS {
                tracing::warn!("unexpected app-list namespace: {ns}");
            }
        }

        let mut list = AppList::default();
        for (k, v) in &root.attrs {
            if k != "xmlns" {
                list.extra.attrs.push((k.clone(), v.clone()));
            }
        }
        for child in &root.children {
            if child.name == "app" {
                let entry = AppEntry::from_element(child)?;
                if list.contains(&entry.interface_uri) {
                    return Err(SchemaError::InvalidData {
                        message: format!(
                            "duplicate app entry for {}",
                            entry.interface_uri
                        ),
                    });
                }
                list.entries.push(entry);
            } else {
                list.extra.elements.push(child.clone());
            }
        }
        Ok(list)
    }

    /// Serialize to an indented app-list document.
    pub fn to_xml(&self) -> Result<String> {
        let mut root = XmlElement::new("app-list");
        root.set_attr("xmlns", APP_LIST_NS);
        for (k, v) in &self.extra.attrs {
            root.set_attr(k, v);
        }
        for entry in &self.entries {
            root.push(entry.to_element());
        }
        for unknown in &self.extra.elements {
            root.push(unknown.clone());
        }
        xml::serialize(&root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_points::AccessPoint;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<app-list xmlns="http://0install.de/schema/desktop-integration/app-list">
  <app interface="https://example.com/editor.xml" name="Editor" timestamp="1700000000" vendor-flag="7">
    <capabilities os="linux">
      <file-type id="editor.txt">
        <extension value=".txt"/>
      </file-type>
    </capabilities>
    <access-points>
      <capability-registration/>
      <menu-entry category="Office" name="Editor"/>
      <novelty-point mood="odd"/>
    </access-points>
    <future-element keep="me"/>
  </app>
  <app interface="https://example.com/tool.xml" name="Tool" auto-update="false" hostname="^work-" timestamp="1700000001"/>
</app-list>"#;

    #[test]
    fn parses_the_model() {
        let list = AppList::from_xml(SAMPLE).unwrap();
        assert_eq!(list.entries.len(), 2);

        let editor = list.get("https://example.com/editor.xml").unwrap();
        assert_eq!(editor.name, "Editor");
        assert!(editor.auto_update);
        assert_eq!(editor.capability_lists.len(), 1);
        let points = editor.access_points.as_ref().unwrap();
        assert_eq!(points.entries.len(), 2);
        assert!(matches!(
            points.entries[0],
            AccessPoint::CapabilityRegistration
        ));
        assert_eq!(points.unknown.len(), 1);
        assert_eq!(editor.extra.attrs, vec![("vendor-flag".into(), "7".into())]);
        assert_eq!(editor.extra.elements.len(), 1);

        let tool = list.get("https://example.com/tool.xml").unwrap();
        assert!(!tool.auto_update);
        assert_eq!(tool.hostname_regex.as_deref(), Some("^work-"));
        assert!(tool.access_points.is_none());
    }

    #[test]
    fn round_trip_preserves_unknowns() {
        let list = AppList::from_xml(SAMPLE).unwrap();
        let out = list.to_xml().unwrap();
        let again = AppList::from_xml(&out).unwrap();
        assert_eq!(list, again);

        // the unknown element and attribute literally survive
        assert!(out.contains("novelty-point"));
        assert!(out.contains("vendor-flag=\"7\""));
        assert!(out.contains("future-element"));
    }

    #[test]
    fn rejects_duplicate_uris() {
        let doubled = r#"<app-list>
  <app interface="https://example.com/a.xml" name="A"/>
  <app interface="https://example.com/a.xml" name="A again"/>
</app-list>"#;
        assert!(matches!(
            AppList::from_xml(doubled),
            Err(SchemaError::InvalidData { .. })
        ));
    }

    #[test]
    fn entry_conflict_ids_union() {
        let list = AppList::from_xml(SAMPLE).unwrap();
        let ids = list.get("https://example.com/editor.xml").unwrap().conflict_ids();
        assert!(ids.contains("progid:editor.txt"));
        assert!(ids.contains("menu:Office/Editor"));
    }
}
