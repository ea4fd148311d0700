//! Narrow contracts for feed metadata supplied by external collaborators.
//!
//! The solver, feed download and trust layers live outside this workspace;
//! the integration code only needs the handful of fields modelled here.

use url::Url;

use crate::capabilities::CapabilityList;

/// An icon advertised by a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Icon {
    /// Where to fetch the icon from
    pub href: Url,
    /// MIME type, when the feed declares one
    pub mime_type: Option<String>,
}

/// One runnable entry point of a feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryPoint {
    /// The feed command this entry point runs
    pub command: String,
    /// Suggested binary name for aliases
    pub binary_name: Option<String>,
    /// Human-readable name; falls back to the feed name
    pub name: Option<String>,
    /// Whether the command needs a terminal to be useful
    pub needs_terminal: bool,
    /// Whether the feed suggests launching this on session start
    pub suggest_auto_start: bool,
    /// Whether the feed suggests a "Send To" entry
    pub suggest_send_to: bool,
    /// Entry-point specific icons
    pub icons: Vec<Icon>,
}

/// The slice of a feed the integration layer consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    /// Display name of the app
    pub name: String,
    /// Short description, when available
    pub summary: Option<String>,
    /// Whether the main command needs a terminal
    pub needs_terminal: bool,
    /// Runnable entry points beyond the main command
    pub entry_points: Vec<EntryPoint>,
    /// Feed-level icons
    pub icons: Vec<Icon>,
    /// Capabilities the feed declares
    pub capability_lists: Vec<CapabilityList>,
}

impl Feed {
    /// Find the entry point for a command name (`"run"` is the main one).
    pub fn entry_point(&self, command: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.command == command)
    }

    /// Best display name for a command: the entry point's own name, then the
    /// feed name, suffixed with the command when it isn't the main one.
    pub fn command_name(&self, command: &str) -> String {
        if let Some(name) = self.entry_point(command).and_then(|ep| ep.name.clone()) {
            return name;
        }
        if command == "run" {
            self.name.clone()
        } else {
            format!("{} {}", self.name, command)
        }
    }
}

/// A feed paired with the interface URI it was resolved for.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedTarget {
    /// The interface URI the user asked for
    pub uri: String,
    /// The resolved feed metadata
    pub feed: Feed,
}
