//! Suggesting access points from feed metadata, grouped by category.
//!
//! The UI asks for whole categories ("integrate the menu entries", "set the
//! defaults"); each category maps to a list of access points derived from
//! the feed's entry points and capabilities.

use std::collections::BTreeSet;

use zeroinstall_schema::{AccessPoint, Capability, DefaultKind, EntryPoint, Feed};

use crate::errors::{DesktopError, DesktopResult};

/// Register the app's capabilities.
pub const CATEGORY_CAPABILITIES: &str = "capabilities";
/// Application menu entries.
pub const CATEGORY_MENU: &str = "menu";
/// Desktop icons.
pub const CATEGORY_DESKTOP: &str = "desktop";
/// "Send To" entries.
pub const CATEGORY_SEND_TO: &str = "send-to";
/// Command-line aliases.
pub const CATEGORY_ALIAS: &str = "alias";
/// Launch-on-login entries.
pub const CATEGORY_AUTO_START: &str = "auto-start";
/// Default-handler claims for the app's capabilities.
pub const CATEGORY_DEFAULTS: &str = "defaults";

/// Every category, in presentation order.
pub fn all_categories() -> &'static [&'static str] {
    &[
        CATEGORY_CAPABILITIES,
        CATEGORY_MENU,
        CATEGORY_DESKTOP,
        CATEGORY_SEND_TO,
        CATEGORY_ALIAS,
        CATEGORY_AUTO_START,
        CATEGORY_DEFAULTS,
    ]
}

/// Suggest access points for the given categories of a feed.
///
/// Names are de-duplicated and normalised to safe file names; the order of
/// the result follows the category order given.
pub fn suggest(feed: &Feed, categories: &[&str]) -> DesktopResult<Vec<AccessPoint>> {
    let entry_points = effective_entry_points(feed);
    let mut points = Vec::new();
    for category in categories {
        match *category {
            CATEGORY_CAPABILITIES => {
                if feed
                    .capability_lists
                    .iter()
                    .any(|list| !list.entries.is_empty())
                {
                    points.push(AccessPoint::CapabilityRegistration);
                }
            }
            CATEGORY_MENU => {
                for (name, _ep) in named(&entry_points, feed) {
                    points.push(AccessPoint::MenuEntry {
                        category: None,
                        name,
                    });
                }
            }
            CATEGORY_DESKTOP => {
                for (name, ep) in named(&entry_points, feed) {
                    if !ep.needs_terminal {
                        points.push(AccessPoint::DesktopIcon { name });
                    }
                }
            }
            CATEGORY_SEND_TO => {
                for (name, ep) in named(&entry_points, feed) {
                    if ep.suggest_send_to {
                        points.push(AccessPoint::SendTo { name });
                    }
                }
            }
            CATEGORY_ALIAS => {
                let mut seen = BTreeSet::new();
                for ep in &entry_points {
                    if !ep.needs_terminal && ep.binary_name.is_none() {
                        continue;
                    }
                    let name = ep
                        .binary_name
                        .clone()
                        .unwrap_or_else(|| safe_file_name(&feed.command_name(&ep.command)));
                    if seen.insert(name.clone()) {
                        points.push(AccessPoint::AppAlias {
                            name,
                            command: non_main(&ep.command),
                        });
                    }
                }
            }
            CATEGORY_AUTO_START => {
                for (name, ep) in named(&entry_points, feed) {
                    if ep.suggest_auto_start {
                        points.push(AccessPoint::AutoStart {
                            name,
                            command: non_main(&ep.command),
                        });
                    }
                }
            }
            CATEGORY_DEFAULTS => {
                for list in &feed.capability_lists {
                    for capability in &list.entries {
                        let kind = match capability {
                            Capability::FileType { .. } => Some(DefaultKind::FileType),
                            Capability::UrlProtocol { .. } => Some(DefaultKind::UrlProtocol),
                            Capability::AutoPlay { .. } => Some(DefaultKind::AutoPlay),
                            // context menus and default programs stay
                            // opt-in; suggesting them is too intrusive
                            Capability::ContextMenu { .. }
                            | Capability::DefaultProgram { .. } => None,
                        };
                        if let Some(kind) = kind {
                            points.push(AccessPoint::Default {
                                kind,
                                capability: capability.id().to_owned(),
                            });
                        }
                    }
                }
            }
            other => {
                return Err(DesktopError::invalid(format!(
                    "unknown integration category: {other:?}"
                )))
            }
        }
    }
    Ok(points)
}

/// The feed's entry points, with an implicit main one when the feed doesn't
/// declare it explicitly.
fn effective_entry_points(feed: &Feed) -> Vec<EntryPoint> {
    let mut entry_points = feed.entry_points.clone();
    if !entry_points.iter().any(|ep| ep.command == "run") {
        entry_points.insert(
            0,
            EntryPoint {
                command: "run".to_owned(),
                needs_terminal: feed.needs_terminal,
                ..Default::default()
            },
        );
    }
    entry_points
}

/// Pair every entry point with its unique display name.
fn named<'a>(entry_points: &'a [EntryPoint], feed: &Feed) -> Vec<(String, &'a EntryPoint)> {
    let mut seen = BTreeSet::new();
    let mut result = Vec::new();
    for ep in entry_points {
        let name = safe_file_name(&feed.command_name(&ep.command));
        if seen.insert(name.clone()) {
            result.push((name, ep));
        }
    }
    result
}

fn non_main(command: &str) -> Option<String> {
    if command == "run" {
        None
    } else {
        Some(command.to_owned())
    }
}

/// Normalise a display name into something every filesystem accepts.
pub fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '.' | '-' | '_' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        "app".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeroinstall_schema::CapabilityList;

    fn feed() -> Feed {
        Feed {
            name: "My Editor".to_owned(),
            summary: None,
            needs_terminal: false,
            entry_points: vec![
                EntryPoint {
                    command: "run".to_owned(),
                    suggest_send_to: true,
                    ..Default::default()
                },
                EntryPoint {
                    command: "cli".to_owned(),
                    binary_name: Some("myedit".to_owned()),
                    needs_terminal: true,
                    ..Default::default()
                },
                EntryPoint {
                    command: "agent".to_owned(),
                    suggest_auto_start: true,
                    ..Default::default()
                },
            ],
            icons: Vec::new(),
            capability_lists: vec![CapabilityList {
                os: None,
                entries: vec![
                    Capability::FileType {
                        id: "myedit.txt".to_owned(),
                        extensions: vec![".txt".to_owned()],
                    },
                    Capability::ContextMenu {
                        id: "myedit.ctx".to_owned(),
                        target: "files".to_owned(),
                    },
                ],
                unknown: Vec::new(),
            }],
        }
    }

    #[test]
    fn menu_suggestions_cover_every_entry_point() {
        let points = suggest(&feed(), &[CATEGORY_MENU]).unwrap();
        let names: Vec<&str> = points
            .iter()
            .map(|p| match p {
                AccessPoint::MenuEntry { name, .. } => name.as_str(),
                other => panic!("unexpected point {other:?}"),
            })
            .collect();
        assert_eq!(names, vec!["My Editor", "My Editor cli", "My Editor agent"]);
    }

    #[test]
    fn desktop_icons_skip_terminal_commands() {
        let points = suggest(&feed(), &[CATEGORY_DESKTOP]).unwrap();
        assert_eq!(points.len(), 2); // run + agent, not the cli one
    }

    #[test]
    fn aliases_come_from_binary_names() {
        let points = suggest(&feed(), &[CATEGORY_ALIAS]).unwrap();
        assert_eq!(
            points,
            vec![AccessPoint::AppAlias {
                name: "myedit".to_owned(),
                command: Some("cli".to_owned()),
            }]
        );
    }

    #[test]
    fn auto_start_and_send_to_follow_the_feed_flags() {
        let points =
            suggest(&feed(), &[CATEGORY_SEND_TO, CATEGORY_AUTO_START]).unwrap();
        assert_eq!(points.len(), 2);
        assert!(matches!(points[0], AccessPoint::SendTo { .. }));
        assert!(matches!(points[1], AccessPoint::AutoStart { .. }));
    }

    #[test]
    fn defaults_skip_intrusive_capability_kinds() {
        let points = suggest(&feed(), &[CATEGORY_DEFAULTS]).unwrap();
        assert_eq!(
            points,
            vec![AccessPoint::Default {
                kind: DefaultKind::FileType,
                capability: "myedit.txt".to_owned(),
            }]
        );
    }

    #[test]
    fn unknown_categories_are_rejected() {
        assert!(suggest(&feed(), &["gizmos"]).is_err());
    }

    #[test]
    fn safe_file_names_strip_separators() {
        assert_eq!(safe_file_name("My/Project: Editor?"), "My_Project_ Editor_");
        assert_eq!(safe_file_name("..."), "app");
        assert_eq!(safe_file_name("  spaced  "), "spaced");
    }
}
