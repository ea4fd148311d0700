//! The seam to platform-specific shortcut/registry writers.
//!
//! Actual menu entries, file associations and aliases are written by
//! per-platform handlers injected at construction; the manager only decides
//! *what* to apply and in which order, and drives rollback when a handler
//! fails partway.

use zeroinstall_schema::{AccessPoint, AppEntry, Feed};

use crate::errors::DesktopResult;
use crate::icons::IconStore;

/// Applies and removes the real desktop artefacts for access points.
pub trait PlatformIntegration {
    /// Realise one access point on this machine.
    fn apply(
        &self,
        entry: &AppEntry,
        feed: &Feed,
        point: &AccessPoint,
        icons: &IconStore,
        machine_wide: bool,
    ) -> DesktopResult<()>;

    /// Remove one access point's artefacts from this machine.
    fn unapply(
        &self,
        entry: &AppEntry,
        point: &AccessPoint,
        machine_wide: bool,
    ) -> DesktopResult<()>;
}

/// A handler that realises nothing: for headless use, dry runs and tests.
#[derive(Debug, Default)]
pub struct NoopPlatform;

impl PlatformIntegration for NoopPlatform {
    fn apply(
        &self,
        entry: &AppEntry,
        _feed: &Feed,
        point: &AccessPoint,
        _icons: &IconStore,
        machine_wide: bool,
    ) -> DesktopResult<()> {
        tracing::debug!(
            "skipping apply of <{}> for {} (machine_wide={machine_wide})",
            point.tag(),
            entry.interface_uri
        );
        Ok(())
    }

    fn unapply(
        &self,
        entry: &AppEntry,
        point: &AccessPoint,
        machine_wide: bool,
    ) -> DesktopResult<()> {
        tracing::debug!(
            "skipping unapply of <{}> for {} (machine_wide={machine_wide})",
            point.tag(),
            entry.interface_uri
        );
        Ok(())
    }
}
