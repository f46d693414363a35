//! Maintenance windows
//!
//! Operator-declared time ranges during which named alert kinds are
//! suppressed for an organisation (optionally narrowed to one
//! destination). Ranges are wall-clock in a named timezone, so a window
//! "02:00-03:00 Europe/Berlin" tracks that zone across DST changes.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use courier_core::{AlertKind, DestinationId, OrganizationId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identifier for a maintenance window
pub type MaintenanceWindowId = ulid::Ulid;

/// One operator-declared suppression range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: MaintenanceWindowId,
    pub organization: OrganizationId,
    /// `None` suppresses for every destination of the organisation
    #[serde(default)]
    pub destination: Option<DestinationId>,
    /// Wall-clock range boundaries in `timezone`
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub timezone: Tz,
    /// Alert kinds this window suppresses
    pub kinds: HashSet<AlertKind>,
    pub reason: String,
    pub created_by: String,
}

impl MaintenanceWindow {
    /// Whether `now` falls inside this window
    #[must_use]
    pub fn covers_instant(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone).naive_local();
        self.starts_at <= local && local < self.ends_at
    }

    /// Whether this window suppresses an event with the given coordinates
    #[must_use]
    pub fn suppresses(
        &self,
        now: DateTime<Utc>,
        kind: AlertKind,
        organization: Option<&OrganizationId>,
        destination: Option<DestinationId>,
    ) -> bool {
        if !self.kinds.contains(&kind) {
            return false;
        }
        if organization != Some(&self.organization) {
            return false;
        }
        if let Some(window_destination) = self.destination
            && destination != Some(window_destination)
        {
            return false;
        }
        self.covers_instant(now)
    }

    /// Whether the window can never match again
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.timezone.from_local_datetime(&self.ends_at).earliest() {
            Some(end) => end.with_timezone(&Utc) <= now,
            // An end time skipped by a DST jump is treated as already past
            None => true,
        }
    }
}

/// The set of currently declared maintenance windows
#[derive(Debug, Default)]
pub struct MaintenanceCalendar {
    windows: RwLock<Vec<MaintenanceWindow>>,
}

impl MaintenanceCalendar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a window, returning its id
    pub fn add(&self, window: MaintenanceWindow) -> MaintenanceWindowId {
        let id = window.id;
        self.windows.write().push(window);
        id
    }

    /// Remove a window by id; returns whether it existed
    pub fn remove(&self, id: MaintenanceWindowId) -> bool {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|window| window.id != id);
        windows.len() != before
    }

    /// Whether any active window suppresses the given event coordinates
    #[must_use]
    pub fn suppresses(
        &self,
        now: DateTime<Utc>,
        kind: AlertKind,
        organization: Option<&OrganizationId>,
        destination: Option<DestinationId>,
    ) -> bool {
        self.windows
            .read()
            .iter()
            .any(|window| window.suppresses(now, kind, organization, destination))
    }

    /// Windows declared for an organisation
    #[must_use]
    pub fn for_organization(&self, organization: &OrganizationId) -> Vec<MaintenanceWindow> {
        self.windows
            .read()
            .iter()
            .filter(|window| &window.organization == organization)
            .cloned()
            .collect()
    }

    /// Drop windows that can never match again; returns how many were removed
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|window| !window.is_expired(now));
        before - windows.len()
    }
}
