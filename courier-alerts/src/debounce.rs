//! Alert debouncer
//!
//! Turns the raw stream of threshold events into a bounded, deduplicated
//! one. State is keyed by (kind, destination, organisation); each key
//! carries a rolling window, a cooldown, a suppression marker and its
//! escalation progress. A sweeper drops keys whose windows, cooldowns and
//! escalations have all run out.

use chrono::{DateTime, Duration, Utc};
use courier_core::{AlertKind, DestinationId, OrganizationId};
use dashmap::DashMap;

use crate::{
    config::DebounceConfig,
    escalation::TOP_LEVEL,
};

/// Debounce key: the identity an alert stream is deduplicated under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub kind: AlertKind,
    pub destination: Option<DestinationId>,
    pub organization: Option<OrganizationId>,
}

/// Why an event was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// An active maintenance window lists this kind
    Maintenance,
    /// The per-key cooldown has not elapsed
    Cooldown,
    /// The key is suppressed for the remainder of its window
    Suppressed,
    /// This event hit the per-window cap and started the suppression
    WindowExhausted,
}

impl DropReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Maintenance => "maintenance",
            Self::Cooldown => "cooldown",
            Self::Suppressed => "suppressed",
            Self::WindowExhausted => "window_exhausted",
        }
    }
}

/// Outcome of pushing one event through the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit a notification at the key's current escalation level
    Allow { level: u8 },
    Drop { reason: DropReason },
}

#[derive(Debug, Clone)]
pub(crate) struct DebounceState {
    window_started_at: DateTime<Utc>,
    count_in_window: u32,
    pub(crate) last_alert_at: DateTime<Utc>,
    cooldown_until: DateTime<Utc>,
    suppressed_until: Option<DateTime<Utc>>,
    pub(crate) escalation_level: u8,
    pub(crate) next_escalation_at: Option<DateTime<Utc>>,
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Per-key debounce state machine
#[derive(Debug, Default)]
pub struct Debouncer {
    states: DashMap<DebounceKey, DebounceState>,
}

impl Debouncer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one event through the state machine
    pub fn decide(&self, key: DebounceKey, now: DateTime<Utc>, config: &DebounceConfig) -> Decision {
        match self.states.entry(key) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                // First event for this key: allow and initialise everything
                vacant.insert(DebounceState {
                    window_started_at: now,
                    count_in_window: 1,
                    last_alert_at: now,
                    cooldown_until: now + secs(config.cooldown_secs),
                    suppressed_until: None,
                    escalation_level: 0,
                    next_escalation_at: Some(now + secs(config.escalation_delay_secs)),
                });
                Decision::Allow { level: 0 }
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let state = occupied.get_mut();

                if now < state.cooldown_until {
                    return Decision::Drop {
                        reason: DropReason::Cooldown,
                    };
                }
                if state.suppressed_until.is_some_and(|until| now < until) {
                    return Decision::Drop {
                        reason: DropReason::Suppressed,
                    };
                }

                let window_end = state.window_started_at + secs(config.window_secs);
                if now > window_end {
                    state.window_started_at = now;
                    state.count_in_window = 0;
                    state.suppressed_until = None;
                }

                if state.count_in_window >= config.max_alerts_per_window {
                    // Cap reached: stay quiet for the rest of the window
                    state.suppressed_until =
                        Some(state.window_started_at + secs(config.window_secs));
                    return Decision::Drop {
                        reason: DropReason::WindowExhausted,
                    };
                }

                state.count_in_window += 1;
                state.last_alert_at = now;
                state.cooldown_until = now + secs(config.cooldown_secs);
                state.next_escalation_at = Some(now + secs(config.escalation_delay_secs));
                Decision::Allow {
                    level: state.escalation_level,
                }
            }
        }
    }

    /// Advance every key whose escalation is due
    ///
    /// Returns (key, new level) for each escalated key; the caller emits a
    /// notification per entry and the next rung is scheduled
    /// ladder-relative to `now`.
    pub fn check_escalations<F>(&self, now: DateTime<Utc>, config_for: F) -> Vec<(DebounceKey, u8)>
    where
        F: Fn(AlertKind) -> DebounceConfig,
    {
        let mut escalated = Vec::new();
        for mut entry in self.states.iter_mut() {
            let due = entry
                .next_escalation_at
                .is_some_and(|at| now >= at);
            if due && entry.escalation_level < TOP_LEVEL {
                entry.escalation_level += 1;
                let config = config_for(entry.key().kind);
                entry.next_escalation_at = if entry.escalation_level < TOP_LEVEL {
                    Some(now + secs(config.escalation_delay_secs))
                } else {
                    None
                };
                escalated.push((entry.key().clone(), entry.escalation_level));
            }
        }
        escalated
    }

    /// Clear the state for a resolved condition; the next event starts a
    /// fresh window at level 0
    pub fn resolve(&self, key: &DebounceKey) -> bool {
        self.states.remove(key).is_some()
    }

    /// Drop keys whose windows, cooldowns, suppressions and escalations
    /// have all elapsed; returns how many were dropped
    pub fn sweep<F>(&self, now: DateTime<Utc>, config_for: F) -> usize
    where
        F: Fn(AlertKind) -> DebounceConfig,
    {
        let before = self.states.len();
        self.states.retain(|key, state| {
            let config = config_for(key.kind);
            let window_active = now <= state.window_started_at + secs(config.window_secs);
            let cooldown_active = now < state.cooldown_until;
            let suppression_active = state.suppressed_until.is_some_and(|until| now < until);
            let escalation_pending = state.next_escalation_at.is_some_and(|at| now < at);
            window_active || cooldown_active || suppression_active || escalation_pending
        });
        before - self.states.len()
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub(crate) fn state_of(&self, key: &DebounceKey) -> Option<DebounceState> {
        self.states.get(key).map(|state| state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(kind: AlertKind) -> DebounceKey {
        DebounceKey {
            kind,
            destination: None,
            organization: Some(OrganizationId::new("org-a")),
        }
    }

    fn config(window: u64, cooldown: u64, max: u32) -> DebounceConfig {
        DebounceConfig {
            window_secs: window,
            cooldown_secs: cooldown,
            max_alerts_per_window: max,
            escalation_delay_secs: 3600,
        }
    }

    #[test]
    fn test_first_event_allowed_at_level_zero() {
        let debouncer = Debouncer::new();
        let decision = debouncer.decide(
            key(AlertKind::FailureRate),
            Utc::now(),
            &config(900, 60, 3),
        );
        assert_eq!(decision, Decision::Allow { level: 0 });
    }

    #[test]
    fn test_cooldown_drops_rapid_repeats() {
        let debouncer = Debouncer::new();
        let config = config(900, 60, 3);
        let now = Utc::now();
        let k = key(AlertKind::FailureRate);

        assert_eq!(
            debouncer.decide(k.clone(), now, &config),
            Decision::Allow { level: 0 }
        );
        assert_eq!(
            debouncer.decide(k.clone(), now + Duration::seconds(10), &config),
            Decision::Drop {
                reason: DropReason::Cooldown
            }
        );
        // The dropped event does not count as an alert
        assert_eq!(debouncer.state_of(&k).unwrap().last_alert_at, now);

        // Past the cooldown the next event is allowed again
        let later = now + Duration::seconds(61);
        assert_eq!(
            debouncer.decide(k.clone(), later, &config),
            Decision::Allow { level: 0 }
        );
        assert_eq!(debouncer.state_of(&k).unwrap().last_alert_at, later);
    }

    #[test]
    fn test_window_cap_suppresses_remainder() {
        let debouncer = Debouncer::new();
        // Zero cooldown so only the window cap limits
        let config = config(600, 0, 3);
        let start = Utc::now();
        let k = key(AlertKind::ConsecutiveFailures);

        let mut allowed = 0;
        for i in 0..10 {
            let at = start + Duration::seconds(i);
            if matches!(
                debouncer.decide(k.clone(), at, &config),
                Decision::Allow { .. }
            ) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3, "exactly max_alerts_per_window emitted");

        // Fourth event set the suppression; later events inside the window
        // report Suppressed
        assert_eq!(
            debouncer.decide(k.clone(), start + Duration::seconds(30), &config),
            Decision::Drop {
                reason: DropReason::Suppressed
            }
        );

        // A fresh window starts clean
        assert_eq!(
            debouncer.decide(k, start + Duration::seconds(601), &config),
            Decision::Allow { level: 0 }
        );
    }

    #[test]
    fn test_escalation_climbs_and_stops_at_top() {
        let debouncer = Debouncer::new();
        let config = config(900, 0, 10);
        let now = Utc::now();
        let k = key(AlertKind::QueueBacklog);

        debouncer.decide(k.clone(), now, &config);

        let lookup = |_: AlertKind| DebounceConfig {
            escalation_delay_secs: 3600,
            ..DebounceConfig::default()
        };

        // Not due yet
        assert!(debouncer.check_escalations(now, lookup).is_empty());

        // One hour later: level 1
        let escalated = debouncer.check_escalations(now + Duration::hours(1), lookup);
        assert_eq!(escalated, vec![(k.clone(), 1)]);

        // Ladder-relative delays: levels 2 and 3 an hour apart each
        let escalated = debouncer.check_escalations(now + Duration::hours(2), lookup);
        assert_eq!(escalated, vec![(k.clone(), 2)]);
        let escalated = debouncer.check_escalations(now + Duration::hours(3), lookup);
        assert_eq!(escalated, vec![(k.clone(), 3)]);

        // Top level: no further escalation
        assert!(
            debouncer
                .check_escalations(now + Duration::hours(10), lookup)
                .is_empty()
        );
    }

    #[test]
    fn test_resolution_restarts_from_level_zero() {
        let debouncer = Debouncer::new();
        let config = config(900, 0, 10);
        let now = Utc::now();
        let k = key(AlertKind::FailureRate);

        debouncer.decide(k.clone(), now, &config);
        debouncer.check_escalations(now + Duration::hours(1), |_| config.clone());
        assert_eq!(debouncer.state_of(&k).unwrap().escalation_level, 1);

        assert!(debouncer.resolve(&k));
        assert_eq!(
            debouncer.decide(k.clone(), now + Duration::hours(2), &config),
            Decision::Allow { level: 0 }
        );
    }

    #[test]
    fn test_sweep_drops_fully_elapsed_state() {
        let debouncer = Debouncer::new();
        let config = config(10, 10, 3);
        let now = Utc::now();
        debouncer.decide(key(AlertKind::FailureRate), now, &config);
        assert_eq!(debouncer.len(), 1);

        let lookup = |_: AlertKind| config.clone();
        // Still alive: escalation pending
        assert_eq!(debouncer.sweep(now + Duration::seconds(20), lookup), 0);
        // After the escalation ladder would be exhausted, everything has
        // elapsed: escalate through the top, then sweep
        for hours in 1..=3 {
            debouncer.check_escalations(now + Duration::hours(hours), lookup);
        }
        assert_eq!(debouncer.sweep(now + Duration::hours(4), lookup), 1);
        assert!(debouncer.is_empty());
    }
}
