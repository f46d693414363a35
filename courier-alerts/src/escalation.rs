//! Escalation ladder
//!
//! An alert that keeps firing climbs a fixed ladder of severities, each
//! widening the set of notification channels. Delays between rungs are
//! relative to the previous rung, not to the first alert.

use serde::{Deserialize, Serialize};

/// Notification severity, in escalation order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification transport class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Chat,
    Pager,
    Phone,
}

impl Channel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Chat => "chat",
            Self::Pager => "pager",
            Self::Phone => "phone",
        }
    }
}

/// The highest escalation level
pub const TOP_LEVEL: u8 = 3;

/// Severity for a 0-based escalation level
///
/// Levels above the top clamp to critical.
#[must_use]
pub const fn severity_for_level(level: u8) -> Severity {
    match level {
        0 => Severity::Low,
        1 => Severity::Medium,
        2 => Severity::High,
        _ => Severity::Critical,
    }
}

/// Channels notified at a 0-based escalation level
///
/// Each rung adds a channel: email, then chat, then pager, then phone.
#[must_use]
pub fn channels_for_level(level: u8) -> &'static [Channel] {
    const LADDER: [&[Channel]; 4] = [
        &[Channel::Email],
        &[Channel::Email, Channel::Chat],
        &[Channel::Email, Channel::Chat, Channel::Pager],
        &[Channel::Email, Channel::Chat, Channel::Pager, Channel::Phone],
    ];
    LADDER[level.min(TOP_LEVEL) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_widens_channel_sets() {
        assert_eq!(channels_for_level(0), &[Channel::Email]);
        assert_eq!(channels_for_level(1), &[Channel::Email, Channel::Chat]);
        assert_eq!(
            channels_for_level(2),
            &[Channel::Email, Channel::Chat, Channel::Pager]
        );
        assert_eq!(
            channels_for_level(3),
            &[Channel::Email, Channel::Chat, Channel::Pager, Channel::Phone]
        );
        // Beyond the top, the ladder clamps
        assert_eq!(channels_for_level(9), channels_for_level(3));
    }

    #[test]
    fn test_severity_climbs_with_level() {
        assert_eq!(severity_for_level(0), Severity::Low);
        assert_eq!(severity_for_level(1), Severity::Medium);
        assert_eq!(severity_for_level(2), Severity::High);
        assert_eq!(severity_for_level(3), Severity::Critical);
        assert_eq!(severity_for_level(200), Severity::Critical);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }
}
