//! Identifier newtypes
//!
//! Queue entries, deliveries, and destinations are identified by ULIDs,
//! which are lexicographically sortable by creation time and
//! collision-resistant. Organisations are identified by opaque strings
//! supplied by the caller.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

macro_rules! ulid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier
            #[must_use]
            pub fn generate() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Wrap an existing ULID
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self(id)
            }

            /// Get the underlying ULID
            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.0
            }

            /// Get the timestamp (milliseconds since Unix epoch) encoded in this ULID
            #[must_use]
            pub const fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_id! {
    /// Identifier for a single queue entry (one destination's unit of work)
    EntryId
}

ulid_id! {
    /// Identifier for a delivery request (fans out to one entry per destination)
    DeliveryId
}

ulid_id! {
    /// Identifier for a configured destination
    DestinationId
}

/// An organisation identifier string wrapper for type safety
///
/// Prevents accidentally passing delivery or destination ids where an
/// organisation is expected. `#[repr(transparent)]` keeps this a zero-cost
/// abstraction at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct OrganizationId(Arc<str>);

impl OrganizationId {
    /// Create a new `OrganizationId` from any type that converts to `Arc<str>`
    #[must_use]
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    /// Get the organisation id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrganizationId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OrganizationId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip_through_strings() {
        let id = EntryId::generate();
        let parsed: EntryId = id.to_string().parse().expect("valid ULID");
        assert_eq!(id, parsed);

        let id = DeliveryId::generate();
        let parsed: DeliveryId = id.to_string().parse().expect("valid ULID");
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_ids_are_creation_ordered() {
        let first = EntryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EntryId::generate();
        assert!(first < second, "ULIDs sort by creation time");
    }

    #[test]
    fn test_invalid_id_rejected() {
        assert!("not-a-ulid".parse::<DestinationId>().is_err());
        assert!("".parse::<DeliveryId>().is_err());
    }

    #[test]
    fn test_organization_id_display() {
        let org = OrganizationId::new("org-alpha");
        assert_eq!(org.as_str(), "org-alpha");
        assert_eq!(org.to_string(), "org-alpha");
    }
}
