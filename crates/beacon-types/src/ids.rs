//! Type-safe identifier wrappers.
//!
//! Server-assigned identifiers (incidents, sessions, alerts) wrap a UUID v7
//! so they sort by creation time. Identifiers that arrive from outside the
//! broker -- user ids from token claims, responder ids issued by the
//! dispatch backend -- are opaque strings and get their own newtypes so a
//! responder id can never be passed where a user id is expected.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
        )]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<Uuid>().map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Generates a newtype wrapper around an externally issued string key.
macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing key.
            pub fn new(key: impl Into<String>) -> Self {
                Self(key.into())
            }

            /// Borrow the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                Self(key.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                Self(key)
            }
        }
    };
}

define_id! {
    /// Unique identifier for an incident in the live registry.
    IncidentId
}

define_id! {
    /// Unique identifier for one live connection.
    SessionId
}

define_id! {
    /// Unique identifier for a broadcast emergency alert.
    AlertId
}

define_id! {
    /// Unique identifier for a targeted incident notification or message.
    NotificationId
}

define_key! {
    /// Identifier of an authenticated user, taken from token claims.
    UserId
}

define_key! {
    /// Identifier of a field responder unit.
    ResponderId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incident_ids_round_trip_through_strings() {
        let id = IncidentId::new();
        let parsed: IncidentId = id.to_string().parse().unwrap_or_default();
        assert_eq!(parsed, id);
    }

    #[test]
    fn newtype_ids_serialize_transparently() {
        let responder = ResponderId::from("unit-7");
        let json = serde_json::to_string(&responder).unwrap_or_default();
        assert_eq!(json, "\"unit-7\"");
    }

    #[test]
    fn malformed_incident_id_is_rejected() {
        assert!("not-a-uuid".parse::<IncidentId>().is_err());
    }
}
