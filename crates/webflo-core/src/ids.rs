//! Branded ID newtypes.
//!
//! Ports, tenants and in-flight requests are all addressed by opaque strings.
//! Wrapping each in its own type keeps a tenant ID from being handed to a
//! port lookup by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::CoreError;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Parse a caller-supplied ID.
            ///
            /// Rejects empty IDs and IDs containing whitespace or control
            /// characters.
            pub fn parse(s: &str) -> Result<Self, CoreError> {
                if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control()) {
                    return Err(CoreError::InvalidValue(format!(
                        "{} {s:?}",
                        stringify!($name)
                    )));
                }
                Ok(Self(s.to_owned()))
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a message port within its registry.
    PortId
}

branded_id! {
    /// Identifier of a tenant (one client session or worker realm).
    TenantId
}

branded_id! {
    /// Correlates a request envelope with its response.
    CorrelationId
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn new_is_uuid_v7() {
        let id = PortId::new();
        let parsed = Uuid::parse_str(id.as_str()).unwrap();
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn parse_rejects_blank_and_spaced() {
        assert_eq!(TenantId::parse("lobby").unwrap().as_str(), "lobby");
        assert!(TenantId::parse("").is_err());
        assert!(TenantId::parse("a b").is_err());
        let err = PortId::parse("x\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid value: PortId \"x\\n\"");
    }

    #[test]
    fn from_str_and_display() {
        let id = TenantId::from("tenant-1");
        assert_eq!(id.as_str(), "tenant-1");
        assert_eq!(format!("{id}"), "tenant-1");
    }

    #[test]
    fn borrow_allows_str_lookup() {
        let mut map = HashMap::new();
        let _ = map.insert(PortId::from("p1"), 1);
        assert_eq!(map.get("p1"), Some(&1));
    }

    #[test]
    fn serde_is_transparent() {
        let id = PortId::from("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: PortId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn into_string() {
        let s: String = TenantId::from("t").into();
        assert_eq!(s, "t");
    }
}
