//! Newtype wrappers for opaque string identifiers.
//!
//! They serialize as plain strings so they can sit directly in wire records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for String {
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl AsRef<std::path::Path> for $name {
            fn as_ref(&self) -> &std::path::Path {
                std::path::Path::new(&self.0)
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
    };
}

string_newtype!(
    /// Opaque content identifier assigned to a template archive by the distribution service.
    TemplateId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_id_display_and_as_ref() {
        let id = TemplateId::new("QmYwAPJzv5CZsnA");
        assert_eq!(id.to_string(), "QmYwAPJzv5CZsnA");
        assert_eq!(id.as_str(), "QmYwAPJzv5CZsnA");
        assert_eq!(AsRef::<str>::as_ref(&id), "QmYwAPJzv5CZsnA");
    }

    #[test]
    fn template_id_serializes_as_plain_string() {
        let id = TemplateId::new("abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc\"");
        let back: TemplateId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn template_id_compares_with_str() {
        let id = TemplateId::from("QmBase");
        assert!(id == *"QmBase");
        assert_eq!(String::from("QmBase"), id);
        assert_eq!(id.into_inner(), "QmBase");
    }
}
