//! Template references as typed by operators, and the installed key they resolve to.

use crate::types::TemplateId;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version sent to the metadata service when a reference omits one.
pub const LATEST_VERSION: &str = "latest";

const ID_PREFIX: &str = "id:";

/// A human or machine reference to a template.
///
/// String forms: `id:<id>`, `name`, `name@owner`, `name@owner:version`.
/// A missing owner means the verified publisher namespace; a missing version
/// means the latest published version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateReference {
    Id(TemplateId),
    Named {
        name: String,
        owner: Option<String>,
        version: Option<String>,
    },
}

impl TemplateReference {
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let input = input.trim();
        if let Some(id) = input.strip_prefix(ID_PREFIX) {
            if !is_token(id) {
                return Err(SchemaError::InvalidReference(input.to_owned()));
            }
            return Ok(Self::Id(TemplateId::new(id)));
        }

        let (name, rest) = match input.split_once('@') {
            Some((name, rest)) => (name, Some(rest)),
            None => (input, None),
        };
        // `name:version` without an owner is ambiguous with the installed key form.
        if !is_token(name) || name.contains(':') {
            return Err(SchemaError::InvalidReference(input.to_owned()));
        }

        let (owner, version) = match rest {
            None => (None, None),
            Some(rest) => match rest.split_once(':') {
                Some((owner, version)) => (Some(owner), Some(version)),
                None => (Some(rest), None),
            },
        };
        if owner.is_some_and(|o| !is_token(o) || o.contains(':'))
            || version.is_some_and(|v| !is_token(v) || v.contains(':'))
        {
            return Err(SchemaError::InvalidReference(input.to_owned()));
        }

        Ok(Self::Named {
            name: name.to_owned(),
            owner: owner.map(str::to_owned),
            version: version.map(str::to_owned),
        })
    }

    /// The installed key, when the reference pins name, owner and a concrete version.
    ///
    /// Such references can be checked against local state without asking the
    /// metadata service.
    pub fn key(&self) -> Option<TemplateKey> {
        match self {
            Self::Named {
                name,
                owner: Some(owner),
                version: Some(version),
            } if version != LATEST_VERSION => Some(TemplateKey::new(name, owner, version)),
            _ => None,
        }
    }

    /// Template name, if the reference carries one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Named { name, .. } => Some(name),
        }
    }
}

impl FromStr for TemplateReference {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TemplateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{ID_PREFIX}{id}"),
            Self::Named {
                name,
                owner,
                version,
            } => {
                f.write_str(name)?;
                if let Some(owner) = owner {
                    write!(f, "@{owner}")?;
                    if let Some(version) = version {
                        write!(f, ":{version}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Identity of an installed template: `name:owner:version`.
///
/// The rendered form is both the dataset name and the runtime config directory
/// name of the template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateKey {
    pub name: String,
    pub owner: String,
    pub version: String,
}

impl TemplateKey {
    pub fn new(name: &str, owner: &str, version: &str) -> Self {
        Self {
            name: name.to_owned(),
            owner: owner.to_owned(),
            version: version.to_owned(),
        }
    }

    /// Parse the `name:owner:version` dataset form.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let parts: Vec<&str> = input.trim().split(':').collect();
        match parts.as_slice() {
            [name, owner, version] if [name, owner, version].iter().all(|p| is_token(p)) => {
                Ok(Self::new(name, owner, version))
            }
            _ => Err(SchemaError::InvalidReference(input.to_owned())),
        }
    }

    /// The fully qualified reference that resolves back to this key.
    pub fn reference(&self) -> TemplateReference {
        TemplateReference::Named {
            name: self.name.clone(),
            owner: Some(self.owner.clone()),
            version: Some(self.version.clone()),
        }
    }

    pub fn dataset(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.owner, self.version)
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-' | b':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_reference() {
        let r = TemplateReference::parse("id:QmHash123").unwrap();
        assert_eq!(r, TemplateReference::Id(TemplateId::new("QmHash123")));
        assert_eq!(r.to_string(), "id:QmHash123");
        assert!(r.key().is_none());
    }

    #[test]
    fn parse_full_reference() {
        let r = TemplateReference::parse("master@subutai:4.0.0").unwrap();
        assert_eq!(
            r.key(),
            Some(TemplateKey::new("master", "subutai", "4.0.0"))
        );
        assert_eq!(r.to_string(), "master@subutai:4.0.0");
    }

    #[test]
    fn parse_name_only_defaults_later() {
        let r = TemplateReference::parse("debian-stretch").unwrap();
        assert_eq!(
            r,
            TemplateReference::Named {
                name: "debian-stretch".to_owned(),
                owner: None,
                version: None,
            }
        );
        assert!(r.key().is_none());
    }

    #[test]
    fn parse_name_and_owner() {
        let r = TemplateReference::parse("  nginx@jdoe ").unwrap();
        assert_eq!(r.name(), Some("nginx"));
        assert!(r.key().is_none());
        assert_eq!(r.to_string(), "nginx@jdoe");
    }

    #[test]
    fn latest_version_is_not_a_key() {
        let r = TemplateReference::parse("nginx@jdoe:latest").unwrap();
        assert!(r.key().is_none());
    }

    #[test]
    fn reject_malformed_references() {
        for bad in [
            "",
            "id:",
            "name:1.0.0",
            "@owner",
            "name@",
            "name@owner:",
            "na me@owner",
            "name@own/er:1.0",
            "name@owner:1:2",
        ] {
            assert!(
                TemplateReference::parse(bad).is_err(),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn key_roundtrips_through_dataset_form() {
        let key = TemplateKey::new("base", "pub", "1.0.0");
        assert_eq!(key.dataset(), "base:pub:1.0.0");
        assert_eq!(TemplateKey::parse("base:pub:1.0.0").unwrap(), key);
        assert_eq!(key.reference().key(), Some(key));
    }

    #[test]
    fn key_parse_rejects_partial() {
        assert!(TemplateKey::parse("base:pub").is_err());
        assert!(TemplateKey::parse("base::1.0.0").is_err());
        assert!(TemplateKey::parse("::").is_err());
    }
}
