use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container and template names: 1-64 chars of `[a-zA-Z0-9_.-]`, not starting with `-` or `.`.
pub fn validate_container_name(name: &str) -> Result<(), SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidName {
        name: name.to_owned(),
        reason: reason.to_owned(),
    };
    if name.is_empty() || name.len() > 64 {
        return Err(invalid("must be 1-64 characters"));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(invalid("must not start with '-' or '.'"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(invalid("must match [a-zA-Z0-9_.-]"));
    }
    Ok(())
}

/// Snapshot labels: non-empty `[a-z0-9_.:-]`. Callers lowercase before validating.
pub fn validate_label(label: &str) -> Result<(), SchemaError> {
    if label.is_empty()
        || !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"_.:-".contains(&b))
    {
        return Err(SchemaError::InvalidLabel(label.to_owned()));
    }
    Ok(())
}

/// Template versions are `X.Y.Z` with decimal components.
pub fn validate_version(version: &str) -> Result<(), SchemaError> {
    let parts: Vec<&str> = version.split('.').collect();
    let ok = parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    if ok {
        Ok(())
    } else {
        Err(SchemaError::InvalidVersion(version.to_owned()))
    }
}

/// Preferred container size recorded in an exported template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeTier {
    #[default]
    Tiny,
    Small,
    Medium,
    Large,
    Huge,
}

impl SizeTier {
    /// Unrecognized tiers fall back to the smallest one.
    pub fn parse_or_default(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "small" => Self::Small,
            "medium" => Self::Medium,
            "large" => Self::Large,
            "huge" => Self::Huge,
            _ => Self::Tiny,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Huge => "huge",
        }
    }
}

impl fmt::Display for SizeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_container_names() {
        let longest = "x".repeat(64);
        for name in ["web1", "my-app", "db_primary", "a", "base.v2", longest.as_str()] {
            assert!(validate_container_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn invalid_container_names() {
        let too_long = "x".repeat(65);
        for name in ["", "-lead", ".hidden", "has space", "a/b", "a:b", too_long.as_str()] {
            assert!(validate_container_name(name).is_err(), "{name}");
        }
    }

    #[test]
    fn labels() {
        assert!(validate_label("pre-upgrade").is_ok());
        assert!(validate_label("2024.01.01_12:00").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("Upper").is_err());
        assert!(validate_label("a@b").is_err());
        assert!(validate_label("a/b").is_err());
    }

    #[test]
    fn versions() {
        assert!(validate_version("1.0.0").is_ok());
        assert!(validate_version("10.20.300").is_ok());
        for bad in ["", "1.0", "1.0.0.0", "1.a.0", "v1.0.0", "1..0", " 1.0.0"] {
            assert!(validate_version(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn size_tier_falls_back_to_tiny() {
        assert_eq!(SizeTier::parse_or_default("HUGE"), SizeTier::Huge);
        assert_eq!(SizeTier::parse_or_default("medium"), SizeTier::Medium);
        assert_eq!(SizeTier::parse_or_default("gigantic"), SizeTier::Tiny);
        assert_eq!(SizeTier::parse_or_default(""), SizeTier::Tiny);
        assert_eq!(SizeTier::default().to_string(), "tiny");
    }
}
