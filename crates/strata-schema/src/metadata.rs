use crate::reference::TemplateKey;
use crate::types::TemplateId;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestMethod {
    Md5,
    Sha256,
}

impl DigestMethod {
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            other => Err(SchemaError::UnsupportedDigest(other.to_owned())),
        }
    }
}

impl fmt::Display for DigestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestMethod::Md5 => write!(f, "md5"),
            DigestMethod::Sha256 => write!(f, "sha256"),
        }
    }
}

/// Declared digest of a template archive. `hash` is lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub method: DigestMethod,
    pub hash: String,
}

impl Digest {
    pub fn new(method: DigestMethod, hash: &str) -> Self {
        Self {
            method,
            hash: hash.trim().to_ascii_lowercase(),
        }
    }
}

/// Immutable description of a published template, as returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateMetadata {
    pub id: TemplateId,
    pub name: String,
    pub owner: String,
    pub version: String,
    pub size: u64,
    pub digest: Digest,
    pub parent: Option<String>,
    pub pref_size: Option<String>,
}

/// Wire shape of `GET /template`. Older services only send `md5`.
#[derive(Debug, Deserialize)]
struct WireTemplate {
    id: String,
    name: String,
    owner: String,
    version: String,
    #[serde(default)]
    md5: String,
    #[serde(default, rename = "digest-method")]
    digest_method: String,
    #[serde(default, rename = "digest")]
    digest_hash: String,
    #[serde(default)]
    parent: String,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "pref-size")]
    pref_size: String,
}

impl TemplateMetadata {
    /// Decode a metadata service response body.
    pub fn from_json(body: &[u8]) -> Result<Self, SchemaError> {
        let wire: WireTemplate = serde_json::from_slice(body)
            .map_err(|e| SchemaError::MalformedMetadata(e.to_string()))?;

        let digest = if !wire.digest_method.is_empty() && !wire.digest_hash.is_empty() {
            Digest::new(DigestMethod::parse(&wire.digest_method)?, &wire.digest_hash)
        } else if !wire.md5.is_empty() {
            Digest::new(DigestMethod::Md5, &wire.md5)
        } else {
            return Err(SchemaError::MalformedMetadata(format!(
                "template '{}' declares no digest",
                wire.id
            )));
        };

        for (field, value) in [
            ("id", &wire.id),
            ("name", &wire.name),
            ("owner", &wire.owner),
            ("version", &wire.version),
        ] {
            if value.trim().is_empty() {
                return Err(SchemaError::MalformedMetadata(format!(
                    "field '{field}' is empty"
                )));
            }
        }

        Ok(Self {
            id: TemplateId::new(wire.id),
            name: wire.name,
            owner: wire.owner,
            version: wire.version,
            size: wire.size,
            digest,
            parent: Some(wire.parent).filter(|p| !p.is_empty()),
            pref_size: Some(wire.pref_size).filter(|p| !p.is_empty()),
        })
    }

    /// Serialize back to the wire shape, e.g. for a locally exported template.
    pub fn to_wire_json(&self) -> serde_json::Value {
        let mut value = serde_json::json!({
            "id": self.id,
            "name": self.name,
            "owner": self.owner,
            "version": self.version,
            "digest-method": self.digest.method.to_string(),
            "digest": self.digest.hash,
            "size": self.size,
            "parent": self.parent.clone().unwrap_or_default(),
        });
        if self.digest.method == DigestMethod::Md5 {
            value["md5"] = serde_json::Value::String(self.digest.hash.clone());
        }
        if let Some(pref) = &self.pref_size {
            value["pref-size"] = serde_json::Value::String(pref.clone());
        }
        value
    }

    pub fn key(&self) -> TemplateKey {
        TemplateKey::new(&self.name, &self.owner, &self.version)
    }
}
