//! Attributes applied to written objects
//!
//! Uploads, copies and multipart sessions carry one [`ObjectAttributes`]
//! value: HTTP metadata headers, storage class, encryption and access
//! control. Backends map each field onto their own request parameters.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::traits::ObjectInfo;

/// Explicit grants, one grantee list per permission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grants {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_acp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_acp: Option<String>,
}

impl Grants {
    /// Parse `permission=grantee` specs such as `read=uri=http://...`.
    ///
    /// Permissions are `read`, `full`, `readacl` and `writeacl`. Repeated
    /// permissions accumulate into a comma-separated grantee list.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        let mut grants = Grants::default();
        for spec in specs {
            let spec = spec.as_ref();
            let Some((permission, grantee)) = spec.split_once('=') else {
                return Err(Error::Config(format!(
                    "Invalid grant '{spec}': expected permission=grantee"
                )));
            };
            if grantee.is_empty() {
                return Err(Error::Config(format!("Grant '{spec}' has no grantee")));
            }
            let slot = match permission {
                "read" => &mut grants.read,
                "full" => &mut grants.full_control,
                "readacl" => &mut grants.read_acp,
                "writeacl" => &mut grants.write_acp,
                other => {
                    return Err(Error::Config(format!(
                        "Unknown grant permission '{other}' (expected read, full, readacl or writeacl)"
                    )));
                }
            };
            match slot {
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(grantee);
                }
                None => *slot = Some(grantee.to_string()),
            }
        }
        Ok(grants)
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_none()
            && self.full_control.is_none()
            && self.read_acp.is_none()
            && self.write_acp.is_none()
    }
}

/// Per-object parameters for everything the engine writes remotely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    /// Storage class name, e.g. `STANDARD_IA`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Server-side encryption algorithm: `AES256` or `aws:kms`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sse: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sse_kms_key_id: Option<String>,
    /// Canned ACL, e.g. `public-read`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<String>,
    pub grants: Grants,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_redirect: Option<String>,
}

impl ObjectAttributes {
    /// Whether any HTTP metadata header is set explicitly.
    ///
    /// A server-side copy keeps the source's metadata unless this holds.
    pub fn replaces_metadata(&self) -> bool {
        self.content_type.is_some()
            || self.cache_control.is_some()
            || self.content_disposition.is_some()
            || self.content_encoding.is_some()
            || self.content_language.is_some()
    }

    /// Fill the content type when none was given explicitly
    pub fn or_content_type(mut self, content_type: Option<String>) -> Self {
        if self.content_type.is_none() {
            self.content_type = content_type;
        }
        self
    }

    /// Attributes for a copy whose metadata comes from `source`.
    ///
    /// Explicit metadata replaces the source's as a whole; otherwise every
    /// metadata header is taken from `source`.
    pub fn inherit(&self, source: &ObjectInfo) -> Self {
        if self.replaces_metadata() {
            return self.clone();
        }
        Self {
            content_type: source.content_type.clone(),
            cache_control: source.cache_control.clone(),
            content_disposition: source.content_disposition.clone(),
            content_encoding: source.content_encoding.clone(),
            content_language: source.content_language.clone(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_parse() {
        let grants = Grants::parse(&["read=bob", "full=alice", "read=uri=http://acs/AllUsers"])
            .unwrap();
        assert_eq!(grants.read.as_deref(), Some("bob, uri=http://acs/AllUsers"));
        assert_eq!(grants.full_control.as_deref(), Some("alice"));
        assert!(grants.read_acp.is_none());
        assert!(!grants.is_empty());
    }

    #[test]
    fn test_grants_parse_rejects_bad_specs() {
        assert!(matches!(Grants::parse(&["read:bob"]), Err(Error::Config(_))));
        assert!(matches!(Grants::parse(&["write=bob"]), Err(Error::Config(_))));
        assert!(matches!(Grants::parse(&["read="]), Err(Error::Config(_))));
        assert!(Grants::parse::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_explicit_content_type_wins_over_guess() {
        let explicit = ObjectAttributes {
            content_type: Some("text/xml".to_string()),
            ..ObjectAttributes::default()
        };
        let merged = explicit.or_content_type(Some("text/plain".to_string()));
        assert_eq!(merged.content_type.as_deref(), Some("text/xml"));

        let guessed = ObjectAttributes::default().or_content_type(Some("text/plain".to_string()));
        assert_eq!(guessed.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_inherit_takes_source_metadata_unless_replaced() {
        let source = ObjectInfo {
            content_type: Some("image/png".to_string()),
            cache_control: Some("max-age=60".to_string()),
            ..ObjectInfo::new("pic", 1)
        };

        let kept = ObjectAttributes {
            storage_class: Some("STANDARD_IA".to_string()),
            ..ObjectAttributes::default()
        }
        .inherit(&source);
        assert_eq!(kept.content_type.as_deref(), Some("image/png"));
        assert_eq!(kept.cache_control.as_deref(), Some("max-age=60"));
        assert_eq!(kept.storage_class.as_deref(), Some("STANDARD_IA"));

        let replaced = ObjectAttributes {
            content_language: Some("piglatin".to_string()),
            ..ObjectAttributes::default()
        }
        .inherit(&source);
        assert!(replaced.content_type.is_none());
        assert_eq!(replaced.content_language.as_deref(), Some("piglatin"));
    }
}
