use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{PortalError, PortalResult};

/// Context key holding the granted permissions on a preview object.
pub const PERMISSIONS_KEY: &str = "permissions";
pub const ORIGINAL_NAME_KEY: &str = "original_name";
pub const MIME_TYPE_KEY: &str = "mime_type";
pub const DOCUMENT_TYPE_KEY: &str = "document_type";
pub const SECURITY_LEVEL_KEY: &str = "security_level";
/// Set on raw objects, naming the preview they belong to.
pub const PREVIEW_KEY_KEY: &str = "preview_key";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Comment,
    Edit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Comment => "comment",
            Permission::Edit => "edit",
        }
    }

    pub fn parse(s: &str) -> PortalResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "comment" => Ok(Permission::Comment),
            "edit" => Ok(Permission::Edit),
            other => Err(PortalError::InvalidArgument(format!("unknown permission {other:?}"))),
        }
    }

    /// `read,comment` form stored in object context.
    pub fn encode_set(permissions: &BTreeSet<Permission>) -> String {
        permissions
            .iter()
            .map(Permission::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Unknown entries are skipped.
    pub fn decode_set(value: &str) -> BTreeSet<Permission> {
        value
            .split(',')
            .filter_map(|p| Permission::parse(p).ok())
            .collect()
    }
}

/// A logical document as presented to callers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub owner_email: Option<String>,
    #[serde(rename = "isPDFLike")]
    pub is_pdf_like: bool,
    pub raw_key: Option<String>,
    pub format: String,
    pub size_bytes: u64,
    pub original_name: Option<String>,
    pub page_count: Option<u32>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub shared_with_emails: BTreeSet<String>,
    pub permissions: BTreeSet<Permission>,
}

/// Returned by an upload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRef {
    pub id: String,
    #[serde(rename = "isPDFLike")]
    pub is_pdf_like: bool,
    pub raw_key: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub document_type: Option<String>,
    pub security_level: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SharingResult {
    pub success: bool,
    pub applied_tags: BTreeSet<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrls {
    pub download_url: String,
    pub preview_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub success: bool,
    pub partial: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_sets_round_trip_through_context() {
        let set = BTreeSet::from([Permission::Edit, Permission::Read]);
        assert_eq!(Permission::encode_set(&set), "read,edit");
        assert_eq!(Permission::decode_set("read, EDIT,owner"), set);
        assert!(Permission::parse("admin").is_err());
    }

    #[test]
    fn document_ref_uses_wire_names() {
        let json = serde_json::to_value(DocumentRef {
            id: "users/u1/documents/2024-01-01/a.pdf".into(),
            is_pdf_like: true,
            raw_key: Some("users/u1/documents/2024-01-01/a.pdf_raw".into()),
        })
        .unwrap();
        assert_eq!(json["isPDFLike"], true);
        assert_eq!(json["rawKey"], "users/u1/documents/2024-01-01/a.pdf_raw");
    }
}
