//! Per-user folder layout and object key derivation.
//!
//! Every object lives under `users/{userId}/documents/{YYYY-MM-DD}/`, so
//! "documents I own" is a folder search and ownership of a key can be checked
//! from the key alone.

use chrono::NaiveDate;

use crate::error::{PortalError, PortalResult};

const USERS_ROOT: &str = "users";
const DOCUMENTS_DIR: &str = "documents";
/// Suffix linking a raw representation to its preview object.
pub const RAW_SUFFIX: &str = "_raw";

/// Folder and candidate name for a new upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPlan {
    pub prefix: String,
    pub candidate: String,
}

impl KeyPlan {
    pub fn key(&self) -> String {
        format!("{}/{}", self.prefix, self.candidate)
    }
}

pub fn validate_user_id(user_id: &str) -> PortalResult<()> {
    if user_id.trim().is_empty() {
        return Err(PortalError::InvalidArgument("user id must not be empty".into()));
    }
    if user_id.contains('/') {
        return Err(PortalError::InvalidArgument(format!(
            "user id {user_id:?} must not contain '/'"
        )));
    }
    Ok(())
}

/// `users/{userId}/documents`, the root of everything a user owns.
pub fn user_root(user_id: &str) -> PortalResult<String> {
    validate_user_id(user_id)?;
    Ok(format!("{USERS_ROOT}/{user_id}/{DOCUMENTS_DIR}"))
}

pub fn day_folder(user_id: &str, upload_date: NaiveDate) -> PortalResult<String> {
    Ok(format!("{}/{}", user_root(user_id)?, upload_date.format("%Y-%m-%d")))
}

/// Replace everything outside `[A-Za-z0-9.-]` with `_`. A trailing `_raw`
/// becomes `-raw` so a preview key never reads as a raw copy.
pub fn sanitize_filename(original_name: &str) -> String {
    let name: String = original_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    match name.strip_suffix(RAW_SUFFIX) {
        _ if name.is_empty() => "document".to_string(),
        Some(stem) => format!("{stem}-raw"),
        None => name,
    }
}

/// Deterministic folder plus candidate name. Collision avoidance is left to
/// the store's unique-name option.
pub fn plan_key(user_id: &str, original_name: &str, upload_date: NaiveDate) -> PortalResult<KeyPlan> {
    Ok(KeyPlan {
        prefix: day_folder(user_id, upload_date)?,
        candidate: sanitize_filename(original_name),
    })
}

pub fn raw_key_for(preview_key: &str) -> String {
    format!("{preview_key}{RAW_SUFFIX}")
}

pub fn is_raw_key(key: &str) -> bool {
    key.ends_with(RAW_SUFFIX)
}

/// Whether `key` lies under `user_id`'s folder.
pub fn is_owned_by(key: &str, user_id: &str) -> bool {
    match user_root(user_id) {
        Ok(root) => key
            .strip_prefix(&root)
            .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1),
        Err(_) => false,
    }
}

/// Owner id embedded in a key: the segment after `users/`, or a legacy
/// `user_{id}` segment anywhere in the path.
pub fn owner_from_key(key: &str) -> Option<String> {
    let mut segments = key.split('/');
    if segments.next() == Some(USERS_ROOT) {
        if let Some(id) = segments.next().filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
    }
    key.split('/')
        .find_map(|segment| segment.strip_prefix("user_"))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    #[test]
    fn plan_is_deterministic() {
        let a = plan_key("u1", "Q1 report (final).pdf", date()).unwrap();
        let b = plan_key("u1", "Q1 report (final).pdf", date()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.prefix, "users/u1/documents/2024-03-07");
        assert_eq!(a.candidate, "Q1_report__final_.pdf");
        assert_eq!(a.key(), "users/u1/documents/2024-03-07/Q1_report__final_.pdf");
    }

    #[test]
    fn sanitize_keeps_dots_and_dashes() {
        assert_eq!(sanitize_filename("a-b.c.txt"), "a-b.c.txt");
        assert_eq!(sanitize_filename("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_filename(""), "document");
    }

    #[test]
    fn sanitized_names_never_look_raw() {
        for name in ["notes.txt_raw", "scan_raw", "a raw", "_raw", "x._RAW"] {
            let sanitized = sanitize_filename(name);
            assert!(!is_raw_key(&sanitized), "{name} -> {sanitized}");
        }
        assert_eq!(sanitize_filename("notes.txt_raw"), "notes.txt-raw");
        assert_eq!(sanitize_filename("a raw"), "a-raw");
    }

    #[test]
    fn empty_user_is_rejected() {
        assert!(matches!(
            plan_key("", "a.pdf", date()),
            Err(PortalError::InvalidArgument(_))
        ));
        assert!(matches!(
            plan_key("u1/../u2", "a.pdf", date()),
            Err(PortalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn ownership_is_prefix_exact() {
        let key = "users/u1/documents/2024-03-07/a.pdf";
        assert!(is_owned_by(key, "u1"));
        assert!(!is_owned_by(key, "u"));
        assert!(!is_owned_by("users/u10/documents/2024-03-07/a.pdf", "u1"));
        assert!(!is_owned_by(key, ""));
    }

    #[test]
    fn owner_extraction() {
        assert_eq!(
            owner_from_key("users/u1/documents/2024-03-07/a.pdf").as_deref(),
            Some("u1")
        );
        assert_eq!(owner_from_key("legacy/user_42/a.pdf").as_deref(), Some("42"));
        assert_eq!(owner_from_key("shared/a.pdf"), None);
    }

    #[test]
    fn raw_convention() {
        let raw = raw_key_for("users/u1/documents/2024-03-07/a.pdf");
        assert!(is_raw_key(&raw));
        assert_eq!(raw, "users/u1/documents/2024-03-07/a.pdf_raw");
    }
}
