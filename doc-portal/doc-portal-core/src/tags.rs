//! Tag vocabulary used to record sharing state on stored objects.
//!
//! The store has no ACL of its own, so a grant is written as a set of plain
//! string tags and read back by tag search:
//!
//! | tag                          | meaning                                  |
//! |------------------------------|------------------------------------------|
//! | `isShared`                   | the document has at least one recipient  |
//! | `owner:{id}`                 | uploading user                           |
//! | `sharedWith:{id}`, `sharedWith_{id}` | recipient user id (both forms are written, the expression language treats `:` specially) |
//! | `sharedEmail_{sanitized}`    | lowercased email, non-alphanumerics as `_` (lossy) |
//! | `sharedEmailEnc_{encoded}`   | reversible email encoding                |

use std::collections::BTreeSet;

use crate::error::{PortalError, PortalResult};

pub const SHARED_TAG: &str = "isShared";
/// Base tag placed on every upload.
pub const APP_TAG: &str = "doc-portal";
pub const OWNER_PREFIX: &str = "owner:";
pub const LEGACY_OWNER_PREFIX: &str = "owner_";
pub const RECIPIENT_PREFIX: &str = "sharedWith:";
pub const RECIPIENT_SEARCH_PREFIX: &str = "sharedWith_";
pub const EMAIL_PREFIX: &str = "sharedEmail_";
pub const EMAIL_ENCODED_PREFIX: &str = "sharedEmailEnc_";
const DOCTYPE_PREFIX: &str = "doctype_";

pub fn owner_tag(owner_id: &str) -> String {
    format!("{OWNER_PREFIX}{owner_id}")
}

pub fn recipient_tag(user_id: &str) -> String {
    format!("{RECIPIENT_PREFIX}{user_id}")
}

pub fn recipient_search_tag(user_id: &str) -> String {
    format!("{RECIPIENT_SEARCH_PREFIX}{user_id}")
}

pub fn email_tag(email: &str) -> String {
    format!("{EMAIL_PREFIX}{}", sanitize_tag(email))
}

pub fn email_encoded_tag(email: &str) -> String {
    format!("{EMAIL_ENCODED_PREFIX}{}", encode_email(email))
}

pub fn doctype_tag(document_type: &str) -> String {
    format!("{DOCTYPE_PREFIX}{}", sanitize_tag(document_type))
}

/// Tags written on every object at upload time.
pub fn base_tags(owner_id: &str, document_type: Option<&str>) -> BTreeSet<String> {
    let mut tags = BTreeSet::from([APP_TAG.to_string(), owner_tag(owner_id)]);
    if let Some(doc_type) = document_type.filter(|t| !t.trim().is_empty()) {
        tags.insert(doctype_tag(doc_type));
    }
    tags
}

/// Whether a tag belongs to the sharing vocabulary (and is therefore owned by
/// the ACL writer).
pub fn is_sharing_tag(tag: &str) -> bool {
    tag == SHARED_TAG
        || tag.starts_with(OWNER_PREFIX)
        || tag.starts_with(LEGACY_OWNER_PREFIX)
        || tag.starts_with(RECIPIENT_PREFIX)
        || tag.starts_with(RECIPIENT_SEARCH_PREFIX)
        || tag.starts_with(EMAIL_PREFIX)
        || tag.starts_with(EMAIL_ENCODED_PREFIX)
}

/// Full sharing tag set for a grant. Empty recipient lists produce an empty
/// set, which revokes all sharing including `isShared` and the owner tag.
pub fn sharing_tags(
    owner_id: &str,
    recipient_ids: &[String],
    recipient_emails: &[String],
) -> PortalResult<BTreeSet<String>> {
    let mut tags = BTreeSet::new();
    if recipient_ids.is_empty() && recipient_emails.is_empty() {
        return Ok(tags);
    }
    tags.insert(SHARED_TAG.to_string());
    tags.insert(owner_tag(owner_id));
    for id in recipient_ids {
        let id = id.trim();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(PortalError::InvalidArgument(format!(
                "invalid recipient id {id:?}"
            )));
        }
        tags.insert(recipient_tag(id));
        tags.insert(recipient_search_tag(id));
    }
    for email in recipient_emails {
        let email = email.trim();
        if !looks_like_email(email) {
            return Err(PortalError::InvalidArgument(format!(
                "invalid recipient email {email:?}"
            )));
        }
        tags.insert(email_tag(email));
        tags.insert(email_encoded_tag(email));
    }
    Ok(tags)
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// Lowercase and replace every non-alphanumeric character with `_`.
pub fn sanitize_tag(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Reversible, tag-safe email encoding. Alphanumerics pass through, `.` and
/// `@` become `_dot_` and `_at_`, any other byte becomes `_xHH_`.
pub fn encode_email(email: &str) -> String {
    let mut out = String::with_capacity(email.len() * 2);
    for byte in email.bytes() {
        match byte {
            b'.' => out.push_str("_dot_"),
            b'@' => out.push_str("_at_"),
            b if b.is_ascii_alphanumeric() => out.push(b as char),
            b => out.push_str(&format!("_x{b:02X}_")),
        }
    }
    out
}

/// Inverse of [`encode_email`]. Returns `None` for malformed input.
pub fn decode_email(encoded: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut rest = encoded;
    while let Some(c) = rest.chars().next() {
        if c == '_' {
            let body = &rest[1..];
            let end = body.find('_')?;
            let token = &body[..end];
            match token {
                "dot" => bytes.push(b'.'),
                "at" => bytes.push(b'@'),
                _ => {
                    let hex = token.strip_prefix('x')?;
                    if hex.len() != 2 {
                        return None;
                    }
                    bytes.push(u8::from_str_radix(hex, 16).ok()?);
                }
            }
            rest = &body[end + 1..];
        } else if c.is_ascii_alphanumeric() {
            bytes.push(c as u8);
            rest = &rest[1..];
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}

/// Best-effort reconstruction of a sanitized email: the last two
/// `_`-delimited segments become `domain.tld`, the rest the local part.
/// Only guarantees `sanitize_tag(result) == sanitized`.
pub fn reconstruct_sanitized(sanitized: &str) -> Option<String> {
    let segments: Vec<&str> = sanitized.split('_').collect();
    match segments.len() {
        0 | 1 => None,
        2 => Some(format!("{}@{}", segments[0], segments[1])),
        n => Some(format!(
            "{}@{}.{}",
            segments[..n - 2].join("."),
            segments[n - 2],
            segments[n - 1]
        )),
    }
}

/// Sharing state reconstructed from an object's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareState {
    pub shared: bool,
    pub owner_id: Option<String>,
    pub recipient_ids: BTreeSet<String>,
    pub recipient_emails: BTreeSet<String>,
    /// Sanitized email tags of a legacy grant. Empty whenever the object
    /// carries reversible email tags.
    legacy_emails: BTreeSet<String>,
}

impl ShareState {
    pub fn from_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> Self {
        let mut state = ShareState::default();
        let mut sanitized = Vec::new();
        for tag in tags {
            if tag == SHARED_TAG {
                state.shared = true;
            } else if let Some(id) = tag
                .strip_prefix(OWNER_PREFIX)
                .or_else(|| tag.strip_prefix(LEGACY_OWNER_PREFIX))
            {
                if state.owner_id.is_none() && !id.is_empty() {
                    state.owner_id = Some(id.to_string());
                }
            } else if let Some(id) = tag
                .strip_prefix(RECIPIENT_PREFIX)
                .or_else(|| tag.strip_prefix(RECIPIENT_SEARCH_PREFIX))
            {
                state.recipient_ids.insert(id.to_string());
            } else if let Some(encoded) = tag.strip_prefix(EMAIL_ENCODED_PREFIX) {
                if let Some(email) = decode_email(encoded) {
                    state.recipient_emails.insert(email);
                }
            } else if let Some(s) = tag.strip_prefix(EMAIL_PREFIX) {
                sanitized.push(s.to_string());
            }
        }

        // Writers emit both forms for every email, so sanitized tags only
        // count on objects that carry no reversible tag at all.
        if state.recipient_emails.is_empty() {
            for s in sanitized {
                if let Some(email) = reconstruct_sanitized(&s) {
                    state.recipient_emails.insert(email);
                }
                state.legacy_emails.insert(s);
            }
        }
        state
    }

    /// Whether the grant names `user_id` or `email` as a recipient.
    pub fn includes(&self, user_id: &str, email: Option<&str>) -> bool {
        if self.recipient_ids.contains(user_id) {
            return true;
        }
        let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
            return false;
        };
        if self.legacy_emails.is_empty() {
            self.recipient_emails
                .iter()
                .any(|e| e.eq_ignore_ascii_case(email))
        } else {
            self.legacy_emails.contains(&sanitize_tag(email))
        }
    }
}
