//! Composable search expressions.
//!
//! Backends evaluate the structure directly; the `Display` form is the
//! store's textual expression language and is what ends up in logs.

use std::fmt;

use super::StoredObject;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchExpr {
    /// Every object below a folder, recursively.
    Folder(String),
    Tag(String),
    And(Vec<SearchExpr>),
    Or(Vec<SearchExpr>),
}

impl SearchExpr {
    pub fn folder(prefix: impl Into<String>) -> Self {
        SearchExpr::Folder(prefix.into().trim_end_matches('/').to_string())
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        SearchExpr::Tag(tag.into())
    }

    pub fn and(self, other: SearchExpr) -> Self {
        match self {
            SearchExpr::And(mut parts) => {
                parts.push(other);
                SearchExpr::And(parts)
            }
            first => SearchExpr::And(vec![first, other]),
        }
    }

    pub fn or(self, other: SearchExpr) -> Self {
        match self {
            SearchExpr::Or(mut parts) => {
                parts.push(other);
                SearchExpr::Or(parts)
            }
            first => SearchExpr::Or(vec![first, other]),
        }
    }

    pub fn matches(&self, object: &StoredObject) -> bool {
        self.matches_with(&object.key, |tag| object.tags.contains(tag))
    }

    /// Evaluate against a key and an arbitrary tag lookup, used by backends
    /// whose searchable tags lag behind the stored ones.
    pub fn matches_with(&self, key: &str, has_tag: impl Fn(&str) -> bool + Copy) -> bool {
        match self {
            SearchExpr::Folder(prefix) => key
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/')),
            SearchExpr::Tag(tag) => has_tag(tag),
            SearchExpr::And(parts) => parts.iter().all(|p| p.matches_with(key, has_tag)),
            SearchExpr::Or(parts) => parts.iter().any(|p| p.matches_with(key, has_tag)),
        }
    }

    /// A folder every match must lie under, when the expression pins one.
    pub fn folder_prefix(&self) -> Option<&str> {
        match self {
            SearchExpr::Folder(prefix) => Some(prefix),
            SearchExpr::And(parts) => parts.iter().find_map(|p| p.folder_prefix()),
            _ => None,
        }
    }
}

impl fmt::Display for SearchExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchExpr::Folder(prefix) => write!(f, "folder:\"{prefix}/*\""),
            SearchExpr::Tag(tag) => write!(f, "tags=\"{tag}\""),
            SearchExpr::And(parts) => join(f, parts, " AND "),
            SearchExpr::Or(parts) => {
                write!(f, "(")?;
                join(f, parts, " OR ")?;
                write!(f, ")")
            }
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, parts: &[SearchExpr], sep: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{part}")?;
    }
    Ok(())
}
