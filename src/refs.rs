use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PULL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^refs/pull/(\d+)/(head|merge)$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Pr,
    Sha,
    Tag,
    Unknown,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Branch => "branch",
            RefKind::Pr => "pr",
            RefKind::Sha => "sha",
            RefKind::Tag => "tag",
            RefKind::Unknown => "unknown",
        }
    }
}

/// Canonical form of a Git reference as delivered by webhooks or typed by
/// users: full heads/pull refs, bare 40-hex commit ids, and tag refs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRef {
    pub raw: String,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub kind: RefKind,
}

impl NormalizedRef {
    pub fn unknown(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            ref_name: raw.clone(),
            raw,
            kind: RefKind::Unknown,
        }
    }
}

/// Normalizes a ref string. SHA refs are lowercased; tag refs keep the tag
/// name but stay unclassified.
pub fn normalize(input: &str) -> NormalizedRef {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return NormalizedRef::unknown("");
    }
    if let Some(branch) = trimmed.strip_prefix("refs/heads/") {
        if !branch.is_empty() {
            return NormalizedRef {
                raw: trimmed.to_string(),
                ref_name: branch.to_string(),
                kind: RefKind::Branch,
            };
        }
        return NormalizedRef::unknown(trimmed);
    }
    if let Some(caps) = PULL_RE.captures(trimmed) {
        return NormalizedRef {
            raw: trimmed.to_string(),
            ref_name: format!("pr/{}", &caps[1]),
            kind: RefKind::Pr,
        };
    }
    if trimmed.len() == 40 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return NormalizedRef {
            raw: trimmed.to_string(),
            ref_name: trimmed.to_ascii_lowercase(),
            kind: RefKind::Sha,
        };
    }
    if let Some(tag) = trimmed.strip_prefix("refs/tags/") {
        if !tag.is_empty() {
            // Tags are accepted for scanning but not classified further.
            return NormalizedRef {
                raw: trimmed.to_string(),
                ref_name: tag.to_string(),
                kind: RefKind::Unknown,
            };
        }
    }
    NormalizedRef::unknown(trimmed)
}
