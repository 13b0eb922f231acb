//! Asset names and release tags for inbound documents.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

const MAX_NAME_LEN: usize = 200;

/// How the release tag for an upload is chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPolicy {
    /// Every upload goes to the same release.
    Fixed(String),
    /// One release per UTC day: `<prefix>-YYYYMMDD`.
    Daily { prefix: String },
}

impl TagPolicy {
    pub fn tag_for(&self, now: DateTime<Utc>) -> String {
        match self {
            TagPolicy::Fixed(tag) => tag.clone(),
            TagPolicy::Daily { prefix } => format!("{prefix}-{}", now.format("%Y%m%d")),
        }
    }
}

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]+").expect("static regex"))
}

/// Make `raw` safe as an asset name.
///
/// Runs of characters outside `[A-Za-z0-9_.-]` become `_` (in `required_ext`
/// too), the extension is appended when missing, and the stem is shortened so the result stays within
/// 200 characters with its extension intact.
pub fn sanitize_file_name(raw: &str, required_ext: Option<&str>) -> String {
    let mut name = unsafe_chars().replace_all(raw.trim(), "_").into_owned();
    if name.trim_matches(|c| c == '_' || c == '.').is_empty() {
        name = "file".to_string();
    }

    let required_ext = required_ext.map(|ext| unsafe_chars().replace_all(ext, "_"));
    let ext = match required_ext.as_deref() {
        Some(ext) if !name.to_ascii_lowercase().ends_with(&ext.to_ascii_lowercase()) => {
            name.push_str(ext);
            ext.len()
        }
        Some(ext) => ext.len(),
        None => name.rfind('.').map(|i| name.len() - i).unwrap_or(0),
    };

    if name.len() > MAX_NAME_LEN {
        let ext = if ext < MAX_NAME_LEN { ext } else { 0 };
        // Stem and extension are both sanitised to ASCII, so byte offsets are char offsets.
        let suffix = name.split_off(name.len() - ext);
        name.truncate(MAX_NAME_LEN - suffix.len());
        name.push_str(&suffix);
    }
    name
}

/// The first entry of `allowed` that `file_name` ends with (case-insensitive).
/// An empty list accepts every name and yields `Some("")`.
pub fn matching_extension<'a>(file_name: &str, allowed: &'a [String]) -> Option<&'a str> {
    if allowed.is_empty() {
        return Some("");
    }
    let lower = file_name.to_ascii_lowercase();
    allowed
        .iter()
        .find(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
        .map(String::as_str)
}
