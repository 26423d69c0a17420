use std::sync::OnceLock;

use log::info;
use regex::Regex;

use crate::errors::Result;

fn illegal_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|[:cntrl:]]"#).expect("valid regex"))
}

fn whitespace_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

/// Sanitizes a filename component: characters that are illegal in file paths
/// become `_`, whitespace runs collapse to a single space. An empty result
/// falls back to `track` so a path component never vanishes.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = illegal_chars().replace_all(name, "_");
    let collapsed = whitespace_runs().replace_all(&replaced, " ");
    let trimmed = collapsed.trim();
    if trimmed.is_empty() {
        "track".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitizes a track filename in "Artist - Title" format.
pub fn sanitize_track_filename(artist: &str, title: &str) -> String {
    sanitize_filename(&format!("{} - {}", artist, title))
}

/// Creates a directory if it doesn't exist.
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}
