//! General utilities shared across the library.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Video Titles
// ─────────────────────────────────────────────────────────────────────────────

/// Returns a human-facing title for a video, without a trailing container extension.
///
/// Catalog entries are named after their files (`"intro.mp4"`); chat notices
/// show `"intro"`.
#[must_use]
pub fn display_title(title: &str) -> &str {
    const EXTENSIONS: [&str; 3] = [".mp4", ".webm", ".mkv"];
    let trimmed = title.trim();
    EXTENSIONS
        .iter()
        .find_map(|ext| trimmed.strip_suffix(ext))
        .unwrap_or(trimmed)
}

/// Derives a display title from a playback URL (last path segment).
#[must_use]
pub fn title_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
    display_title(&segment.replace("%20", " ")).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_title_strips_known_extensions() {
        assert_eq!(display_title("intro.mp4"), "intro");
        assert_eq!(display_title("  clip.webm "), "clip");
        assert_eq!(display_title("notes.txt"), "notes.txt");
    }

    #[test]
    fn title_from_url_uses_last_segment() {
        assert_eq!(
            title_from_url("https://host/video/play/My%20Film.mp4?t=3"),
            "My Film"
        );
        assert_eq!(title_from_url("v1"), "v1");
    }

    #[test]
    fn now_millis_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
