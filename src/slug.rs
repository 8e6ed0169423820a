//! Stable artwork identifiers derived from artist and title.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9a-zA-Z ]+").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" +").unwrap());

/// Build the slug for an artwork: `<artist>_<title>`, each part accent-free,
/// alphanumeric, hyphen-separated and lowercase.
pub fn slug(artist: &str, title: &str) -> String {
    format!("{}_{}", slug_part(artist), slug_part(title))
}

/// Normalize one slug segment.
pub fn slug_part(s: &str) -> String {
    let stripped = strip_accents(s);
    let alnum = NON_ALNUM_RE.replace_all(stripped.trim(), "");
    SPACES_RE.replace_all(&alnum, "-").to_lowercase()
}

/// Decompose to NFD and drop combining marks ("Júnior" → "Junior").
fn strip_accents(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect()
}
