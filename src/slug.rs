//! Deterministic instance slugs derived from free-text titles.
//!
//! The slug becomes the instance id (and thus the state file name), so the
//! same title always yields the same slug and anything that could escape
//! the state directory is rejected.

use anyhow::{bail, Result};
use regex::Regex;

const MAX_SLUG_LEN: usize = 50;

/// Generates a slug from a feature or epic title.
///
/// Lowercases, strips filler words, collapses everything non-alphanumeric
/// into hyphens, and caps the result at 50 characters.
///
/// # Errors
///
/// Returns an error if the title reduces to an empty slug.
pub fn generate_slug(title: &str) -> Result<String> {
    let lowered = title.to_lowercase();

    // Strip lead-in phrasing and filler words before collapsing.
    let lead_in = Regex::new(r"\b(we|i)\s+want\s+to\b").expect("static pattern");
    let filler = Regex::new(r"\b(get|to|with|for|the|a|an)\b").expect("static pattern");
    let non_alnum = Regex::new(r"[^a-z0-9]+").expect("static pattern");

    let stripped = lead_in.replace_all(&lowered, " ");
    let stripped = filler.replace_all(&stripped, " ");
    let hyphenated = non_alnum.replace_all(&stripped, "-");

    let slug: String = hyphenated
        .trim_matches('-')
        .chars()
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = slug.trim_end_matches('-').to_string();

    if slug.is_empty() {
        bail!("title {:?} reduces to an empty slug; provide a more descriptive name", title);
    }

    Ok(slug)
}

/// Validates an explicitly supplied slug.
///
/// # Errors
///
/// Returns an error if the slug is empty, too long, or contains anything
/// other than lowercase alphanumerics and interior hyphens.
pub fn validate_slug(slug: &str) -> Result<()> {
    if slug.is_empty() {
        bail!("slug must not be empty");
    }
    if slug.chars().count() > MAX_SLUG_LEN {
        bail!("slug {:?} exceeds {} characters", slug, MAX_SLUG_LEN);
    }
    let shape = Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("static pattern");
    if !shape.is_match(slug) {
        bail!(
            "slug {:?} is invalid; use lowercase alphanumerics separated by hyphens",
            slug
        );
    }
    Ok(())
}
