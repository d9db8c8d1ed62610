use std::fmt;

pub(crate) const JNC_BASE_URL: &str = "https://j-novel.club";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ResourceRef {
    pub(crate) slug: String,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", url_from_series_slug(&self.slug))
    }
}

pub(crate) fn url_from_series_slug(slug: &str) -> String {
    format!("{JNC_BASE_URL}/series/{slug}")
}

// Splits a j-novel.club URL into its path segments, ignoring scheme, `www.`,
// query string and fragment. Returns None for any other host.
fn jnc_path_segments(url: &str) -> Option<Vec<&str>> {
    let trimmed = url.trim();
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let path = rest.strip_prefix("j-novel.club")?;
    if !(path.is_empty() || path.starts_with('/')) {
        return None;
    }
    let path = path.split(['?', '#']).next().unwrap_or(path);
    Some(path.split('/').filter(|seg| !seg.is_empty()).collect())
}

pub(crate) fn series_slug_from_url(url: &str) -> Option<String> {
    let segments = jnc_path_segments(url)?;
    match segments.as_slice() {
        ["series", slug, ..] | ["s", slug, ..] => Some((*slug).to_string()),
        _ => None,
    }
}

pub(crate) fn resource_from_url(url: &str) -> Option<ResourceRef> {
    series_slug_from_url(url).map(|slug| ResourceRef { slug })
}

/// Rewrites a series URL from any known website layout into the current one.
/// Unrecognized strings come back untouched.
pub(crate) fn to_new_website_series_url(url: &str) -> String {
    match series_slug_from_url(url) {
        Some(slug) => url_from_series_slug(&slug),
        None => url.to_string(),
    }
}

pub(crate) fn is_current_series_url(url: &str) -> bool {
    series_slug_from_url(url).is_some_and(|slug| url == url_from_series_slug(&slug))
}

pub(crate) fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
