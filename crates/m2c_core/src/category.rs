//! Category names as destination-safe label tokens.

pub const CATEGORY_PREFIX: &str = "Category:";
pub const LABEL_SEPARATOR: char = '-';
pub const SOURCE_LABEL_PREFIX: &str = "mw-";

const INVALID_LABEL_CHARS: [char; 8] = [' ', ':', '(', ')', '_', ',', '.', '&'];

/// Strip a leading `Category:` prefix and replace every character the
/// destination rejects in labels with `-`. Total and idempotent.
pub fn normalize(raw_category: &str) -> String {
    let body = raw_category
        .strip_prefix(CATEGORY_PREFIX)
        .unwrap_or(raw_category);
    body.chars()
        .map(|ch| {
            if INVALID_LABEL_CHARS.contains(&ch) {
                LABEL_SEPARATOR
            } else {
                ch
            }
        })
        .collect()
}

pub fn normalize_all<I, S>(raw_categories: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw_categories
        .into_iter()
        .map(|category| normalize(category.as_ref()))
        .collect()
}

/// Space-level labels carry an `mw-` prefix so they never collide with page labels.
pub fn source_label(normalized: &str) -> String {
    format!("{SOURCE_LABEL_PREFIX}{normalized}")
}

pub fn is_category_title(title: &str) -> bool {
    title.starts_with(CATEGORY_PREFIX)
}

pub fn strip_category_prefix(title: &str) -> &str {
    title.strip_prefix(CATEGORY_PREFIX).unwrap_or(title)
}
