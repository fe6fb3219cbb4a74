use serde::Serialize;

use crate::category::normalize;
use crate::config::MigrationConfig;
use crate::page::PageRef;
use crate::storage::{escape_attribute, escape_text};
pub use crate::wikitext::REDIRECT_MARKER;

pub const TOC_MACRO: &str = r#"<ac:structured-macro ac:name="toc" />"#;
pub const TRANSCLUSION_MARKER: &str = "{{";
pub const CATEGORY_PAGE_LABEL: &str = "was-a-category-page";
pub const TRANSCLUSION_LABEL: &str = "unhandled-transclusion";

/// A page ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationUnit {
    pub source_title: String,
    pub space_key: String,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    pub is_category: bool,
}

impl MigrationUnit {
    /// Labels in the destination wire format.
    pub fn label_string(&self) -> String {
        self.labels.join(",")
    }

    pub fn add_label(&mut self, label: &str) {
        push_label(&mut self.labels, label.to_string());
    }
}

/// Text of the provenance notice appended to every migrated page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub text: String,
}

impl Notice {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            title: config.notice_title().to_string(),
            text: config.notice_text().to_string(),
        }
    }
}

/// Wraps a transcoded body with the table of contents, the category listing
/// for category pages and the provenance notice, and derives the labels.
pub fn assemble(
    page: &PageRef,
    space_key: &str,
    transcoded_body: &str,
    source_url: &str,
    notice: &Notice,
) -> MigrationUnit {
    let mut body = String::with_capacity(transcoded_body.len() + 512);
    body.push_str(TOC_MACRO);
    body.push('\n');
    body.push_str(transcoded_body);
    body.push('\n');
    if page.is_category() {
        body.push_str(&label_listing_macro(&normalize(&page.name)));
        body.push('\n');
    }
    body.push_str(&provenance_macro(notice, source_url, &page.name));

    MigrationUnit {
        source_title: page.name.clone(),
        space_key: space_key.to_string(),
        title: page.destination_title().to_string(),
        labels: labels_for(page, transcoded_body),
        body,
        is_category: page.is_category(),
    }
}

pub fn labels_for(page: &PageRef, transcoded_body: &str) -> Vec<String> {
    let mut labels = Vec::new();
    for category in &page.categories {
        push_label(&mut labels, normalize(category));
    }
    if page.is_category() {
        push_label(&mut labels, CATEGORY_PAGE_LABEL.to_string());
        push_label(&mut labels, normalize(&page.name));
    }
    if transcoded_body.contains(TRANSCLUSION_MARKER) {
        push_label(&mut labels, TRANSCLUSION_LABEL.to_string());
    }
    labels
}

pub fn is_redirect(transcoded_body: &str) -> bool {
    transcoded_body.contains(REDIRECT_MARKER)
}

pub fn provenance_macro(notice: &Notice, source_url: &str, display_name: &str) -> String {
    format!(
        concat!(
            r#"<ac:structured-macro ac:name="info">"#,
            r#"<ac:parameter ac:name="title">{title}</ac:parameter>"#,
            r#"<ac:rich-text-body><p>{text} <a href="{url}">{name}</a>.</p></ac:rich-text-body>"#,
            r#"</ac:structured-macro>"#
        ),
        title = escape_text(&notice.title),
        text = escape_text(&notice.text),
        url = escape_attribute(source_url),
        name = escape_text(display_name),
    )
}

pub fn label_listing_macro(label: &str) -> String {
    format!(
        concat!(
            r#"<ac:structured-macro ac:name="contentbylabel">"#,
            r#"<ac:parameter ac:name="labels">{label}</ac:parameter>"#,
            r#"<ac:parameter ac:name="spaces">@all</ac:parameter>"#,
            r#"</ac:structured-macro>"#
        ),
        label = escape_text(label),
    )
}

fn push_label(labels: &mut Vec<String>, label: String) {
    let label = label.trim().to_string();
    if !label.is_empty() && !labels.contains(&label) {
        labels.push(label);
    }
}
