//! Destination storage-format writer.
//!
//! [`render`] turns a rewritten [`Document`] into XHTML. Embedded files come
//! out as plain `<img>` tags, each on a line of its own; [`rewrite_images`]
//! then swaps every such tag for the attachment image macro.

use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::document::{Block, Document, Image, Inline, ListItem, Table};

pub fn render(document: &Document) -> String {
    let mut out = String::new();
    for (position, block) in document.blocks.iter().enumerate() {
        if position > 0 {
            out.push('\n');
        }
        render_block(block, &mut out);
    }
    out
}

fn render_block(block: &Block, out: &mut String) {
    match block {
        Block::Heading { level, content } => {
            let level = (*level).clamp(1, 6);
            out.push_str(&format!("<h{level}>"));
            render_inlines(content, out);
            out.push_str(&format!("</h{level}>"));
        }
        Block::Paragraph(content) => {
            out.push_str("<p>");
            render_inlines(content, out);
            out.push_str("</p>");
        }
        Block::Redirect(content) => {
            out.push_str("<p>#REDIRECT ");
            render_inlines(content, out);
            out.push_str("</p>");
        }
        Block::List { ordered, items } => render_list(*ordered, items, out),
        Block::Preformatted(text) => {
            out.push_str("<pre>");
            out.push_str(&escape_text(text));
            out.push_str("</pre>");
        }
        Block::Table(table) => render_table(table, out),
        Block::HorizontalRule => out.push_str("<hr />"),
    }
}

fn render_list(ordered: bool, items: &[ListItem], out: &mut String) {
    let tag = if ordered { "ol" } else { "ul" };
    out.push_str(&format!("<{tag}>"));
    for item in items {
        out.push_str("<li>");
        render_inlines(&item.content, out);
        for child in &item.children {
            render_block(child, out);
        }
        out.push_str("</li>");
    }
    out.push_str(&format!("</{tag}>"));
}

fn render_table(table: &Table, out: &mut String) {
    if !table.caption.is_empty() {
        out.push_str("<p><strong>");
        render_inlines(&table.caption, out);
        out.push_str("</strong></p>\n");
    }
    out.push_str("<table><tbody>");
    for row in &table.rows {
        out.push_str("<tr>");
        for cell in &row.cells {
            let tag = if cell.header { "th" } else { "td" };
            out.push_str(&format!("<{tag}>"));
            render_inlines(&cell.content, out);
            out.push_str(&format!("</{tag}>"));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
}

fn render_inlines(inlines: &[Inline], out: &mut String) {
    for inline in inlines {
        match inline {
            Inline::Text(text) => out.push_str(&escape_text(text)),
            Inline::Bold(children) => {
                out.push_str("<strong>");
                render_inlines(children, out);
                out.push_str("</strong>");
            }
            Inline::Italic(children) => {
                out.push_str("<em>");
                render_inlines(children, out);
                out.push_str("</em>");
            }
            Inline::Link(link) => {
                out.push_str(&format!("<a href=\"{}\">", escape_attribute(&link.target)));
                render_inlines(&link.label, out);
                out.push_str("</a>");
            }
            Inline::Image(image) => render_image(image, out),
            Inline::LineBreak => out.push_str("<br />"),
            Inline::CategoryLink(_) => {}
        }
    }
}

fn render_image(image: &Image, out: &mut String) {
    out.push_str("\n<img src=\"");
    out.push_str(&escape_attribute(&image.source));
    out.push('"');
    if let Some(width) = image.width {
        out.push_str(&format!(" width=\"{width}\""));
    }
    if let Some(height) = image.height {
        out.push_str(&format!(" height=\"{height}\""));
    }
    if let Some(caption) = &image.caption {
        out.push_str(&format!(" alt=\"{}\"", escape_attribute(caption)));
    }
    out.push_str(" />\n");
}

/// Replace every `<img>` tag, line by line, with an attachment image macro.
/// Width and height carry over independently as bare numbers
/// (`ac:width=100`); a tag without a usable `src` is left alone.
pub fn rewrite_images(markup: &str) -> String {
    markup
        .lines()
        .map(|line| {
            if !line.contains("<img") {
                return line.to_string();
            }
            image_tag()
                .replace_all(line, |captures: &regex::Captures<'_>| {
                    let tag = &captures[0];
                    image_macro(tag).unwrap_or_else(|| tag.to_string())
                })
                .into_owned()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn image_macro(tag: &str) -> Option<String> {
    let mut source = None;
    let mut width = None;
    let mut height = None;
    let mut alt = None;
    for captures in image_attribute().captures_iter(tag) {
        let value = captures[2].to_string();
        match &captures[1] {
            "src" => source = Some(value),
            "width" => width = dimension(tag, "width", &value),
            "height" => height = dimension(tag, "height", &value),
            "alt" => alt = Some(value),
            _ => {}
        }
    }

    let source = source.filter(|source| !source.trim().is_empty())?;
    let mut widget = String::from("<ac:image ac:thumbnail=\"true\"");
    if let Some(width) = width {
        widget.push_str(&format!(" ac:width={width}"));
    }
    if let Some(height) = height {
        widget.push_str(&format!(" ac:height={height}"));
    }
    if let Some(alt) = alt {
        widget.push_str(&format!(" ac:alt=\"{alt}\""));
    }
    widget.push_str(&format!(
        "><ri:attachment ri:filename=\"{source}\" /></ac:image>"
    ));
    Some(widget)
}

fn dimension(tag: &str, attribute: &str, value: &str) -> Option<u32> {
    match value.trim().trim_end_matches("px").parse::<u32>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            debug!("ignoring non-numeric {attribute} `{value}` in {tag}");
            None
        }
    }
}

fn image_tag() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<img\s[^>]*?/?>").expect("image tag pattern"))
}

fn image_attribute() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\b(src|width|height|alt)\s*=\s*"([^"]*)""#).expect("image attribute pattern")
    })
}

pub fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attribute(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}
