//! MediaWiki markup to [`Document`] parser.
//!
//! Covers the markup found on ordinary content pages: headings, paragraphs,
//! nested lists, definition lines, preformatted text, tables, internal and
//! external links, category declarations, embedded files, bold and italic.
//! Templates are kept verbatim as text. Structural damage that cannot be
//! recovered locally (an unclosed table, `<pre>`, `<nowiki>` or internal link)
//! fails the whole parse.

use anyhow::{Result, anyhow, bail};

use crate::category::CATEGORY_PREFIX;
use crate::document::{
    Block, Document, Image, Inline, Link, LinkKind, ListItem, Table, TableCell, TableRow,
};
use crate::page::attachment_name;

pub const REDIRECT_MARKER: &str = "#REDIRECT";

const MAGIC_WORDS: &[&str] = &[
    "__TOC__",
    "__NOTOC__",
    "__FORCETOC__",
    "__NOEDITSECTION__",
    "__NOGALLERY__",
];

const IMAGE_KEYWORDS: &[&str] = &[
    "thumb",
    "thumbnail",
    "frame",
    "framed",
    "frameless",
    "border",
    "left",
    "right",
    "center",
    "centre",
    "none",
    "upright",
    "baseline",
    "middle",
    "top",
    "bottom",
];

const IMAGE_OPTION_PREFIXES: &[&str] = &["link=", "alt=", "upright=", "page=", "class=", "lang="];

pub fn parse(source: &str) -> Result<Document> {
    let normalized = source.replace("\r\n", "\n");
    let lines = normalized.lines().map(strip_magic_words).collect::<Vec<_>>();
    let mut parser = BlockParser {
        lines: &lines,
        position: 0,
        blocks: Vec::new(),
        paragraph: Vec::new(),
        seen_content: false,
    };
    parser.run()?;
    Ok(Document {
        blocks: parser.blocks,
    })
}

/// Category declarations in `source`, as `Category:` titles in document order.
pub fn declared_categories(source: &str) -> Result<Vec<String>> {
    let mut document = parse(source)?;
    let mut categories = Vec::new();
    document.visit_inlines_mut(&mut |inlines: &mut Vec<Inline>| {
        for inline in inlines.iter() {
            if let Inline::CategoryLink(name) = inline {
                let title = format!("{CATEGORY_PREFIX}{name}");
                if !categories.contains(&title) {
                    categories.push(title);
                }
            }
        }
    });
    Ok(categories)
}

struct BlockParser<'a> {
    lines: &'a [String],
    position: usize,
    blocks: Vec<Block>,
    paragraph: Vec<String>,
    seen_content: bool,
}

impl BlockParser<'_> {
    fn run(&mut self) -> Result<()> {
        let lines = self.lines;
        while self.position < lines.len() {
            let line = lines[self.position].as_str();
            let trimmed = line.trim();

            if trimmed.is_empty() {
                self.flush_paragraph()?;
                self.position += 1;
                continue;
            }

            if !self.seen_content
                && let Some(rest) = strip_prefix_ignore_case(trimmed, REDIRECT_MARKER)
            {
                self.seen_content = true;
                self.blocks.push(Block::Redirect(parse_inline(rest.trim())?));
                self.position += 1;
                continue;
            }
            self.seen_content = true;

            if let Some((level, content)) = parse_heading(trimmed) {
                self.flush_paragraph()?;
                self.blocks.push(Block::Heading {
                    level,
                    content: parse_inline(content)?,
                });
                self.position += 1;
            } else if trimmed.len() >= 4 && trimmed.chars().all(|ch| ch == '-') {
                self.flush_paragraph()?;
                self.blocks.push(Block::HorizontalRule);
                self.position += 1;
            } else if trimmed.starts_with("{|") {
                self.flush_paragraph()?;
                self.parse_table()?;
            } else if strip_prefix_ignore_case(trimmed, "<pre").is_some() {
                self.flush_paragraph()?;
                self.parse_pre_block()?;
            } else if line.starts_with('*') || line.starts_with('#') {
                self.flush_paragraph()?;
                self.parse_list()?;
            } else if line.starts_with(':') || line.starts_with(';') {
                self.flush_paragraph()?;
                self.parse_definition(line)?;
                self.position += 1;
            } else if line.starts_with(' ') {
                self.flush_paragraph()?;
                self.parse_preformatted();
            } else {
                self.paragraph.push(trimmed.to_string());
                self.position += 1;
            }
        }
        self.flush_paragraph()
    }

    fn flush_paragraph(&mut self) -> Result<()> {
        if self.paragraph.is_empty() {
            return Ok(());
        }
        let text = self.paragraph.join(" ");
        self.paragraph.clear();
        let content = parse_inline(&text)?;
        if !content.is_empty() {
            self.blocks.push(Block::Paragraph(content));
        }
        Ok(())
    }

    fn parse_list(&mut self) -> Result<()> {
        let mut entries = Vec::new();
        while let Some(line) = self.lines.get(self.position) {
            let depth = line
                .chars()
                .take_while(|ch| matches!(ch, '*' | '#'))
                .count();
            if depth == 0 {
                break;
            }
            entries.push(ListEntry {
                markers: line[..depth].to_string(),
                content: parse_inline(line[depth..].trim())?,
            });
            self.position += 1;
        }

        let mut start = 0;
        while start < entries.len() {
            let (block, next) = build_list(&entries, start, 1);
            self.blocks.push(block);
            start = next;
        }
        Ok(())
    }

    fn parse_definition(&mut self, line: &str) -> Result<()> {
        let is_term = line.starts_with(';');
        let body = line.trim_start_matches([':', ';']).trim();
        let (term, definition) = match (is_term, body.split_once(" : ")) {
            (true, Some((term, definition))) => (term.trim(), Some(definition.trim())),
            (true, None) => (body, None),
            (false, _) => ("", Some(body)),
        };
        if !term.is_empty() {
            self.blocks
                .push(Block::Paragraph(vec![Inline::Bold(parse_inline(term)?)]));
        }
        if let Some(definition) = definition {
            let content = parse_inline(definition)?;
            if !content.is_empty() {
                self.blocks.push(Block::Paragraph(content));
            }
        }
        Ok(())
    }

    fn parse_preformatted(&mut self) {
        let mut text = Vec::new();
        while let Some(line) = self.lines.get(self.position) {
            if !line.starts_with(' ') || line.trim().is_empty() {
                break;
            }
            text.push(decode_entities(&line[1..]));
            self.position += 1;
        }
        self.blocks.push(Block::Preformatted(text.join("\n")));
    }

    fn parse_pre_block(&mut self) -> Result<()> {
        let start = self.position;
        let first = self.lines[start].trim();
        let opening_end = first
            .find('>')
            .ok_or_else(|| anyhow!("malformed <pre> tag at line {}", start + 1))?;
        let mut remainder = first[opening_end + 1..].to_string();
        let mut collected = Vec::new();

        loop {
            if let Some(close) = find_ignore_case(&remainder, "</pre>") {
                collected.push(remainder[..close].to_string());
                let trailing = remainder[close + "</pre>".len()..].trim().to_string();
                self.position += 1;
                self.blocks
                    .push(Block::Preformatted(decode_entities(collected.join("\n").trim_matches('\n'))));
                if !trailing.is_empty() {
                    self.paragraph.push(trailing);
                }
                return Ok(());
            }
            collected.push(remainder);
            self.position += 1;
            match self.lines.get(self.position) {
                Some(line) => remainder = line.clone(),
                None => bail!("unterminated <pre> block starting at line {}", start + 1),
            }
        }
    }

    fn parse_table(&mut self) -> Result<()> {
        let start = self.position;
        let mut table = Table::default();
        let mut row: Vec<TableCell> = Vec::new();
        let mut nested_depth = 0usize;
        self.position += 1;

        loop {
            let Some(line) = self.lines.get(self.position) else {
                bail!("unterminated table starting at line {}", start + 1);
            };
            let trimmed = line.trim();
            self.position += 1;

            if nested_depth > 0 {
                if trimmed.starts_with("|}") {
                    nested_depth -= 1;
                } else if trimmed.starts_with("{|") {
                    nested_depth += 1;
                }
                append_to_last_cell(&mut row, parse_inline(trimmed)?);
                continue;
            }

            if trimmed.starts_with("|}") {
                break;
            } else if trimmed.starts_with("{|") {
                nested_depth += 1;
                append_to_last_cell(&mut row, parse_inline(trimmed)?);
            } else if let Some(caption) = trimmed.strip_prefix("|+") {
                table.caption = parse_inline(strip_cell_attributes(caption).trim())?;
            } else if trimmed.starts_with("|-") {
                if !row.is_empty() {
                    table.rows.push(TableRow {
                        cells: std::mem::take(&mut row),
                    });
                }
            } else if let Some(cells) = trimmed.strip_prefix('!') {
                for cell in split_cells(cells, &["!!", "||"]) {
                    row.push(TableCell {
                        header: true,
                        content: parse_inline(strip_cell_attributes(cell).trim())?,
                    });
                }
            } else if let Some(cells) = trimmed.strip_prefix('|') {
                for cell in split_cells(cells, &["||"]) {
                    row.push(TableCell {
                        header: false,
                        content: parse_inline(strip_cell_attributes(cell).trim())?,
                    });
                }
            } else {
                let mut continuation = vec![Inline::Text(" ".to_string())];
                continuation.extend(parse_inline(trimmed)?);
                append_to_last_cell(&mut row, continuation);
            }
        }

        if !row.is_empty() {
            table.rows.push(TableRow { cells: row });
        }
        self.blocks.push(Block::Table(table));
        Ok(())
    }
}

struct ListEntry {
    markers: String,
    content: Vec<Inline>,
}

/// Build one list at `depth` from `entries[start..]`; returns the list and the
/// index of the first entry it did not consume.
fn build_list(entries: &[ListEntry], start: usize, depth: usize) -> (Block, usize) {
    let ordered = marker_at(&entries[start].markers, depth) == Some(b'#');
    let mut items: Vec<ListItem> = Vec::new();
    let mut index = start;

    while index < entries.len() {
        let entry = &entries[index];
        let entry_depth = entry.markers.len();
        if entry_depth < depth {
            break;
        }
        if entry_depth == depth {
            if index > start && (marker_at(&entry.markers, depth) == Some(b'#')) != ordered {
                break;
            }
            items.push(ListItem {
                content: entry.content.clone(),
                children: Vec::new(),
            });
            index += 1;
        } else {
            let (child, next) = build_list(entries, index, depth + 1);
            if items.is_empty() {
                items.push(ListItem::default());
            }
            if let Some(parent) = items.last_mut() {
                parent.children.push(child);
            }
            index = next;
        }
    }

    (Block::List { ordered, items }, index)
}

fn marker_at(markers: &str, depth: usize) -> Option<u8> {
    markers.as_bytes().get(depth - 1).copied()
}

fn append_to_last_cell(row: &mut Vec<TableCell>, content: Vec<Inline>) {
    match row.last_mut() {
        Some(cell) => cell.content.extend(content),
        None => row.push(TableCell {
            header: false,
            content,
        }),
    }
}

/// `style="color:red" | content` -> `content`; leaves link and template pipes alone.
fn strip_cell_attributes(cell: &str) -> &str {
    if let Some((attributes, content)) = cell.split_once('|')
        && attributes.contains('=')
        && !attributes.contains("[[")
        && !attributes.contains("{{")
    {
        return content;
    }
    cell
}

fn split_cells<'a>(line: &'a str, separators: &[&str]) -> Vec<&'a str> {
    let mut cells = Vec::new();
    let mut depth = 0usize;
    let mut cell_start = 0usize;
    let mut index = 0usize;

    while index < line.len() {
        let rest = &line[index..];
        if rest.starts_with("[[") || rest.starts_with("{{") {
            depth += 1;
            index += 2;
            continue;
        }
        if (rest.starts_with("]]") || rest.starts_with("}}")) && depth > 0 {
            depth -= 1;
            index += 2;
            continue;
        }
        if depth == 0
            && let Some(separator) = separators.iter().find(|sep| rest.starts_with(**sep))
        {
            cells.push(&line[cell_start..index]);
            index += separator.len();
            cell_start = index;
            continue;
        }
        index += rest.chars().next().map_or(1, char::len_utf8);
    }
    cells.push(&line[cell_start..]);
    cells
}

fn parse_heading(trimmed: &str) -> Option<(u8, &str)> {
    if !trimmed.starts_with('=') || !trimmed.ends_with('=') {
        return None;
    }
    let start_equals = trimmed.chars().take_while(|ch| *ch == '=').count();
    let end_equals = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
    let level = start_equals.min(end_equals).min(6);
    if trimmed.len() <= level * 2 {
        return None;
    }
    let content = trimmed[level..trimmed.len() - level].trim();
    if content.is_empty() {
        return None;
    }
    Some((level as u8, content))
}

pub fn parse_inline(text: &str) -> Result<Vec<Inline>> {
    let mut builder = InlineBuilder::default();
    let mut rest = text;

    while let Some(ch) = rest.chars().next() {
        if let Some(after) = strip_prefix_ignore_case(rest, "<nowiki>") {
            let end = find_ignore_case(after, "</nowiki>")
                .ok_or_else(|| anyhow!("unterminated <nowiki> near `{}`", preview(rest)))?;
            builder.push_text(&decode_entities(&after[..end]));
            rest = &after[end + "</nowiki>".len()..];
        } else if let Some(after) = rest.strip_prefix("<!--") {
            rest = after.find("-->").map_or("", |end| &after[end + 3..]);
        } else if let Some(length) = line_break_length(rest) {
            builder.push(Inline::LineBreak);
            rest = &rest[length..];
        } else if rest.starts_with("[[") {
            let end = matching_close(rest, "[[", "]]")
                .ok_or_else(|| anyhow!("unterminated internal link near `{}`", preview(rest)))?;
            builder.push(parse_wikilink(&rest[2..end])?);
            rest = &rest[end + 2..];
        } else if rest.starts_with("{{") {
            let end = matching_close(rest, "{{", "}}").map_or(rest.len(), |end| end + 2);
            builder.push_text(&rest[..end]);
            rest = &rest[end..];
        } else if let Some((link, length)) = parse_external_link(rest)? {
            builder.push(link);
            rest = &rest[length..];
        } else if let Some(after) = rest.strip_prefix("'''''") {
            builder.toggle_bold_italic();
            rest = after;
        } else if let Some(after) = rest.strip_prefix("'''") {
            builder.toggle(Format::Bold);
            rest = after;
        } else if let Some(after) = rest.strip_prefix("''") {
            builder.toggle(Format::Italic);
            rest = after;
        } else if let Some((decoded, length)) = decode_entity(rest) {
            builder.push_char(decoded);
            rest = &rest[length..];
        } else {
            builder.push_char(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }

    Ok(builder.finish())
}

fn parse_wikilink(inner: &str) -> Result<Inline> {
    let parts = split_cells(inner, &["|"]);
    let target = parts[0].trim();
    if target.is_empty() {
        return Ok(Inline::Text(format!("[[{inner}]]")));
    }

    let visible = target.starts_with(':');
    let bare = target.trim_start_matches(':').trim();

    if !visible && let Some((prefix, rest)) = bare.split_once(':') {
        let namespace = prefix.trim();
        if namespace.eq_ignore_ascii_case("Category") {
            return Ok(Inline::CategoryLink(rest.trim().replace('_', " ")));
        }
        if namespace.eq_ignore_ascii_case("File") || namespace.eq_ignore_ascii_case("Image") {
            return Ok(Inline::Image(parse_image(rest, &parts[1..])));
        }
    }

    let label_text = parts.get(1).map(|label| label.trim()).unwrap_or("");
    let label = if label_text.is_empty() {
        vec![Inline::Text(bare.to_string())]
    } else {
        parse_inline(label_text)?
    };
    let kind = if is_external_url(bare) {
        LinkKind::External
    } else {
        LinkKind::Wiki
    };

    Ok(Inline::Link(Link {
        kind,
        target: target.to_string(),
        label,
    }))
}

fn parse_image(file: &str, options: &[&str]) -> Image {
    let mut image = Image {
        source: attachment_name(file),
        width: None,
        height: None,
        caption: None,
    };
    for option in options {
        let option = option.trim();
        if option.is_empty() {
            continue;
        }
        if let Some((width, height)) = parse_dimensions(option) {
            image.width = width;
            image.height = height;
            continue;
        }
        let lowered = option.to_ascii_lowercase();
        if IMAGE_KEYWORDS.contains(&lowered.as_str())
            || IMAGE_OPTION_PREFIXES
                .iter()
                .any(|prefix| lowered.starts_with(prefix))
        {
            continue;
        }
        image.caption = Some(option.to_string());
    }
    image
}

/// `200px`, `200x100px`, `x100px`
fn parse_dimensions(option: &str) -> Option<(Option<u32>, Option<u32>)> {
    let body = option.strip_suffix("px")?.trim();
    let (width, height) = match body.split_once('x') {
        Some((width, height)) => (width.trim(), height.trim()),
        None => (body, ""),
    };
    let parsed_width = width.parse::<u32>().ok();
    let parsed_height = height.parse::<u32>().ok();
    let width_ok = width.is_empty() || parsed_width.is_some();
    let height_ok = height.is_empty() || parsed_height.is_some();
    if !width_ok || !height_ok || (parsed_width.is_none() && parsed_height.is_none()) {
        return None;
    }
    Some((parsed_width, parsed_height))
}

fn parse_external_link(rest: &str) -> Result<Option<(Inline, usize)>> {
    let Some(after) = rest.strip_prefix('[') else {
        return Ok(None);
    };
    if !is_external_url(after) {
        return Ok(None);
    }
    let Some(end) = after.find(']') else {
        return Ok(None);
    };
    let inner = &after[..end];
    let (url, label_text) = match inner.split_once(char::is_whitespace) {
        Some((url, label)) => (url, label.trim()),
        None => (inner, ""),
    };
    let label = if label_text.is_empty() {
        vec![Inline::Text(url.to_string())]
    } else {
        parse_inline(label_text)?
    };
    let link = Inline::Link(Link {
        kind: LinkKind::External,
        target: url.to_string(),
        label,
    });
    Ok(Some((link, end + 2)))
}

fn is_external_url(value: &str) -> bool {
    ["http://", "https://", "ftp://", "mailto:", "//"]
        .iter()
        .any(|scheme| strip_prefix_ignore_case(value, scheme).is_some())
}

/// Byte offset of the close delimiter balancing the open delimiter `value` starts with.
fn matching_close(value: &str, open: &str, close: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut index = 0usize;
    while index < value.len() {
        let rest = &value[index..];
        if rest.starts_with(open) {
            depth += 1;
            index += open.len();
        } else if rest.starts_with(close) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(index);
            }
            index += close.len();
        } else {
            index += rest.chars().next().map_or(1, char::len_utf8);
        }
    }
    None
}

fn line_break_length(rest: &str) -> Option<usize> {
    ["<br />", "<br/>", "<br>"]
        .iter()
        .find(|tag| strip_prefix_ignore_case(rest, tag).is_some())
        .map(|tag| tag.len())
}

fn decode_entity(rest: &str) -> Option<(char, usize)> {
    if !rest.starts_with('&') {
        return None;
    }
    let semicolon = rest.get(..12).unwrap_or(rest).find(';')?;
    let name = &rest[1..semicolon];
    let decoded = match name {
        "nbsp" => '\u{a0}',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, semicolon + 1))
}

fn decode_entities(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        if let Some((decoded, length)) = decode_entity(rest) {
            output.push(decoded);
            rest = &rest[length..];
        } else {
            output.push(ch);
            rest = &rest[ch.len_utf8()..];
        }
    }
    output
}

fn strip_magic_words(line: &str) -> String {
    let mut output = line.to_string();
    for word in MAGIC_WORDS {
        if output.contains(word) {
            output = output.replace(word, "");
        }
    }
    output
}

/// Whether the first non-blank line of `source` declares a redirect, in any
/// case. Needs no successful parse.
pub fn is_redirect_source(source: &str) -> bool {
    source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .is_some_and(|line| strip_prefix_ignore_case(line, REDIRECT_MARKER).is_some())
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn preview(value: &str) -> String {
    value.chars().take(40).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Bold,
    Italic,
}

#[derive(Default)]
struct InlineBuilder {
    root: Vec<Inline>,
    frames: Vec<(Format, Vec<Inline>)>,
}

impl InlineBuilder {
    fn current(&mut self) -> &mut Vec<Inline> {
        match self.frames.last_mut() {
            Some((_, children)) => children,
            None => &mut self.root,
        }
    }

    fn push(&mut self, inline: Inline) {
        self.current().push(inline);
    }

    fn push_char(&mut self, ch: char) {
        if let Some(Inline::Text(text)) = self.current().last_mut() {
            text.push(ch);
            return;
        }
        self.current().push(Inline::Text(ch.to_string()));
    }

    fn push_text(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        if let Some(Inline::Text(text)) = self.current().last_mut() {
            text.push_str(value);
            return;
        }
        self.current().push(Inline::Text(value.to_string()));
    }

    fn toggle(&mut self, format: Format) {
        if !self.frames.iter().any(|(open, _)| *open == format) {
            self.frames.push((format, Vec::new()));
            return;
        }
        while let Some((open, _)) = self.frames.last() {
            let open = *open;
            self.close_top();
            if open == format {
                break;
            }
        }
    }

    fn toggle_bold_italic(&mut self) {
        match self.frames.last().map(|(open, _)| *open) {
            Some(Format::Italic) => {
                self.toggle(Format::Italic);
                self.toggle(Format::Bold);
            }
            Some(Format::Bold) => {
                self.toggle(Format::Bold);
                self.toggle(Format::Italic);
            }
            None => {
                self.toggle(Format::Bold);
                self.toggle(Format::Italic);
            }
        }
    }

    fn close_top(&mut self) {
        if let Some((format, children)) = self.frames.pop() {
            if children.is_empty() {
                return;
            }
            let node = match format {
                Format::Bold => Inline::Bold(children),
                Format::Italic => Inline::Italic(children),
            };
            self.current().push(node);
        }
    }

    fn finish(mut self) -> Vec<Inline> {
        while !self.frames.is_empty() {
            self.close_top();
        }
        self.root
    }
}
