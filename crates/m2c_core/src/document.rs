//! Intermediate document tree shared by the wikitext parser and the storage
//! serializer. Serializes to JSON without loss so rewritten trees can be dumped
//! and reloaded.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "c")]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph(Vec<Inline>),
    List { ordered: bool, items: Vec<ListItem> },
    Preformatted(String),
    Table(Table),
    HorizontalRule,
    Redirect(Vec<Inline>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub content: Vec<Inline>,
    #[serde(default)]
    pub children: Vec<Block>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub caption: Vec<Inline>,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub header: bool,
    pub content: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t", content = "c")]
pub enum Inline {
    Text(String),
    Bold(Vec<Inline>),
    Italic(Vec<Inline>),
    Link(Link),
    /// Category membership declaration; carries no visible content.
    CategoryLink(String),
    Image(Image),
    LineBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Wiki,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub kind: LinkKind,
    pub target: String,
    pub label: Vec<Inline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub source: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub caption: Option<String>,
}

impl Document {
    /// Visit every inline sequence in the tree, outermost first.
    pub fn visit_inlines_mut<F>(&mut self, visit: &mut F)
    where
        F: FnMut(&mut Vec<Inline>),
    {
        for block in &mut self.blocks {
            visit_block(block, visit);
        }
    }

    /// Drop paragraphs left with nothing but whitespace.
    pub fn remove_empty_paragraphs(&mut self) {
        for block in &mut self.blocks {
            remove_empty_in_block(block);
        }
        self.blocks.retain(|block| !is_empty_paragraph(block));
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn visit_block<F>(block: &mut Block, visit: &mut F)
where
    F: FnMut(&mut Vec<Inline>),
{
    match block {
        Block::Heading { content, .. } | Block::Paragraph(content) | Block::Redirect(content) => {
            visit_inline_list(content, visit);
        }
        Block::List { items, .. } => {
            for item in items {
                visit_inline_list(&mut item.content, visit);
                for child in &mut item.children {
                    visit_block(child, visit);
                }
            }
        }
        Block::Table(table) => {
            visit_inline_list(&mut table.caption, visit);
            for row in &mut table.rows {
                for cell in &mut row.cells {
                    visit_inline_list(&mut cell.content, visit);
                }
            }
        }
        Block::Preformatted(_) | Block::HorizontalRule => {}
    }
}

fn visit_inline_list<F>(inlines: &mut Vec<Inline>, visit: &mut F)
where
    F: FnMut(&mut Vec<Inline>),
{
    visit(inlines);
    for inline in inlines.iter_mut() {
        match inline {
            Inline::Bold(children) | Inline::Italic(children) => visit_inline_list(children, visit),
            Inline::Link(link) => visit_inline_list(&mut link.label, visit),
            Inline::Text(_) | Inline::CategoryLink(_) | Inline::Image(_) | Inline::LineBreak => {}
        }
    }
}

fn remove_empty_in_block(block: &mut Block) {
    if let Block::List { items, .. } = block {
        for item in items {
            for child in &mut item.children {
                remove_empty_in_block(child);
            }
            item.children.retain(|child| !is_empty_paragraph(child));
        }
    }
}

fn is_empty_paragraph(block: &Block) -> bool {
    match block {
        Block::Paragraph(content) => content.iter().all(|inline| match inline {
            Inline::Text(text) => text.trim().is_empty(),
            _ => false,
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{Block, Document, Image, Inline, Link, LinkKind, ListItem};

    fn sample() -> Document {
        Document {
            blocks: vec![
                Block::Paragraph(vec![
                    Inline::Text("See ".to_string()),
                    Inline::Link(Link {
                        kind: LinkKind::Wiki,
                        target: "Team_Training#Day_One".to_string(),
                        label: vec![Inline::Bold(vec![Inline::Text("day one".to_string())])],
                    }),
                    Inline::Image(Image {
                        source: "Map.png".to_string(),
                        width: Some(100),
                        height: None,
                        caption: Some("Overview".to_string()),
                    }),
                ]),
                Block::Paragraph(vec![Inline::CategoryLink("Maps".to_string())]),
                Block::List {
                    ordered: false,
                    items: vec![ListItem {
                        content: vec![Inline::CategoryLink("Nested".to_string())],
                        children: vec![],
                    }],
                },
            ],
        }
    }

    #[test]
    fn json_round_trip_preserves_links_images_and_categories() {
        let document = sample();
        let json = document.to_json().expect("serialize");
        let reloaded = Document::from_json(&json).expect("deserialize");
        assert_eq!(reloaded, document);
        assert!(json.contains(r#""t":"CategoryLink""#));
    }

    #[test]
    fn visitor_reaches_nested_inline_sequences() {
        let mut document = sample();
        let mut sequences = 0;
        document.visit_inlines_mut(&mut |_inlines: &mut Vec<Inline>| sequences += 1);
        // paragraph, link label, bold, category paragraph, list item
        assert_eq!(sequences, 5);
    }

    #[test]
    fn empty_paragraphs_are_removed_after_pruning() {
        let mut document = sample();
        document.visit_inlines_mut(&mut |inlines: &mut Vec<Inline>| {
            inlines.retain(|inline| !matches!(inline, Inline::CategoryLink(_)));
        });
        document.remove_empty_paragraphs();
        assert_eq!(document.blocks.len(), 2);
    }
}
