use serde::Serialize;

use crate::category::{is_category_title, strip_category_prefix};
use crate::space::SpaceRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    Content,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    /// File page title as reported by the source wiki, e.g. `File:Map.png`.
    pub name: String,
    pub url: Option<String>,
}

impl ImageRef {
    /// Attachment name on the destination: the file name without its namespace.
    pub fn attachment_name(&self) -> String {
        attachment_name(&self.name)
    }
}

/// A source page as fetched for one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub name: String,
    pub categories: Vec<String>,
    pub body: String,
    pub images: Vec<ImageRef>,
}

impl PageRef {
    pub fn new(name: impl Into<String>, categories: Vec<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            categories,
            body: body.into(),
            images: Vec::new(),
        }
    }

    pub fn kind(&self) -> PageKind {
        if is_category_title(&self.name) {
            PageKind::Category
        } else {
            PageKind::Content
        }
    }

    pub fn is_category(&self) -> bool {
        self.kind() == PageKind::Category
    }

    /// Title on the destination; category pages lose their namespace prefix.
    pub fn destination_title(&self) -> &str {
        match self.kind() {
            PageKind::Category => strip_category_prefix(&self.name),
            PageKind::Content => &self.name,
        }
    }

    /// Categories consulted for space classification. A category page also
    /// counts as a member of itself so that a trigger category's own page
    /// lands beside its members.
    pub fn classification_categories(&self) -> Vec<String> {
        let mut categories = self.categories.clone();
        if self.is_category() {
            categories.push(self.name.clone());
        }
        categories
    }

    pub fn space_key(&self, rules: &SpaceRules) -> String {
        rules.classify(self.classification_categories())
    }
}

/// Every page known for the run, in source order. Built once, never mutated.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    pages: Vec<PageRef>,
    lookup_keys: Vec<String>,
}

impl PageIndex {
    pub fn new(pages: Vec<PageRef>) -> Self {
        let lookup_keys = pages.iter().map(|page| lookup_key(&page.name)).collect();
        Self { pages, lookup_keys }
    }

    pub fn pages(&self) -> &[PageRef] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PageRef> {
        self.pages.iter().find(|page| page.name == name)
    }

    /// First page whose normalized name contains `target`, compared without
    /// case. Containment rather than equality: `SOP` also hits `SOP 2`.
    pub fn find_containing(&self, target: &str) -> Option<&PageRef> {
        let needle = lookup_key(target);
        if needle.is_empty() {
            return None;
        }
        self.lookup_keys
            .iter()
            .position(|key| key.contains(&needle))
            .map(|position| &self.pages[position])
    }
}

pub fn attachment_name(file_title: &str) -> String {
    let trimmed = file_title.trim();
    let body = ["File:", "Image:"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);
    body.replace('_', " ").trim().to_string()
}

fn lookup_key(name: &str) -> String {
    name.replace('_', " ").trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{ImageRef, PageIndex, PageKind, PageRef, attachment_name};
    use crate::config::default_config;

    #[test]
    fn category_pages_are_detected_by_prefix() {
        let page = PageRef::new("Category:2017 Team Training", vec![], "");
        assert_eq!(page.kind(), PageKind::Category);
        assert_eq!(page.destination_title(), "2017 Team Training");

        let page = PageRef::new("Team Training", vec![], "");
        assert_eq!(page.kind(), PageKind::Content);
        assert_eq!(page.destination_title(), "Team Training");
    }

    #[test]
    fn category_page_classifies_by_its_own_name() {
        let rules = default_config().expect("defaults").space_rules();
        let page = PageRef::new("Category:2017 Team Training", vec![], "");
        assert_eq!(page.space_key(&rules), "internaltraining");
    }

    #[test]
    fn find_containing_is_case_insensitive_first_match() {
        let index = PageIndex::new(vec![
            PageRef::new("SOP 2", vec![], ""),
            PageRef::new("SOP", vec![], ""),
            PageRef::new("Team_Training", vec![], ""),
        ]);
        assert_eq!(
            index.find_containing("sop").map(|page| page.name.as_str()),
            Some("SOP 2")
        );
        assert_eq!(
            index
                .find_containing("team training")
                .map(|page| page.name.as_str()),
            Some("Team_Training")
        );
        assert!(index.find_containing("Missing").is_none());
        assert!(index.find_containing("  ").is_none());
    }

    #[test]
    fn attachment_names_drop_namespace() {
        assert_eq!(attachment_name("File:Field_Map.png"), "Field Map.png");
        assert_eq!(attachment_name("Image:Logo.svg"), "Logo.svg");
        let image = ImageRef {
            name: "File:Kit list.pdf".to_string(),
            url: None,
        };
        assert_eq!(image.attachment_name(), "Kit list.pdf");
    }
}
