use crate::category::{CATEGORY_PREFIX, strip_category_prefix};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::page::PageIndex;
use crate::space::SpaceRules;

/// Internal link target split on its first `#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub base: String,
    pub anchor: Option<String>,
}

impl LinkTarget {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().split_once('#') {
            Some((base, anchor)) => Self {
                base: base.trim().to_string(),
                anchor: Some(anchor.trim().to_string()),
            },
            None => Self {
                base: raw.trim().to_string(),
                anchor: None,
            },
        }
    }

    /// Base target in source display form: underscores become spaces and a
    /// category reference (`:Category:X`, `category:X`) is written `Category:X`.
    pub fn cleaned_base(&self) -> String {
        let spaced = self.base.replace('_', " ");
        let trimmed = spaced.trim().trim_start_matches(':').trim_start();
        match split_category_marker(trimmed) {
            Some(rest) => format!("{CATEGORY_PREFIX}{}", rest.trim_start()),
            None => trimmed.to_string(),
        }
    }
}

/// The page whose body is being rewritten.
#[derive(Debug, Clone, Copy)]
pub struct CurrentPage<'a> {
    pub name: &'a str,
    pub space_key: &'a str,
}

/// Rewrites internal link targets into destination URLs. Never fails: lookup
/// misses and malformed anchors degrade and leave a diagnostic behind.
pub struct LinkResolver<'a> {
    index: &'a PageIndex,
    rules: &'a SpaceRules,
    destination_url: &'a str,
}

impl<'a> LinkResolver<'a> {
    pub fn new(index: &'a PageIndex, rules: &'a SpaceRules, destination_url: &'a str) -> Self {
        Self {
            index,
            rules,
            destination_url: destination_url.trim_end_matches('/'),
        }
    }

    pub fn resolve(
        &self,
        raw_target: &str,
        current: CurrentPage<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> String {
        let target = LinkTarget::parse(raw_target);
        let cleaned = target.cleaned_base();

        if cleaned.is_empty() {
            return self.resolve_same_page(&target, raw_target, current, sink);
        }

        let space_key = match self.index.find_containing(&cleaned) {
            Some(page) => page.space_key(self.rules),
            None => {
                sink.record(Diagnostic::UnresolvedLink {
                    page: current.name.to_string(),
                    target: raw_target.to_string(),
                });
                self.rules.default_space_key()
            }
        };

        let title = strip_category_prefix(&cleaned);
        let mut url = self.page_url(&space_key, title);
        if let Some(anchor) = self.anchor_fragment(&target, title, raw_target, current, sink) {
            url.push('#');
            url.push_str(&anchor);
        }
        url
    }

    pub fn page_url(&self, space_key: &str, title: &str) -> String {
        format!(
            "{}/display/{}/{}",
            self.destination_url,
            space_key,
            encode_title(title)
        )
    }

    fn resolve_same_page(
        &self,
        target: &LinkTarget,
        raw_target: &str,
        current: CurrentPage<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> String {
        let title = strip_category_prefix(current.name);
        match self.anchor_fragment(target, title, raw_target, current, sink) {
            Some(anchor) => format!("#{anchor}"),
            None => self.page_url(current.space_key, title),
        }
    }

    fn anchor_fragment(
        &self,
        target: &LinkTarget,
        title: &str,
        raw_target: &str,
        current: CurrentPage<'_>,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<String> {
        let anchor = target.anchor.as_deref()?;
        if anchor.is_empty() {
            sink.record(Diagnostic::MalformedAnchor {
                page: current.name.to_string(),
                target: raw_target.to_string(),
            });
            return None;
        }
        Some(heading_anchor(title, anchor))
    }
}

/// Destination heading anchor: `Team Training` + `Section_One` -> `TeamTraining-SectionOne`.
/// Titles reach here with underscores already turned into spaces, so both are removed.
pub fn heading_anchor(title: &str, anchor: &str) -> String {
    format!("{}-{}", squash(title), squash(anchor))
}

/// Spaces in destination paths are encoded as `+`.
pub fn encode_title(title: &str) -> String {
    title.trim().replace(' ', "+")
}

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|ch| *ch != '_' && !ch.is_whitespace())
        .collect()
}

fn split_category_marker(value: &str) -> Option<&str> {
    let (prefix, rest) = value.split_once(':')?;
    if prefix.trim().eq_ignore_ascii_case("Category") {
        Some(rest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{CurrentPage, LinkResolver, LinkTarget, heading_anchor};
    use crate::config::default_config;
    use crate::diagnostics::{DiagnosticSink, MemoryDiagnostics};
    use crate::page::{PageIndex, PageRef};

    const DESTINATION: &str = "https://confluence.example.org/";

    fn index() -> PageIndex {
        PageIndex::new(vec![
            PageRef::new(
                "Team Training",
                vec!["Category:2017 Team Training".to_string()],
                "",
            ),
            PageRef::new("Category:Security Manual", vec![], ""),
            PageRef::new("Logistics", vec![], ""),
        ])
    }

    fn current() -> CurrentPage<'static> {
        CurrentPage {
            name: "Home",
            space_key: "generalguidance",
        }
    }

    #[test]
    fn parse_splits_on_first_hash() {
        assert_eq!(
            LinkTarget::parse("A#b#c"),
            LinkTarget {
                base: "A".to_string(),
                anchor: Some("b#c".to_string()),
            }
        );
        assert_eq!(LinkTarget::parse("Plain").anchor, None);
    }

    #[test]
    fn cleaned_base_normalizes_category_marker() {
        assert_eq!(
            LinkTarget::parse(":category:Security_Manual").cleaned_base(),
            "Category:Security Manual"
        );
        assert_eq!(LinkTarget::parse("Team_Training").cleaned_base(), "Team Training");
    }

    #[test]
    fn resolves_anchor_with_destination_heading_convention() {
        let rules = default_config().expect("defaults").space_rules();
        let index = index();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let url = resolver.resolve("Team_Training#Section_One", current(), &mut sink);

        assert_eq!(
            url,
            "https://confluence.example.org/display/internaltraining/Team+Training#TeamTraining-SectionOne"
        );
        assert!(url.contains("/Team+Training"));
        assert!(url.ends_with("#TeamTraining-SectionOne"));
        assert_eq!(sink.recorded(), 0);
    }

    #[test]
    fn resolves_category_reference_to_bare_title() {
        let rules = default_config().expect("defaults").space_rules();
        let index = index();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let url = resolver.resolve(":Category:Security_Manual", current(), &mut sink);
        assert_eq!(
            url,
            "https://confluence.example.org/display/standardprocedures/Security+Manual"
        );
        assert_eq!(sink.recorded(), 0);
    }

    #[test]
    fn missing_target_falls_back_to_default_space_with_one_diagnostic() {
        let rules = default_config().expect("defaults").space_rules();
        let index = index();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let url = resolver.resolve("Nowhere To Be Found", current(), &mut sink);
        assert_eq!(
            url,
            "https://confluence.example.org/display/generalguidance/Nowhere+To+Be+Found"
        );
        assert_eq!(sink.recorded(), 1);
        assert_eq!(sink.count_kind("unresolved_link"), 1);
    }

    #[test]
    fn substring_match_takes_first_index_entry() {
        let rules = default_config().expect("defaults").space_rules();
        let index = index();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let url = resolver.resolve("training", current(), &mut sink);
        assert!(url.contains("/display/internaltraining/training"));
        assert_eq!(sink.recorded(), 0);
    }

    #[test]
    fn empty_anchor_is_dropped_with_diagnostic() {
        let rules = default_config().expect("defaults").space_rules();
        let index = index();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let url = resolver.resolve("Logistics#", current(), &mut sink);
        assert_eq!(
            url,
            "https://confluence.example.org/display/generalguidance/Logistics"
        );
        assert_eq!(sink.count_kind("malformed_anchor"), 1);
    }

    #[test]
    fn same_page_anchor_uses_current_title() {
        let rules = default_config().expect("defaults").space_rules();
        let index = index();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let url = resolver.resolve("#Kit_List", current(), &mut sink);
        assert_eq!(url, "#Home-KitList");
        assert_eq!(heading_anchor("Team Training", "Section_One"), "TeamTraining-SectionOne");
    }

    #[test]
    fn anchor_spaces_are_removed_like_underscores() {
        assert_eq!(heading_anchor("Foo", "Section One"), "Foo-SectionOne");
        assert_eq!(heading_anchor("Foo", "Section_One"), "Foo-SectionOne");
        assert_eq!(heading_anchor("Team Training", "Section_One"), "TeamTraining-SectionOne");
        assert_eq!(heading_anchor(" Kit\tList ", "A b_c"), "KitList-Abc");
    }
}
