use log::debug;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::document::{Document, Inline, LinkKind};
use crate::link::{CurrentPage, LinkResolver};
use crate::storage::{render, rewrite_images};
use crate::wikitext::parse;

/// Source markup to destination storage markup for one page.
///
/// A body that does not parse is passed through untouched with a
/// `parse_failure` diagnostic; everything after the parse degrades per
/// element and never fails the page.
pub fn transcode(
    raw_body: &str,
    current: CurrentPage<'_>,
    resolver: &LinkResolver<'_>,
    sink: &mut dyn DiagnosticSink,
) -> String {
    let mut document = match parse(raw_body) {
        Ok(document) => document,
        Err(err) => {
            sink.record(Diagnostic::ParseFailure {
                page: current.name.to_string(),
                error: format!("{err:#}"),
            });
            return raw_body.to_string();
        }
    };

    let pruned = prune_category_links(&mut document);
    let rewritten = rewrite_wiki_links(&mut document, current, resolver, sink);
    debug!(
        "{}: pruned {pruned} category links, rewrote {rewritten} wiki links",
        current.name
    );

    rewrite_images(&render(&document))
}

/// Removes category membership nodes, then any paragraph they leave empty.
pub fn prune_category_links(document: &mut Document) -> usize {
    let mut removed = 0usize;
    document.visit_inlines_mut(&mut |inlines: &mut Vec<Inline>| {
        let before = inlines.len();
        inlines.retain(|inline| !matches!(inline, Inline::CategoryLink(_)));
        removed += before - inlines.len();
    });
    document.remove_empty_paragraphs();
    removed
}

pub fn rewrite_wiki_links(
    document: &mut Document,
    current: CurrentPage<'_>,
    resolver: &LinkResolver<'_>,
    sink: &mut dyn DiagnosticSink,
) -> usize {
    let mut rewritten = 0usize;
    document.visit_inlines_mut(&mut |inlines: &mut Vec<Inline>| {
        for inline in inlines.iter_mut() {
            if let Inline::Link(link) = inline
                && link.kind == LinkKind::Wiki
            {
                link.target = resolver.resolve(&link.target, current, sink);
                rewritten += 1;
            }
        }
    });
    rewritten
}

#[cfg(test)]
mod tests {
    use super::transcode;
    use crate::config::default_config;
    use crate::diagnostics::{DiagnosticSink, MemoryDiagnostics};
    use crate::link::{CurrentPage, LinkResolver};
    use crate::page::{PageIndex, PageRef};

    const DESTINATION: &str = "https://confluence.example.org";

    fn current() -> CurrentPage<'static> {
        CurrentPage {
            name: "Deployment Checklist",
            space_key: "standardprocedures",
        }
    }

    #[test]
    fn prunes_categories_and_rewrites_links_and_images() {
        let rules = default_config().expect("defaults").space_rules();
        let index = PageIndex::new(vec![PageRef::new(
            "Team Training",
            vec!["Category:2017 Team Training".to_string()],
            "",
        )]);
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let body = "Read [[Team_Training#Section_One|the guide]].\n\n[[Category:Deployment]]\n[[File:Kit.png|100px]]\n[https://example.org external]";
        let output = transcode(body, current(), &resolver, &mut sink);

        assert!(output.contains(
            r#"<a href="https://confluence.example.org/display/internaltraining/Team+Training#TeamTraining-SectionOne">the guide</a>"#
        ));
        assert!(!output.contains("Deployment"));
        assert!(output.contains(
            r#"<ac:image ac:thumbnail="true" ac:width=100><ri:attachment ri:filename="Kit.png" /></ac:image>"#
        ));
        assert!(output.contains(r#"<a href="https://example.org">external</a>"#));
        assert_eq!(sink.recorded(), 0);
    }

    #[test]
    fn parse_failure_passes_body_through_with_one_diagnostic() {
        let rules = default_config().expect("defaults").space_rules();
        let index = PageIndex::default();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let body = "{| class=\"wikitable\"\n| [[Broken link";
        let output = transcode(body, current(), &resolver, &mut sink);

        assert_eq!(output, body);
        assert_eq!(sink.count_kind("parse_failure"), 1);
        assert_eq!(sink.recorded(), 1);
    }

    #[test]
    fn unresolved_links_degrade_to_default_space() {
        let rules = default_config().expect("defaults").space_rules();
        let index = PageIndex::default();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let output = transcode("See [[Nowhere]] and [[Nowhere#]]", current(), &resolver, &mut sink);

        assert!(output.contains("/display/generalguidance/Nowhere\">Nowhere</a>"));
        assert_eq!(sink.count_kind("unresolved_link"), 2);
        assert_eq!(sink.count_kind("malformed_anchor"), 1);
    }

    #[test]
    fn redirect_marker_survives_transcoding() {
        let rules = default_config().expect("defaults").space_rules();
        let index = PageIndex::default();
        let resolver = LinkResolver::new(&index, &rules, DESTINATION);
        let mut sink = MemoryDiagnostics::default();

        let output = transcode("#redirect [[Elsewhere]]", current(), &resolver, &mut sink);
        assert!(output.starts_with("<p>#REDIRECT <a href="));
    }
}
