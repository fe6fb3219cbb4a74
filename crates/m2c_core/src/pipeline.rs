//! Run loops behind every command. Collaborators (source, submitter,
//! ledger, diagnostic sink) are passed in by the caller; nothing here reaches
//! for process-wide state.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;

use crate::assemble::{MigrationUnit, Notice, assemble, is_redirect};
use crate::category::{normalize, source_label};
use crate::collision::{CollisionResolution, page_request, resubmit_renamed};
use crate::config::MigrationConfig;
use crate::diagnostics::{DeferredDiagnostics, Diagnostic, DiagnosticSink};
use crate::ledger::{Ledger, LedgerEntry};
use crate::link::{CurrentPage, LinkResolver};
use crate::page::{PageIndex, PageRef};
use crate::source::SourceProvider;
use crate::space::SpaceRules;
use crate::submit::{Request, SubmitOutcome, Submitter};
use crate::transcode::transcode;
use crate::wikitext::{declared_categories, is_redirect_source};

/// Outcome of preparing one page for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedPage {
    Unit(MigrationUnit),
    /// The page is a redirect; it is not migrated.
    Redirect,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PageRunOptions {
    pub undo: bool,
    pub limit: Option<usize>,
    pub include_categories: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PageRunReport {
    pub considered: usize,
    pub created: usize,
    pub renamed: usize,
    pub redirects_dropped: usize,
    pub removed: usize,
    pub failed: usize,
    pub diagnostics: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRunOptions {
    pub undo: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageRunReport {
    pub pages: usize,
    pub images: usize,
    pub attached: usize,
    pub removed: usize,
    pub download_failures: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StaticRunReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub already_present: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryRunReport {
    pub source_categories: usize,
    pub labels: Vec<String>,
    pub submitted: bool,
    pub outcome: Option<SubmitOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscodePreview {
    pub title: String,
    pub space_key: String,
    pub redirect: bool,
    pub labels: String,
    pub body: String,
}

/// Immutable per-run state shared by every page.
pub struct Pipeline<'a> {
    config: &'a MigrationConfig,
    rules: SpaceRules,
    notice: Notice,
    destination_url: String,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a MigrationConfig) -> Self {
        Self {
            config,
            rules: config.space_rules(),
            notice: Notice::from_config(config),
            destination_url: config.destination_url(),
        }
    }

    pub fn rules(&self) -> &SpaceRules {
        &self.rules
    }

    /// Classify, transcode and assemble one page. A redirect is dropped here
    /// and leaves exactly one diagnostic behind.
    pub fn prepare_page(
        &self,
        page: &PageRef,
        index: &PageIndex,
        sink: &mut dyn DiagnosticSink,
    ) -> PreparedPage {
        let space_key = page.space_key(&self.rules);
        self.prepare_page_in_space(page, &space_key, index, sink)
    }

    fn prepare_page_in_space(
        &self,
        page: &PageRef,
        space_key: &str,
        index: &PageIndex,
        sink: &mut dyn DiagnosticSink,
    ) -> PreparedPage {
        if is_redirect_source(&page.body) {
            return drop_redirect(page, sink);
        }

        let resolver = LinkResolver::new(index, &self.rules, &self.destination_url);
        let current = CurrentPage {
            name: &page.name,
            space_key,
        };
        let mut pending = DeferredDiagnostics::default();
        let transcoded = transcode(&page.body, current, &resolver, &mut pending);

        if is_redirect(&transcoded) {
            return drop_redirect(page, sink);
        }
        pending.replay_into(sink);

        PreparedPage::Unit(assemble(
            page,
            space_key,
            &transcoded,
            &self.config.source_page_url(&page.name),
            &self.notice,
        ))
    }

    /// Page loop over `index` in order. The whole index serves link
    /// resolution; `limit` only bounds how many pages are processed.
    pub fn migrate_pages(
        &self,
        index: &PageIndex,
        options: PageRunOptions,
        submitter: &mut dyn Submitter,
        ledger: &Ledger,
        sink: &mut dyn DiagnosticSink,
    ) -> PageRunReport {
        let mut report = PageRunReport::default();
        let recorded_before = sink.recorded();

        let pages = index
            .pages()
            .iter()
            .filter(|page| options.include_categories || !page.is_category())
            .take(options.limit.unwrap_or(usize::MAX));

        for page in pages {
            report.considered += 1;
            if options.undo {
                self.undo_page(page, submitter, ledger, sink, &mut report);
            } else {
                self.migrate_page(page, index, submitter, ledger, sink, &mut report);
            }
        }

        report.diagnostics = sink.recorded() - recorded_before;
        info!(
            "pages: {} considered, {} created, {} renamed, {} redirects dropped, {} removed, {} failed",
            report.considered,
            report.created,
            report.renamed,
            report.redirects_dropped,
            report.removed,
            report.failed
        );
        report
    }

    fn migrate_page(
        &self,
        page: &PageRef,
        index: &PageIndex,
        submitter: &mut dyn Submitter,
        ledger: &Ledger,
        sink: &mut dyn DiagnosticSink,
        report: &mut PageRunReport,
    ) {
        let unit = match self.prepare_page(page, index, sink) {
            PreparedPage::Unit(unit) => unit,
            PreparedPage::Redirect => {
                report.redirects_dropped += 1;
                return;
            }
        };

        debug!("submitting {} to {}", unit.title, unit.space_key);
        match submitter.submit(&page_request(&unit)) {
            SubmitOutcome::Success(_) => {
                record_in_ledger(ledger, &unit, sink);
                report.created += 1;
            }
            SubmitOutcome::Duplicate(_) => match resubmit_renamed(&unit, submitter, sink) {
                CollisionResolution::Renamed(renamed) => {
                    record_in_ledger(ledger, &renamed, sink);
                    report.renamed += 1;
                }
                CollisionResolution::Failed => report.failed += 1,
            },
            SubmitOutcome::Failure(detail) => {
                sink.record(Diagnostic::SubmissionFailed {
                    page: page.name.clone(),
                    detail,
                });
                report.failed += 1;
            }
        }
    }

    fn undo_page(
        &self,
        page: &PageRef,
        submitter: &mut dyn Submitter,
        ledger: &Ledger,
        sink: &mut dyn DiagnosticSink,
        report: &mut PageRunReport,
    ) {
        let Some((space, title)) = self.destination_of(page, ledger, sink) else {
            report.failed += 1;
            return;
        };

        match submitter.submit(&Request::RemovePage { space, title }) {
            SubmitOutcome::Success(_) => {
                if let Err(err) = ledger.remove(&page.name) {
                    sink.record(Diagnostic::LedgerFailed {
                        page: page.name.clone(),
                        error: format!("{err:#}"),
                    });
                }
                report.removed += 1;
            }
            SubmitOutcome::Duplicate(detail) | SubmitOutcome::Failure(detail) => {
                sink.record(Diagnostic::SubmissionFailed {
                    page: page.name.clone(),
                    detail,
                });
                report.failed += 1;
            }
        }
    }

    /// Space and title a page has on the destination: the ledger's record when
    /// present, the computed ones otherwise. `None` when the ledger cannot be
    /// read.
    fn destination_of(
        &self,
        page: &PageRef,
        ledger: &Ledger,
        sink: &mut dyn DiagnosticSink,
    ) -> Option<(String, String)> {
        match ledger.lookup(&page.name) {
            Ok(Some(entry)) => Some((entry.space_key, entry.destination_title)),
            Ok(None) => Some((
                page.space_key(&self.rules),
                page.destination_title().to_string(),
            )),
            Err(err) => {
                sink.record(Diagnostic::LedgerFailed {
                    page: page.name.clone(),
                    error: format!("{err:#}"),
                });
                None
            }
        }
    }

    /// Attach every embedded image of each content page to its destination page.
    #[allow(clippy::too_many_arguments)]
    pub fn migrate_images(
        &self,
        index: &PageIndex,
        options: ImageRunOptions,
        source: &mut dyn SourceProvider,
        submitter: &mut dyn Submitter,
        ledger: &Ledger,
        images_dir: &Path,
        sink: &mut dyn DiagnosticSink,
    ) -> ImageRunReport {
        let mut report = ImageRunReport::default();
        let pages = index
            .pages()
            .iter()
            .filter(|page| !page.is_category())
            .take(options.limit.unwrap_or(usize::MAX));

        for page in pages {
            report.pages += 1;
            let Some((space, title)) = self.destination_of(page, ledger, sink) else {
                report.failed += page.images.len();
                continue;
            };

            for image in &page.images {
                report.images += 1;
                let name = image.attachment_name();
                let request = if options.undo {
                    Request::RemoveAttachment {
                        space: space.clone(),
                        title: title.clone(),
                        name,
                    }
                } else {
                    let file = images_dir.join(&name);
                    if let Err(err) = source.download_image(image, &file) {
                        sink.record(Diagnostic::ImageDownloadFailed {
                            page: page.name.clone(),
                            image: image.name.clone(),
                            error: format!("{err:#}"),
                        });
                        report.download_failures += 1;
                        continue;
                    }
                    Request::AddAttachment {
                        space: space.clone(),
                        title: title.clone(),
                        name,
                        file,
                    }
                };

                match submitter.submit(&request) {
                    SubmitOutcome::Success(_) if options.undo => report.removed += 1,
                    SubmitOutcome::Success(_) => report.attached += 1,
                    SubmitOutcome::Duplicate(detail) | SubmitOutcome::Failure(detail) => {
                        sink.record(Diagnostic::SubmissionFailed {
                            page: page.name.clone(),
                            detail: format!("{}: {detail}", request.describe()),
                        });
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            "images: {} on {} pages, {} attached, {} removed, {} download failures, {} failed",
            report.images,
            report.pages,
            report.attached,
            report.removed,
            report.download_failures,
            report.failed
        );
        report
    }

    /// Create (or remove) one destination space per rule, in table order.
    pub fn static_spaces(
        &self,
        undo: bool,
        submitter: &mut dyn Submitter,
        sink: &mut dyn DiagnosticSink,
    ) -> StaticRunReport {
        let requests = self
            .rules
            .rules()
            .iter()
            .map(|rule| {
                if undo {
                    Request::RemoveSpace {
                        space: rule.space_key(),
                    }
                } else {
                    Request::AddSpace {
                        space: rule.space_key(),
                        name: rule.space_name(),
                    }
                }
            })
            .collect::<Vec<_>>();
        submit_all(&requests, submitter, sink)
    }

    /// Attach each rule's trigger labels, `mw-` prefixed, to its space.
    pub fn static_labels(
        &self,
        undo: bool,
        submitter: &mut dyn Submitter,
        sink: &mut dyn DiagnosticSink,
    ) -> StaticRunReport {
        let requests = self
            .rules
            .rules()
            .iter()
            .filter(|rule| !rule.labels.is_empty())
            .map(|rule| {
                let labels = rule
                    .normalized_labels()
                    .iter()
                    .map(|label| source_label(label))
                    .collect::<Vec<_>>()
                    .join(",");
                if undo {
                    Request::RemoveLabels {
                        space: rule.space_key(),
                        labels,
                    }
                } else {
                    Request::AddLabels {
                        space: rule.space_key(),
                        labels,
                    }
                }
            })
            .collect::<Vec<_>>();
        submit_all(&requests, submitter, sink)
    }

    /// Source categories not already claimed by a space rule become `mw-`
    /// labels on the default space.
    pub fn migrate_categories(
        &self,
        undo: bool,
        source: &mut dyn SourceProvider,
        submitter: &mut dyn Submitter,
        sink: &mut dyn DiagnosticSink,
    ) -> Result<CategoryRunReport> {
        let categories = source.all_categories()?;
        let labels = remaining_category_labels(&categories, &self.rules);
        let mut report = CategoryRunReport {
            source_categories: categories.len(),
            labels: labels.clone(),
            submitted: false,
            outcome: None,
        };
        if labels.is_empty() {
            info!("no categories left to migrate");
            return Ok(report);
        }

        let space = self.rules.default_space_key();
        let labels = labels.join(",");
        let request = if undo {
            Request::RemoveLabels { space, labels }
        } else {
            Request::AddLabels { space, labels }
        };
        let outcome = submitter.submit(&request);
        if let SubmitOutcome::Failure(detail) = &outcome {
            sink.record(Diagnostic::SubmissionFailed {
                page: request.describe(),
                detail: detail.clone(),
            });
        }
        report.submitted = true;
        report.outcome = Some(outcome);
        Ok(report)
    }

    /// Transcode and assemble a local page against an empty index.
    pub fn transcode_preview(
        &self,
        title: &str,
        body: &str,
        space_override: Option<&str>,
        sink: &mut dyn DiagnosticSink,
    ) -> TranscodePreview {
        let categories = declared_categories(body).unwrap_or_else(|err| {
            warn!("could not read categories from {title}: {err:#}");
            Vec::new()
        });
        let page = PageRef::new(title, categories, body);
        let space_key = space_override
            .map(ToString::to_string)
            .unwrap_or_else(|| page.space_key(&self.rules));
        let index = PageIndex::default();

        match self.prepare_page_in_space(&page, &space_key, &index, sink) {
            PreparedPage::Unit(unit) => TranscodePreview {
                title: unit.title.clone(),
                space_key,
                redirect: false,
                labels: unit.label_string(),
                body: unit.body,
            },
            PreparedPage::Redirect => TranscodePreview {
                title: page.destination_title().to_string(),
                space_key,
                redirect: true,
                labels: String::new(),
                body: String::new(),
            },
        }
    }
}

fn drop_redirect(page: &PageRef, sink: &mut dyn DiagnosticSink) -> PreparedPage {
    sink.record(Diagnostic::RedirectDropped {
        page: page.name.clone(),
    });
    PreparedPage::Redirect
}

/// Called after the destination changed; a ledger error becomes a diagnostic.
fn record_in_ledger(ledger: &Ledger, unit: &MigrationUnit, sink: &mut dyn DiagnosticSink) {
    if let Err(err) = ledger.record(&LedgerEntry::from_unit(unit)) {
        sink.record(Diagnostic::LedgerFailed {
            page: unit.source_title.clone(),
            error: format!("{err:#}"),
        });
    }
}

/// Normalized source categories minus the space-rule labels, `mw-` prefixed
/// and sorted.
pub fn remaining_category_labels(categories: &[String], rules: &SpaceRules) -> Vec<String> {
    let claimed = rules.normalized_labels().into_iter().collect::<BTreeSet<_>>();
    categories
        .iter()
        .map(|category| normalize(category))
        .filter(|label| !label.is_empty() && !claimed.contains(label))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|label| source_label(&label))
        .collect()
}

fn submit_all(
    requests: &[Request],
    submitter: &mut dyn Submitter,
    sink: &mut dyn DiagnosticSink,
) -> StaticRunReport {
    let mut report = StaticRunReport::default();
    for request in requests {
        report.submitted += 1;
        match submitter.submit(request) {
            SubmitOutcome::Success(_) => report.succeeded += 1,
            SubmitOutcome::Duplicate(detail) => {
                info!("{} already present: {detail}", request.describe());
                report.already_present += 1;
            }
            SubmitOutcome::Failure(detail) => {
                sink.record(Diagnostic::SubmissionFailed {
                    page: request.describe(),
                    detail,
                });
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;

    use anyhow::{Result, bail};
    use tempfile::tempdir;

    use super::{ImageRunOptions, PageRunOptions, Pipeline, PreparedPage, remaining_category_labels};
    use crate::config::default_config;
    use crate::diagnostics::{DiagnosticSink, MemoryDiagnostics};
    use crate::ledger::Ledger;
    use crate::page::{ImageRef, PageIndex, PageKind, PageRef};
    use crate::source::SourceProvider;
    use crate::submit::{Request, SubmitOutcome, Submitter};

    #[derive(Default)]
    struct RecordingSubmitter {
        outcomes: BTreeMap<usize, SubmitOutcome>,
        requests: Vec<Request>,
    }

    impl Submitter for RecordingSubmitter {
        fn submit(&mut self, request: &Request) -> SubmitOutcome {
            let position = self.requests.len();
            self.requests.push(request.clone());
            self.outcomes
                .remove(&position)
                .unwrap_or_else(|| SubmitOutcome::Success("ok".to_string()))
        }
    }

    struct MockSource {
        categories: Vec<String>,
        broken_images: Vec<String>,
    }

    impl SourceProvider for MockSource {
        fn list_titles(&mut self, _kind: PageKind) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn fetch_pages(&mut self, _titles: &[String]) -> Result<Vec<PageRef>> {
            Ok(Vec::new())
        }

        fn all_categories(&mut self) -> Result<Vec<String>> {
            Ok(self.categories.clone())
        }

        fn download_image(&mut self, image: &ImageRef, destination: &Path) -> Result<u64> {
            if self.broken_images.contains(&image.name) {
                bail!("HTTP 404");
            }
            fs::create_dir_all(destination.parent().expect("parent")).expect("mkdir");
            fs::write(destination, b"png").expect("write image");
            Ok(3)
        }
    }

    fn index() -> PageIndex {
        let mut with_images = PageRef::new(
            "Field Kit",
            vec!["Category:Partner Training".to_string()],
            "See [[File:Kit.png]] and [[File:Gone.png]]",
        );
        with_images.images = vec![
            ImageRef {
                name: "File:Kit.png".to_string(),
                url: Some("https://wiki.example.org/images/Kit.png".to_string()),
            },
            ImageRef {
                name: "File:Gone.png".to_string(),
                url: None,
            },
        ];
        PageIndex::new(vec![
            PageRef::new("Home", vec![], "Welcome. See [[Field_Kit]]."),
            PageRef::new("Old Home", vec![], "#REDIRECT [[Home]]"),
            with_images,
            PageRef::new("Category:Partner Training", vec![], "Training with partners."),
        ])
    }

    #[test]
    fn prepare_page_resolves_links_against_index() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let index = index();
        let mut sink = MemoryDiagnostics::default();

        let PreparedPage::Unit(unit) = pipeline.prepare_page(&index.pages()[0], &index, &mut sink)
        else {
            panic!("expected unit");
        };
        assert_eq!(unit.space_key, "generalguidance");
        assert!(unit.body.contains("/display/internaltraining/Field+Kit"));
        assert!(unit.body.contains("https://mediawiki.mapaction.org/Home"));
        assert_eq!(sink.recorded(), 0);
    }

    #[test]
    fn migrate_pages_skips_redirects_and_honours_limit() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let index = index();
        let ledger = Ledger::in_memory().expect("ledger");
        let mut submitter = RecordingSubmitter::default();
        let mut sink = MemoryDiagnostics::default();

        let report = pipeline.migrate_pages(
            &index,
            PageRunOptions {
                undo: false,
                limit: Some(2),
                include_categories: true,
            },
            &mut submitter,
            &ledger,
            &mut sink,
        );

        assert_eq!(report.considered, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.redirects_dropped, 1);
        assert_eq!(submitter.requests.len(), 1);
        assert_eq!(sink.count_kind("redirect_dropped"), 1);
        assert_eq!(ledger.count().expect("count"), 1);
    }

    #[test]
    fn undo_uses_recorded_destination_title() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let index = index();
        let ledger = Ledger::in_memory().expect("ledger");
        let mut sink = MemoryDiagnostics::default();

        let mut submitter = RecordingSubmitter::default();
        submitter
            .outcomes
            .insert(0, SubmitOutcome::Duplicate("Page already exists".to_string()));
        let options = PageRunOptions {
            undo: false,
            limit: Some(1),
            include_categories: false,
        };
        let report = pipeline.migrate_pages(&index, options, &mut submitter, &ledger, &mut sink);
        assert_eq!(report.renamed, 1);
        let renamed = ledger
            .destination_title("Home")
            .expect("lookup")
            .expect("recorded");
        assert!(renamed.starts_with("Home-"));

        let mut undo_submitter = RecordingSubmitter::default();
        let report = pipeline.migrate_pages(
            &index,
            PageRunOptions {
                undo: true,
                ..options
            },
            &mut undo_submitter,
            &ledger,
            &mut sink,
        );
        assert_eq!(report.removed, 1);
        assert_eq!(
            undo_submitter.requests,
            vec![Request::RemovePage {
                space: "generalguidance".to_string(),
                title: renamed,
            }]
        );
        assert!(ledger.lookup("Home").expect("lookup").is_none());
    }

    #[test]
    fn category_pages_can_be_excluded() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let index = index();
        let ledger = Ledger::in_memory().expect("ledger");
        let mut submitter = RecordingSubmitter::default();
        let mut sink = MemoryDiagnostics::default();

        let report = pipeline.migrate_pages(
            &index,
            PageRunOptions::default(),
            &mut submitter,
            &ledger,
            &mut sink,
        );
        assert_eq!(report.considered, 3);
        assert!(submitter.requests.iter().all(|request| matches!(
            request,
            Request::AddPage { labels, .. } if !labels.contains("was-a-category-page")
        )));
    }

    #[test]
    fn image_download_failures_are_recorded_and_skipped() {
        let temp = tempdir().expect("tempdir");
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let index = index();
        let ledger = Ledger::in_memory().expect("ledger");
        let mut source = MockSource {
            categories: vec![],
            broken_images: vec!["File:Gone.png".to_string()],
        };
        let mut submitter = RecordingSubmitter::default();
        let mut sink = MemoryDiagnostics::default();

        let report = pipeline.migrate_images(
            &index,
            ImageRunOptions::default(),
            &mut source,
            &mut submitter,
            &ledger,
            temp.path(),
            &mut sink,
        );

        assert_eq!(report.images, 2);
        assert_eq!(report.attached, 1);
        assert_eq!(report.download_failures, 1);
        assert_eq!(sink.count_kind("image_download_failed"), 1);
        assert_eq!(
            submitter.requests,
            vec![Request::AddAttachment {
                space: "internaltraining".to_string(),
                title: "Field Kit".to_string(),
                name: "Kit.png".to_string(),
                file: temp.path().join("Kit.png"),
            }]
        );
        assert!(temp.path().join("Kit.png").exists());
    }

    #[test]
    fn static_spaces_and_labels_follow_rule_table() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let mut submitter = RecordingSubmitter::default();
        let mut sink = MemoryDiagnostics::default();

        let report = pipeline.static_spaces(false, &mut submitter, &mut sink);
        assert_eq!(report.submitted, 3);
        assert_eq!(
            submitter.requests[0],
            Request::AddSpace {
                space: "generalguidance".to_string(),
                name: "General Guidance".to_string(),
            }
        );

        let mut submitter = RecordingSubmitter::default();
        let report = pipeline.static_labels(false, &mut submitter, &mut sink);
        assert_eq!(report.submitted, 2);
        let Request::AddLabels { space, labels } = &submitter.requests[0] else {
            panic!("expected labels request");
        };
        assert_eq!(space, "standardprocedures");
        assert!(labels.starts_with("mw-Current-SOPs--SAPs-and-Security-Manual,mw-Security-Manual,"));
    }

    #[test]
    fn category_migration_subtracts_static_labels() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let mut source = MockSource {
            categories: vec![
                "Security Manual".to_string(),
                "Maps".to_string(),
                "Kit (Field)".to_string(),
                "Maps".to_string(),
            ],
            broken_images: vec![],
        };
        let mut submitter = RecordingSubmitter::default();
        let mut sink = MemoryDiagnostics::default();

        let report = pipeline
            .migrate_categories(false, &mut source, &mut submitter, &mut sink)
            .expect("categories");

        assert_eq!(report.labels, vec!["mw-Kit--Field-", "mw-Maps"]);
        assert_eq!(
            submitter.requests,
            vec![Request::AddLabels {
                space: "generalguidance".to_string(),
                labels: "mw-Kit--Field-,mw-Maps".to_string(),
            }]
        );
        assert!(remaining_category_labels(&[], pipeline.rules()).is_empty());
    }

    #[test]
    fn transcode_preview_reads_categories_from_body() {
        let config = default_config().expect("defaults");
        let pipeline = Pipeline::new(&config);
        let mut sink = MemoryDiagnostics::default();

        let preview = pipeline.transcode_preview(
            "Security Briefing",
            "Read this. {{Warning}}\n[[Category:Security Manual]]",
            None,
            &mut sink,
        );
        assert_eq!(preview.space_key, "standardprocedures");
        assert_eq!(preview.labels, "Security-Manual,unhandled-transclusion");
        assert!(!preview.redirect);

        let preview = pipeline.transcode_preview("Old", "#REDIRECT [[New]]", Some("x"), &mut sink);
        assert!(preview.redirect);
        assert_eq!(preview.space_key, "x");
    }
}
