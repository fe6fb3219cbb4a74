use log::info;
use uuid::Uuid;

use crate::assemble::MigrationUnit;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::submit::{Request, SubmitOutcome, Submitter};

pub const DUPLICATE_LABEL: &str = "duplicate-page-conflict";
pub const SUFFIX_LEN: usize = 8;

/// Eight lowercase hex characters.
pub fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string()
}

pub fn renamed_title(original: &str, suffix: &str) -> String {
    format!("{original}-{suffix}")
}

pub fn page_request(unit: &MigrationUnit) -> Request {
    Request::AddPage {
        space: unit.space_key.clone(),
        title: unit.title.clone(),
        content: unit.body.clone(),
        labels: unit.label_string(),
    }
}

/// Result of handling one duplicate signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionResolution {
    /// The renamed unit was created.
    Renamed(MigrationUnit),
    /// The single retry did not succeed; nothing further is attempted.
    Failed,
}

/// Retry a unit the destination rejected as a duplicate under a random new
/// title. Submits exactly once.
pub fn resubmit_renamed(
    unit: &MigrationUnit,
    submitter: &mut dyn Submitter,
    sink: &mut dyn DiagnosticSink,
) -> CollisionResolution {
    resubmit_with_suffix(unit, &random_suffix(), submitter, sink)
}

pub fn resubmit_with_suffix(
    unit: &MigrationUnit,
    suffix: &str,
    submitter: &mut dyn Submitter,
    sink: &mut dyn DiagnosticSink,
) -> CollisionResolution {
    let mut renamed = unit.clone();
    renamed.title = renamed_title(&unit.title, suffix);
    renamed.add_label(DUPLICATE_LABEL);

    match submitter.submit(&page_request(&renamed)) {
        SubmitOutcome::Success(_) => {
            info!("created {} as {}", unit.title, renamed.title);
            sink.record(Diagnostic::CollisionRenamed {
                page: unit.source_title.clone(),
                original: unit.title.clone(),
                renamed: renamed.title.clone(),
            });
            CollisionResolution::Renamed(renamed)
        }
        SubmitOutcome::Duplicate(detail) => {
            sink.record(Diagnostic::SubmissionFailed {
                page: unit.source_title.clone(),
                detail: format!(
                    "renamed title `{}` also already exists; not retried: {detail}",
                    renamed.title
                ),
            });
            CollisionResolution::Failed
        }
        SubmitOutcome::Failure(detail) => {
            sink.record(Diagnostic::SubmissionFailed {
                page: unit.source_title.clone(),
                detail: format!("retry as `{}` failed: {detail}", renamed.title),
            });
            CollisionResolution::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CollisionResolution, DUPLICATE_LABEL, random_suffix, resubmit_renamed,
        resubmit_with_suffix,
    };
    use crate::assemble::MigrationUnit;
    use crate::diagnostics::{DiagnosticSink, MemoryDiagnostics};
    use crate::submit::{Request, SubmitOutcome, Submitter};

    struct ScriptedSubmitter {
        outcomes: Vec<SubmitOutcome>,
        requests: Vec<Request>,
    }

    impl Submitter for ScriptedSubmitter {
        fn submit(&mut self, request: &Request) -> SubmitOutcome {
            self.requests.push(request.clone());
            if self.outcomes.is_empty() {
                SubmitOutcome::Success(String::new())
            } else {
                self.outcomes.remove(0)
            }
        }
    }

    fn unit() -> MigrationUnit {
        MigrationUnit {
            source_title: "Kit List".to_string(),
            space_key: "generalguidance".to_string(),
            title: "Kit List".to_string(),
            body: "<p>x</p>".to_string(),
            labels: vec!["Logistics".to_string()],
            is_category: false,
        }
    }

    #[test]
    fn suffix_is_eight_lowercase_hex() {
        for _ in 0..20 {
            let suffix = random_suffix();
            assert_eq!(suffix.len(), 8);
            assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
        }
    }

    #[test]
    fn renamed_retry_carries_duplicate_label() {
        let mut submitter = ScriptedSubmitter {
            outcomes: vec![],
            requests: vec![],
        };
        let mut sink = MemoryDiagnostics::default();

        let resolution = resubmit_with_suffix(&unit(), "0a1b2c3d", &mut submitter, &mut sink);

        let CollisionResolution::Renamed(renamed) = resolution else {
            panic!("expected rename");
        };
        assert_eq!(renamed.title, "Kit List-0a1b2c3d");
        assert_eq!(renamed.labels, vec!["Logistics".to_string(), DUPLICATE_LABEL.to_string()]);
        assert_eq!(submitter.requests.len(), 1);
        assert!(matches!(
            &submitter.requests[0],
            Request::AddPage { title, labels, .. }
                if title == "Kit List-0a1b2c3d" && labels == "Logistics,duplicate-page-conflict"
        ));
        assert_eq!(sink.count_kind("collision_renamed"), 1);
    }

    #[test]
    fn second_duplicate_is_not_retried() {
        let mut submitter = ScriptedSubmitter {
            outcomes: vec![SubmitOutcome::Duplicate("already exists".to_string())],
            requests: vec![],
        };
        let mut sink = MemoryDiagnostics::default();

        let resolution = resubmit_renamed(&unit(), &mut submitter, &mut sink);

        assert_eq!(resolution, CollisionResolution::Failed);
        assert_eq!(submitter.requests.len(), 1);
        assert_eq!(sink.recorded(), 1);
        assert_eq!(sink.count_kind("submission_failed"), 1);
    }
}
