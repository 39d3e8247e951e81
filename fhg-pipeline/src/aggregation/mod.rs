//! Result aggregator
//!
//! Merges extraction issues and every stage's issues into one ranked,
//! deduplicated report.
//!
//! Dedup key is (resource, case/whitespace-normalized message). Merged issues
//! keep the first message text seen, the union of sources and the maximum
//! severity.

use chrono::Utc;
use fhg_common::events::{Stage, StageOutcome, TaskStatus, Verdict};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::models::{
    Issue, IssueSource, ResourceIndex, ResourceRef, Severity, Task, ValidationReport,
};

/// Merge duplicate issues, keeping first-seen order
pub fn deduplicate(issues: impl IntoIterator<Item = Issue>) -> Vec<Issue> {
    let mut merged: Vec<Issue> = Vec::new();
    let mut positions: HashMap<(ResourceRef, String), usize> = HashMap::new();

    for issue in issues {
        let key = (issue.resource.clone(), issue.normalized_message());
        match positions.get(&key) {
            Some(&position) => {
                let existing = &mut merged[position];
                existing.severity = existing.severity.max(issue.severity);
                existing.sources.extend(issue.sources);
                if existing.code.is_none() {
                    existing.code = issue.code;
                }
                if existing.location.is_none() {
                    existing.location = issue.location;
                }
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(issue);
            }
        }
    }
    merged
}

/// Warnings for issues attached to resources that are not in the bundle
pub fn consistency_issues(issues: &[Issue], index: &ResourceIndex) -> Vec<Issue> {
    let missing: BTreeSet<&ResourceRef> = issues
        .iter()
        .map(|i| &i.resource)
        .filter(|r| !index.contains(r))
        .collect();

    missing
        .into_iter()
        .map(|resource| {
            warn!(resource = %resource, "Issue references a resource absent from the bundle");
            Issue::new(
                Severity::Warning,
                IssueSource::Aggregation,
                ResourceRef::Bundle,
                format!("Referenced resource {} is not present in the bundle", resource),
            )
            .with_code("reference-not-in-bundle")
        })
        .collect()
}

/// Most severe first, then by resource and message
pub fn rank(issues: &mut [Issue]) {
    issues.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.resource.cmp(&b.resource))
            .then_with(|| a.normalized_message().cmp(&b.normalized_message()))
    });
}

pub fn verdict(issues: &[Issue], syntactic_failed: bool) -> Verdict {
    if syntactic_failed || issues.iter().any(|i| i.severity == Severity::Fatal) {
        Verdict::Fail
    } else if issues
        .iter()
        .any(|i| matches!(i.severity, Severity::Error | Severity::Warning))
    {
        Verdict::PassWithWarnings
    } else {
        Verdict::Pass
    }
}

/// Build the report for `task` as it stands
///
/// `index` is `None` when the bundle could not be read; the resource
/// consistency check is then skipped. Called with the terminal status for
/// the final report, and with the current status for the report-so-far
/// handed to the narrative stage.
pub fn aggregate(
    task: &Task,
    index: Option<&ResourceIndex>,
    status: TaskStatus,
    reason: Option<String>,
) -> ValidationReport {
    let collected = task
        .extraction_issues
        .iter()
        .chain(task.results.iter().flat_map(|r| r.issues.iter()))
        .cloned();
    let mut issues = deduplicate(collected);

    if let Some(index) = index {
        let inconsistencies = consistency_issues(&issues, index);
        issues = deduplicate(issues.into_iter().chain(inconsistencies));
    }
    rank(&mut issues);

    let mut severity_counts: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut stage_counts: BTreeMap<IssueSource, usize> = BTreeMap::new();
    for issue in &issues {
        *severity_counts.entry(issue.severity).or_default() += 1;
        for source in &issue.sources {
            *stage_counts.entry(*source).or_default() += 1;
        }
    }

    let syntactic_failed = task
        .result(Stage::Syntactic)
        .is_some_and(|r| r.outcome == StageOutcome::Failure);
    let verdict = verdict(&issues, syntactic_failed);

    let stages = Stage::ALL
        .iter()
        .filter_map(|stage| task.result(*stage))
        .map(|r| r.summary())
        .collect();

    debug!(
        task_id = %task.task_id,
        issues = issues.len(),
        verdict = ?verdict,
        "Report aggregated"
    );

    ValidationReport {
        task_id: task.task_id,
        status,
        reason,
        verdict,
        issues,
        severity_counts,
        stage_counts,
        stages,
        clinical_scores: task.clinical_scores.clone(),
        narrative: task.narrative.clone(),
        generated_at: Utc::now(),
    }
}
