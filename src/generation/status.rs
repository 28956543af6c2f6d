//! Table driven mapping from provider status strings to [`JobStatus`].

use super::models::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    Contains,
}

/// One entry of a provider's status vocabulary. Needles are lowercase.
#[derive(Debug, Clone, Copy)]
pub struct StatusRule {
    pub needle: &'static str,
    pub status: JobStatus,
    pub rule: MatchRule,
}

pub const fn exact(needle: &'static str, status: JobStatus) -> StatusRule {
    StatusRule {
        needle,
        status,
        rule: MatchRule::Exact,
    }
}

pub const fn contains(needle: &'static str, status: JobStatus) -> StatusRule {
    StatusRule {
        needle,
        status,
        rule: MatchRule::Contains,
    }
}

/// Maps a raw provider status through `table`.
///
/// Matching is case-insensitive and the first matching rule wins. Anything
/// the table does not recognize is reported as `Processing`: an unknown word
/// must never finish a job.
pub fn normalize_status(raw: &str, table: &[StatusRule]) -> JobStatus {
    let raw = raw.trim().to_lowercase();
    if raw.is_empty() {
        return JobStatus::Processing;
    }
    table
        .iter()
        .find(|rule| match rule.rule {
            MatchRule::Exact => raw == rule.needle,
            MatchRule::Contains => raw.contains(rule.needle),
        })
        .map(|rule| rule.status)
        .unwrap_or(JobStatus::Processing)
}

/// GoAPI and PiAPI task vocabulary.
pub const TASK_API_STATUS_TABLE: &[StatusRule] = &[
    contains("unsuccess", JobStatus::Failed),
    contains("fail", JobStatus::Failed),
    contains("error", JobStatus::Failed),
    contains("cancel", JobStatus::Failed),
    exact("completed", JobStatus::Completed),
    exact("complete", JobStatus::Completed),
    exact("succeeded", JobStatus::Completed),
    exact("success", JobStatus::Completed),
    exact("finished", JobStatus::Completed),
    exact("pending", JobStatus::Processing),
    exact("staged", JobStatus::Processing),
    exact("queued", JobStatus::Processing),
    exact("processing", JobStatus::Processing),
    exact("running", JobStatus::Processing),
];

/// fal.ai queue vocabulary.
pub const FAL_STATUS_TABLE: &[StatusRule] = &[
    exact("completed", JobStatus::Completed),
    exact("ok", JobStatus::Completed),
    contains("fail", JobStatus::Failed),
    contains("error", JobStatus::Failed),
    contains("cancel", JobStatus::Failed),
    exact("in_queue", JobStatus::Processing),
    exact("in_progress", JobStatus::Processing),
];

/// Bakuage AI Mastering vocabulary.
pub const AI_MASTERING_STATUS_TABLE: &[StatusRule] = &[
    exact("succeeded", JobStatus::Completed),
    exact("success", JobStatus::Completed),
    exact("completed", JobStatus::Completed),
    contains("fail", JobStatus::Failed),
    contains("error", JobStatus::Failed),
    exact("waiting", JobStatus::Processing),
    exact("processing", JobStatus::Processing),
];

/// LANDR mastering vocabulary.
pub const LANDR_STATUS_TABLE: &[StatusRule] = &[
    exact("completed", JobStatus::Completed),
    exact("done", JobStatus::Completed),
    exact("mastered", JobStatus::Completed),
    contains("fail", JobStatus::Failed),
    contains("error", JobStatus::Failed),
    contains("reject", JobStatus::Failed),
    exact("queued", JobStatus::Processing),
    exact("processing", JobStatus::Processing),
];
