//! Translation of GitLab job lifecycle statuses into GitHub check runs.
//!
//! [`translate`] is the pure status table; [`CheckRunDescriptor::for_job`]
//! combines it with the identifying fields of a [`JobEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gitlab::JobEvent;

/// Failure reason GitLab reports when a job exceeds its time limit.
pub const TIMEOUT_FAILURE_REASON: &str = "job_execution_timeout";

/// Job statuses the bridge understands.
///
/// GitLab has more (`manual`, `skipped`, `waiting_for_resource`, ...);
/// those are not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Created,
    Pending,
    Running,
    Success,
    Canceled,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Created,
        Self::Pending,
        Self::Running,
        Self::Success,
        Self::Canceled,
        Self::Failed,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "canceled" => Some(Self::Canceled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    TimedOut,
}

/// Target check-run fields for one source status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckRunState {
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckRunConclusion>,
    pub title: &'static str,
    pub summary: &'static str,
    /// Whether the job's start time is relayed.
    pub started: bool,
    /// Whether the job's finish time is relayed.
    pub completed: bool,
}

/// Map a job status to check-run fields.
///
/// A timeout takes precedence over the allow-failure flag.
pub fn translate(status: JobStatus, failure_reason: &str, allow_failure: bool) -> CheckRunState {
    match status {
        JobStatus::Created => CheckRunState {
            status: CheckRunStatus::Queued,
            conclusion: None,
            title: "Job created",
            summary: "This job has not been triggered yet. It depends on upstream jobs that must succeed first.",
            started: false,
            completed: false,
        },
        JobStatus::Pending => CheckRunState {
            status: CheckRunStatus::Queued,
            conclusion: None,
            title: "Job pending",
            summary: "This job is waiting for a runner to pick it up.",
            started: false,
            completed: false,
        },
        JobStatus::Running => CheckRunState {
            status: CheckRunStatus::InProgress,
            conclusion: None,
            title: "Job running",
            summary: "This job is running.",
            started: true,
            completed: false,
        },
        JobStatus::Success => finished(
            CheckRunConclusion::Success,
            "Job successful",
            "This job completed successfully.",
        ),
        JobStatus::Canceled => finished(
            CheckRunConclusion::Cancelled,
            "Job canceled",
            "This job was canceled.",
        ),
        JobStatus::Failed if failure_reason == TIMEOUT_FAILURE_REASON => finished(
            CheckRunConclusion::TimedOut,
            "Job timed out",
            "The script exceeded the maximum execution time set for the job.",
        ),
        JobStatus::Failed if allow_failure => finished(
            CheckRunConclusion::Neutral,
            "Job failed",
            "This job failed, but it is allowed to fail.",
        ),
        JobStatus::Failed => finished(
            CheckRunConclusion::Failure,
            "Job failed",
            "This job failed.",
        ),
    }
}

fn finished(
    conclusion: CheckRunConclusion,
    title: &'static str,
    summary: &'static str,
) -> CheckRunState {
    CheckRunState {
        status: CheckRunStatus::Completed,
        conclusion: Some(conclusion),
        title,
        summary,
        started: true,
        completed: true,
    }
}

/// Everything needed to create or update one check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRunDescriptor {
    pub name: String,
    pub head_sha: String,
    pub details_url: String,
    pub external_id: String,
    pub status: CheckRunStatus,
    pub conclusion: Option<CheckRunConclusion>,
    pub title: String,
    pub summary: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CheckRunDescriptor {
    /// Build the descriptor for a job event, or `None` for an unrecognised status.
    pub fn for_job(job: &JobEvent) -> Option<Self> {
        let status = JobStatus::parse(&job.build_status)?;
        let state = translate(status, &job.build_failure_reason, job.build_allow_failure);

        Some(Self {
            name: job.build_name.clone(),
            head_sha: job.sha.clone(),
            details_url: job.details_url(),
            external_id: job.build_id.to_string(),
            status: state.status,
            conclusion: state.conclusion,
            title: state.title.to_string(),
            summary: state.summary.to_string(),
            started_at: job.build_started_at.filter(|_| state.started),
            completed_at: job.build_finished_at.filter(|_| state.completed),
        })
    }

    /// In-progress runs are always created: the update endpoint cannot set a start time.
    pub fn requires_create(&self) -> bool {
        self.status == CheckRunStatus::InProgress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::JobRepository;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn job(status: &str) -> JobEvent {
        JobEvent {
            project_id: 7,
            project_name: "group / project".to_string(),
            build_id: 42,
            build_name: "test:unit".to_string(),
            build_status: status.to_string(),
            ref_name: "main".to_string(),
            sha: "abc".to_string(),
            build_started_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()),
            build_finished_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 5, 0).unwrap()),
            repository: JobRepository {
                homepage: "https://gitlab.example.com/group/project".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_translation_table() {
        use CheckRunConclusion as C;
        use CheckRunStatus as S;

        let cases = [
            (JobStatus::Created, "", false, S::Queued, None),
            (JobStatus::Pending, "", false, S::Queued, None),
            (JobStatus::Running, "", false, S::InProgress, None),
            (JobStatus::Success, "", false, S::Completed, Some(C::Success)),
            (JobStatus::Canceled, "", false, S::Completed, Some(C::Cancelled)),
            (JobStatus::Failed, "job_execution_timeout", false, S::Completed, Some(C::TimedOut)),
            (JobStatus::Failed, "job_execution_timeout", true, S::Completed, Some(C::TimedOut)),
            (JobStatus::Failed, "script_failure", true, S::Completed, Some(C::Neutral)),
            (JobStatus::Failed, "script_failure", false, S::Completed, Some(C::Failure)),
            (JobStatus::Failed, "", false, S::Completed, Some(C::Failure)),
        ];

        for (status, reason, allow_failure, expected_status, expected_conclusion) in cases {
            let state = translate(status, reason, allow_failure);
            assert_eq!(
                (state.status, state.conclusion),
                (expected_status, expected_conclusion),
                "{:?} reason={:?} allow_failure={}",
                status,
                reason,
                allow_failure
            );
        }
    }

    #[test]
    fn test_timeout_job_concludes_timed_out() {
        let mut event = job("failed");
        event.build_failure_reason = "job_execution_timeout".to_string();

        let descriptor = CheckRunDescriptor::for_job(&event).unwrap();
        assert_eq!(descriptor.conclusion, Some(CheckRunConclusion::TimedOut));
        assert_eq!(descriptor.title, "Job timed out");
    }

    #[test]
    fn test_unknown_status_yields_nothing() {
        for status in ["manual", "skipped", "waiting_for_resource", "", "RUNNING"] {
            assert!(CheckRunDescriptor::for_job(&job(status)).is_none(), "{}", status);
        }
    }

    #[test]
    fn test_descriptor_fields() {
        let descriptor = CheckRunDescriptor::for_job(&job("success")).unwrap();
        assert_eq!(descriptor.name, "test:unit");
        assert_eq!(descriptor.head_sha, "abc");
        assert_eq!(descriptor.external_id, "42");
        assert_eq!(
            descriptor.details_url,
            "https://gitlab.example.com/group/project/-/jobs/42"
        );
        assert!(descriptor.started_at.is_some());
        assert!(descriptor.completed_at.is_some());
        assert!(!descriptor.requires_create());
    }

    #[test]
    fn test_timestamps_follow_status() {
        let queued = CheckRunDescriptor::for_job(&job("pending")).unwrap();
        assert_eq!(queued.started_at, None);
        assert_eq!(queued.completed_at, None);

        let running = CheckRunDescriptor::for_job(&job("running")).unwrap();
        assert!(running.started_at.is_some());
        assert_eq!(running.completed_at, None);
        assert!(running.requires_create());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&CheckRunStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&CheckRunConclusion::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }

    proptest! {
        #[test]
        fn translation_is_total_and_deterministic(
            index in 0usize..JobStatus::ALL.len(),
            reason in prop_oneof![
                Just(String::new()),
                Just(TIMEOUT_FAILURE_REASON.to_string()),
                "[a-z_]{0,24}",
            ],
            allow_failure in any::<bool>(),
        ) {
            let status = JobStatus::ALL[index];
            let first = translate(status, &reason, allow_failure);
            let second = translate(status, &reason, allow_failure);
            prop_assert_eq!(first, second);

            prop_assert_eq!(JobStatus::parse(status.as_str()), Some(status));
            prop_assert_eq!(
                first.conclusion.is_some(),
                first.status == CheckRunStatus::Completed
            );
            if status == JobStatus::Failed && reason == TIMEOUT_FAILURE_REASON {
                prop_assert_eq!(first.conclusion, Some(CheckRunConclusion::TimedOut));
            }
        }

        #[test]
        fn unrecognised_statuses_never_translate(raw in "[a-z_]{1,20}") {
            prop_assume!(JobStatus::ALL.iter().all(|s| s.as_str() != raw));
            prop_assert!(JobStatus::parse(&raw).is_none());
        }
    }
}
