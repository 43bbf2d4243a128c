//! Dashboard aggregation over job and run history.

use crate::store::{Job, Run};
use crate::types::{ActionType, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub jobs_by_status: BTreeMap<String, usize>,
    pub runs_by_status: BTreeMap<String, usize>,
    /// Committed outputs per generative action (successful runs).
    pub outputs_by_kind: BTreeMap<String, usize>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub estimated_cost_usd: f64,
}

/// Fold history into the dashboard report. Cost is a blended estimate
/// over every token ever spent, failed attempts included.
pub fn aggregate(jobs: &[Job], runs: &[Run], cost_per_token_usd: f64) -> StatsReport {
    let mut jobs_by_status = BTreeMap::new();
    for job in jobs {
        *jobs_by_status
            .entry(job.status.as_str().to_string())
            .or_insert(0) += 1;
    }

    let mut runs_by_status = BTreeMap::new();
    let mut outputs_by_kind = BTreeMap::new();
    let mut total_input_tokens = 0u64;
    let mut total_output_tokens = 0u64;
    for run in runs {
        *runs_by_status
            .entry(run.status.as_str().to_string())
            .or_insert(0) += 1;
        total_input_tokens += run.input_tokens;
        total_output_tokens += run.output_tokens;
        if run.status == JobStatus::Success && run.action != ActionType::Approve {
            *outputs_by_kind
                .entry(run.action.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    let estimated_cost_usd =
        (total_input_tokens + total_output_tokens) as f64 * cost_per_token_usd;
    StatsReport {
        jobs_by_status,
        runs_by_status,
        outputs_by_kind,
        total_input_tokens,
        total_output_tokens,
        estimated_cost_usd,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub resource_id: String,
    pub action: String,
    pub status: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
}

/// Newest runs first, up to `limit`.
pub fn recent_runs(runs: &[Run], limit: usize) -> Vec<RunSummary> {
    let mut sorted: Vec<&Run> = runs.iter().collect();
    sorted.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    sorted
        .into_iter()
        .take(limit)
        .map(|run| RunSummary {
            run_id: run.id.to_string(),
            resource_id: run.resource_id.to_string(),
            action: run.action.as_str().to_string(),
            status: run.status.as_str().to_string(),
            model: run.model.clone(),
            started_at: run.started_at,
            ended_at: run.ended_at,
            input_tokens: run.input_tokens,
            output_tokens: run.output_tokens,
            error: run.error.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceId;
    use chrono::Duration;

    fn job(status: JobStatus) -> Job {
        let mut job = Job::new(
            ResourceId::parse("T1").unwrap(),
            ActionType::Checklist,
            3,
        );
        job.status = status;
        job
    }

    fn run(action: ActionType, status: JobStatus, tokens: (u64, u64), age_mins: i64) -> Run {
        let job = Job::new(ResourceId::parse("T1").unwrap(), action, 3);
        let mut run = Run::begin(&job, "model-x", "v1.1");
        run.status = status;
        run.input_tokens = tokens.0;
        run.output_tokens = tokens.1;
        run.started_at = Utc::now() - Duration::minutes(age_mins);
        run
    }

    #[test]
    fn aggregate_counts_and_costs() {
        let jobs = vec![
            job(JobStatus::Success),
            job(JobStatus::Success),
            job(JobStatus::Failed),
        ];
        let runs = vec![
            run(ActionType::Checklist, JobStatus::Success, (1000, 500), 1),
            run(ActionType::Tree, JobStatus::Failed, (200, 0), 2),
            run(ActionType::Approve, JobStatus::Success, (0, 0), 3),
        ];
        let report = aggregate(&jobs, &runs, 0.001);
        assert_eq!(report.jobs_by_status["success"], 2);
        assert_eq!(report.jobs_by_status["failed"], 1);
        assert_eq!(report.total_input_tokens, 1200);
        assert_eq!(report.total_output_tokens, 500);
        // approve runs never count as outputs
        assert_eq!(report.outputs_by_kind.len(), 1);
        assert_eq!(report.outputs_by_kind["checklist"], 1);
        assert!((report.estimated_cost_usd - 1.7).abs() < 1e-9);
    }

    #[test]
    fn recent_runs_newest_first() {
        let runs = vec![
            run(ActionType::Checklist, JobStatus::Success, (1, 1), 30),
            run(ActionType::Tree, JobStatus::Success, (1, 1), 5),
            run(ActionType::Pages, JobStatus::Success, (1, 1), 15),
        ];
        let summaries = recent_runs(&runs, 2);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].action, "tree");
        assert_eq!(summaries[1].action, "pages");
    }
}
