//! Plan-selection phase executor — picks among N candidate plans produced
//! by the planning phase. Skipped entirely (single-pass) when only one
//! candidate exists, per the `Planning -> Refresh` transition.

use crate::model::PlanSpec;

/// Score and pick the best candidate plan. The heuristic favors plans with
/// more, smaller, better-parallelized tasks: a plan with more execution
/// groups relative to its task count is more sequential (worse); one with
/// fewer high-complexity tasks is safer to execute unattended.
pub fn select_plan(candidates: Vec<PlanSpec>) -> PlanSpec {
    candidates
        .into_iter()
        .max_by(|a, b| score(a).partial_cmp(&score(b)).unwrap_or(std::cmp::Ordering::Equal))
        .expect("select_plan requires at least one candidate")
}

fn score(plan: &PlanSpec) -> f64 {
    if plan.tasks.is_empty() {
        return f64::MIN;
    }
    let parallelism = plan.tasks.len() as f64 / plan.execution_order().len().max(1) as f64;
    let high_complexity_penalty = plan
        .tasks
        .iter()
        .filter(|t| t.complexity == crate::model::Complexity::High)
        .count() as f64
        / plan.tasks.len() as f64;
    parallelism - high_complexity_penalty
}
