// crates/enrun-engine/src/planner.rs

//! Normalises a loaded [`PipelineRun`] into the ordered, enabled,
//! resume-window-filtered list of steps the engine actually walks,
//! plus a reverse index for downstream skip-event emission.

use std::collections::BTreeMap;

use enrun_core::types::{PipelineRun, StepSnapshot};

use crate::cond::Condition;

/// A step the planner has decided is in scope for this run, with its
/// condition parsed once up front (per the re-architecture note: parse
/// the JSON condition tree once at planner time, not on every
/// evaluation).
pub struct PlannedStep {
    pub snapshot: StepSnapshot,
    pub condition: Condition,
}

pub struct Plan {
    pub steps: Vec<PlannedStep>,
    /// Reverse index from step position to the original snapshot,
    /// covering the whole blueprint (not just the in-scope steps) so
    /// downstream skip-event emission can look up any position the
    /// internal API reports back.
    pub steps_by_position: BTreeMap<u32, StepSnapshot>,
    pub execution_start_position: u32,
}

/// Derives `executionStartPosition`: the fan-out parent's requested
/// resume point if present and positive, else the minimum
/// pre-provisioned step-result position, else 1.
fn execution_start_position(run: &PipelineRun) -> u32 {
    if let Some(fan_out) = &run.blueprint_snapshot.fan_out {
        if let Some(start) = fan_out.start_from_position {
            if start > 0 {
                return start;
            }
        }
    }

    run.step_results.iter().map(|r| r.step_position).min().unwrap_or(1)
}

pub fn plan(run: &PipelineRun) -> Plan {
    let execution_start_position = execution_start_position(run);

    let steps_by_position: BTreeMap<u32, StepSnapshot> = run
        .blueprint_snapshot
        .steps
        .iter()
        .map(|s| (s.position, s.clone()))
        .collect();

    let mut steps: Vec<PlannedStep> = run
        .blueprint_snapshot
        .steps
        .iter()
        .filter(|s| s.is_enabled() && s.position >= execution_start_position)
        .cloned()
        .map(|snapshot| {
            let condition = Condition::parse(snapshot.condition.as_ref());
            PlannedStep { snapshot, condition }
        })
        .collect();

    steps.sort_by_key(|s| s.snapshot.position);

    Plan {
        steps,
        steps_by_position,
        execution_start_position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrun_core::types::{BlueprintSnapshot, Entity, FanOutMetadata, StepResult, StepStatus};
    use serde_json::json;

    fn step(position: u32, enabled: Option<bool>) -> StepSnapshot {
        StepSnapshot {
            position,
            operation_id: Some(format!("company.step_{position}")),
            step_config: None,
            condition: None,
            fan_out: None,
            is_enabled: enabled,
        }
    }

    fn run_with(steps: Vec<StepSnapshot>, fan_out: Option<FanOutMetadata>, results: Vec<StepResult>) -> PipelineRun {
        PipelineRun {
            id: "run-1".into(),
            organization_id: "org-1".into(),
            company_id: "company-1".into(),
            submission_id: "sub-1".into(),
            submission_input: None,
            blueprint_snapshot: BlueprintSnapshot {
                config: None,
                steps,
                entity: Some(Entity {
                    entity_type: Default::default(),
                    input: Some(json!({})),
                    index: None,
                }),
                fan_out,
            },
            step_results: results,
        }
    }

    #[test]
    fn defaults_to_position_one_with_no_prior_results() {
        let run = run_with(vec![step(1, None), step(2, None)], None, vec![]);
        let p = plan(&run);
        assert_eq!(p.execution_start_position, 1);
        assert_eq!(p.steps.len(), 2);
    }

    #[test]
    fn resumes_from_minimum_pre_provisioned_result_position() {
        let result = StepResult {
            id: "sr-1".into(),
            step_position: 3,
            status: StepStatus::Pending,
            input_payload: None,
            output_payload: None,
            error_message: None,
            error_details: None,
            duration_ms: None,
        };
        let run = run_with(vec![step(1, None), step(2, None), step(3, None)], None, vec![result]);
        let p = plan(&run);
        assert_eq!(p.execution_start_position, 3);
        assert_eq!(p.steps.len(), 1);
        assert_eq!(p.steps[0].snapshot.position, 3);
    }

    #[test]
    fn fan_out_start_position_takes_precedence() {
        let run = run_with(
            vec![step(1, None), step(2, None), step(3, None)],
            Some(FanOutMetadata {
                parent_pipeline_run_id: "parent-1".into(),
                start_from_position: Some(3),
            }),
            vec![],
        );
        let p = plan(&run);
        assert_eq!(p.execution_start_position, 3);
        assert_eq!(p.steps.len(), 1);
    }

    #[test]
    fn disabled_steps_are_excluded() {
        let run = run_with(vec![step(1, Some(false)), step(2, None)], None, vec![]);
        let p = plan(&run);
        assert_eq!(p.steps.len(), 1);
        assert_eq!(p.steps[0].snapshot.position, 2);
    }

    #[test]
    fn steps_by_position_includes_disabled_and_out_of_window_steps() {
        let run = run_with(vec![step(1, Some(false)), step(2, None)], None, vec![]);
        let p = plan(&run);
        assert_eq!(p.steps_by_position.len(), 2);
    }
}
