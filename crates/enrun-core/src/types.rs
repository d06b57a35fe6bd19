// crates/enrun-core/src/types.rs

//! Wire types for the pipeline runner: the shape every internal
//! endpoint in the external-interfaces contract sends or receives.
//! These are intentionally "dumb" data — the behaviour that walks them
//! (planning, condition evaluation, dispatch) lives in `enrun-engine`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of entity a pipeline run (or, per-step, an operation)
/// concerns. Derived per-step from the operation id's dotted prefix —
/// only the run-level `Entity::entity_type` uses the blueprint's own
/// declaration, and only as a fallback for the final entity-state
/// upsert when every step in the run was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Company,
    Job,
}

impl Default for EntityType {
    fn default() -> Self {
        EntityType::Company
    }
}

impl EntityType {
    /// Derives the entity type from an operation id's dotted prefix:
    /// `person.` -> person, `job.` -> job, anything else -> company.
    pub fn from_operation_id(operation_id: &str) -> Self {
        if operation_id.starts_with("person.") {
            EntityType::Person
        } else if operation_id.starts_with("job.") {
            EntityType::Job
        } else {
            EntityType::Company
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Company => "company",
            EntityType::Job => "job",
        }
    }
}

/// The entity a pipeline run is enriching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub entity_type: EntityType,
    pub input: Option<Value>,
    /// Opaque to the engine; used upstream by the fan-out caller.
    pub index: Option<Value>,
}

/// Present on a child run created by fan-out; carries the position the
/// child must resume execution from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutMetadata {
    pub parent_pipeline_run_id: String,
    pub start_from_position: Option<u32>,
}

/// One step in a blueprint snapshot.
///
/// `condition` and `fan_out` are kept as the top-level fields the
/// engine actually evaluates; `step_config` is an opaque sidecar bag
/// that additionally carries `skip_if_fresh` (consulted by the
/// freshness gate) and any executor-specific options the generic
/// operations-service executor forwards verbatim as `options`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub position: u32,
    pub operation_id: Option<String>,
    pub step_config: Option<Value>,
    pub condition: Option<Value>,
    #[serde(default)]
    pub fan_out: Option<bool>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

impl StepSnapshot {
    /// `is_enabled != false` — absent means enabled.
    pub fn is_enabled(&self) -> bool {
        self.is_enabled.unwrap_or(true)
    }

    pub fn is_fan_out(&self) -> bool {
        self.fan_out.unwrap_or(false)
    }

    /// `skip_if_fresh` read out of the opaque `step_config` bag, if
    /// present and well-formed.
    pub fn skip_if_fresh(&self) -> Option<&Value> {
        self.step_config.as_ref()?.get("skip_if_fresh")
    }
}

/// The blueprint snapshot a pipeline run was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintSnapshot {
    /// The original blueprint configuration. Opaque to the engine.
    pub config: Option<Value>,
    pub steps: Vec<StepSnapshot>,
    pub entity: Option<Entity>,
    pub fan_out: Option<FanOutMetadata>,
}

/// Lifecycle status of a single step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed | StepStatus::Skipped)
    }
}

/// A pre-provisioned result row for one step position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub id: String,
    pub step_position: u32,
    pub status: StepStatus,
    pub input_payload: Option<Value>,
    pub output_payload: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
    pub duration_ms: Option<u64>,
}

/// A pipeline run as loaded from the internal API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub organization_id: String,
    pub company_id: String,
    pub submission_id: String,
    /// The submission's own input, consulted as the context seed only
    /// when the blueprint's `entity.input` is absent. Non-object values
    /// (in particular arrays) are ignored per §4.7 point 3.
    #[serde(default)]
    pub submission_input: Option<Value>,
    pub blueprint_snapshot: BlueprintSnapshot,
    pub step_results: Vec<StepResult>,
}

/// One entry in an executor's `provider_attempts` list. Kept as a raw
/// JSON value end to end — the engine only reads `status` and
/// `provider` off of it for observability and fan-out's `provider`
/// label, never round-trips it into a typed struct.
pub type ProviderAttempt = Value;

/// What an executor decided about its attempt, independent of the wire
/// `status` string — see the Design Note on envelope modelling in
/// `SPEC_FULL.md`.
#[derive(Debug, Clone)]
pub enum Outcome<'a> {
    Found {
        output: Option<&'a Value>,
        provider_attempts: Option<&'a Vec<ProviderAttempt>>,
    },
    Failed {
        missing_inputs: Option<&'a Vec<String>>,
        provider_attempts: Option<&'a Vec<ProviderAttempt>>,
    },
}

/// The normalised response every executor (generic remote operation,
/// or one of the three deep-research pollers) produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEnvelope {
    pub run_id: Option<String>,
    pub operation_id: Option<String>,
    /// Wire status string. The engine treats exactly `"failed"` as
    /// failure; everything else (`"found"`, `"succeeded"`, …) is
    /// success. Kept as a raw string for wire fidelity; use
    /// [`OperationEnvelope::outcome`] for in-memory branching.
    pub status: String,
    pub output: Option<Value>,
    pub provider_attempts: Option<Vec<ProviderAttempt>>,
    pub missing_inputs: Option<Vec<String>>,
    /// Present on failed envelopes raised by a poller (`"poll_timeout"`,
    /// `"parallel_task_failed"`, `"result_fetch_failed: …"`, …).
    pub error: Option<String>,
}

impl OperationEnvelope {
    pub fn outcome(&self) -> Outcome<'_> {
        if self.status == "failed" {
            Outcome::Failed {
                missing_inputs: self.missing_inputs.as_ref(),
                provider_attempts: self.provider_attempts.as_ref(),
            }
        } else {
            Outcome::Found {
                output: self.output.as_ref(),
                provider_attempts: self.provider_attempts.as_ref(),
            }
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome(), Outcome::Failed { .. })
    }
}

/// Write-only denormalised timeline record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub organization_id: String,
    pub company_id: String,
    pub submission_id: String,
    pub pipeline_run_id: String,
    pub entity_type: EntityType,
    pub step_position: u32,
    pub status: StepStatus,
    pub skip_reason: Option<String>,
    pub duration_ms: Option<u64>,
    pub provider_attempts: Option<Vec<ProviderAttempt>>,
    pub operation_result: Option<Value>,
    pub fields_updated: Option<Vec<String>>,
}

/// Response shape of `entity-state/check-freshness`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessRecord {
    pub fresh: bool,
    pub entity_id: Option<String>,
    pub last_enriched_at: Option<String>,
    pub age_hours: Option<f64>,
    pub canonical_payload: Option<Value>,
}

/// Terminal status of a whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

/// What `enrun-engine::run_pipeline` returns — and the only thing that
/// ever reaches the durable task runtime, short of an engine-startup
/// configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub pipeline_run_id: String,
    pub status: RunStatus,
    pub failed_step_position: Option<u32>,
    pub error: Option<String>,
    pub fan_out_child_run_ids: Option<Vec<String>>,
    pub fan_out_child_count: Option<usize>,
}

impl RunSummary {
    pub fn succeeded(pipeline_run_id: impl Into<String>) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            status: RunStatus::Succeeded,
            failed_step_position: None,
            error: None,
            fan_out_child_run_ids: None,
            fan_out_child_count: None,
        }
    }

    pub fn failed(pipeline_run_id: impl Into<String>, failed_step_position: Option<u32>, error: impl Into<String>) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            status: RunStatus::Failed,
            failed_step_position,
            error: Some(error.into()),
            fan_out_child_run_ids: None,
            fan_out_child_count: None,
        }
    }

    pub fn fanned_out(pipeline_run_id: impl Into<String>, child_run_ids: Vec<String>) -> Self {
        let count = child_run_ids.len();
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            status: RunStatus::Succeeded,
            failed_step_position: None,
            error: None,
            fan_out_child_run_ids: Some(child_run_ids),
            fan_out_child_count: Some(count),
        }
    }
}
