use chrono::{DateTime, Utc};
use quantarun_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Creation payload for one task quantum.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskQuantumInput {
    /// Task identifier.
    pub task_id: String,
    /// Run identifier within the task.
    pub run_id: String,
    /// Work budget in seconds.
    pub quantum_seconds: u32,
    /// Dispatch payload captured when the quantum was claimed.
    pub payload: Value,
}

/// One bounded slice of work execution for a task/run pair.
///
/// A quantum requires an active lease on its resource key for its whole
/// duration and owns no other resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskQuantum {
    task_id: NonEmptyString,
    run_id: NonEmptyString,
    quantum_seconds: u32,
    payload: Value,
    started_at: Option<DateTime<Utc>>,
}

impl TaskQuantum {
    /// Creates a validated task quantum.
    pub fn new(input: TaskQuantumInput) -> AppResult<Self> {
        if input.quantum_seconds == 0 {
            return Err(AppError::Validation(
                "quantum_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            task_id: NonEmptyString::new(input.task_id)?,
            run_id: NonEmptyString::new(input.run_id)?,
            quantum_seconds: input.quantum_seconds,
            payload: input.payload,
            started_at: None,
        })
    }

    /// Returns the task identifier.
    #[must_use]
    pub fn task_id(&self) -> &str {
        self.task_id.as_str()
    }

    /// Returns the run identifier.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.run_id.as_str()
    }

    /// Returns the work budget in seconds.
    #[must_use]
    pub fn quantum_seconds(&self) -> u32 {
        self.quantum_seconds
    }

    /// Returns the dispatch payload captured at claim time.
    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Returns when execution began, when it has.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Records the execution start timestamp.
    pub fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Returns the coordination key guarding this task/run pair.
    #[must_use]
    pub fn resource_key(&self) -> String {
        format!("lease:{}:{}", self.task_id.as_str(), self.run_id.as_str())
    }
}
