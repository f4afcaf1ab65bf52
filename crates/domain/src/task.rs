use std::sync::Arc;
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ports::task::TaskRepository;
use crate::DomainResult;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Form,
    FileUpload,
    Link,
    Report,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Form => "form",
            Self::FileUpload => "file_upload",
            Self::Link => "link",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "form" => Ok(Self::Form),
            "file_upload" => Ok(Self::FileUpload),
            "link" => Ok(Self::Link),
            "report" => Ok(Self::Report),
            _ => Err("unknown step type"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err("unknown task status"),
        }
    }
}

/// One step of a task brief. `fields` is an opaque form schema rendered by
/// the client; the submission engine only reads `step_number`, `step_type`
/// and `required`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    pub step_number: u32,
    pub title: String,
    pub description: String,
    pub step_type: StepType,
    pub required: bool,
    pub fields: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub task_id: String,
    pub brand_id: String,
    pub title: String,
    pub description: String,
    pub reward: i64,
    pub deadline_ms: i64,
    pub status: TaskStatus,
    pub steps: Vec<StepDefinition>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl TaskDefinition {
    pub fn step(&self, step_number: u32) -> Option<&StepDefinition> {
        self.steps
            .iter()
            .find(|step| step.step_number == step_number)
    }
}

#[derive(Clone)]
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
}

impl TaskService {
    pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
        Self { repository }
    }

    /// Loads a task with steps in canonical ascending step-number order.
    /// A stored task with duplicate step numbers is surfaced as a validation
    /// failure rather than silently picking one of the duplicates.
    pub async fn get_task(&self, task_id: &str) -> DomainResult<TaskDefinition> {
        let mut task = self
            .repository
            .get(task_id)
            .await?
            .ok_or(DomainError::NotFound)?;
        normalize_steps(&mut task)?;
        Ok(task)
    }

    pub async fn list_active_by_brand(&self, brand_id: &str) -> DomainResult<Vec<TaskDefinition>> {
        let mut tasks = self.repository.list_active_by_brand(brand_id).await?;
        for task in &mut tasks {
            normalize_steps(task)?;
        }
        Ok(tasks)
    }
}

fn normalize_steps(task: &mut TaskDefinition) -> DomainResult<()> {
    task.steps.sort_by_key(|step| step.step_number);
    let duplicated = task
        .steps
        .windows(2)
        .any(|pair| pair[0].step_number == pair[1].step_number);
    if duplicated {
        return Err(DomainError::Validation(format!(
            "task '{}' has duplicate step numbers",
            task.task_id
        )));
    }
    Ok(())
}
