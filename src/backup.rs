use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::{ensure_hours, ensure_non_empty, App, PlanDetail};
use crate::error::AppError;
use crate::model::{MilestoneStatus, PlanStatus, SettingsChanges, TaskPriority, TaskStatus};

pub const EXPORT_VERSION: &str = "1.0";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub data: ExportData,
}

#[derive(Debug, Serialize)]
pub struct ExportData {
    pub plans: Vec<PlanDetail>,
    pub settings: ExportedSettings,
}

/// The API key is deliberately absent.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportedSettings {
    pub theme: String,
    pub language: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedPlan {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub goal: String,
    pub timeframe: Option<String>,
    #[serde(default = "default_plan_status")]
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub milestones: Vec<ImportedMilestone>,
    #[serde(default)]
    pub tasks: Vec<ImportedTask>,
    #[serde(default)]
    pub dependencies: Vec<ImportedDependency>,
    #[serde(default)]
    pub resources: Vec<ImportedResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedMilestone {
    pub id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default = "default_milestone_status")]
    pub status: String,
    #[serde(default)]
    pub order: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedTask {
    pub id: Option<i64>,
    pub milestone_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_task_status")]
    pub status: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedDependency {
    pub dependent_id: i64,
    pub prerequisite_id: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedResource {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub plans: usize,
    pub milestones: usize,
    pub tasks: usize,
    pub dependencies: usize,
    pub resources: usize,
    pub settings: bool,
}

pub async fn export(app: &App) -> Result<ExportDocument, AppError> {
    let plans = app.list_plans().await?;
    let settings = app.get_settings().await?;
    tracing::debug!(plans = plans.len(), "exporting data");
    Ok(ExportDocument {
        version: EXPORT_VERSION.to_string(),
        export_date: Utc::now(),
        data: ExportData {
            plans,
            settings: ExportedSettings {
                theme: settings.theme,
                language: settings.language,
            },
        },
    })
}

/// Every plan is decoded and checked before anything is written.
pub async fn import(app: &App, document: Value) -> Result<ImportSummary, AppError> {
    match document.get("version").and_then(Value::as_str) {
        Some(EXPORT_VERSION) => {}
        other => tracing::warn!(version = ?other, "importing backup with unexpected version"),
    }
    let data = document
        .get("data")
        .ok_or_else(|| AppError::InvalidInput("backup has no data section".to_string()))?;
    let plans = data
        .get("plans")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::InvalidInput("backup data.plans must be an array".to_string()))?;

    let mut decoded = Vec::with_capacity(plans.len());
    for (idx, raw) in plans.iter().enumerate() {
        let plan: ImportedPlan = serde_json::from_value(raw.clone())?;
        validate_plan(idx, &plan)?;
        decoded.push(plan);
    }

    let mut summary = ImportSummary::default();
    for plan in decoded {
        summary.plans += 1;
        summary.milestones += plan.milestones.len();
        summary.tasks += plan.tasks.len();
        summary.dependencies += plan.dependencies.len();
        summary.resources += plan.resources.len();
        app.import_plan(plan).await?;
    }

    if let Some(raw) = data.get("settings").filter(|value| !value.is_null()) {
        let settings: ExportedSettings = serde_json::from_value(raw.clone())?;
        app.update_settings(SettingsChanges {
            theme: Some(settings.theme),
            language: Some(settings.language),
            openai_api_key: None,
        })
        .await?;
        summary.settings = true;
    }

    tracing::debug!(plans = summary.plans, tasks = summary.tasks, "import finished");
    Ok(summary)
}

fn validate_plan(idx: usize, plan: &ImportedPlan) -> Result<(), AppError> {
    let position = idx + 1;
    let label = |what: &str| format!("plan #{position} {what}");
    ensure_non_empty(&label("title"), &plan.title)?;
    ensure_non_empty(&label("goal"), &plan.goal)?;
    if PlanStatus::parse(&plan.status).is_none() {
        return Err(AppError::InvalidInput(format!(
            "plan #{position} has unknown status '{}'",
            plan.status
        )));
    }
    for milestone in &plan.milestones {
        ensure_non_empty(&label("milestone title"), &milestone.title)?;
        let known = [
            MilestoneStatus::Pending,
            MilestoneStatus::InProgress,
            MilestoneStatus::Completed,
        ]
        .iter()
        .any(|status| status.as_str() == milestone.status);
        if !known {
            return Err(AppError::InvalidInput(format!(
                "milestone '{}' has unknown status '{}'",
                milestone.title, milestone.status
            )));
        }
    }
    for task in &plan.tasks {
        ensure_non_empty(&label("task title"), &task.title)?;
        if TaskStatus::parse(&task.status).is_none() {
            return Err(AppError::InvalidInput(format!(
                "task '{}' has unknown status '{}'",
                task.title, task.status
            )));
        }
        if TaskPriority::parse(&task.priority).is_none() {
            return Err(AppError::InvalidInput(format!(
                "task '{}' has unknown priority '{}'",
                task.title, task.priority
            )));
        }
        ensure_hours("estimated hours", task.estimated_hours)?;
        ensure_hours("actual hours", task.actual_hours)?;
    }
    for resource in &plan.resources {
        ensure_non_empty(&label("resource title"), &resource.title)?;
        ensure_non_empty(&label("resource type"), &resource.resource_type)?;
    }
    Ok(())
}

fn default_plan_status() -> String {
    PlanStatus::Active.as_str().to_string()
}

fn default_milestone_status() -> String {
    MilestoneStatus::Pending.as_str().to_string()
}

fn default_task_status() -> String {
    TaskStatus::Todo.as_str().to_string()
}

fn default_priority() -> String {
    TaskPriority::default().as_str().to_string()
}
