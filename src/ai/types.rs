use serde::{Deserialize, Deserializer, Serialize};

use crate::model::TaskPriority;

/// A plan draft as returned by the model. `milestones`, `tasks` and
/// `estimatedTimeframe` are required; a response without them is rejected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedPlan {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub milestones: Vec<GeneratedMilestone>,
    pub tasks: Vec<GeneratedTask>,
    pub estimated_timeframe: String,
    #[serde(default)]
    pub tips: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedMilestone {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub order: Option<i32>,
    pub estimated_duration: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Option<TaskPriority>,
    pub estimated_hours: Option<f64>,
    /// Position in the plan draft's `milestones` array.
    pub milestone_index: Option<usize>,
    /// Title of an existing milestone, used when adding tasks to a plan.
    pub milestone_name: Option<String>,
    pub order: Option<i32>,
    /// Titles of tasks that must be finished first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEnhancement {
    pub description: String,
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub tips: Vec<String>,
}

// Models answer "high", "High" or "HIGH|MEDIUM|LOW"; anything unknown becomes unset.
fn lenient_priority<'de, D>(deserializer: D) -> Result<Option<TaskPriority>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value.trim().to_ascii_uppercase().as_str() {
        "HIGH" => Some(TaskPriority::High),
        "MEDIUM" => Some(TaskPriority::Medium),
        "LOW" => Some(TaskPriority::Low),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_priority_is_case_insensitive() {
        let task: GeneratedTask =
            serde_json::from_str(r#"{"title":"t","priority":"high"}"#).unwrap();
        assert_eq!(task.priority, Some(TaskPriority::High));

        let task: GeneratedTask =
            serde_json::from_str(r#"{"title":"t","priority":"HIGH|MEDIUM|LOW"}"#).unwrap();
        assert_eq!(task.priority, None);
        assert!(task.prerequisites.is_empty());
    }

    #[test]
    fn plan_without_timeframe_does_not_deserialize() {
        let result: Result<GeneratedPlan, _> =
            serde_json::from_str(r#"{"title":"t","milestones":[],"tasks":[]}"#);
        assert!(result.is_err());
    }
}
