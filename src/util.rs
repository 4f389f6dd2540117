use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::ai::types::{GeneratedPlan, GeneratedTask, TaskEnhancement};
use crate::app::PlanDetail;
use crate::entities::{settings, task};
use crate::error::AppError;
use crate::model::{DashboardStats, PlanStats, TaskStatus};

fn has_text(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_date(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_date(input: &str) -> Result<DateTime<Utc>, AppError> {
    let trimmed = input.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            AppError::InvalidInput(format!(
                "invalid date '{trimmed}', expected YYYY-MM-DD or RFC 3339"
            ))
        })
}

fn status_label(detail: &PlanDetail) -> String {
    if detail.dynamic_status == detail.plan.status {
        detail.dynamic_status.clone()
    } else {
        format!("{} (stored {})", detail.dynamic_status, detail.plan.status)
    }
}

fn completed_count(tasks: &[&task::Model]) -> usize {
    tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed.as_str())
        .count()
}

pub fn format_plan_line(detail: &PlanDetail) -> String {
    let done = detail
        .tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed.as_str())
        .count();
    format!(
        "[{}] {}: {} (tasks {}/{}, {}%)",
        detail.dynamic_status,
        detail.plan.id,
        detail.plan.title,
        done,
        detail.tasks.len(),
        detail.progress
    )
}

fn push_task(
    output: &mut String,
    indent: &str,
    task: &task::Model,
    titles: &HashMap<i64, &str>,
    needs: &[i64],
) {
    output.push_str(&format!(
        "{indent}- [{}] {} (task id {}, {}",
        task.status, task.title, task.id, task.priority
    ));
    if let Some(hours) = task.estimated_hours {
        output.push_str(&format!(", est {hours}h"));
    }
    if let Some(hours) = task.actual_hours {
        output.push_str(&format!(", actual {hours}h"));
    }
    if let Some(due) = task.due_date {
        output.push_str(&format!(", due {}", format_date(due)));
    }
    output.push_str(")\n");
    if has_text(&task.description) {
        output.push_str(&format!(
            "{indent}  {}\n",
            task.description.as_deref().unwrap_or("")
        ));
    }
    if !needs.is_empty() {
        let names: Vec<String> = needs
            .iter()
            .map(|id| match titles.get(id) {
                Some(title) => format!("{title} ({id})"),
                None => id.to_string(),
            })
            .collect();
        output.push_str(&format!("{indent}  Needs: {}\n", names.join(", ")));
    }
}

pub fn format_plan_detail(detail: &PlanDetail) -> String {
    let plan = &detail.plan;
    let mut output = String::new();
    output.push_str(&format!("Plan ID: {}\n", plan.id));
    output.push_str(&format!("Title: {}\n", plan.title));
    output.push_str(&format!("Goal: {}\n", plan.goal));
    if has_text(&plan.description) {
        output.push_str(&format!(
            "Description: {}\n",
            plan.description.as_deref().unwrap_or("")
        ));
    }
    if has_text(&plan.timeframe) {
        output.push_str(&format!(
            "Timeframe: {}\n",
            plan.timeframe.as_deref().unwrap_or("")
        ));
    }
    output.push_str(&format!("Status: {}\n", status_label(detail)));
    let done = detail
        .tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed.as_str())
        .count();
    output.push_str(&format!(
        "Progress: {}% ({}/{} tasks)\n",
        detail.progress,
        done,
        detail.tasks.len()
    ));
    output.push_str(&format!("Created: {}\n", format_datetime(plan.created_at)));
    output.push_str(&format!("Updated: {}\n", format_datetime(plan.updated_at)));

    let titles: HashMap<i64, &str> = detail
        .tasks
        .iter()
        .map(|task| (task.id, task.title.as_str()))
        .collect();
    let mut needs: HashMap<i64, Vec<i64>> = HashMap::new();
    for dependency in &detail.dependencies {
        needs
            .entry(dependency.dependent_id)
            .or_default()
            .push(dependency.prerequisite_id);
    }

    output.push('\n');
    if detail.milestones.is_empty() && detail.tasks.is_empty() {
        output.push_str("Milestones: (none)\nTasks: (none)\n");
    }
    for milestone in &detail.milestones {
        let owned: Vec<&task::Model> = detail
            .tasks
            .iter()
            .filter(|task| task.milestone_id == Some(milestone.id))
            .collect();
        output.push_str(&format!(
            "Milestone {}. {} [{}] (milestone id {}, tasks {}/{})",
            milestone.sort_order,
            milestone.title,
            milestone.status,
            milestone.id,
            completed_count(&owned),
            owned.len()
        ));
        if let Some(target) = milestone.target_date {
            output.push_str(&format!(", target {}", format_date(target)));
        }
        output.push('\n');
        for task in owned {
            push_task(
                &mut output,
                "  ",
                task,
                &titles,
                needs.get(&task.id).map(Vec::as_slice).unwrap_or_default(),
            );
        }
    }

    let loose: Vec<&task::Model> = detail
        .tasks
        .iter()
        .filter(|task| task.milestone_id.is_none())
        .collect();
    if !loose.is_empty() {
        output.push_str("Unassigned tasks:\n");
        for task in loose {
            push_task(
                &mut output,
                "  ",
                task,
                &titles,
                needs.get(&task.id).map(Vec::as_slice).unwrap_or_default(),
            );
        }
    }

    if !detail.resources.is_empty() {
        output.push_str("\nResources:\n");
        for resource in &detail.resources {
            output.push_str(&format!(
                "- [{}] {} (resource id {})",
                resource.resource_type, resource.title, resource.id
            ));
            if has_text(&resource.url) {
                output.push_str(&format!(" {}", resource.url.as_deref().unwrap_or("")));
            }
            output.push('\n');
        }
    }
    output.trim_end().to_string()
}

pub fn format_plan_stats(stats: &PlanStats) -> String {
    [
        format!(
            "Tasks: {}/{} completed ({}%)",
            stats.completed_tasks, stats.total_tasks, stats.task_progress
        ),
        format!(
            "Milestones: {}/{} completed ({}%)",
            stats.completed_milestones, stats.total_milestones, stats.milestone_progress
        ),
        format!(
            "Hours: {} estimated, {} actual",
            stats.total_estimated_hours, stats.total_actual_hours
        ),
        format!("Overall progress: {}%", stats.overall_progress),
    ]
    .join("\n")
}

pub fn format_dashboard(stats: &DashboardStats) -> String {
    [
        format!(
            "Plans: {} total, {} active, {} completed",
            stats.total_plans, stats.active_plans, stats.completed_plans
        ),
        format!(
            "Tasks: {} total, {} completed, {} overdue",
            stats.total_tasks, stats.completed_tasks, stats.overdue_tasks
        ),
        format!("Completion rate: {}%", stats.task_completion_rate),
    ]
    .join("\n")
}

pub fn format_settings(settings: &settings::Model, key_source: Option<&str>) -> String {
    let mut output = String::new();
    output.push_str(&format!("Theme: {}\n", settings.theme));
    output.push_str(&format!("Language: {}\n", settings.language));
    match key_source {
        Some(masked) => output.push_str(&format!("API key: {masked}")),
        None => output.push_str("API key: (not set)"),
    }
    output
}

pub fn format_generated_plan(plan: &GeneratedPlan) -> String {
    let mut output = String::new();
    output.push_str(&format!("Title: {}\n", plan.title));
    if !plan.description.trim().is_empty() {
        output.push_str(&format!("Description: {}\n", plan.description));
    }
    output.push_str(&format!("Timeframe: {}\n", plan.estimated_timeframe));
    for (idx, milestone) in plan.milestones.iter().enumerate() {
        output.push_str(&format!("\nMilestone {}. {}", idx + 1, milestone.title));
        if let Some(duration) = milestone.estimated_duration.as_deref() {
            output.push_str(&format!(" ({duration})"));
        }
        output.push('\n');
        for task in plan
            .tasks
            .iter()
            .filter(|task| task.milestone_index == Some(idx))
        {
            output.push_str(&format_generated_task(task));
        }
    }
    let loose: Vec<&GeneratedTask> = plan
        .tasks
        .iter()
        .filter(|task| {
            task.milestone_index
                .map_or(true, |idx| idx >= plan.milestones.len())
        })
        .collect();
    if !loose.is_empty() {
        output.push_str("\nOther tasks:\n");
        for task in loose {
            output.push_str(&format_generated_task(task));
        }
    }
    if !plan.tips.is_empty() {
        output.push_str("\nTips:\n");
        for tip in &plan.tips {
            output.push_str(&format!("- {tip}\n"));
        }
    }
    output.trim_end().to_string()
}

pub fn format_generated_task(task: &GeneratedTask) -> String {
    let priority = task.priority.unwrap_or_default();
    let mut line = format!("  - {} [{}]", task.title, priority.as_str());
    if let Some(hours) = task.estimated_hours {
        line.push_str(&format!(" ~{hours}h"));
    }
    if let Some(name) = task.milestone_name.as_deref() {
        line.push_str(&format!(" -> {name}"));
    }
    line.push('\n');
    line
}

pub fn format_enhancement(enhancement: &TaskEnhancement) -> String {
    let mut output = format!("Description: {}\n", enhancement.description);
    if let Some(hours) = enhancement.estimated_hours {
        output.push_str(&format!("Estimated hours: {hours}\n"));
    }
    for tip in &enhancement.tips {
        output.push_str(&format!("- {tip}\n"));
    }
    output.trim_end().to_string()
}
