//! Values derived from a plan's tasks on every read. Nothing here is stored.

use chrono::{DateTime, Utc};

use crate::app::PlanDetail;
use crate::entities::{milestone, task};
use crate::model::{DashboardStats, MilestoneStatus, PlanStats, PlanStatus, TaskStatus};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TaskTally {
    pub total: usize,
    pub completed: usize,
}

impl TaskTally {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut tally = Self::default();
        for status in statuses {
            tally.total += 1;
            if status == TaskStatus::Completed {
                tally.completed += 1;
            }
        }
        tally
    }

    /// Stored status strings that do not parse count as not completed.
    pub fn from_stored<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut tally = Self::default();
        for status in statuses {
            tally.total += 1;
            if TaskStatus::parse(status) == Some(TaskStatus::Completed) {
                tally.completed += 1;
            }
        }
        tally
    }

    pub fn percent(&self) -> u8 {
        progress_percent(self.completed, self.total)
    }
}

/// round(100 * completed / total), 0 for an empty set.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = completed.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u8
}

/// The status a plan is displayed with.
///
/// `PAUSED` and `CANCELLED` always win. A plan without tasks keeps its stored
/// status. Otherwise the plan is `COMPLETED` exactly when every task is.
pub fn dynamic_status(stored: PlanStatus, tally: TaskTally) -> PlanStatus {
    match stored {
        PlanStatus::Paused | PlanStatus::Cancelled => stored,
        _ if tally.total == 0 => stored,
        _ if tally.completed == tally.total => PlanStatus::Completed,
        _ => PlanStatus::Active,
    }
}

/// String form for rows whose stored status may predate the current enum.
pub fn dynamic_status_str(stored: &str, tally: TaskTally) -> String {
    match PlanStatus::parse(stored) {
        Some(status) => dynamic_status(status, tally).as_str().to_string(),
        None => stored.to_string(),
    }
}

pub fn plan_stats(milestones: &[milestone::Model], tasks: &[task::Model]) -> PlanStats {
    let tally = TaskTally::from_stored(tasks.iter().map(|task| task.status.as_str()));
    let completed_milestones = milestones
        .iter()
        .filter(|milestone| milestone.status == MilestoneStatus::Completed.as_str())
        .count();
    let task_progress = tally.percent();
    let milestone_progress = progress_percent(completed_milestones, milestones.len());
    let overall_progress = if milestones.is_empty() {
        task_progress
    } else {
        ((task_progress as f64 + milestone_progress as f64) / 2.0).round() as u8
    };

    PlanStats {
        total_tasks: tally.total as u64,
        completed_tasks: tally.completed as u64,
        task_progress,
        total_milestones: milestones.len() as u64,
        completed_milestones: completed_milestones as u64,
        milestone_progress,
        total_estimated_hours: tasks.iter().filter_map(|task| task.estimated_hours).sum(),
        total_actual_hours: tasks.iter().filter_map(|task| task.actual_hours).sum(),
        overall_progress,
    }
}

/// Plans are counted by their dynamic status; a task is overdue when its due
/// date is before `now` and it is not completed.
pub fn dashboard_stats(plans: &[PlanDetail], now: DateTime<Utc>) -> DashboardStats {
    let mut stats = DashboardStats {
        total_plans: plans.len() as u64,
        ..Default::default()
    };
    for plan in plans {
        match PlanStatus::parse(&plan.dynamic_status) {
            Some(PlanStatus::Active) => stats.active_plans += 1,
            Some(PlanStatus::Completed) => stats.completed_plans += 1,
            _ => {}
        }
        for task in &plan.tasks {
            stats.total_tasks += 1;
            let completed = task.status == TaskStatus::Completed.as_str();
            if completed {
                stats.completed_tasks += 1;
            } else if task.due_date.is_some_and(|due| due < now) {
                stats.overdue_tasks += 1;
            }
        }
    }
    stats.task_completion_rate =
        progress_percent(stats.completed_tasks as usize, stats.total_tasks as usize);
    stats
}
