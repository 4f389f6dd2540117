use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, Statement,
    TransactionTrait,
};
use serde::Serialize;

use crate::ai::types::{GeneratedPlan, GeneratedTask};
use crate::entities::{milestone, plan, resource, settings, task, task_dependency};
use crate::error::AppError;
use crate::model::{
    DashboardStats, MilestoneChanges, MilestoneInput, MilestoneStatus, PlanChanges, PlanInput,
    PlanStats, PlanStatus, ResourceChanges, ResourceInput, SettingsChanges, TaskChanges,
    TaskInput, TaskPriority, TaskStatus,
};
use crate::progress::{self, TaskTally};

const SETTINGS_ID: i64 = 1;
pub const DEFAULT_THEME: &str = "system";
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Clone)]
pub struct App {
    db: DatabaseConnection,
}

/// A plan with everything it owns plus the values derived from its tasks.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDetail {
    #[serde(flatten)]
    pub plan: plan::Model,
    pub dynamic_status: String,
    pub progress: u8,
    pub milestones: Vec<milestone::Model>,
    pub tasks: Vec<task::Model>,
    pub dependencies: Vec<task_dependency::Model>,
    pub resources: Vec<resource::Model>,
}

impl PlanDetail {
    fn new(
        plan: plan::Model,
        milestones: Vec<milestone::Model>,
        tasks: Vec<task::Model>,
        dependencies: Vec<task_dependency::Model>,
        resources: Vec<resource::Model>,
    ) -> Self {
        let tally = TaskTally::from_stored(tasks.iter().map(|task| task.status.as_str()));
        Self {
            dynamic_status: progress::dynamic_status_str(&plan.status, tally),
            progress: tally.percent(),
            plan,
            milestones,
            tasks,
            dependencies,
            resources,
        }
    }
}

impl App {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.db
            .execute(Statement::from_string(DatabaseBackend::Sqlite, "SELECT 1;"))
            .await?;
        Ok(())
    }

    pub async fn create_plan(&self, input: PlanInput) -> Result<plan::Model, AppError> {
        self.create_plan_with_conn(&self.db, input).await
    }

    async fn create_plan_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        input: PlanInput,
    ) -> Result<plan::Model, AppError> {
        ensure_non_empty("plan title", &input.title)?;
        ensure_non_empty("plan goal", &input.goal)?;
        let now = Utc::now();
        let active = plan::ActiveModel {
            title: Set(input.title),
            description: Set(blank_to_none(input.description)),
            goal: Set(input.goal),
            timeframe: Set(blank_to_none(input.timeframe)),
            status: Set(PlanStatus::Active.as_str().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let created = active.insert(db).await?;
        tracing::debug!(plan_id = created.id, "created plan");
        Ok(created)
    }

    pub async fn list_plans(&self) -> Result<Vec<PlanDetail>, AppError> {
        let plans = plan::Entity::find()
            .order_by_desc(plan::Column::UpdatedAt)
            .order_by_asc(plan::Column::Id)
            .all(&self.db)
            .await?;
        self.plan_details(plans).await
    }

    pub async fn get_plan(&self, id: i64) -> Result<PlanDetail, AppError> {
        let plan = self.get_plan_model(id).await?;
        let mut details = self.plan_details(vec![plan]).await?;
        details
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("plan id {id}")))
    }

    pub async fn get_plan_model(&self, id: i64) -> Result<plan::Model, AppError> {
        plan::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("plan id {id}")))
    }

    async fn plan_details(&self, plans: Vec<plan::Model>) -> Result<Vec<PlanDetail>, AppError> {
        if plans.is_empty() {
            return Ok(Vec::new());
        }
        let plan_ids: Vec<i64> = plans.iter().map(|plan| plan.id).collect();

        let milestones = milestone::Entity::find()
            .filter(milestone::Column::PlanId.is_in(plan_ids.clone()))
            .order_by_asc(milestone::Column::SortOrder)
            .order_by_asc(milestone::Column::Id)
            .all(&self.db)
            .await?;
        let tasks = task::Entity::find()
            .filter(task::Column::PlanId.is_in(plan_ids.clone()))
            .order_by_asc(task::Column::SortOrder)
            .order_by_asc(task::Column::Id)
            .all(&self.db)
            .await?;
        let resources = resource::Entity::find()
            .filter(resource::Column::PlanId.is_in(plan_ids))
            .order_by_asc(resource::Column::Id)
            .all(&self.db)
            .await?;

        let task_plan: HashMap<i64, i64> = tasks
            .iter()
            .map(|task| (task.id, task.plan_id))
            .collect();
        let dependencies = if task_plan.is_empty() {
            Vec::new()
        } else {
            task_dependency::Entity::find()
                .filter(
                    task_dependency::Column::DependentId
                        .is_in(task_plan.keys().copied().collect::<Vec<_>>()),
                )
                .order_by_asc(task_dependency::Column::Id)
                .all(&self.db)
                .await?
        };

        let mut milestones_by_plan: HashMap<i64, Vec<milestone::Model>> = HashMap::new();
        for milestone in milestones {
            milestones_by_plan
                .entry(milestone.plan_id)
                .or_default()
                .push(milestone);
        }
        let mut tasks_by_plan: HashMap<i64, Vec<task::Model>> = HashMap::new();
        for task in tasks {
            tasks_by_plan.entry(task.plan_id).or_default().push(task);
        }
        let mut resources_by_plan: HashMap<i64, Vec<resource::Model>> = HashMap::new();
        for resource in resources {
            resources_by_plan
                .entry(resource.plan_id)
                .or_default()
                .push(resource);
        }
        let mut dependencies_by_plan: HashMap<i64, Vec<task_dependency::Model>> = HashMap::new();
        for dependency in dependencies {
            if let Some(plan_id) = task_plan.get(&dependency.dependent_id) {
                dependencies_by_plan
                    .entry(*plan_id)
                    .or_default()
                    .push(dependency);
            }
        }

        let mut details = Vec::with_capacity(plans.len());
        for plan in plans {
            let id = plan.id;
            details.push(PlanDetail::new(
                plan,
                milestones_by_plan.remove(&id).unwrap_or_default(),
                tasks_by_plan.remove(&id).unwrap_or_default(),
                dependencies_by_plan.remove(&id).unwrap_or_default(),
                resources_by_plan.remove(&id).unwrap_or_default(),
            ));
        }
        Ok(details)
    }

    pub async fn update_plan(
        &self,
        id: i64,
        changes: PlanChanges,
    ) -> Result<plan::Model, AppError> {
        if let Some(title) = changes.title.as_deref() {
            ensure_non_empty("plan title", title)?;
        }
        if let Some(goal) = changes.goal.as_deref() {
            ensure_non_empty("plan goal", goal)?;
        }

        let mut active = plan::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        if let Some(title) = changes.title {
            active.title = Set(title);
        }
        if let Some(description) = changes.description {
            active.description = Set(blank_to_none(Some(description)));
        }
        if let Some(goal) = changes.goal {
            active.goal = Set(goal);
        }
        if let Some(timeframe) = changes.timeframe {
            active.timeframe = Set(blank_to_none(Some(timeframe)));
        }
        if let Some(status) = changes.status {
            active.status = Set(status.as_str().to_string());
        }
        active.updated_at = Set(Utc::now());

        match active.update(&self.db).await {
            Ok(model) => Ok(model),
            Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
                Err(AppError::NotFound(format!("plan id {id}")))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete_plan(&self, id: i64) -> Result<plan::Model, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<plan::Model, AppError> = async {
            let plan = plan::Entity::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("plan id {id}")))?;
            let task_ids: Vec<i64> = task::Entity::find()
                .filter(task::Column::PlanId.eq(id))
                .all(&txn)
                .await?
                .iter()
                .map(|task| task.id)
                .collect();
            delete_dependencies_touching(&txn, &task_ids).await?;
            task::Entity::delete_many()
                .filter(task::Column::PlanId.eq(id))
                .exec(&txn)
                .await?;
            milestone::Entity::delete_many()
                .filter(milestone::Column::PlanId.eq(id))
                .exec(&txn)
                .await?;
            resource::Entity::delete_many()
                .filter(resource::Column::PlanId.eq(id))
                .exec(&txn)
                .await?;
            plan::Entity::delete_by_id(id).exec(&txn).await?;
            tracing::debug!(plan_id = id, tasks = task_ids.len(), "deleted plan");
            Ok(plan)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn create_milestone(
        &self,
        input: MilestoneInput,
    ) -> Result<milestone::Model, AppError> {
        let txn = self.db.begin().await?;
        let result = self.create_milestone_with_conn(&txn, input).await;
        finalize_transaction(txn, result).await
    }

    async fn create_milestone_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        input: MilestoneInput,
    ) -> Result<milestone::Model, AppError> {
        ensure_non_empty("milestone title", &input.title)?;
        ensure_plan_exists(db, input.plan_id).await?;
        let order = match input.order {
            Some(order) => order,
            None => next_milestone_order(db, input.plan_id).await?,
        };
        let now = Utc::now();
        let active = milestone::ActiveModel {
            plan_id: Set(input.plan_id),
            title: Set(input.title),
            description: Set(blank_to_none(input.description)),
            target_date: Set(input.target_date),
            status: Set(MilestoneStatus::Pending.as_str().to_string()),
            sort_order: Set(order),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let created = active.insert(db).await?;
        touch_plan_with_conn(db, created.plan_id).await?;
        Ok(created)
    }

    pub async fn update_milestone(
        &self,
        id: i64,
        changes: MilestoneChanges,
    ) -> Result<milestone::Model, AppError> {
        if let Some(title) = changes.title.as_deref() {
            ensure_non_empty("milestone title", title)?;
        }
        let txn = self.db.begin().await?;
        let result: Result<milestone::Model, AppError> = async {
            let mut active = milestone::ActiveModel {
                id: Set(id),
                ..Default::default()
            };
            if let Some(title) = changes.title {
                active.title = Set(title);
            }
            if let Some(description) = changes.description {
                active.description = Set(blank_to_none(Some(description)));
            }
            if let Some(target_date) = changes.target_date {
                active.target_date = Set(target_date);
            }
            if let Some(status) = changes.status {
                active.status = Set(status.as_str().to_string());
            }
            if let Some(order) = changes.order {
                active.sort_order = Set(order);
            }
            active.updated_at = Set(Utc::now());

            let model = match active.update(&txn).await {
                Ok(model) => model,
                Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
                    return Err(AppError::NotFound(format!("milestone id {id}")))
                }
                Err(err) => return Err(err.into()),
            };
            touch_plan_with_conn(&txn, model.plan_id).await?;
            Ok(model)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    /// Removes the milestone together with every task filed under it.
    pub async fn delete_milestone(&self, id: i64) -> Result<milestone::Model, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<milestone::Model, AppError> = async {
            let milestone = milestone::Entity::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("milestone id {id}")))?;
            let task_ids: Vec<i64> = task::Entity::find()
                .filter(task::Column::MilestoneId.eq(id))
                .all(&txn)
                .await?
                .iter()
                .map(|task| task.id)
                .collect();
            delete_dependencies_touching(&txn, &task_ids).await?;
            if !task_ids.is_empty() {
                task::Entity::delete_many()
                    .filter(task::Column::Id.is_in(task_ids.clone()))
                    .exec(&txn)
                    .await?;
            }
            milestone::Entity::delete_by_id(id).exec(&txn).await?;
            touch_plan_with_conn(&txn, milestone.plan_id).await?;
            tracing::debug!(milestone_id = id, tasks = task_ids.len(), "deleted milestone");
            Ok(milestone)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn create_task(&self, input: TaskInput) -> Result<task::Model, AppError> {
        let txn = self.db.begin().await?;
        let result = self.create_task_with_conn(&txn, input).await;
        finalize_transaction(txn, result).await
    }

    async fn create_task_with_conn<C: ConnectionTrait>(
        &self,
        db: &C,
        input: TaskInput,
    ) -> Result<task::Model, AppError> {
        ensure_non_empty("task title", &input.title)?;
        ensure_hours("estimated hours", input.estimated_hours)?;
        ensure_plan_exists(db, input.plan_id).await?;
        if let Some(milestone_id) = input.milestone_id {
            ensure_milestone_in_plan(db, milestone_id, input.plan_id).await?;
        }
        let order = match input.order {
            Some(order) => order,
            None => next_task_order(db, input.plan_id).await?,
        };
        let now = Utc::now();
        let active = task::ActiveModel {
            plan_id: Set(input.plan_id),
            milestone_id: Set(input.milestone_id),
            title: Set(input.title),
            description: Set(blank_to_none(input.description)),
            status: Set(TaskStatus::Todo.as_str().to_string()),
            priority: Set(input.priority.unwrap_or_default().as_str().to_string()),
            estimated_hours: Set(input.estimated_hours),
            actual_hours: Set(None),
            due_date: Set(input.due_date),
            completed_at: Set(None),
            sort_order: Set(order),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let created = active.insert(db).await?;
        touch_plan_with_conn(db, created.plan_id).await?;
        Ok(created)
    }

    pub async fn update_task(
        &self,
        id: i64,
        changes: TaskChanges,
    ) -> Result<task::Model, AppError> {
        if let Some(title) = changes.title.as_deref() {
            ensure_non_empty("task title", title)?;
        }
        ensure_hours("estimated hours", changes.estimated_hours)?;
        ensure_hours("actual hours", changes.actual_hours)?;

        let txn = self.db.begin().await?;
        let result: Result<task::Model, AppError> = async {
            let existing = task::Entity::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task id {id}")))?;
            if let Some(Some(milestone_id)) = changes.milestone_id {
                ensure_milestone_in_plan(&txn, milestone_id, existing.plan_id).await?;
            }

            let now = Utc::now();
            let was_completed = existing.status == TaskStatus::Completed.as_str();
            let will_complete = match changes.status {
                Some(status) => status == TaskStatus::Completed,
                None => was_completed,
            };

            let mut active: task::ActiveModel = existing.clone().into();
            if let Some(title) = changes.title {
                active.title = Set(title);
            }
            if let Some(description) = changes.description {
                active.description = Set(blank_to_none(Some(description)));
            }
            if let Some(status) = changes.status {
                active.status = Set(status.as_str().to_string());
            }
            if let Some(priority) = changes.priority {
                active.priority = Set(priority.as_str().to_string());
            }
            if let Some(hours) = changes.estimated_hours {
                active.estimated_hours = Set(Some(hours));
            }
            if let Some(hours) = changes.actual_hours {
                active.actual_hours = Set(Some(hours));
            }
            if let Some(due_date) = changes.due_date {
                active.due_date = Set(due_date);
            }
            if let Some(order) = changes.order {
                active.sort_order = Set(order);
            }
            if let Some(milestone_id) = changes.milestone_id {
                active.milestone_id = Set(milestone_id);
            }
            match (will_complete, changes.completed_at) {
                (true, Some(at)) => active.completed_at = Set(Some(at)),
                (true, None) if !was_completed || existing.completed_at.is_none() => {
                    active.completed_at = Set(Some(now))
                }
                (false, _) if existing.completed_at.is_some() => active.completed_at = Set(None),
                _ => {}
            }
            active.updated_at = Set(now);

            let model = active.update(&txn).await?;
            touch_plan_with_conn(&txn, model.plan_id).await?;
            Ok(model)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn get_task(&self, id: i64) -> Result<task::Model, AppError> {
        task::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task id {id}")))
    }

    pub async fn set_task_status(
        &self,
        id: i64,
        status: TaskStatus,
    ) -> Result<task::Model, AppError> {
        self.update_task(
            id,
            TaskChanges {
                status: Some(status),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_task(&self, id: i64) -> Result<task::Model, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<task::Model, AppError> = async {
            let task = task::Entity::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task id {id}")))?;
            delete_dependencies_touching(&txn, &[id]).await?;
            task::Entity::delete_by_id(id).exec(&txn).await?;
            touch_plan_with_conn(&txn, task.plan_id).await?;
            Ok(task)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn create_task_dependency(
        &self,
        dependent_id: i64,
        prerequisite_id: i64,
    ) -> Result<task_dependency::Model, AppError> {
        if dependent_id == prerequisite_id {
            return Err(AppError::InvalidInput(format!(
                "task id {dependent_id} cannot depend on itself"
            )));
        }
        let txn = self.db.begin().await?;
        let result: Result<task_dependency::Model, AppError> = async {
            let dependent = task::Entity::find_by_id(dependent_id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task id {dependent_id}")))?;
            let prerequisite = task::Entity::find_by_id(prerequisite_id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task id {prerequisite_id}")))?;
            if dependent.plan_id != prerequisite.plan_id {
                return Err(AppError::InvalidInput(format!(
                    "task id {dependent_id} and task id {prerequisite_id} belong to different plans"
                )));
            }

            let plan_task_ids: Vec<i64> = task::Entity::find()
                .filter(task::Column::PlanId.eq(dependent.plan_id))
                .all(&txn)
                .await?
                .iter()
                .map(|task| task.id)
                .collect();
            let edges: Vec<(i64, i64)> = task_dependency::Entity::find()
                .filter(task_dependency::Column::DependentId.is_in(plan_task_ids))
                .all(&txn)
                .await?
                .iter()
                .map(|edge| (edge.dependent_id, edge.prerequisite_id))
                .collect();
            if edges.contains(&(dependent_id, prerequisite_id)) {
                return Err(AppError::InvalidInput(format!(
                    "task id {dependent_id} already depends on task id {prerequisite_id}"
                )));
            }
            if creates_cycle(&edges, dependent_id, prerequisite_id) {
                return Err(AppError::InvalidInput(format!(
                    "task id {prerequisite_id} already depends on task id {dependent_id}; \
                     the link would form a cycle"
                )));
            }

            let active = task_dependency::ActiveModel {
                dependent_id: Set(dependent_id),
                prerequisite_id: Set(prerequisite_id),
                created_at: Set(Utc::now()),
                ..Default::default()
            };
            let created = active.insert(&txn).await?;
            touch_plan_with_conn(&txn, dependent.plan_id).await?;
            Ok(created)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn delete_task_dependency(
        &self,
        dependent_id: i64,
        prerequisite_id: i64,
    ) -> Result<task_dependency::Model, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<task_dependency::Model, AppError> = async {
            let existing = task_dependency::Entity::find()
                .filter(task_dependency::Column::DependentId.eq(dependent_id))
                .filter(task_dependency::Column::PrerequisiteId.eq(prerequisite_id))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "dependency of task id {dependent_id} on task id {prerequisite_id}"
                    ))
                })?;
            let dependent = task::Entity::find_by_id(dependent_id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("task id {dependent_id}")))?;
            task_dependency::Entity::delete_by_id(existing.id)
                .exec(&txn)
                .await?;
            touch_plan_with_conn(&txn, dependent.plan_id).await?;
            Ok(existing)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn create_resource(&self, input: ResourceInput) -> Result<resource::Model, AppError> {
        ensure_non_empty("resource title", &input.title)?;
        ensure_non_empty("resource type", &input.resource_type)?;
        let txn = self.db.begin().await?;
        let result: Result<resource::Model, AppError> = async {
            ensure_plan_exists(&txn, input.plan_id).await?;
            let now = Utc::now();
            let active = resource::ActiveModel {
                plan_id: Set(input.plan_id),
                title: Set(input.title),
                description: Set(blank_to_none(input.description)),
                url: Set(blank_to_none(input.url)),
                resource_type: Set(input.resource_type),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            };
            let created = active.insert(&txn).await?;
            touch_plan_with_conn(&txn, created.plan_id).await?;
            Ok(created)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn update_resource(
        &self,
        id: i64,
        changes: ResourceChanges,
    ) -> Result<resource::Model, AppError> {
        if let Some(title) = changes.title.as_deref() {
            ensure_non_empty("resource title", title)?;
        }
        if let Some(kind) = changes.resource_type.as_deref() {
            ensure_non_empty("resource type", kind)?;
        }
        let mut active = resource::ActiveModel {
            id: Set(id),
            ..Default::default()
        };
        if let Some(title) = changes.title {
            active.title = Set(title);
        }
        if let Some(description) = changes.description {
            active.description = Set(blank_to_none(Some(description)));
        }
        if let Some(url) = changes.url {
            active.url = Set(blank_to_none(Some(url)));
        }
        if let Some(kind) = changes.resource_type {
            active.resource_type = Set(kind);
        }
        active.updated_at = Set(Utc::now());

        let txn = self.db.begin().await?;
        let result: Result<resource::Model, AppError> = async {
            let updated = match active.update(&txn).await {
                Ok(model) => model,
                Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
                    return Err(AppError::NotFound(format!("resource id {id}")));
                }
                Err(err) => return Err(err.into()),
            };
            touch_plan_with_conn(&txn, updated.plan_id).await?;
            Ok(updated)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    pub async fn delete_resource(&self, id: i64) -> Result<resource::Model, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<resource::Model, AppError> = async {
            let existing = resource::Entity::find_by_id(id)
                .one(&txn)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("resource id {id}")))?;
            resource::Entity::delete_by_id(id).exec(&txn).await?;
            touch_plan_with_conn(&txn, existing.plan_id).await?;
            Ok(existing)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    /// Reads the settings row, creating it with defaults on first use.
    pub async fn get_settings(&self) -> Result<settings::Model, AppError> {
        if let Some(existing) = settings::Entity::find_by_id(SETTINGS_ID)
            .one(&self.db)
            .await?
        {
            return Ok(existing);
        }
        let now = Utc::now();
        let active = settings::ActiveModel {
            id: Set(SETTINGS_ID),
            theme: Set(DEFAULT_THEME.to_string()),
            language: Set(DEFAULT_LANGUAGE.to_string()),
            openai_api_key: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(active.insert(&self.db).await?)
    }

    pub async fn update_settings(
        &self,
        changes: SettingsChanges,
    ) -> Result<settings::Model, AppError> {
        if let Some(theme) = changes.theme.as_deref() {
            ensure_non_empty("theme", theme)?;
        }
        if let Some(language) = changes.language.as_deref() {
            ensure_non_empty("language", language)?;
        }
        let current = self.get_settings().await?;
        let mut active: settings::ActiveModel = current.into();
        if let Some(theme) = changes.theme {
            active.theme = Set(theme);
        }
        if let Some(language) = changes.language {
            active.language = Set(language);
        }
        if let Some(key) = changes.openai_api_key {
            active.openai_api_key = Set(blank_to_none(Some(key)));
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(&self.db).await?)
    }

    pub async fn plan_stats(&self, plan_id: i64) -> Result<PlanStats, AppError> {
        let detail = self.get_plan(plan_id).await?;
        Ok(progress::plan_stats(&detail.milestones, &detail.tasks))
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let details = self.list_plans().await?;
        Ok(progress::dashboard_stats(&details, Utc::now()))
    }

    /// Persists an AI plan draft: milestones keep their array position as the
    /// `milestoneIndex` key, and `prerequisites` are matched to task titles.
    pub async fn apply_generated_plan(
        &self,
        goal: &str,
        timeframe: Option<&str>,
        generated: &GeneratedPlan,
    ) -> Result<PlanDetail, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<i64, AppError> = async {
            let timeframe = timeframe
                .map(str::to_string)
                .or_else(|| Some(generated.estimated_timeframe.clone()));
            let plan = self
                .create_plan_with_conn(
                    &txn,
                    PlanInput {
                        title: generated.title.clone(),
                        description: Some(generated.description.clone()),
                        goal: goal.to_string(),
                        timeframe,
                    },
                )
                .await?;

            let mut milestone_ids = Vec::with_capacity(generated.milestones.len());
            for (idx, item) in generated.milestones.iter().enumerate() {
                let created = self
                    .create_milestone_with_conn(
                        &txn,
                        MilestoneInput {
                            plan_id: plan.id,
                            title: item.title.clone(),
                            description: Some(item.description.clone()),
                            target_date: None,
                            order: Some(item.order.unwrap_or(idx as i32 + 1)),
                        },
                    )
                    .await?;
                milestone_ids.push(created.id);
            }

            let mut title_to_id: HashMap<String, i64> = HashMap::new();
            let mut created_tasks = Vec::with_capacity(generated.tasks.len());
            for (idx, item) in generated.tasks.iter().enumerate() {
                let milestone_id = match item.milestone_index {
                    Some(index) => {
                        let found = milestone_ids.get(index).copied();
                        if found.is_none() {
                            tracing::warn!(
                                task = %item.title,
                                index,
                                "generated task points at a missing milestone"
                            );
                        }
                        found
                    }
                    None => None,
                };
                let created = self
                    .create_task_with_conn(
                        &txn,
                        task_input_from_generated(plan.id, milestone_id, item, idx),
                    )
                    .await?;
                title_to_id
                    .entry(created.title.to_lowercase())
                    .or_insert(created.id);
                created_tasks.push((created.id, item));
            }

            let mut edges: Vec<(i64, i64)> = Vec::new();
            for (task_id, item) in &created_tasks {
                for title in &item.prerequisites {
                    let Some(prerequisite_id) = title_to_id.get(&title.to_lowercase()).copied()
                    else {
                        tracing::debug!(prerequisite = %title, "unknown prerequisite title");
                        continue;
                    };
                    if prerequisite_id == *task_id
                        || edges.contains(&(*task_id, prerequisite_id))
                        || creates_cycle(&edges, *task_id, prerequisite_id)
                    {
                        continue;
                    }
                    task_dependency::ActiveModel {
                        dependent_id: Set(*task_id),
                        prerequisite_id: Set(prerequisite_id),
                        created_at: Set(Utc::now()),
                        ..Default::default()
                    }
                    .insert(&txn)
                    .await?;
                    edges.push((*task_id, prerequisite_id));
                }
            }

            Ok(plan.id)
        }
        .await;

        let plan_id = finalize_transaction(txn, result).await?;
        self.get_plan(plan_id).await
    }

    /// Attaches generated tasks to an existing plan. `milestoneName` matches an
    /// existing milestone title case-insensitively; unknown names create one.
    pub async fn apply_generated_tasks(
        &self,
        plan_id: i64,
        generated: &[GeneratedTask],
    ) -> Result<Vec<task::Model>, AppError> {
        let txn = self.db.begin().await?;
        let result: Result<Vec<task::Model>, AppError> = async {
            ensure_plan_exists(&txn, plan_id).await?;
            let mut milestones = milestone::Entity::find()
                .filter(milestone::Column::PlanId.eq(plan_id))
                .order_by_asc(milestone::Column::SortOrder)
                .all(&txn)
                .await?;
            let existing_tasks = task::Entity::find()
                .filter(task::Column::PlanId.eq(plan_id))
                .count(&txn)
                .await? as usize;

            let mut created = Vec::with_capacity(generated.len());
            for (idx, item) in generated.iter().enumerate() {
                let milestone_id = match item.milestone_name.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() => {
                        let found = milestones
                            .iter()
                            .find(|milestone| milestone.title.to_lowercase() == name.to_lowercase())
                            .map(|milestone| milestone.id);
                        match found {
                            Some(id) => Some(id),
                            None => {
                                let milestone = self
                                    .create_milestone_with_conn(
                                        &txn,
                                        MilestoneInput {
                                            plan_id,
                                            title: name.to_string(),
                                            description: None,
                                            target_date: None,
                                            order: Some(milestones.len() as i32 + 1),
                                        },
                                    )
                                    .await?;
                                let id = milestone.id;
                                milestones.push(milestone);
                                Some(id)
                            }
                        }
                    }
                    _ => None,
                };
                let task = self
                    .create_task_with_conn(
                        &txn,
                        task_input_from_generated(
                            plan_id,
                            milestone_id,
                            item,
                            existing_tasks + idx,
                        ),
                    )
                    .await?;
                created.push(task);
            }
            Ok(created)
        }
        .await;

        finalize_transaction(txn, result).await
    }

    /// Inserts a plan tree read from a backup. Ids are reassigned; references
    /// between milestones, tasks and dependencies are remapped.
    pub async fn import_plan(
        &self,
        imported: crate::backup::ImportedPlan,
    ) -> Result<i64, AppError> {
        ensure_non_empty("plan title", &imported.title)?;
        let txn = self.db.begin().await?;
        let result: Result<i64, AppError> = async {
            let now = Utc::now();
            let plan = plan::ActiveModel {
                title: Set(imported.title),
                description: Set(imported.description),
                goal: Set(imported.goal),
                timeframe: Set(imported.timeframe),
                status: Set(imported.status),
                created_at: Set(imported.created_at.unwrap_or(now)),
                updated_at: Set(imported.updated_at.unwrap_or(now)),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            let mut milestone_map: HashMap<i64, i64> = HashMap::new();
            for item in imported.milestones {
                let created = milestone::ActiveModel {
                    plan_id: Set(plan.id),
                    title: Set(item.title),
                    description: Set(item.description),
                    target_date: Set(item.target_date),
                    status: Set(item.status),
                    sort_order: Set(item.order),
                    created_at: Set(item.created_at.unwrap_or(now)),
                    updated_at: Set(item.updated_at.unwrap_or(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                if let Some(old_id) = item.id {
                    milestone_map.insert(old_id, created.id);
                }
            }

            let mut task_map: HashMap<i64, i64> = HashMap::new();
            for item in imported.tasks {
                let milestone_id = item
                    .milestone_id
                    .and_then(|old| milestone_map.get(&old).copied());
                let created = task::ActiveModel {
                    plan_id: Set(plan.id),
                    milestone_id: Set(milestone_id),
                    title: Set(item.title),
                    description: Set(item.description),
                    status: Set(item.status),
                    priority: Set(item.priority),
                    estimated_hours: Set(item.estimated_hours),
                    actual_hours: Set(item.actual_hours),
                    due_date: Set(item.due_date),
                    completed_at: Set(item.completed_at),
                    sort_order: Set(item.order),
                    created_at: Set(item.created_at.unwrap_or(now)),
                    updated_at: Set(item.updated_at.unwrap_or(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                if let Some(old_id) = item.id {
                    task_map.insert(old_id, created.id);
                }
            }

            let mut seen = HashSet::new();
            for item in imported.dependencies {
                let (Some(dependent_id), Some(prerequisite_id)) = (
                    task_map.get(&item.dependent_id).copied(),
                    task_map.get(&item.prerequisite_id).copied(),
                ) else {
                    continue;
                };
                if !seen.insert((dependent_id, prerequisite_id)) {
                    continue;
                }
                task_dependency::ActiveModel {
                    dependent_id: Set(dependent_id),
                    prerequisite_id: Set(prerequisite_id),
                    created_at: Set(item.created_at.unwrap_or(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }

            for item in imported.resources {
                resource::ActiveModel {
                    plan_id: Set(plan.id),
                    title: Set(item.title),
                    description: Set(item.description),
                    url: Set(item.url),
                    resource_type: Set(item.resource_type),
                    created_at: Set(item.created_at.unwrap_or(now)),
                    updated_at: Set(item.updated_at.unwrap_or(now)),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
            }

            Ok(plan.id)
        }
        .await;

        finalize_transaction(txn, result).await
    }
}

async fn ensure_plan_exists<C: ConnectionTrait>(db: &C, plan_id: i64) -> Result<(), AppError> {
    plan::Entity::find_by_id(plan_id)
        .one(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("plan id {plan_id}")))
}

async fn ensure_milestone_in_plan<C: ConnectionTrait>(
    db: &C,
    milestone_id: i64,
    plan_id: i64,
) -> Result<(), AppError> {
    let milestone = milestone::Entity::find_by_id(milestone_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("milestone id {milestone_id}")))?;
    if milestone.plan_id != plan_id {
        return Err(AppError::InvalidInput(format!(
            "milestone id {milestone_id} belongs to plan id {}, not plan id {plan_id}",
            milestone.plan_id
        )));
    }
    Ok(())
}

async fn next_milestone_order<C: ConnectionTrait>(db: &C, plan_id: i64) -> Result<i32, AppError> {
    let count = milestone::Entity::find()
        .filter(milestone::Column::PlanId.eq(plan_id))
        .count(db)
        .await?;
    Ok(count as i32 + 1)
}

async fn next_task_order<C: ConnectionTrait>(db: &C, plan_id: i64) -> Result<i32, AppError> {
    let count = task::Entity::find()
        .filter(task::Column::PlanId.eq(plan_id))
        .count(db)
        .await?;
    Ok(count as i32 + 1)
}

async fn delete_dependencies_touching<C: ConnectionTrait>(
    db: &C,
    task_ids: &[i64],
) -> Result<(), AppError> {
    if task_ids.is_empty() {
        return Ok(());
    }
    task_dependency::Entity::delete_many()
        .filter(
            Condition::any()
                .add(task_dependency::Column::DependentId.is_in(task_ids.to_vec()))
                .add(task_dependency::Column::PrerequisiteId.is_in(task_ids.to_vec())),
        )
        .exec(db)
        .await?;
    Ok(())
}

async fn touch_plan_with_conn<C: ConnectionTrait>(db: &C, plan_id: i64) -> Result<(), AppError> {
    let active = plan::ActiveModel {
        id: Set(plan_id),
        updated_at: Set(Utc::now()),
        ..Default::default()
    };
    match active.update(db).await {
        Ok(_) => Ok(()),
        Err(sea_orm::DbErr::RecordNotFound(_)) | Err(sea_orm::DbErr::RecordNotUpdated) => {
            Err(AppError::NotFound(format!("plan id {plan_id}")))
        }
        Err(err) => Err(err.into()),
    }
}

/// True when `prerequisite` already reaches `dependent` through `edges`
/// (each edge points from a dependent task to its prerequisite).
fn creates_cycle(edges: &[(i64, i64)], dependent: i64, prerequisite: i64) -> bool {
    let mut stack = vec![prerequisite];
    let mut visited = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == dependent {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        for (from, to) in edges {
            if *from == current {
                stack.push(*to);
            }
        }
    }
    false
}

fn task_input_from_generated(
    plan_id: i64,
    milestone_id: Option<i64>,
    item: &GeneratedTask,
    idx: usize,
) -> TaskInput {
    TaskInput {
        plan_id,
        milestone_id,
        title: item.title.clone(),
        description: Some(item.description.clone()),
        priority: Some(item.priority.unwrap_or(TaskPriority::Medium)),
        estimated_hours: item.estimated_hours.filter(|hours| *hours >= 0.0),
        due_date: None,
        order: Some(item.order.unwrap_or(idx as i32 + 1)),
    }
}

async fn finalize_transaction<T>(
    txn: DatabaseTransaction,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                return Err(rollback_err.into());
            }
            Err(err)
        }
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

pub(crate) fn ensure_non_empty(label: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{label} cannot be empty")));
    }
    Ok(())
}

pub(crate) fn ensure_hours(label: &str, value: Option<f64>) -> Result<(), AppError> {
    match value {
        Some(hours) if !hours.is_finite() || hours < 0.0 => Err(AppError::InvalidInput(format!(
            "{label} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ai::types::GeneratedMilestone;
    use crate::{config, db};
    use chrono::Duration;
    use tempfile::TempDir;

    pub(crate) async fn setup_app() -> (TempDir, App) {
        let dir = TempDir::new().expect("temp dir");
        let db_path = config::resolve_db_path(dir.path());
        db::ensure_parent_dir(&db_path).expect("ensure parent");
        let db = db::connect(&db_path).await.expect("connect db");
        db::ensure_schema(&db).await.expect("ensure schema");
        (dir, App::new(db))
    }

    async fn create_plan(app: &App, title: &str) -> plan::Model {
        app.create_plan(PlanInput {
            title: title.to_string(),
            goal: "Goal".to_string(),
            ..Default::default()
        })
        .await
        .expect("create plan")
    }

    async fn create_milestone(app: &App, plan_id: i64, title: &str) -> milestone::Model {
        app.create_milestone(MilestoneInput {
            plan_id,
            title: title.to_string(),
            ..Default::default()
        })
        .await
        .expect("create milestone")
    }

    async fn create_task(
        app: &App,
        plan_id: i64,
        milestone_id: Option<i64>,
        title: &str,
    ) -> task::Model {
        app.create_task(TaskInput {
            plan_id,
            milestone_id,
            title: title.to_string(),
            ..Default::default()
        })
        .await
        .expect("create task")
    }

    #[tokio::test]
    async fn new_plan_defaults_to_active_without_progress() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Learn Rust").await;
        assert_eq!(plan.status, "ACTIVE");

        let detail = app.get_plan(plan.id).await.expect("detail");
        assert_eq!(detail.progress, 0);
        assert_eq!(detail.dynamic_status, "ACTIVE");
        assert!(detail.tasks.is_empty());
    }

    #[tokio::test]
    async fn create_plan_rejects_blank_goal() {
        let (_dir, app) = setup_app().await;
        let err = app
            .create_plan(PlanInput {
                title: "Plan".to_string(),
                goal: "   ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        match err {
            AppError::InvalidInput(message) => assert!(message.contains("plan goal")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn milestone_and_task_orders_default_to_next_position() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let first = create_milestone(&app, plan.id, "One").await;
        let second = create_milestone(&app, plan.id, "Two").await;
        assert_eq!((first.sort_order, second.sort_order), (1, 2));

        let task_a = create_task(&app, plan.id, None, "A").await;
        let task_b = create_task(&app, plan.id, Some(first.id), "B").await;
        assert_eq!((task_a.sort_order, task_b.sort_order), (1, 2));
        assert_eq!(task_b.priority, "MEDIUM");
        assert_eq!(task_b.status, "TODO");
    }

    #[tokio::test]
    async fn deleting_milestone_removes_its_tasks() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let milestone = create_milestone(&app, plan.id, "Phase").await;
        let mut owned = Vec::new();
        for idx in 0..3 {
            owned.push(create_task(&app, plan.id, Some(milestone.id), &format!("T{idx}")).await);
        }
        let loose = create_task(&app, plan.id, None, "Loose").await;
        app.create_task_dependency(loose.id, owned[0].id)
            .await
            .expect("dependency");

        let deleted = app.delete_milestone(milestone.id).await.expect("delete");
        assert_eq!(deleted.id, milestone.id);

        let detail = app.get_plan(plan.id).await.expect("detail");
        assert!(detail.milestones.is_empty());
        assert_eq!(detail.tasks.len(), 1);
        assert_eq!(detail.tasks[0].id, loose.id);
        assert!(detail.dependencies.is_empty());
    }

    #[tokio::test]
    async fn task_rejects_milestone_from_another_plan() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let other = create_plan(&app, "Other").await;
        let foreign = create_milestone(&app, other.id, "Foreign").await;

        let err = app
            .create_task(TaskInput {
                plan_id: plan.id,
                milestone_id: Some(foreign.id),
                title: "Task".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let task = create_task(&app, plan.id, None, "Task").await;
        let err = app
            .update_task(
                task.id,
                TaskChanges {
                    milestone_id: Some(Some(foreign.id)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn completing_task_stamps_and_reopening_clears_completed_at() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let task = create_task(&app, plan.id, None, "Task").await;

        let done = app
            .set_task_status(task.id, TaskStatus::Completed)
            .await
            .expect("complete");
        assert!(done.completed_at.is_some());

        let detail = app.get_plan(plan.id).await.expect("detail");
        assert_eq!(detail.dynamic_status, "COMPLETED");
        assert_eq!(detail.progress, 100);
        assert_eq!(detail.plan.status, "ACTIVE");

        let reopened = app
            .set_task_status(task.id, TaskStatus::InProgress)
            .await
            .expect("reopen");
        assert!(reopened.completed_at.is_none());
    }

    #[tokio::test]
    async fn update_task_clears_milestone_with_explicit_null() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let milestone = create_milestone(&app, plan.id, "Phase").await;
        let task = create_task(&app, plan.id, Some(milestone.id), "Task").await;

        let updated = app
            .update_task(
                task.id,
                TaskChanges {
                    milestone_id: Some(None),
                    actual_hours: Some(2.5),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.milestone_id, None);
        assert_eq!(updated.actual_hours, Some(2.5));
    }

    #[tokio::test]
    async fn negative_hours_are_rejected() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let err = app
            .create_task(TaskInput {
                plan_id: plan.id,
                title: "Task".to_string(),
                estimated_hours: Some(-1.0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn dependencies_reject_self_duplicates_and_cycles() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let a = create_task(&app, plan.id, None, "A").await;
        let b = create_task(&app, plan.id, None, "B").await;
        let c = create_task(&app, plan.id, None, "C").await;

        assert!(matches!(
            app.create_task_dependency(a.id, a.id).await.unwrap_err(),
            AppError::InvalidInput(_)
        ));

        app.create_task_dependency(a.id, b.id).await.expect("a->b");
        app.create_task_dependency(b.id, c.id).await.expect("b->c");
        assert!(matches!(
            app.create_task_dependency(a.id, b.id).await.unwrap_err(),
            AppError::InvalidInput(_)
        ));
        let err = app.create_task_dependency(c.id, a.id).await.unwrap_err();
        match err {
            AppError::InvalidInput(message) => assert!(message.contains("cycle")),
            other => panic!("unexpected error: {other}"),
        }

        let removed = app.delete_task_dependency(a.id, b.id).await.expect("remove");
        assert_eq!((removed.dependent_id, removed.prerequisite_id), (a.id, b.id));
        app.create_task_dependency(c.id, a.id).await.expect("c->a now acyclic");
        assert!(matches!(
            app.delete_task_dependency(a.id, b.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn dependencies_must_stay_within_one_plan() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let other = create_plan(&app, "Other").await;
        let a = create_task(&app, plan.id, None, "A").await;
        let b = create_task(&app, other.id, None, "B").await;
        assert!(matches!(
            app.create_task_dependency(a.id, b.id).await.unwrap_err(),
            AppError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn delete_plan_cascades_everything() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let milestone = create_milestone(&app, plan.id, "Phase").await;
        let a = create_task(&app, plan.id, Some(milestone.id), "A").await;
        let b = create_task(&app, plan.id, None, "B").await;
        app.create_task_dependency(b.id, a.id).await.expect("dep");
        app.create_resource(ResourceInput {
            plan_id: plan.id,
            title: "Docs".to_string(),
            resource_type: "LINK".to_string(),
            url: Some("https://example.com".to_string()),
            ..Default::default()
        })
        .await
        .expect("resource");

        let deleted = app.delete_plan(plan.id).await.expect("delete");
        assert_eq!(deleted.title, "Plan");
        assert!(matches!(
            app.get_plan(plan.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert_eq!(task::Entity::find().count(&app.db).await.expect("tasks"), 0);
        assert_eq!(milestone::Entity::find().count(&app.db).await.expect("milestones"), 0);
        assert_eq!(resource::Entity::find().count(&app.db).await.expect("resources"), 0);
        assert_eq!(
            task_dependency::Entity::find().count(&app.db).await.expect("deps"),
            0
        );
    }

    #[tokio::test]
    async fn missing_ids_report_not_found() {
        let (_dir, app) = setup_app().await;
        assert!(matches!(
            app.update_plan(99, PlanChanges::default()).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            app.delete_task(99).await.unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            app.update_resource(99, ResourceChanges {
                title: Some("x".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err(),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            app.delete_milestone(99).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn paused_plan_keeps_status_when_all_tasks_complete() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let task = create_task(&app, plan.id, None, "Task").await;
        app.set_task_status(task.id, TaskStatus::Completed)
            .await
            .expect("complete");
        app.update_plan(
            plan.id,
            PlanChanges {
                status: Some(PlanStatus::Paused),
                ..Default::default()
            },
        )
        .await
        .expect("pause");

        let detail = app.get_plan(plan.id).await.expect("detail");
        assert_eq!(detail.dynamic_status, "PAUSED");
        assert_eq!(detail.progress, 100);
    }

    #[tokio::test]
    async fn settings_are_created_with_defaults_and_clear_blank_keys() {
        let (_dir, app) = setup_app().await;
        let settings = app.get_settings().await.expect("settings");
        assert_eq!(settings.theme, DEFAULT_THEME);
        assert_eq!(settings.language, DEFAULT_LANGUAGE);
        assert_eq!(settings.openai_api_key, None);

        let updated = app
            .update_settings(SettingsChanges {
                theme: Some("dark".to_string()),
                openai_api_key: Some("sk-test".to_string()),
                ..Default::default()
            })
            .await
            .expect("update");
        assert_eq!(updated.theme, "dark");
        assert_eq!(updated.openai_api_key.as_deref(), Some("sk-test"));

        let cleared = app
            .update_settings(SettingsChanges {
                openai_api_key: Some(String::new()),
                ..Default::default()
            })
            .await
            .expect("clear");
        assert_eq!(cleared.openai_api_key, None);
        assert_eq!(cleared.theme, "dark");
    }

    #[tokio::test]
    async fn stats_cover_progress_hours_and_overdue_tasks() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let milestone = create_milestone(&app, plan.id, "Phase").await;
        let a = app
            .create_task(TaskInput {
                plan_id: plan.id,
                milestone_id: Some(milestone.id),
                title: "A".to_string(),
                estimated_hours: Some(4.0),
                due_date: Some(Utc::now() - Duration::days(2)),
                ..Default::default()
            })
            .await
            .expect("a");
        let b = app
            .create_task(TaskInput {
                plan_id: plan.id,
                title: "B".to_string(),
                estimated_hours: Some(2.0),
                due_date: Some(Utc::now() - Duration::days(1)),
                ..Default::default()
            })
            .await
            .expect("b");
        app.update_task(
            a.id,
            TaskChanges {
                status: Some(TaskStatus::Completed),
                actual_hours: Some(5.0),
                ..Default::default()
            },
        )
        .await
        .expect("complete a");
        create_plan(&app, "Empty").await;

        let stats = app.plan_stats(plan.id).await.expect("plan stats");
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.task_progress, 50);
        assert_eq!(stats.total_milestones, 1);
        assert_eq!(stats.milestone_progress, 0);
        assert_eq!(stats.total_estimated_hours, 6.0);
        assert_eq!(stats.total_actual_hours, 5.0);
        assert_eq!(stats.overall_progress, 25);

        let dashboard = app.dashboard_stats().await.expect("dashboard");
        assert_eq!(dashboard.total_plans, 2);
        assert_eq!(dashboard.active_plans, 2);
        assert_eq!(dashboard.completed_plans, 0);
        assert_eq!(dashboard.total_tasks, 2);
        assert_eq!(dashboard.completed_tasks, 1);
        assert_eq!(dashboard.overdue_tasks, 1);
        assert_eq!(dashboard.task_completion_rate, 50);

        app.set_task_status(b.id, TaskStatus::Completed)
            .await
            .expect("complete b");
        let dashboard = app.dashboard_stats().await.expect("dashboard");
        assert_eq!(dashboard.completed_plans, 1);
        assert_eq!(dashboard.active_plans, 1);
        assert_eq!(dashboard.overdue_tasks, 0);
    }

    #[tokio::test]
    async fn apply_generated_plan_links_milestones_and_prerequisites() {
        let (_dir, app) = setup_app().await;
        let generated = GeneratedPlan {
            title: "Launch a podcast".to_string(),
            description: "Ship the first episodes".to_string(),
            milestones: vec![
                GeneratedMilestone {
                    title: "Prepare".to_string(),
                    description: "Gear and format".to_string(),
                    order: Some(1),
                    estimated_duration: Some("2 weeks".to_string()),
                },
                GeneratedMilestone {
                    title: "Record".to_string(),
                    description: "Episodes".to_string(),
                    order: Some(2),
                    estimated_duration: None,
                },
            ],
            tasks: vec![
                GeneratedTask {
                    title: "Buy microphone".to_string(),
                    description: "USB mic".to_string(),
                    priority: Some(TaskPriority::High),
                    estimated_hours: Some(2.0),
                    milestone_index: Some(0),
                    order: Some(1),
                    ..Default::default()
                },
                GeneratedTask {
                    title: "Record pilot".to_string(),
                    description: "First take".to_string(),
                    milestone_index: Some(1),
                    order: Some(2),
                    prerequisites: vec!["buy MICROPHONE".to_string(), "Unknown".to_string()],
                    ..Default::default()
                },
                GeneratedTask {
                    title: "Orphan".to_string(),
                    description: "Bad index".to_string(),
                    milestone_index: Some(9),
                    ..Default::default()
                },
            ],
            estimated_timeframe: "2 months".to_string(),
            tips: vec!["Be consistent".to_string()],
        };

        let detail = app
            .apply_generated_plan("Launch a podcast", None, &generated)
            .await
            .expect("apply");
        assert_eq!(detail.plan.goal, "Launch a podcast");
        assert_eq!(detail.plan.timeframe.as_deref(), Some("2 months"));
        assert_eq!(detail.milestones.len(), 2);
        assert_eq!(detail.tasks.len(), 3);
        assert_eq!(detail.tasks[0].milestone_id, Some(detail.milestones[0].id));
        assert_eq!(detail.tasks[0].priority, "HIGH");
        assert_eq!(detail.tasks[2].milestone_id, None);
        assert_eq!(detail.dependencies.len(), 1);
        assert_eq!(detail.dependencies[0].dependent_id, detail.tasks[1].id);
        assert_eq!(detail.dependencies[0].prerequisite_id, detail.tasks[0].id);
    }

    #[tokio::test]
    async fn apply_generated_tasks_reuses_and_creates_milestones() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Plan").await;
        let existing = create_milestone(&app, plan.id, "Existing Milestone").await;
        create_task(&app, plan.id, None, "Already there").await;

        let created = app
            .apply_generated_tasks(
                plan.id,
                &[
                    GeneratedTask {
                        title: "Task 1".to_string(),
                        description: "Desc 1".to_string(),
                        milestone_name: Some("existing milestone".to_string()),
                        ..Default::default()
                    },
                    GeneratedTask {
                        title: "Task 2".to_string(),
                        description: "Desc 2".to_string(),
                        milestone_name: Some("New Milestone".to_string()),
                        ..Default::default()
                    },
                    GeneratedTask {
                        title: "Task 3".to_string(),
                        description: "Desc 3".to_string(),
                        milestone_name: Some("new milestone".to_string()),
                        ..Default::default()
                    },
                ],
            )
            .await
            .expect("apply tasks");

        assert_eq!(created.len(), 3);
        assert_eq!(created[0].milestone_id, Some(existing.id));
        assert_eq!(created[0].sort_order, 2);
        let detail = app.get_plan(plan.id).await.expect("detail");
        assert_eq!(detail.milestones.len(), 2);
        assert_eq!(detail.milestones[1].title, "New Milestone");
        assert_eq!(detail.milestones[1].sort_order, 2);
        assert_eq!(created[1].milestone_id, Some(detail.milestones[1].id));
        assert_eq!(created[2].milestone_id, created[1].milestone_id);
    }

    #[test]
    fn cycle_check_follows_prerequisite_chains() {
        let edges = vec![(1, 2), (2, 3)];
        assert!(creates_cycle(&edges, 3, 1));
        assert!(!creates_cycle(&edges, 1, 3));
        assert!(!creates_cycle(&edges, 4, 1));
    }

    async fn plan_updated_at(app: &App, plan_id: i64) -> chrono::DateTime<Utc> {
        app.get_plan_model(plan_id).await.expect("plan").updated_at
    }

    async fn tick() {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn dependency_and_resource_edits_touch_the_plan() {
        let (_dir, app) = setup_app().await;
        let plan = create_plan(&app, "Touched").await;
        let first = create_task(&app, plan.id, None, "First").await;
        let second = create_task(&app, plan.id, None, "Second").await;
        app.create_task_dependency(second.id, first.id)
            .await
            .expect("dependency");
        let resource = app
            .create_resource(ResourceInput {
                plan_id: plan.id,
                title: "Guide".to_string(),
                resource_type: "LINK".to_string(),
                ..Default::default()
            })
            .await
            .expect("resource");

        let before = plan_updated_at(&app, plan.id).await;
        tick().await;
        app.delete_task_dependency(second.id, first.id)
            .await
            .expect("remove dependency");
        let after_dependency = plan_updated_at(&app, plan.id).await;
        assert!(after_dependency > before);

        tick().await;
        app.update_resource(
            resource.id,
            ResourceChanges {
                title: Some("Better guide".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("update resource");
        let after_update = plan_updated_at(&app, plan.id).await;
        assert!(after_update > after_dependency);

        tick().await;
        app.delete_resource(resource.id).await.expect("delete resource");
        assert!(plan_updated_at(&app, plan.id).await > after_update);

        let err = app.delete_task_dependency(second.id, first.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
