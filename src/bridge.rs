//! Request/response boundary for a front end: one JSON object per line in,
//! one JSON object per line out, handled in arrival order.

use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumIter, EnumString};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::ai::AiService;
use crate::app::{App, DEFAULT_LANGUAGE, DEFAULT_THEME};
use crate::backup;
use crate::error::{AppError, ErrorKind};
use crate::model::{
    DashboardStats, MilestoneChanges, MilestoneInput, PlanChanges, PlanInput, ResourceChanges,
    ResourceInput, SettingsChanges, TaskChanges, TaskInput,
};

#[derive(Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, PartialEq)]
pub enum Channel {
    #[strum(serialize = "db:test-connection")]
    TestConnection,
    #[strum(serialize = "db:create-plan")]
    CreatePlan,
    #[strum(serialize = "db:get-plans")]
    GetPlans,
    #[strum(serialize = "db:get-plan")]
    GetPlan,
    #[strum(serialize = "db:update-plan")]
    UpdatePlan,
    #[strum(serialize = "db:delete-plan")]
    DeletePlan,
    #[strum(serialize = "db:create-milestone")]
    CreateMilestone,
    #[strum(serialize = "db:update-milestone")]
    UpdateMilestone,
    #[strum(serialize = "db:delete-milestone")]
    DeleteMilestone,
    #[strum(serialize = "db:create-task")]
    CreateTask,
    #[strum(serialize = "db:update-task")]
    UpdateTask,
    #[strum(serialize = "db:delete-task")]
    DeleteTask,
    #[strum(serialize = "db:create-task-dependency")]
    CreateTaskDependency,
    #[strum(serialize = "db:delete-task-dependency")]
    DeleteTaskDependency,
    #[strum(serialize = "db:create-resource")]
    CreateResource,
    #[strum(serialize = "db:update-resource")]
    UpdateResource,
    #[strum(serialize = "db:delete-resource")]
    DeleteResource,
    #[strum(serialize = "db:get-settings")]
    GetSettings,
    #[strum(serialize = "db:update-settings")]
    UpdateSettings,
    #[strum(serialize = "db:get-plan-stats")]
    GetPlanStats,
    #[strum(serialize = "db:get-dashboard-stats")]
    GetDashboardStats,
    #[strum(serialize = "ai:initialize")]
    AiInitialize,
    #[strum(serialize = "ai:generate-plan")]
    AiGeneratePlan,
    #[strum(serialize = "ai:enhance-task")]
    AiEnhanceTask,
    #[strum(serialize = "ai:suggest-next-steps")]
    AiSuggestNextSteps,
    #[strum(serialize = "ai:generate-tasks")]
    AiGenerateTasks,
    #[strum(serialize = "ai:get-api-key")]
    AiGetApiKey,
    #[strum(serialize = "ai:set-api-key")]
    AiSetApiKey,
    #[strum(serialize = "ai:delete-api-key")]
    AiDeleteApiKey,
    #[strum(serialize = "data:export")]
    DataExport,
    #[strum(serialize = "data:import")]
    DataImport,
    #[strum(serialize = "get-app-version")]
    GetAppVersion,
    #[strum(serialize = "get-platform")]
    GetPlatform,
}

/// Everything a request handler may touch.
pub struct Context {
    pub app: App,
    pub ai: AiService,
}

impl Context {
    pub fn new(app: App, ai: AiService) -> Self {
        Self { app, ai }
    }
}

#[derive(Debug, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub channel: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, err: &AppError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            }),
        }
    }
}

/// Positional arguments of one request.
struct Args {
    channel: Channel,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl Args {
    fn new(channel: Channel, values: Vec<Value>) -> Self {
        Self {
            channel,
            values: values.into_iter(),
            position: 0,
        }
    }

    fn required<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, AppError> {
        self.optional(name)?.ok_or_else(|| {
            AppError::InvalidInput(format!("{} requires argument '{name}'", self.channel))
        })
    }

    /// A missing argument and an explicit `null` both read as `None`.
    fn optional<T: DeserializeOwned>(&mut self, name: &str) -> Result<Option<T>, AppError> {
        self.position += 1;
        match self.values.next() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|err| {
                AppError::InvalidInput(format!(
                    "{} argument {} ('{name}'): {err}",
                    self.channel, self.position
                ))
            }),
        }
    }
}

pub async fn handle(ctx: &Context, request: Request) -> Response {
    let Request { id, channel, args } = request;
    match dispatch(ctx, &channel, args).await {
        Ok(result) => Response::success(id, result),
        Err(err) => {
            tracing::debug!(%channel, error = %err, "request failed");
            Response::failure(id, &err)
        }
    }
}

pub async fn dispatch(ctx: &Context, channel: &str, args: Vec<Value>) -> Result<Value, AppError> {
    let channel = Channel::from_str(channel)
        .map_err(|_| AppError::InvalidInput(format!("unknown channel '{channel}'")))?;
    let mut args = Args::new(channel, args);
    let app = &ctx.app;
    let ai = &ctx.ai;

    match channel {
        Channel::TestConnection => degrade(channel, app.ping().await.map(|_| true), json!(false)),
        Channel::CreatePlan => {
            let input: PlanInput = args.required("plan")?;
            to_value(app.create_plan(input).await?)
        }
        Channel::GetPlans => degrade(channel, app.list_plans().await, json!([])),
        Channel::GetPlan => {
            let id: i64 = args.required("id")?;
            degrade(channel, app.get_plan(id).await, Value::Null)
        }
        Channel::UpdatePlan => {
            let id: i64 = args.required("id")?;
            let changes: PlanChanges = args.required("changes")?;
            to_value(app.update_plan(id, changes).await?)
        }
        Channel::DeletePlan => {
            let id: i64 = args.required("id")?;
            to_value(app.delete_plan(id).await?)
        }
        Channel::CreateMilestone => {
            let input: MilestoneInput = args.required("milestone")?;
            to_value(app.create_milestone(input).await?)
        }
        Channel::UpdateMilestone => {
            let id: i64 = args.required("id")?;
            let changes: MilestoneChanges = args.required("changes")?;
            to_value(app.update_milestone(id, changes).await?)
        }
        Channel::DeleteMilestone => {
            let id: i64 = args.required("id")?;
            to_value(app.delete_milestone(id).await?)
        }
        Channel::CreateTask => {
            let input: TaskInput = args.required("task")?;
            to_value(app.create_task(input).await?)
        }
        Channel::UpdateTask => {
            let id: i64 = args.required("id")?;
            let changes: TaskChanges = args.required("changes")?;
            to_value(app.update_task(id, changes).await?)
        }
        Channel::DeleteTask => {
            let id: i64 = args.required("id")?;
            to_value(app.delete_task(id).await?)
        }
        Channel::CreateTaskDependency => {
            let dependent: i64 = args.required("taskId")?;
            let prerequisite: i64 = args.required("dependsOnId")?;
            to_value(app.create_task_dependency(dependent, prerequisite).await?)
        }
        Channel::DeleteTaskDependency => {
            let dependent: i64 = args.required("taskId")?;
            let prerequisite: i64 = args.required("dependsOnId")?;
            to_value(app.delete_task_dependency(dependent, prerequisite).await?)
        }
        Channel::CreateResource => {
            let input: ResourceInput = args.required("resource")?;
            to_value(app.create_resource(input).await?)
        }
        Channel::UpdateResource => {
            let id: i64 = args.required("id")?;
            let changes: ResourceChanges = args.required("changes")?;
            to_value(app.update_resource(id, changes).await?)
        }
        Channel::DeleteResource => {
            let id: i64 = args.required("id")?;
            to_value(app.delete_resource(id).await?)
        }
        Channel::GetSettings => degrade(
            channel,
            app.get_settings().await,
            json!({"theme": DEFAULT_THEME, "language": DEFAULT_LANGUAGE}),
        ),
        Channel::UpdateSettings => {
            let changes: SettingsChanges = args.required("settings")?;
            to_value(app.update_settings(changes).await?)
        }
        Channel::GetPlanStats => {
            let id: i64 = args.required("planId")?;
            degrade(channel, app.plan_stats(id).await, Value::Null)
        }
        Channel::GetDashboardStats => degrade(
            channel,
            app.dashboard_stats().await,
            to_value(DashboardStats::default())?,
        ),
        Channel::AiInitialize => {
            let key: Option<String> = args.optional("apiKey")?;
            ai.initialize(key.as_deref()).await?;
            Ok(json!(ai.is_initialized().await))
        }
        Channel::AiGeneratePlan => {
            let goal: String = args.required("goal")?;
            let timeframe: Option<String> = args.optional("timeframe")?;
            to_value(ai.generate_plan(&goal, timeframe.as_deref()).await?)
        }
        Channel::AiEnhanceTask => {
            let title: String = args.required("taskTitle")?;
            let context: String = args.optional("context")?.unwrap_or_default();
            to_value(ai.enhance_task(&title, &context).await?)
        }
        Channel::AiSuggestNextSteps => {
            let plan_title: String = args.required("planTitle")?;
            let completed: Vec<String> = args.optional("completedTasks")?.unwrap_or_default();
            let remaining: Vec<String> = args.optional("remainingTasks")?.unwrap_or_default();
            to_value(ai.suggest_next_steps(&plan_title, &completed, &remaining).await?)
        }
        Channel::AiGenerateTasks => {
            let plan_title: String = args.required("planTitle")?;
            let goal: String = args.required("planGoal")?;
            let existing: Vec<String> = args.optional("existingTasks")?.unwrap_or_default();
            let milestones: Vec<String> = args.optional("existingMilestones")?.unwrap_or_default();
            let count: Option<u8> = args.optional("count")?;
            to_value(
                ai.generate_tasks(&plan_title, &goal, &existing, &milestones, count)
                    .await?,
            )
        }
        Channel::AiGetApiKey => to_value(ai.get_api_key().await),
        Channel::AiSetApiKey => {
            let key: String = args.required("apiKey")?;
            ai.set_api_key(&key).await?;
            Ok(json!(true))
        }
        Channel::AiDeleteApiKey => {
            ai.delete_api_key().await?;
            Ok(json!(true))
        }
        Channel::DataExport => to_value(backup::export(app).await?),
        Channel::DataImport => {
            let document: Value = args.required("document")?;
            to_value(backup::import(app, document).await?)
        }
        Channel::GetAppVersion => Ok(json!(env!("CARGO_PKG_VERSION"))),
        Channel::GetPlatform => Ok(json!(std::env::consts::OS)),
    }
}

/// Reads answer with `fallback` instead of failing; the error is logged.
fn degrade<T: Serialize>(
    channel: Channel,
    result: Result<T, AppError>,
    fallback: Value,
) -> Result<Value, AppError> {
    match result {
        Ok(value) => to_value(value),
        Err(err) => {
            tracing::warn!(%channel, error = %err, "read failed, answering with fallback");
            Ok(fallback)
        }
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, AppError> {
    Ok(serde_json::to_value(value)?)
}

/// Serves requests until `reader` reaches end of input.
pub async fn serve<R, W>(ctx: Arc<Context>, reader: R, mut writer: W) -> Result<(), AppError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle(&ctx, request).await,
            Err(err) => Response::failure(
                Value::Null,
                &AppError::InvalidInput(format!("malformed request: {err}")),
            ),
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    tracing::debug!("bridge input closed");
    Ok(())
}
