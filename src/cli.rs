use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::SecretStoreKind;
use crate::model::{MilestoneStatus, PlanStatus, TaskPriority, TaskStatus};

#[derive(Parser, Debug)]
#[command(
    name = "planforge",
    version,
    about = "Plan goals with milestones, tasks and AI assistance"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "PLANFORGE_HOME",
        value_name = "DIR",
        help = "Directory holding the database (defaults to the platform data dir)"
    )]
    pub data_dir: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        env = "PLANFORGE_SECRET_STORE",
        value_enum,
        default_value = "keyring",
        help = "Where the API key is kept besides the settings table"
    )]
    pub secret_store: SecretStoreArg,
    #[arg(long, global = true, env = "PLANFORGE_API_BASE", value_name = "URL")]
    pub api_base: Option<String>,
    #[arg(long, global = true, env = "PLANFORGE_MODEL", value_name = "MODEL")]
    pub model: Option<String>,
    #[arg(
        long,
        global = true,
        env = "PLANFORGE_AI_TIMEOUT",
        value_name = "SECONDS"
    )]
    pub ai_timeout: Option<u64>,
    #[arg(long, short, global = true, help = "Log debug output to stderr")]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(subcommand)]
    Plan(PlanCommand),
    #[command(subcommand)]
    Milestone(MilestoneCommand),
    #[command(subcommand)]
    Task(TaskCommand),
    #[command(subcommand)]
    Dep(DepCommand),
    #[command(subcommand)]
    Resource(ResourceCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Totals across every plan.
    Stats,
    #[command(subcommand)]
    Ai(AiCommand),
    #[command(subcommand)]
    Data(DataCommand),
    /// Answer JSON requests on stdin, one per line.
    Serve,
}

#[derive(Subcommand, Debug)]
pub enum PlanCommand {
    Add(PlanAdd),
    List(PlanList),
    Show(PlanShow),
    Update(PlanUpdate),
    Remove(PlanRemove),
    Stats(PlanStatsArgs),
}

#[derive(Subcommand, Debug)]
pub enum MilestoneCommand {
    Add(MilestoneAdd),
    Update(MilestoneUpdate),
    Remove(IdList),
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    Add(TaskAdd),
    Update(TaskUpdate),
    Done(IdList),
    Reopen(IdList),
    Remove(IdList),
}

#[derive(Subcommand, Debug)]
pub enum DepCommand {
    Add(DepArgs),
    Remove(DepArgs),
}

#[derive(Subcommand, Debug)]
pub enum ResourceCommand {
    Add(ResourceAdd),
    Update(ResourceUpdate),
    Remove(IdList),
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    Show,
    Set(SettingsSet),
}

#[derive(Subcommand, Debug)]
pub enum AiCommand {
    /// Validate the configured (or given) API key.
    Init(AiInit),
    Plan(AiPlan),
    Enhance(AiEnhance),
    Suggest(AiSuggest),
    Tasks(AiTasks),
    #[command(subcommand)]
    Key(AiKeyCommand),
}

#[derive(Subcommand, Debug)]
pub enum AiKeyCommand {
    Show,
    Set(AiKeySet),
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum DataCommand {
    Export(PathArg),
    Import(PathArg),
}

#[derive(Args, Debug)]
pub struct PlanAdd {
    pub title: String,
    #[arg(long)]
    pub goal: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub timeframe: Option<String>,
}

#[derive(Args, Debug)]
pub struct PlanList {
    #[arg(long, value_enum, help = "Only plans whose displayed status matches")]
    pub status: Option<PlanStatusArg>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PlanShow {
    pub id: i64,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct PlanUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub goal: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub timeframe: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<PlanStatusArg>,
}

#[derive(Args, Debug)]
pub struct PlanRemove {
    #[arg(value_name = "ID", num_args = 1..)]
    pub ids: Vec<i64>,
}

#[derive(Args, Debug)]
pub struct PlanStatsArgs {
    pub id: i64,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MilestoneAdd {
    pub plan_id: i64,
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_name = "DATE")]
    pub target_date: Option<String>,
    #[arg(long)]
    pub order: Option<i32>,
}

#[derive(Args, Debug)]
pub struct MilestoneUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_name = "DATE", conflicts_with = "clear_target_date")]
    pub target_date: Option<String>,
    #[arg(long)]
    pub clear_target_date: bool,
    #[arg(long, value_enum)]
    pub status: Option<MilestoneStatusArg>,
    #[arg(long)]
    pub order: Option<i32>,
}

#[derive(Args, Debug)]
pub struct TaskAdd {
    pub plan_id: i64,
    pub title: String,
    #[arg(long, value_name = "ID")]
    pub milestone: Option<i64>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_enum)]
    pub priority: Option<PriorityArg>,
    #[arg(long, value_name = "HOURS")]
    pub hours: Option<f64>,
    #[arg(long, value_name = "DATE")]
    pub due: Option<String>,
    #[arg(long)]
    pub order: Option<i32>,
}

#[derive(Args, Debug)]
pub struct TaskUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, value_enum)]
    pub status: Option<TaskStatusArg>,
    #[arg(long, value_enum)]
    pub priority: Option<PriorityArg>,
    #[arg(long, value_name = "HOURS")]
    pub hours: Option<f64>,
    #[arg(long, value_name = "HOURS")]
    pub actual_hours: Option<f64>,
    #[arg(long, value_name = "DATE", conflicts_with = "clear_due")]
    pub due: Option<String>,
    #[arg(long)]
    pub clear_due: bool,
    #[arg(long, value_name = "ID", conflicts_with = "no_milestone")]
    pub milestone: Option<i64>,
    #[arg(long)]
    pub no_milestone: bool,
    #[arg(long)]
    pub order: Option<i32>,
}

#[derive(Args, Debug)]
pub struct IdList {
    #[arg(value_name = "ID", num_args = 1..)]
    pub ids: Vec<i64>,
}

#[derive(Args, Debug)]
pub struct DepArgs {
    /// The task that waits.
    pub task_id: i64,
    /// The task that must finish first.
    pub depends_on: i64,
}

#[derive(Args, Debug)]
pub struct ResourceAdd {
    pub plan_id: i64,
    pub title: String,
    #[arg(long = "type", value_name = "TYPE", default_value = "LINK")]
    pub resource_type: String,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResourceUpdate {
    pub id: i64,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long = "type", value_name = "TYPE")]
    pub resource_type: Option<String>,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug)]
pub struct SettingsSet {
    #[arg(long)]
    pub theme: Option<String>,
    #[arg(long)]
    pub language: Option<String>,
}

#[derive(Args, Debug)]
pub struct AiInit {
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,
}

#[derive(Args, Debug)]
pub struct AiPlan {
    pub goal: String,
    #[arg(long)]
    pub timeframe: Option<String>,
    #[arg(long, help = "Store the generated plan")]
    pub save: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AiEnhance {
    pub task_id: i64,
    #[arg(long, help = "Write the description and estimate back to the task")]
    pub apply: bool,
}

#[derive(Args, Debug)]
pub struct AiSuggest {
    pub plan_id: i64,
}

#[derive(Args, Debug)]
pub struct AiTasks {
    pub plan_id: i64,
    #[arg(long)]
    pub count: Option<u8>,
    #[arg(long, help = "Add the generated tasks to the plan")]
    pub save: bool,
}

#[derive(Args, Debug)]
pub struct AiKeySet {
    pub key: String,
}

#[derive(Args, Debug)]
pub struct PathArg {
    pub path: PathBuf,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum SecretStoreArg {
    Keyring,
    Disabled,
}

impl From<SecretStoreArg> for SecretStoreKind {
    fn from(value: SecretStoreArg) -> Self {
        match value {
            SecretStoreArg::Keyring => SecretStoreKind::Keyring,
            SecretStoreArg::Disabled => SecretStoreKind::Disabled,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PlanStatusArg {
    Active,
    Completed,
    Paused,
    Cancelled,
}

impl From<PlanStatusArg> for PlanStatus {
    fn from(value: PlanStatusArg) -> Self {
        match value {
            PlanStatusArg::Active => PlanStatus::Active,
            PlanStatusArg::Completed => PlanStatus::Completed,
            PlanStatusArg::Paused => PlanStatus::Paused,
            PlanStatusArg::Cancelled => PlanStatus::Cancelled,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum MilestoneStatusArg {
    Pending,
    InProgress,
    Completed,
}

impl From<MilestoneStatusArg> for MilestoneStatus {
    fn from(value: MilestoneStatusArg) -> Self {
        match value {
            MilestoneStatusArg::Pending => MilestoneStatus::Pending,
            MilestoneStatusArg::InProgress => MilestoneStatus::InProgress,
            MilestoneStatusArg::Completed => MilestoneStatus::Completed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TaskStatusArg {
    Todo,
    InProgress,
    Paused,
    Completed,
}

impl From<TaskStatusArg> for TaskStatus {
    fn from(value: TaskStatusArg) -> Self {
        match value {
            TaskStatusArg::Todo => TaskStatus::Todo,
            TaskStatusArg::InProgress => TaskStatus::InProgress,
            TaskStatusArg::Paused => TaskStatus::Paused,
            TaskStatusArg::Completed => TaskStatus::Completed,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for TaskPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => TaskPriority::High,
            PriorityArg::Medium => TaskPriority::Medium,
            PriorityArg::Low => TaskPriority::Low,
        }
    }
}
