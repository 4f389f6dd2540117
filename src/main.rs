mod ai;
mod app;
mod backup;
mod bridge;
mod cli;
mod config;
mod db;
mod entities;
mod error;
mod model;
mod progress;
mod util;

use std::fs;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::ai::keys::{mask_key, KeyFallback};
use crate::ai::AiService;
use crate::app::App;
use crate::bridge::Context;
use crate::cli::{
    AiCommand, AiEnhance, AiKeyCommand, AiPlan, AiSuggest, AiTasks, Cli, Command, DataCommand,
    DepCommand, MilestoneAdd, MilestoneCommand, MilestoneUpdate, PlanAdd, PlanCommand, PlanList,
    PlanUpdate, ResourceAdd, ResourceCommand, ResourceUpdate, SettingsCommand, TaskAdd,
    TaskCommand, TaskUpdate,
};
use crate::config::Config;
use crate::error::AppError;
use crate::model::{
    MilestoneChanges, MilestoneInput, PlanChanges, PlanInput, PlanStatus, ResourceChanges,
    ResourceInput, SettingsChanges, TaskChanges, TaskInput, TaskStatus,
};
use crate::util::{
    format_dashboard, format_enhancement, format_generated_plan, format_generated_task,
    format_plan_detail, format_plan_line, format_plan_stats, format_settings, parse_date,
};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    install_panic_hook();

    let config = Config::resolve(
        cli.data_dir,
        cli.secret_store.into(),
        cli.api_base,
        cli.model,
        cli.ai_timeout,
    )?;
    let db_path = config.db_path();
    db::ensure_parent_dir(&db_path)?;
    let mut lock = db::open_lock(&db_path)?;
    let _guard = lock.write()?;

    let db = db::connect(&db_path).await?;
    db::ensure_schema(&db).await?;
    let app = App::new(db);
    let fallback: Arc<dyn KeyFallback> = Arc::new(app.clone());
    let ai = AiService::from_config(&config, fallback)?;
    let ctx = Context::new(app, ai);
    tracing::debug!(data_dir = %config.data_dir.display(), model = %config.model, "ready");

    match cli.command {
        Command::Plan(command) => handle_plan(&ctx.app, command).await,
        Command::Milestone(command) => handle_milestone(&ctx.app, command).await,
        Command::Task(command) => handle_task(&ctx.app, command).await,
        Command::Dep(command) => handle_dep(&ctx.app, command).await,
        Command::Resource(command) => handle_resource(&ctx.app, command).await,
        Command::Settings(command) => handle_settings(&ctx, command).await,
        Command::Stats => {
            let stats = ctx.app.dashboard_stats().await?;
            println!("{}", format_dashboard(&stats));
            Ok(())
        }
        Command::Ai(command) => handle_ai(&ctx, command).await,
        Command::Data(command) => handle_data(&ctx.app, command).await,
        Command::Serve => {
            let reader = tokio::io::BufReader::new(tokio::io::stdin());
            bridge::serve(Arc::new(ctx), reader, tokio::io::stdout()).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("warn,planforge=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "panicked");
        default_hook(info);
    }));
}

async fn handle_plan(app: &App, command: PlanCommand) -> Result<(), AppError> {
    match command {
        PlanCommand::Add(args) => handle_plan_add(app, args).await,
        PlanCommand::List(args) => handle_plan_list(app, args).await,
        PlanCommand::Show(args) => {
            let detail = app.get_plan(args.id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                println!("{}", format_plan_detail(&detail));
            }
            Ok(())
        }
        PlanCommand::Update(args) => handle_plan_update(app, args).await,
        PlanCommand::Remove(args) => {
            for id in args.ids {
                let plan = app.delete_plan(id).await?;
                println!("Removed plan ID: {}: {}", plan.id, plan.title);
            }
            Ok(())
        }
        PlanCommand::Stats(args) => {
            let stats = app.plan_stats(args.id).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", format_plan_stats(&stats));
            }
            Ok(())
        }
    }
}

async fn handle_plan_add(app: &App, args: PlanAdd) -> Result<(), AppError> {
    let plan = app
        .create_plan(PlanInput {
            title: args.title,
            description: args.description,
            goal: args.goal,
            timeframe: args.timeframe,
        })
        .await?;
    println!("Created plan ID: {}: {}", plan.id, plan.title);
    Ok(())
}

async fn handle_plan_list(app: &App, args: PlanList) -> Result<(), AppError> {
    let mut details = app.list_plans().await?;
    if let Some(status) = args.status {
        let wanted = PlanStatus::from(status).as_str();
        details.retain(|detail| detail.dynamic_status == wanted);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }
    if details.is_empty() {
        println!("No plans found.");
        return Ok(());
    }
    for detail in &details {
        println!("{}", format_plan_line(detail));
    }
    Ok(())
}

async fn handle_plan_update(app: &App, args: PlanUpdate) -> Result<(), AppError> {
    let changes = PlanChanges {
        title: args.title,
        description: args.description,
        goal: args.goal,
        timeframe: args.timeframe,
        status: args.status.map(PlanStatus::from),
    };
    if changes.title.is_none()
        && changes.description.is_none()
        && changes.goal.is_none()
        && changes.timeframe.is_none()
        && changes.status.is_none()
    {
        return Err(AppError::InvalidInput(
            "plan update requires at least one field".to_string(),
        ));
    }
    let plan = app.update_plan(args.id, changes).await?;
    println!("Updated plan ID: {}: {}", plan.id, plan.title);
    Ok(())
}

async fn handle_milestone(app: &App, command: MilestoneCommand) -> Result<(), AppError> {
    match command {
        MilestoneCommand::Add(args) => handle_milestone_add(app, args).await,
        MilestoneCommand::Update(args) => handle_milestone_update(app, args).await,
        MilestoneCommand::Remove(args) => {
            for id in args.ids {
                let milestone = app.delete_milestone(id).await?;
                println!("Removed milestone ID: {}: {}", milestone.id, milestone.title);
            }
            Ok(())
        }
    }
}

async fn handle_milestone_add(app: &App, args: MilestoneAdd) -> Result<(), AppError> {
    let target_date = args.target_date.as_deref().map(parse_date).transpose()?;
    let milestone = app
        .create_milestone(MilestoneInput {
            plan_id: args.plan_id,
            title: args.title,
            description: args.description,
            target_date,
            order: args.order,
        })
        .await?;
    println!(
        "Created milestone ID: {}: {} (plan ID: {})",
        milestone.id, milestone.title, milestone.plan_id
    );
    Ok(())
}

async fn handle_milestone_update(app: &App, args: MilestoneUpdate) -> Result<(), AppError> {
    let target_date = if args.clear_target_date {
        Some(None)
    } else {
        args.target_date
            .as_deref()
            .map(parse_date)
            .transpose()?
            .map(Some)
    };
    let milestone = app
        .update_milestone(
            args.id,
            MilestoneChanges {
                title: args.title,
                description: args.description,
                target_date,
                status: args.status.map(Into::into),
                order: args.order,
            },
        )
        .await?;
    println!("Updated milestone ID: {}: {}", milestone.id, milestone.title);
    Ok(())
}

async fn handle_task(app: &App, command: TaskCommand) -> Result<(), AppError> {
    match command {
        TaskCommand::Add(args) => handle_task_add(app, args).await,
        TaskCommand::Update(args) => handle_task_update(app, args).await,
        TaskCommand::Done(args) => {
            for id in args.ids {
                let task = app.set_task_status(id, TaskStatus::Completed).await?;
                println!("Completed task ID: {}: {}", task.id, task.title);
            }
            Ok(())
        }
        TaskCommand::Reopen(args) => {
            for id in args.ids {
                let task = app.set_task_status(id, TaskStatus::Todo).await?;
                println!("Reopened task ID: {}: {}", task.id, task.title);
            }
            Ok(())
        }
        TaskCommand::Remove(args) => {
            for id in args.ids {
                let task = app.delete_task(id).await?;
                println!("Removed task ID: {}: {}", task.id, task.title);
            }
            Ok(())
        }
    }
}

async fn handle_task_add(app: &App, args: TaskAdd) -> Result<(), AppError> {
    let due_date = args.due.as_deref().map(parse_date).transpose()?;
    let task = app
        .create_task(TaskInput {
            plan_id: args.plan_id,
            milestone_id: args.milestone,
            title: args.title,
            description: args.description,
            priority: args.priority.map(Into::into),
            estimated_hours: args.hours,
            due_date,
            order: args.order,
        })
        .await?;
    println!(
        "Created task ID: {}: {} (plan ID: {})",
        task.id, task.title, task.plan_id
    );
    Ok(())
}

async fn handle_task_update(app: &App, args: TaskUpdate) -> Result<(), AppError> {
    let due_date = if args.clear_due {
        Some(None)
    } else {
        args.due.as_deref().map(parse_date).transpose()?.map(Some)
    };
    let milestone_id = if args.no_milestone {
        Some(None)
    } else {
        args.milestone.map(Some)
    };
    let task = app
        .update_task(
            args.id,
            TaskChanges {
                title: args.title,
                description: args.description,
                status: args.status.map(Into::into),
                priority: args.priority.map(Into::into),
                estimated_hours: args.hours,
                actual_hours: args.actual_hours,
                due_date,
                completed_at: None,
                order: args.order,
                milestone_id,
            },
        )
        .await?;
    println!("Updated task ID: {}: {} [{}]", task.id, task.title, task.status);
    Ok(())
}

async fn handle_dep(app: &App, command: DepCommand) -> Result<(), AppError> {
    match command {
        DepCommand::Add(args) => {
            let edge = app
                .create_task_dependency(args.task_id, args.depends_on)
                .await?;
            println!(
                "Task ID: {} now depends on task ID: {}",
                edge.dependent_id, edge.prerequisite_id
            );
        }
        DepCommand::Remove(args) => {
            let edge = app
                .delete_task_dependency(args.task_id, args.depends_on)
                .await?;
            println!(
                "Task ID: {} no longer depends on task ID: {}",
                edge.dependent_id, edge.prerequisite_id
            );
        }
    }
    Ok(())
}

async fn handle_resource(app: &App, command: ResourceCommand) -> Result<(), AppError> {
    match command {
        ResourceCommand::Add(args) => handle_resource_add(app, args).await,
        ResourceCommand::Update(args) => handle_resource_update(app, args).await,
        ResourceCommand::Remove(args) => {
            for id in args.ids {
                let resource = app.delete_resource(id).await?;
                println!("Removed resource ID: {}: {}", resource.id, resource.title);
            }
            Ok(())
        }
    }
}

async fn handle_resource_add(app: &App, args: ResourceAdd) -> Result<(), AppError> {
    let resource = app
        .create_resource(ResourceInput {
            plan_id: args.plan_id,
            title: args.title,
            description: args.description,
            url: args.url,
            resource_type: args.resource_type,
        })
        .await?;
    println!("Created resource ID: {}: {}", resource.id, resource.title);
    Ok(())
}

async fn handle_resource_update(app: &App, args: ResourceUpdate) -> Result<(), AppError> {
    let resource = app
        .update_resource(
            args.id,
            ResourceChanges {
                title: args.title,
                description: args.description,
                url: args.url,
                resource_type: args.resource_type,
            },
        )
        .await?;
    println!("Updated resource ID: {}: {}", resource.id, resource.title);
    Ok(())
}

async fn handle_settings(ctx: &Context, command: SettingsCommand) -> Result<(), AppError> {
    let settings = match command {
        SettingsCommand::Show => ctx.app.get_settings().await?,
        SettingsCommand::Set(args) => {
            if args.theme.is_none() && args.language.is_none() {
                return Err(AppError::InvalidInput(
                    "settings set requires --theme or --language".to_string(),
                ));
            }
            ctx.app
                .update_settings(SettingsChanges {
                    theme: args.theme,
                    language: args.language,
                    openai_api_key: None,
                })
                .await?
        }
    };
    let masked = ctx.ai.get_api_key().await.map(|key| mask_key(&key));
    println!("{}", format_settings(&settings, masked.as_deref()));
    Ok(())
}

async fn handle_ai(ctx: &Context, command: AiCommand) -> Result<(), AppError> {
    match command {
        AiCommand::Init(args) => {
            ctx.ai.initialize(args.key.as_deref()).await?;
            println!("API key validated.");
            Ok(())
        }
        AiCommand::Plan(args) => handle_ai_plan(ctx, args).await,
        AiCommand::Enhance(args) => handle_ai_enhance(ctx, args).await,
        AiCommand::Suggest(args) => handle_ai_suggest(ctx, args).await,
        AiCommand::Tasks(args) => handle_ai_tasks(ctx, args).await,
        AiCommand::Key(command) => handle_ai_key(ctx, command).await,
    }
}

async fn handle_ai_plan(ctx: &Context, args: AiPlan) -> Result<(), AppError> {
    let generated = ctx
        .ai
        .generate_plan(&args.goal, args.timeframe.as_deref())
        .await?;
    if args.save {
        let detail = ctx
            .app
            .apply_generated_plan(&args.goal, args.timeframe.as_deref(), &generated)
            .await?;
        println!(
            "Created plan ID: {}: {} (milestones: {}, tasks: {})",
            detail.plan.id,
            detail.plan.title,
            detail.milestones.len(),
            detail.tasks.len()
        );
    } else if args.json {
        println!("{}", serde_json::to_string_pretty(&generated)?);
    } else {
        println!("{}", format_generated_plan(&generated));
    }
    Ok(())
}

async fn handle_ai_enhance(ctx: &Context, args: AiEnhance) -> Result<(), AppError> {
    let task = ctx.app.get_task(args.task_id).await?;
    let plan = ctx.app.get_plan_model(task.plan_id).await?;
    let context = format!("Plan \"{}\" with goal: {}", plan.title, plan.goal);
    let enhancement = ctx.ai.enhance_task(&task.title, &context).await?;
    println!("{}", format_enhancement(&enhancement));
    if args.apply {
        let updated = ctx
            .app
            .update_task(
                task.id,
                TaskChanges {
                    description: Some(enhancement.description),
                    estimated_hours: enhancement.estimated_hours.filter(|hours| *hours >= 0.0),
                    ..Default::default()
                },
            )
            .await?;
        println!("Updated task ID: {}: {}", updated.id, updated.title);
    }
    Ok(())
}

async fn handle_ai_suggest(ctx: &Context, args: AiSuggest) -> Result<(), AppError> {
    let detail = ctx.app.get_plan(args.plan_id).await?;
    let (completed, remaining): (Vec<_>, Vec<_>) = detail
        .tasks
        .iter()
        .partition(|task| task.status == TaskStatus::Completed.as_str());
    let completed: Vec<String> = completed.into_iter().map(|task| task.title.clone()).collect();
    let remaining: Vec<String> = remaining.into_iter().map(|task| task.title.clone()).collect();
    let steps = ctx
        .ai
        .suggest_next_steps(&detail.plan.title, &completed, &remaining)
        .await?;
    for step in steps {
        println!("- {step}");
    }
    Ok(())
}

async fn handle_ai_tasks(ctx: &Context, args: AiTasks) -> Result<(), AppError> {
    let detail = ctx.app.get_plan(args.plan_id).await?;
    let existing: Vec<String> = detail.tasks.iter().map(|task| task.title.clone()).collect();
    let milestones: Vec<String> = detail
        .milestones
        .iter()
        .map(|milestone| milestone.title.clone())
        .collect();
    let generated = ctx
        .ai
        .generate_tasks(
            &detail.plan.title,
            &detail.plan.goal,
            &existing,
            &milestones,
            args.count,
        )
        .await?;
    if args.save {
        let created = ctx
            .app
            .apply_generated_tasks(detail.plan.id, &generated)
            .await?;
        for task in created {
            println!("Created task ID: {}: {}", task.id, task.title);
        }
    } else {
        for task in &generated {
            print!("{}", format_generated_task(task));
        }
    }
    Ok(())
}

async fn handle_ai_key(ctx: &Context, command: AiKeyCommand) -> Result<(), AppError> {
    match command {
        AiKeyCommand::Show => match ctx.ai.get_api_key().await {
            Some(key) => println!("API key: {}", mask_key(&key)),
            None => println!("API key: (not set)"),
        },
        AiKeyCommand::Set(args) => {
            ctx.ai.set_api_key(&args.key).await?;
            println!("API key saved.");
        }
        AiKeyCommand::Delete => {
            ctx.ai.delete_api_key().await?;
            println!("API key removed.");
        }
    }
    Ok(())
}

async fn handle_data(app: &App, command: DataCommand) -> Result<(), AppError> {
    match command {
        DataCommand::Export(args) => {
            let document = backup::export(app).await?;
            db::ensure_parent_dir(&args.path)?;
            fs::write(&args.path, serde_json::to_string_pretty(&document)?)?;
            println!(
                "Exported {} plans to {}",
                document.data.plans.len(),
                args.path.display()
            );
        }
        DataCommand::Import(args) => {
            let raw = fs::read_to_string(&args.path)?;
            let document: serde_json::Value = serde_json::from_str(&raw)?;
            let summary = backup::import(app, document).await?;
            println!(
                "Imported {} plans ({} milestones, {} tasks, {} resources)",
                summary.plans, summary.milestones, summary.tasks, summary.resources
            );
        }
    }
    Ok(())
}
