use std::fs::{self, File, OpenOptions};
use std::path::Path;

use sea_orm::sea_query::Index;
use sea_orm::{
    ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, EntityTrait, Schema,
    Statement,
};
use url::Url;

use crate::entities::{milestone, plan, resource, settings, task, task_dependency};
use crate::error::AppError;

pub fn ensure_parent_dir(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn open_lock(path: &Path) -> Result<fd_lock::RwLock<File>, AppError> {
    let lock_path = path.with_extension("lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)?;
    Ok(fd_lock::RwLock::new(file))
}

pub async fn connect(path: &Path) -> Result<DatabaseConnection, AppError> {
    let mut url = Url::from_file_path(path)
        .map_err(|_| AppError::InvalidInput(format!("invalid sqlite path: {}", path.display())))?;
    url.set_query(Some("mode=rwc"));
    let sqlite_url = url.as_str().replacen("file://", "sqlite://", 1);
    tracing::debug!(%sqlite_url, "connecting to database");
    Ok(Database::connect(&sqlite_url).await?)
}

pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), AppError> {
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA foreign_keys = ON;",
    ))
    .await?;

    create_table(db, plan::Entity).await?;
    create_table(db, milestone::Entity).await?;
    create_table(db, task::Entity).await?;
    create_table(db, task_dependency::Entity).await?;
    create_table(db, resource::Entity).await?;
    create_table(db, settings::Entity).await?;

    let builder = db.get_database_backend();

    let mut milestone_index = Index::create()
        .name("idx_milestones_plan_order")
        .table(milestone::Entity)
        .col(milestone::Column::PlanId)
        .col(milestone::Column::SortOrder)
        .to_owned();
    milestone_index.if_not_exists();
    db.execute(builder.build(&milestone_index)).await?;

    let mut task_index = Index::create()
        .name("idx_tasks_plan_order")
        .table(task::Entity)
        .col(task::Column::PlanId)
        .col(task::Column::SortOrder)
        .to_owned();
    task_index.if_not_exists();
    db.execute(builder.build(&task_index)).await?;

    let mut task_milestone_index = Index::create()
        .name("idx_tasks_milestone")
        .table(task::Entity)
        .col(task::Column::MilestoneId)
        .to_owned();
    task_milestone_index.if_not_exists();
    db.execute(builder.build(&task_milestone_index)).await?;

    let mut dependency_index = Index::create()
        .name("idx_task_dependencies_pair")
        .table(task_dependency::Entity)
        .col(task_dependency::Column::DependentId)
        .col(task_dependency::Column::PrerequisiteId)
        .unique()
        .to_owned();
    dependency_index.if_not_exists();
    db.execute(builder.build(&dependency_index)).await?;

    let mut resource_index = Index::create()
        .name("idx_resources_plan")
        .table(resource::Entity)
        .col(resource::Column::PlanId)
        .to_owned();
    resource_index.if_not_exists();
    db.execute(builder.build(&resource_index)).await?;

    Ok(())
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, entity: E) -> Result<(), AppError> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(builder.build(&stmt)).await?;
    Ok(())
}
