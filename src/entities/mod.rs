pub mod milestone;
pub mod plan;
pub mod resource;
pub mod settings;
pub mod task;
pub mod task_dependency;
