//! Project and task tracking for billed engagements.

pub mod project;

pub use project::{
    AddTask, ArchiveProject, CompleteProject, CompleteTask, CreateProject, Project,
    ProjectArchived, ProjectCommand, ProjectCompleted, ProjectCreated, ProjectEvent, ProjectId,
    ProjectStatus, Task, TaskAdded, TaskCompleted,
};
