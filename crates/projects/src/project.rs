use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_clients::ClientId;
use tally_core::{Aggregate, AggregateId, AggregateRoot, AccountId, DomainError};
use tally_events::Event;

const MAX_NAME_LEN: usize = 200;
const MAX_TASK_DESCRIPTION_LEN: usize = 500;

/// Project identifier (account-scoped via `account_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub AggregateId);

impl ProjectId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Project status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Completed,
    Archived,
}

/// A numbered task on a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_no: u32,
    pub description: String,
    pub done: bool,
}

/// Aggregate root: Project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    id: ProjectId,
    account_id: Option<AccountId>,
    client_id: Option<ClientId>,
    name: String,
    status: ProjectStatus,
    tasks: Vec<Task>,
    version: u64,
    created: bool,
}

impl Project {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProjectId) -> Self {
        Self {
            id,
            account_id: None,
            client_id: None,
            name: String::new(),
            status: ProjectStatus::Active,
            tasks: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProjectId {
        self.id
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ProjectStatus {
        self.status
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks can only change while the project is active.
    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, ProjectStatus::Active)
    }

    fn next_task_no(&self) -> u32 {
        self.tasks.last().map(|t| t.task_no + 1).unwrap_or(1)
    }
}

impl AggregateRoot for Project {
    type Id = ProjectId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProject {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub client_id: ClientId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTask {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteTask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTask {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub task_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteProject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteProject {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveProject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProject {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectCommand {
    CreateProject(CreateProject),
    AddTask(AddTask),
    CompleteTask(CompleteTask),
    CompleteProject(CompleteProject),
    ArchiveProject(ArchiveProject),
}

/// Event: ProjectCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCreated {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub client_id: ClientId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TaskAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAdded {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub task_no: u32,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TaskCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub task_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProjectCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectCompleted {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProjectArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectArchived {
    pub account_id: AccountId,
    pub project_id: ProjectId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectEvent {
    ProjectCreated(ProjectCreated),
    TaskAdded(TaskAdded),
    TaskCompleted(TaskCompleted),
    ProjectCompleted(ProjectCompleted),
    ProjectArchived(ProjectArchived),
}

impl Event for ProjectEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProjectEvent::ProjectCreated(_) => "projects.project.created",
            ProjectEvent::TaskAdded(_) => "projects.project.task_added",
            ProjectEvent::TaskCompleted(_) => "projects.project.task_completed",
            ProjectEvent::ProjectCompleted(_) => "projects.project.completed",
            ProjectEvent::ProjectArchived(_) => "projects.project.archived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProjectEvent::ProjectCreated(e) => e.occurred_at,
            ProjectEvent::TaskAdded(e) => e.occurred_at,
            ProjectEvent::TaskCompleted(e) => e.occurred_at,
            ProjectEvent::ProjectCompleted(e) => e.occurred_at,
            ProjectEvent::ProjectArchived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Project {
    type Command = ProjectCommand;
    type Event = ProjectEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProjectEvent::ProjectCreated(e) => {
                self.id = e.project_id;
                self.account_id = Some(e.account_id);
                self.client_id = Some(e.client_id);
                self.name = e.name.clone();
                self.status = ProjectStatus::Active;
                self.created = true;
            }
            ProjectEvent::TaskAdded(e) => {
                self.tasks.push(Task {
                    task_no: e.task_no,
                    description: e.description.clone(),
                    done: false,
                });
            }
            ProjectEvent::TaskCompleted(e) => {
                if let Some(task) = self.tasks.iter_mut().find(|t| t.task_no == e.task_no) {
                    task.done = true;
                }
            }
            ProjectEvent::ProjectCompleted(_) => {
                self.status = ProjectStatus::Completed;
            }
            ProjectEvent::ProjectArchived(_) => {
                self.status = ProjectStatus::Archived;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProjectCommand::CreateProject(cmd) => self.handle_create(cmd),
            ProjectCommand::AddTask(cmd) => self.handle_add_task(cmd),
            ProjectCommand::CompleteTask(cmd) => self.handle_complete_task(cmd),
            ProjectCommand::CompleteProject(cmd) => self.handle_complete(cmd),
            ProjectCommand::ArchiveProject(cmd) => self.handle_archive(cmd),
        }
    }
}

impl Project {
    fn ensure_account(&self, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.account_id != Some(account_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_exists(&self, account_id: AccountId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_account(account_id)
    }

    fn handle_create(&self, cmd: &CreateProject) -> Result<Vec<ProjectEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("project already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("project name must not be empty"));
        }
        if cmd.name.len() > MAX_NAME_LEN {
            return Err(DomainError::validation(format!(
                "project name exceeds {MAX_NAME_LEN} characters"
            )));
        }

        Ok(vec![ProjectEvent::ProjectCreated(ProjectCreated {
            account_id: cmd.account_id,
            project_id: cmd.project_id,
            client_id: cmd.client_id,
            name: cmd.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_task(&self, cmd: &AddTask) -> Result<Vec<ProjectEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::forbidden(
                "tasks can only be added to an active project",
            ));
        }
        if cmd.description.trim().is_empty() {
            return Err(DomainError::validation("task description must not be empty"));
        }
        if cmd.description.len() > MAX_TASK_DESCRIPTION_LEN {
            return Err(DomainError::validation(format!(
                "task description exceeds {MAX_TASK_DESCRIPTION_LEN} characters"
            )));
        }

        Ok(vec![ProjectEvent::TaskAdded(TaskAdded {
            account_id: cmd.account_id,
            project_id: cmd.project_id,
            task_no: self.next_task_no(),
            description: cmd.description.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete_task(&self, cmd: &CompleteTask) -> Result<Vec<ProjectEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if !self.is_modifiable() {
            return Err(DomainError::forbidden(
                "tasks can only change on an active project",
            ));
        }

        let task = self
            .tasks
            .iter()
            .find(|t| t.task_no == cmd.task_no)
            .ok_or_else(DomainError::not_found)?;
        if task.done {
            // Completing a completed task is a no-op.
            return Ok(vec![]);
        }

        Ok(vec![ProjectEvent::TaskCompleted(TaskCompleted {
            account_id: cmd.account_id,
            project_id: cmd.project_id,
            task_no: cmd.task_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteProject) -> Result<Vec<ProjectEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if self.status != ProjectStatus::Active {
            return Err(DomainError::forbidden(
                "only an active project can be completed",
            ));
        }

        Ok(vec![ProjectEvent::ProjectCompleted(ProjectCompleted {
            account_id: cmd.account_id,
            project_id: cmd.project_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveProject) -> Result<Vec<ProjectEvent>, DomainError> {
        self.ensure_exists(cmd.account_id)?;

        if self.status == ProjectStatus::Archived {
            return Err(DomainError::forbidden("project is already archived"));
        }

        Ok(vec![ProjectEvent::ProjectArchived(ProjectArchived {
            account_id: cmd.account_id,
            project_id: cmd.project_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
