use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::ids::{FieldId, TaskId, TeacherId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("field id cannot be empty")]
    EmptyFieldId,

    #[error("duplicate field id: {0}")]
    DuplicateFieldId(FieldId),

    #[error("invalid resource link: {0}")]
    InvalidResourceLink(String),
}

//
// ─── FIELDS ────────────────────────────────────────────────────────────────────
//

/// Input widget a field is answered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldKind {
    ShortText,
    LongText,
    Number,
    SingleChoice,
    MultiChoice,
    Checkbox,
}

/// One entry of a task's ordered field schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub id: FieldId,
    pub kind: FieldKind,
    pub label: String,
    pub required: bool,
}

impl FieldDefinition {
    #[must_use]
    pub fn new(id: impl Into<FieldId>, kind: FieldKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

//
// ─── TASK ──────────────────────────────────────────────────────────────────────
//

/// Unvalidated task input as authored by a teacher.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub teacher_id: TeacherId,
    pub title: String,
    pub description: String,
    pub subject: String,
    pub fields: Vec<FieldDefinition>,
    pub due_at: Option<DateTime<Utc>>,
    pub resources: Vec<String>,
}

impl TaskDraft {
    #[must_use]
    pub fn new(teacher_id: TeacherId, title: impl Into<String>) -> Self {
        Self {
            teacher_id,
            title: title.into(),
            description: String::new(),
            subject: String::new(),
            fields: Vec::new(),
            due_at: None,
            resources: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    /// Validate the draft and assign it an id.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` for an empty title, empty or duplicated field ids,
    /// or resource links that are not absolute URLs.
    pub fn validate(self, id: TaskId) -> Result<Task, TaskError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(TaskError::EmptyTitle);
        }

        let mut seen = HashSet::with_capacity(self.fields.len());
        for field in &self.fields {
            if field.id.as_str().trim().is_empty() {
                return Err(TaskError::EmptyFieldId);
            }
            if !seen.insert(field.id.clone()) {
                return Err(TaskError::DuplicateFieldId(field.id.clone()));
            }
        }

        let resources = self
            .resources
            .into_iter()
            .map(|raw| {
                let trimmed = raw.trim();
                Url::parse(trimmed).map_err(|_| TaskError::InvalidResourceLink(raw.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Task {
            id,
            teacher_id: self.teacher_id,
            title,
            description: self.description.trim().to_string(),
            subject: self.subject.trim().to_string(),
            fields: self.fields,
            due_at: self.due_at,
            resources,
        })
    }
}

/// A teacher-authored assignment. Read-only from the student's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    teacher_id: TeacherId,
    title: String,
    description: String,
    subject: String,
    fields: Vec<FieldDefinition>,
    due_at: Option<DateTime<Utc>>,
    resources: Vec<Url>,
}

impl Task {
    /// Rehydrate a task from storage, re-running draft validation.
    ///
    /// # Errors
    ///
    /// Returns `TaskError` if the persisted data no longer validates.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: TaskId,
        teacher_id: TeacherId,
        title: String,
        description: String,
        subject: String,
        fields: Vec<FieldDefinition>,
        due_at: Option<DateTime<Utc>>,
        resources: Vec<String>,
    ) -> Result<Self, TaskError> {
        TaskDraft {
            teacher_id,
            title,
            description,
            subject,
            fields,
            due_at,
            resources,
        }
        .validate(id)
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn teacher_id(&self) -> TeacherId {
        self.teacher_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, id: &FieldId) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| &f.id == id)
    }

    #[must_use]
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.due_at
    }

    #[must_use]
    pub fn resources(&self) -> &[Url] {
        &self.resources
    }

    #[must_use]
    pub fn is_owned_by(&self, teacher_id: TeacherId) -> bool {
        self.teacher_id == teacher_id
    }
}
