use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ids::{StudentId, TeacherId};

/// The two sides of a help thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    /// The role on the other end of the thread.
    #[must_use]
    pub fn counterpart(self) -> Self {
        match self {
            Role::Teacher => Role::Student,
            Role::Student => Role::Teacher,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is acting, as reported by the external identity provider.
///
/// `Preview` covers anonymous task previews (a teacher trying out their own
/// task, or a share link); such sessions never reach persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Viewer {
    Student(StudentId),
    Teacher(TeacherId),
    Preview,
}

impl Viewer {
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        match self {
            Viewer::Student(_) => Some(Role::Student),
            Viewer::Teacher(_) => Some(Role::Teacher),
            Viewer::Preview => None,
        }
    }

    #[must_use]
    pub fn is_preview(&self) -> bool {
        matches!(self, Viewer::Preview)
    }

    #[must_use]
    pub fn student_id(&self) -> Option<StudentId> {
        match self {
            Viewer::Student(id) => Some(*id),
            _ => None,
        }
    }

    #[must_use]
    pub fn teacher_id(&self) -> Option<TeacherId> {
        match self {
            Viewer::Teacher(id) => Some(*id),
            _ => None,
        }
    }
}
