use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::ids::FieldId;

/// A student's current value for one field.
///
/// The shape follows the field kind, but values are stored as given: the
/// progress calculation only asks whether a value counts as filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum AnswerValue {
    Text(String),
    Number(f64),
    Choices(Vec<String>),
    Checked(bool),
}

impl AnswerValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Whether this value satisfies a required field.
    ///
    /// Whitespace-only text, non-finite numbers, choice lists without a
    /// non-blank entry and unchecked boxes count as empty.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        match self {
            AnswerValue::Text(text) => !text.trim().is_empty(),
            AnswerValue::Number(n) => n.is_finite(),
            AnswerValue::Choices(choices) => choices.iter().any(|c| !c.trim().is_empty()),
            AnswerValue::Checked(checked) => *checked,
        }
    }
}

/// Answers keyed by field id. Ordered so persisted JSON is stable.
pub type Answers = BTreeMap<FieldId, AnswerValue>;
