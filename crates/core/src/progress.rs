//! Completion progress for a submission.
//!
//! Progress is a pure function of a task's field schema and the current
//! answers. Storage keeps a copy of the percentage, but every answer write
//! recomputes it through [`calculate`] so the two cannot drift.

use crate::model::{Answers, FieldDefinition, FieldId};

/// Completeness of a single defined field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCompleteness {
    pub field_id: FieldId,
    pub required: bool,
    pub filled: bool,
}

/// Result of a progress calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    /// Integer percentage in `0..=100`.
    pub percent: u8,
    pub required_total: usize,
    pub required_filled: usize,
    /// One entry per defined field, in schema order.
    pub fields: Vec<FieldCompleteness>,
}

impl ProgressReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.percent == 100
    }

    /// Required fields that still need an answer, in schema order.
    pub fn missing_required(&self) -> impl Iterator<Item = &FieldId> {
        self.fields
            .iter()
            .filter(|f| f.required && !f.filled)
            .map(|f| &f.field_id)
    }
}

/// Compute progress for `answers` against `fields`.
///
/// `touched` tells whether the submission has been worked on at all; it only
/// matters for tasks without required fields, which report 100 once touched
/// and 0 before. Answers for field ids the schema no longer defines are
/// ignored.
#[must_use]
pub fn calculate(fields: &[FieldDefinition], answers: &Answers, touched: bool) -> ProgressReport {
    let fields: Vec<FieldCompleteness> = fields
        .iter()
        .map(|def| FieldCompleteness {
            field_id: def.id.clone(),
            required: def.required,
            filled: answers.get(&def.id).is_some_and(|a| a.is_filled()),
        })
        .collect();

    let required_total = fields.iter().filter(|f| f.required).count();
    let required_filled = fields.iter().filter(|f| f.required && f.filled).count();

    let percent = if required_total == 0 {
        if touched { 100 } else { 0 }
    } else {
        rounded_percent(required_filled, required_total)
    };

    ProgressReport {
        percent,
        required_total,
        required_filled,
        fields,
    }
}

/// Shorthand for [`calculate`] when only the percentage is needed.
#[must_use]
pub fn percent(fields: &[FieldDefinition], answers: &Answers, touched: bool) -> u8 {
    calculate(fields, answers, touched).percent
}

// Round half up in integer space: floor((2 * 100 * filled + total) / (2 * total)).
// 100 is reserved for a fully answered schema, so very large schemas with one
// gap stop at 99.
fn rounded_percent(filled: usize, total: usize) -> u8 {
    debug_assert!(total > 0 && filled <= total);
    if filled >= total {
        return 100;
    }
    let value = (200 * filled + total) / (2 * total);
    u8::try_from(value.min(99)).unwrap_or(99)
}
