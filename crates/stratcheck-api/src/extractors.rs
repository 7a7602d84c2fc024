//! # Request Body Extraction & Validation
//!
//! Provides the [`Validate`] trait for request DTOs and helpers to extract
//! and validate JSON bodies in handlers. Validation collects at most one
//! message per field, first failure wins.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Per-field validation messages.
pub type FieldErrors = BTreeMap<String, String>;

/// Accumulates field errors. Only the first message for a field is kept.
#[derive(Debug, Default)]
pub struct Validator {
    errors: FieldErrors,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` against `field` unless `ok` holds.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.errors
                .entry(field.to_string())
                .or_insert_with(|| message.to_string());
        }
    }

    pub fn finish(self) -> Result<(), FieldErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Trait for request types with business rules beyond what serde checks.
pub trait Validate {
    /// Record every rule violation in `v`.
    fn validate(&self, v: &mut Validator);
}

/// True when no value appears twice.
pub fn unique<T: Eq + std::hash::Hash>(values: &[T]) -> bool {
    let mut seen = std::collections::HashSet::with_capacity(values.len());
    values.iter().all(|value| seen.insert(value))
}

/// Loose structural email check: one `@`, non-empty local part, dotted domain.
pub fn is_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    validate(&value)?;
    Ok(value)
}

/// Run `value`'s rules, mapping violations to [`AppError::Validation`].
pub fn validate<T: Validate + ?Sized>(value: &T) -> Result<(), AppError> {
    let mut v = Validator::new();
    value.validate(&mut v);
    v.finish().map_err(AppError::Validation)
}
