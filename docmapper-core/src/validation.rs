//! Validation pipeline.
//!
//! Every field of an instance is validated concurrently: sync validators resolve
//! immediately, async validators and collection loads are awaited, and the pipeline
//! waits for all of them before running the object-level validators registered for the
//! stage. Violations never short-circuit the remaining fields; they are collected into
//! one ordered list. Storage errors raised while loading linked elements are not
//! violations and abort validation with `Err`.

use async_trait::async_trait;
use futures::{
    FutureExt,
    future::{BoxFuture, join_all, try_join_all},
};
use std::{fmt, sync::Arc};

use bson::Bson;

use crate::{
    document::{FieldBinding, Instance, Slot},
    error::MapperResult,
    schema::{CollectionRule, FieldRule, RuleKind},
    types::{FieldType, Stage, Validator},
};

/// Field name given to object-level violations that do not name a field.
pub const CUSTOM_FIELD: &str = "custom";

/// A single complaint returned by a validator.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    /// The field at fault, for object-level validators that want to name one.
    pub field: Option<String>,
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Violation {
            field: None,
            message: message.into(),
        }
    }

    pub fn on_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Violation {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

/// One or more violations; the error type every validator returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Violations(pub Vec<Violation>);

impl From<Violation> for Violations {
    fn from(violation: Violation) -> Self {
        Violations(vec![violation])
    }
}

impl From<Vec<Violation>> for Violations {
    fn from(violations: Vec<Violation>) -> Self {
        Violations(violations)
    }
}

impl From<String> for Violations {
    fn from(message: String) -> Self {
        Violation::new(message).into()
    }
}

impl From<&str> for Violations {
    fn from(message: &str) -> Self {
        Violation::new(message).into()
    }
}

/// Where a validation runs: the stage, and for collection elements the owning field
/// and position.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    pub stage: Stage,
    pub parent: Option<String>,
    pub index: Option<usize>,
}

impl ValidationContext {
    pub fn new(stage: Stage) -> Self {
        ValidationContext {
            stage,
            parent: None,
            index: None,
        }
    }

    fn element(stage: Stage, parent: &str, index: usize) -> Self {
        ValidationContext {
            stage,
            parent: Some(parent.to_string()),
            index: Some(index),
        }
    }
}

/// A field-tagged validation failure.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    /// The rule of the offending field; `None` for object-level violations.
    pub rule: Option<FieldRule>,
    pub context: ValidationContext,
}

/// The list surfaced by [`MapperError::Validation`](crate::error::MapperError::Validation).
#[derive(Debug, Clone, Default)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    /// Returns the errors reported for `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationError> {
        self.0.iter().filter(move |error| error.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed")?;
        for (i, error) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{} ({})", sep, error.message, error.field)?;
        }
        Ok(())
    }
}

/// Synchronous object-level validator.
pub type ObjectValidatorFn = Arc<dyn Fn(&Instance) -> Result<(), Violations> + Send + Sync>;

/// Asynchronous object-level validator.
#[async_trait]
pub trait AsyncObjectValidator: Send + Sync {
    async fn validate(&self, document: &Instance) -> Result<(), Violations>;
}

#[derive(Clone)]
pub enum ObjectValidator {
    Sync(ObjectValidatorFn),
    Async(Arc<dyn AsyncObjectValidator>),
}

impl fmt::Debug for ObjectValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectValidator::Sync(_) => f.write_str("ObjectValidator::Sync"),
            ObjectValidator::Async(_) => f.write_str("ObjectValidator::Async"),
        }
    }
}

impl Instance {
    /// Validates the instance for its next write: `New` before the first insert,
    /// `Update` afterwards.
    ///
    /// # Returns
    ///
    /// Every violation found; an empty list means the instance is valid.
    ///
    /// # Errors
    ///
    /// Returns an error only if loading linked elements from storage fails.
    pub async fn validate(&mut self) -> MapperResult<Vec<ValidationError>> {
        let stage = if self.is_new() { Stage::New } else { Stage::Update };
        self.validate_with(ValidationContext::new(stage)).await
    }

    /// Validates the instance in an explicit context.
    pub fn validate_with(
        &mut self,
        context: ValidationContext,
    ) -> BoxFuture<'_, MapperResult<Vec<ValidationError>>> {
        async move {
            let field_results = join_all(
                self.fields
                    .iter_mut()
                    .map(|binding| validate_binding(binding, &context)),
            )
            .await;

            let mut errors = Vec::new();
            for result in field_results {
                errors.extend(result?);
            }

            errors.extend(object_violations(self, &context).await);
            Ok(errors)
        }
        .boxed()
    }
}

async fn validate_binding(
    binding: &mut FieldBinding,
    context: &ValidationContext,
) -> MapperResult<Vec<ValidationError>> {
    if binding.rule.generated {
        return Ok(Vec::new());
    }

    let name = binding.name.clone();
    let rule = binding.rule.clone();
    match (&rule.kind, &mut binding.slot) {
        (RuleKind::Single(ty), Slot::Value(value) | Slot::Transient(value)) => {
            let value = value.clone().unwrap_or(Bson::Null);
            Ok(run_type_validator(ty, &name, &value, &rule, context).await)
        }
        // Each type in an extension chain is checked on its own; errors add up.
        (RuleKind::Chain(chain), Slot::Value(value) | Slot::Transient(value)) => {
            let value = value.clone().unwrap_or(Bson::Null);
            let results = join_all(
                chain
                    .iter()
                    .map(|ty| run_type_validator(ty, &name, &value, &rule, context)),
            )
            .await;
            Ok(results.into_iter().flatten().collect())
        }
        (RuleKind::Collection(collection), Slot::Embedded(array)) => {
            let length = array.len();
            if let Some(error) = check_cardinality(&name, collection, length, &rule, context) {
                return Ok(vec![error]);
            }
            let stage = context.stage;
            let results = try_join_all(array.iter_mut().enumerate().map(|(i, element)| {
                element.validate_with(ValidationContext::element(stage, &name, i))
            }))
            .await?;
            Ok(results.into_iter().flatten().collect())
        }
        (RuleKind::Collection(collection), Slot::Linked(array)) => {
            let length = array.load_all().await?;
            if let Some(error) = check_cardinality(&name, collection, length, &rule, context) {
                return Ok(vec![error]);
            }
            let stage = context.stage;
            let results = try_join_all(array.loaded_mut().enumerate().map(|(i, element)| {
                element.validate_with(ValidationContext::element(stage, &name, i))
            }))
            .await?;
            Ok(results.into_iter().flatten().collect())
        }
        _ => Ok(Vec::new()),
    }
}

async fn run_type_validator(
    ty: &FieldType,
    name: &str,
    value: &Bson,
    rule: &FieldRule,
    context: &ValidationContext,
) -> Vec<ValidationError> {
    let result = match ty.validator() {
        Some(Validator::Sync(validator)) => validator(name, value),
        Some(Validator::Async(validator)) => validator.validate(name, value).await,
        None => Ok(()),
    };

    match result {
        Ok(()) => Vec::new(),
        Err(violations) => violations
            .0
            .into_iter()
            .map(|violation| ValidationError {
                field: name.to_string(),
                message: violation.message,
                rule: Some(rule.clone()),
                context: context.clone(),
            })
            .collect(),
    }
}

fn check_cardinality(
    name: &str,
    collection: &CollectionRule,
    length: usize,
    rule: &FieldRule,
    context: &ValidationContext,
) -> Option<ValidationError> {
    let message = match (collection.min, collection.max) {
        (Some(min), _) if length < min => {
            format!("{} requires at least {} elements", name, min)
        }
        (_, Some(max)) if length > max => {
            format!("{} requires at most {} elements", name, max)
        }
        _ => return None,
    };

    Some(ValidationError {
        field: name.to_string(),
        message,
        rule: Some(rule.clone()),
        context: context.clone(),
    })
}

/// Runs the object-level validators registered for the context's stage.
pub(crate) async fn object_violations(
    document: &Instance,
    context: &ValidationContext,
) -> Vec<ValidationError> {
    let schema = document.schema().clone();
    let results = join_all(schema.validators().for_stage(context.stage).iter().map(
        |validator| async move {
            match validator {
                ObjectValidator::Sync(validator) => validator(document),
                ObjectValidator::Async(validator) => validator.validate(document).await,
            }
        },
    ))
    .await;

    results
        .into_iter()
        .filter_map(Result::err)
        .flat_map(|violations| violations.0)
        .map(|violation| ValidationError {
            field: violation
                .field
                .unwrap_or_else(|| CUSTOM_FIELD.to_string()),
            message: violation.message,
            rule: None,
            context: context.clone(),
        })
        .collect()
}
