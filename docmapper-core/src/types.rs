//! Reusable field type definitions.
//!
//! A [`FieldType`] bundles a primitive [`Kind`], at most one validator (sync or async),
//! named helper functions exposed on field values, and before-create/update/remove
//! transforms. Types are immutable once built and cheap to clone.
//!
//! ```ignore
//! use docmapper::types::{FieldType, Kind, Stage};
//!
//! let email = FieldType::define(|t| {
//!     t.of(Kind::String)
//!         .validate(|field, value| match value.as_str() {
//!             Some(s) if s.contains('@') => Ok(()),
//!             _ => Err(format!("{} is not an email address", field).into()),
//!         })
//!         .helper("domain", |value| {
//!             value.as_str().and_then(|s| s.split('@').nth(1)).unwrap_or_default().into()
//!         })
//! });
//!
//! // The derived type keeps the base validator; both run.
//! let corporate = email.extend(|t| {
//!     t.validate(|field, value| match value.as_str() {
//!         Some(s) if s.ends_with("@example.com") => Ok(()),
//!         _ => Err(format!("{} must be a corporate address", field).into()),
//!     })
//! });
//! ```

use async_trait::async_trait;
use bson::Bson;
use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use crate::{error::MapperResult, validation::Violations};

/// Primitive type a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kind {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Date,
    ObjectId,
    Document,
}

impl Kind {
    /// Returns `true` if `value` is of this kind. `Null` is accepted by every kind.
    pub fn accepts(&self, value: &Bson) -> bool {
        match (self, value) {
            (_, Bson::Null) | (Kind::Any, _) => true,
            (Kind::String, Bson::String(_)) => true,
            (Kind::Number, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => true,
            (Kind::Boolean, Bson::Boolean(_)) => true,
            (Kind::Date, Bson::DateTime(_)) => true,
            (Kind::ObjectId, Bson::ObjectId(_)) => true,
            (Kind::Document, Bson::Document(_)) => true,
            _ => false,
        }
    }
}

/// The lifecycle stage an operation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Before the first insert.
    New,
    /// Before a partial update of a persisted document.
    Update,
    /// Before a delete.
    Remove,
}

/// Per-stage hook lists.
#[derive(Debug, Clone)]
pub struct Hooks<T> {
    pub create: Vec<T>,
    pub update: Vec<T>,
    pub remove: Vec<T>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Hooks {
            create: Vec::new(),
            update: Vec::new(),
            remove: Vec::new(),
        }
    }
}

impl<T> Hooks<T> {
    pub fn for_stage(&self, stage: Stage) -> &[T] {
        match stage {
            Stage::New => &self.create,
            Stage::Update => &self.update,
            Stage::Remove => &self.remove,
        }
    }

    pub fn push(&mut self, stage: Stage, hook: T) {
        match stage {
            Stage::New => self.create.push(hook),
            Stage::Update => self.update.push(hook),
            Stage::Remove => self.remove.push(hook),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.remove.is_empty()
    }
}

/// Synchronous field validator: receives the field name and current value.
pub type SyncFieldValidator = Arc<dyn Fn(&str, &Bson) -> Result<(), Violations> + Send + Sync>;

/// Helper function exposed on field values through [`FieldValue::call`](crate::document::FieldValue::call).
pub type Helper = Arc<dyn Fn(&Bson) -> Bson + Send + Sync>;

/// Asynchronous field validator.
///
/// Implemented for every `Fn(String, Bson) -> impl Future<Output = Result<(), Violations>>`.
#[async_trait]
pub trait AsyncFieldValidator: Send + Sync {
    async fn validate(&self, field: &str, value: &Bson) -> Result<(), Violations>;
}

#[async_trait]
impl<F, Fut> AsyncFieldValidator for F
where
    F: Fn(String, Bson) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Violations>> + Send + 'static,
{
    async fn validate(&self, field: &str, value: &Bson) -> Result<(), Violations> {
        (self)(field.to_string(), value.clone()).await
    }
}

/// Derives a field's stored value from its current one, e.g. stamping a timestamp.
///
/// Implemented for every synchronous `Fn(Bson) -> MapperResult<Bson>`; implement it on
/// a struct for transforms that need to await.
#[async_trait]
pub trait FieldTransform: Send + Sync {
    async fn transform(&self, value: Bson) -> MapperResult<Bson>;
}

#[async_trait]
impl<F> FieldTransform for F
where
    F: Fn(Bson) -> MapperResult<Bson> + Send + Sync,
{
    async fn transform(&self, value: Bson) -> MapperResult<Bson> {
        (self)(value)
    }
}

/// The single validator slot of a type.
#[derive(Clone)]
pub enum Validator {
    Sync(SyncFieldValidator),
    Async(Arc<dyn AsyncFieldValidator>),
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Sync(_) => f.write_str("Validator::Sync"),
            Validator::Async(_) => f.write_str("Validator::Async"),
        }
    }
}

struct TypeDef {
    kind: Kind,
    validator: Option<Validator>,
    helpers: BTreeMap<String, Helper>,
    transforms: Hooks<Arc<dyn FieldTransform>>,
    parent: Option<FieldType>,
}

/// An immutable, shareable field type.
#[derive(Clone)]
pub struct FieldType(Arc<TypeDef>);

impl FieldType {
    /// Builds a new root type.
    pub fn define(definer: impl FnOnce(TypeBuilder) -> TypeBuilder) -> FieldType {
        definer(TypeBuilder::default()).build()
    }

    /// Builds a type derived from this one.
    ///
    /// The derived type starts with copies of this type's helpers and transform lists and
    /// an empty validator slot. Its parent is remembered, so a field declared with the
    /// derived type validates against every type in the chain.
    pub fn extend(&self, definer: impl FnOnce(TypeBuilder) -> TypeBuilder) -> FieldType {
        let builder = TypeBuilder {
            kind: self.0.kind,
            validator: None,
            helpers: self.0.helpers.clone(),
            transforms: self.0.transforms.clone(),
            parent: Some(self.clone()),
        };
        definer(builder).build()
    }

    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.0.validator.as_ref()
    }

    pub fn helper(&self, name: &str) -> Option<&Helper> {
        self.0.helpers.get(name)
    }

    pub fn helper_names(&self) -> impl Iterator<Item = &str> {
        self.0.helpers.keys().map(String::as_str)
    }

    pub fn transforms(&self) -> &Hooks<Arc<dyn FieldTransform>> {
        &self.0.transforms
    }

    pub fn parent(&self) -> Option<&FieldType> {
        self.0.parent.as_ref()
    }

    /// Returns the extension chain, root type first and this type last.
    pub fn chain(&self) -> Vec<FieldType> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent();
        while let Some(ty) = current {
            chain.push(ty.clone());
            current = ty.parent();
        }
        chain.reverse();
        chain
    }

    /// Returns `true` when both handles refer to the same definition.
    pub fn same_as(&self, other: &FieldType) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Kind> for FieldType {
    fn from(kind: Kind) -> Self {
        FieldType::define(|t| t.of(kind))
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldType")
            .field("kind", &self.0.kind)
            .field("validator", &self.0.validator)
            .field("helpers", &self.0.helpers.keys().collect::<Vec<_>>())
            .field("chain_depth", &(self.chain().len()))
            .finish()
    }
}

/// Builder handed to [`FieldType::define`] and [`FieldType::extend`].
#[derive(Default)]
pub struct TypeBuilder {
    kind: Kind,
    validator: Option<Validator>,
    helpers: BTreeMap<String, Helper>,
    transforms: Hooks<Arc<dyn FieldTransform>>,
    parent: Option<FieldType>,
}

impl TypeBuilder {
    /// Sets the primitive kind.
    pub fn of(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets a synchronous validator, replacing any validator already set.
    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&str, &Bson) -> Result<(), Violations> + Send + Sync + 'static,
    {
        self.replace_validator(Validator::Sync(Arc::new(validator)));
        self
    }

    /// Sets an asynchronous validator, replacing any validator already set.
    pub fn validate_async<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(String, Bson) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Violations>> + Send + 'static,
    {
        self.replace_validator(Validator::Async(Arc::new(validator)));
        self
    }

    /// Exposes a named helper on values of this type.
    pub fn helper<F>(mut self, name: impl Into<String>, helper: F) -> Self
    where
        F: Fn(&Bson) -> Bson + Send + Sync + 'static,
    {
        let name = name.into();
        if self.helpers.contains_key(&name) {
            tracing::warn!(helper = %name, "overriding existing helper on field type");
        }
        self.helpers.insert(name, Arc::new(helper));
        self
    }

    /// Appends a transform run before the given stage.
    pub fn transform_before<F>(mut self, stage: Stage, transform: F) -> Self
    where
        F: Fn(Bson) -> MapperResult<Bson> + Send + Sync + 'static,
    {
        self.transforms.push(stage, Arc::new(transform));
        self
    }

    /// Appends a transform that needs to await, run before the given stage.
    pub fn transform_async_before<T>(mut self, stage: Stage, transform: T) -> Self
    where
        T: FieldTransform + 'static,
    {
        self.transforms.push(stage, Arc::new(transform));
        self
    }

    fn replace_validator(&mut self, validator: Validator) {
        if self.validator.is_some() {
            tracing::warn!("overriding existing validator on field type");
        }
        self.validator = Some(validator);
    }

    fn build(self) -> FieldType {
        FieldType(Arc::new(TypeDef {
            kind: self.kind,
            validator: self.validator,
            helpers: self.helpers,
            transforms: self.transforms,
            parent: self.parent,
        }))
    }
}
