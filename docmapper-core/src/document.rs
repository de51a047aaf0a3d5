//! Document instances and their field bindings.
//!
//! An [`Instance`] is one materialized document: a top-level document, an element of an
//! embedded array, or a linked child. Its fields are bound once, at construction, from
//! the schema's field map into an ordered list of [`FieldBinding`]s, each holding a tagged
//! [`Slot`]. Writes through [`Instance::set`] are recorded in the shared
//! [`Lifecycle`](crate::lifecycle::Lifecycle) so [`Instance::save`] can send a minimal
//! partial update.
//!
//! ```ignore
//! let mut user = users.create(doc! { "name": "Alice", "age": 30 })?;
//! user.save().await?;
//!
//! user.set("age", 31)?;
//! assert_eq!(user.pending_update().sets(), &doc! { "age": 31 });
//! user.save().await?;
//! ```

use bson::{
    Bson, Document,
    de::deserialize_from_bson,
    oid::ObjectId,
};
use futures::{
    FutureExt,
    future::{BoxFuture, try_join_all},
};
use serde::de::DeserializeOwned;
use std::{fmt, ops::Deref, sync::Arc};

use crate::{
    embedded::EmbeddedArray,
    error::{MapperError, MapperResult},
    lifecycle::{SharedLifecycle, UpdateStatement},
    linked::LinkedArray,
    mapper::Connection,
    query::Filter,
    schema::{CollectionKind, FieldRule, RuleKind, Schema, Target},
    types::{FieldType, Stage},
    update,
    validation::{ValidationContext, ValidationErrors, object_violations},
};

/// Storage of one bound field.
#[derive(Debug)]
pub enum Slot {
    Value(Option<Bson>),
    /// Kept in memory only.
    Transient(Option<Bson>),
    Embedded(EmbeddedArray),
    Linked(LinkedArray),
}

/// A schema field bound to an instance.
#[derive(Debug)]
pub struct FieldBinding {
    pub(crate) name: String,
    pub(crate) rule: FieldRule,
    pub(crate) slot: Slot,
}

impl FieldBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &FieldRule {
        &self.rule
    }
}

/// Where an instance is persisted, which decides the paths its mutations are recorded at.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// A top-level document of `collection`.
    Root { collection: String },
    /// A document of an embedded schema created on its own. It can only be persisted by
    /// pushing it into a host document.
    Unattached,
    /// An embedded document loaded on its own from its host document; writes go through
    /// the positional operator.
    Detached {
        collection: String,
        host_id: Bson,
        array_field: String,
    },
    /// An element of an embedded array, recorded under `prefix` in the root document.
    Element {
        root: Box<Placement>,
        root_id: Bson,
        prefix: String,
    },
}

impl Placement {
    /// Path a mutation of `field` is recorded at.
    pub fn path(&self, field: &str) -> String {
        match self {
            Placement::Root { .. } | Placement::Unattached => field.to_string(),
            Placement::Detached { array_field, .. } => format!("{}.$.{}", array_field, field),
            Placement::Element { prefix, .. } => format!("{}.{}", prefix, field),
        }
    }

    /// Placement of element `index` of the array `field` of a document placed here.
    pub(crate) fn element(&self, own_id: &Bson, field: &str, index: usize) -> Placement {
        let prefix = format!("{}.{}", self.path(field), index);
        match self {
            Placement::Element { root, root_id, .. } => Placement::Element {
                root: root.clone(),
                root_id: root_id.clone(),
                prefix,
            },
            other => Placement::Element {
                root: Box::new(other.clone()),
                root_id: own_id.clone(),
                prefix,
            },
        }
    }

    pub(crate) fn for_target(target: &Target) -> Placement {
        match target {
            Target::Collection(collection) => Placement::Root {
                collection: collection.clone(),
            },
            Target::Embedded { .. } => Placement::Unattached,
        }
    }
}

/// Link from an element or linked child back to the document holding it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentLink {
    /// The parent's id, or the parent key value for linked children.
    pub id: Bson,
    pub field: String,
    pub index: Option<usize>,
    pub kind: CollectionKind,
}

/// Construction options of an instance.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub lifecycle: Option<SharedLifecycle>,
    pub placement: Placement,
    pub parent: Option<ParentLink>,
    pub persisted: bool,
}

impl Binding {
    pub fn new(placement: Placement) -> Self {
        Binding {
            lifecycle: None,
            placement,
            parent: None,
            persisted: false,
        }
    }

    pub fn persisted(mut self) -> Self {
        self.persisted = true;
        self
    }
}

/// A field value decorated with its type's helper functions.
///
/// Dereferences to the raw value, and converts back into it, so it can be handed
/// straight to [`Instance::set`].
#[derive(Clone)]
pub struct FieldValue {
    value: Bson,
    field_type: Option<FieldType>,
}

impl FieldValue {
    pub fn value(&self) -> &Bson {
        &self.value
    }

    pub fn into_inner(self) -> Bson {
        self.value
    }

    /// Calls the helper `name` of the field's type on the value.
    ///
    /// Returns `None` if the type has no such helper.
    pub fn call(&self, name: &str) -> Option<Bson> {
        let helper = self.field_type.as_ref()?.helper(name)?;
        Some(helper(&self.value))
    }

    pub fn helpers(&self) -> Vec<&str> {
        self.field_type
            .as_ref()
            .map(|ty| ty.helper_names().collect())
            .unwrap_or_default()
    }
}

impl Deref for FieldValue {
    type Target = Bson;

    fn deref(&self) -> &Bson {
        &self.value
    }
}

impl From<FieldValue> for Bson {
    fn from(value: FieldValue) -> Self {
        value.value
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldValue")
            .field("value", &self.value)
            .field("helpers", &self.helpers())
            .finish()
    }
}

/// One materialized document.
pub struct Instance {
    pub(crate) schema: Arc<Schema>,
    pub(crate) id: Bson,
    pub(crate) fields: Vec<FieldBinding>,
    pub(crate) extra: Document,
    pub(crate) lifecycle: SharedLifecycle,
    pub(crate) placement: Placement,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) connection: Connection,
}

impl Instance {
    /// Binds `values` to the fields of `schema`.
    ///
    /// A missing `_id` is generated. Values not declared on the schema (foreign keys
    /// among them) are kept and persisted as they are.
    pub(crate) fn bind(
        schema: Arc<Schema>,
        mut values: Document,
        binding: Binding,
        connection: Connection,
    ) -> MapperResult<Instance> {
        let id = match values.remove("_id") {
            None | Some(Bson::Null) => Bson::ObjectId(ObjectId::new()),
            Some(id) => id,
        };
        let lifecycle = binding
            .lifecycle
            .unwrap_or_else(|| SharedLifecycle::new(!binding.persisted));

        let mut instance = Instance {
            schema: schema.clone(),
            id,
            fields: Vec::new(),
            extra: Document::new(),
            lifecycle,
            placement: binding.placement,
            parent: binding.parent,
            connection,
        };

        let rules = schema.fields();
        for (name, rule) in rules.iter() {
            let raw = values.remove(name);
            let slot = match &rule.kind {
                RuleKind::Collection(collection) => match collection.kind {
                    CollectionKind::Embedded => Slot::Embedded(EmbeddedArray::bind(
                        &instance,
                        name,
                        collection.schema.clone(),
                        raw,
                    )?),
                    CollectionKind::Linked => Slot::Linked(LinkedArray::bind(
                        &instance,
                        name,
                        collection.schema.clone(),
                        raw,
                    )?),
                },
                _ if rule.transient => Slot::Transient(raw),
                _ => Slot::Value(raw),
            };
            instance.fields.push(FieldBinding {
                name: name.to_string(),
                rule: rule.clone(),
                slot,
            });
        }
        instance.extra = values;

        Ok(instance)
    }

    /// Materializes a document read from storage.
    pub(crate) fn load(
        schema: Arc<Schema>,
        document: Document,
        placement: Placement,
        connection: Connection,
    ) -> MapperResult<Instance> {
        Instance::bind(
            schema,
            document,
            Binding::new(placement).persisted(),
            connection,
        )
    }

    pub fn id(&self) -> &Bson {
        &self.id
    }

    /// Returns `true` until the document (or the root document holding it) is inserted.
    pub fn is_new(&self) -> bool {
        self.lifecycle.is_new()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn fields(&self) -> &[FieldBinding] {
        &self.fields
    }

    /// Copy of the statement the next update request sends.
    pub fn pending_update(&self) -> UpdateStatement {
        self.lifecycle.statement()
    }

    fn binding(&self, name: &str) -> Option<&FieldBinding> {
        self.fields.iter().find(|binding| binding.name == name)
    }

    fn binding_mut(&mut self, name: &str) -> Option<&mut FieldBinding> {
        self.fields.iter_mut().find(|binding| binding.name == name)
    }

    /// Raw value of a scalar field, `_id`, or an undeclared stored key.
    pub fn get(&self, name: &str) -> Option<&Bson> {
        if name == "_id" {
            return Some(&self.id);
        }
        match self.binding(name) {
            Some(FieldBinding {
                slot: Slot::Value(value) | Slot::Transient(value),
                ..
            }) => value.as_ref(),
            Some(_) => None,
            None => self.extra.get(name),
        }
    }

    /// Value of a scalar field decorated with its type's helpers.
    pub fn value(&self, name: &str) -> Option<FieldValue> {
        let value = self.get(name)?.clone();
        let field_type = self
            .binding(name)
            .and_then(|binding| binding.rule.field_type())
            .cloned();
        Some(FieldValue { value, field_type })
    }

    /// Writes a scalar field.
    ///
    /// Nothing is validated here. On a persisted document the write is recorded as a
    /// `$set` at the field's path; transient fields are never recorded. Foreign key
    /// fields declared by the schema can be written the same way.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::UnknownField`] for collection fields and names the schema
    /// does not declare.
    pub fn set(&mut self, name: &str, value: impl Into<Bson>) -> MapperResult<()> {
        let value = value.into();
        let path = self.placement.path(name);

        if let Some(binding) = self.fields.iter_mut().find(|binding| binding.name == name) {
            return match &mut binding.slot {
                Slot::Transient(slot) => {
                    *slot = Some(value);
                    Ok(())
                }
                Slot::Value(slot) => {
                    *slot = Some(value.clone());
                    self.lifecycle.record_set(&path, value);
                    Ok(())
                }
                Slot::Embedded(_) | Slot::Linked(_) => Err(MapperError::UnknownField(format!(
                    "{} is a collection field of {}",
                    name,
                    self.schema.name()
                ))),
            };
        }

        if self.schema.foreign_keys().any(|key| key.child_field == name) {
            self.extra.insert(name, value.clone());
            self.lifecycle.record_set(&path, value);
            return Ok(());
        }

        Err(MapperError::UnknownField(format!(
            "{} is not a field of {}",
            name,
            self.schema.name()
        )))
    }

    /// Writes a field without recording it.
    pub(crate) fn store(&mut self, name: &str, value: Bson) -> MapperResult<()> {
        match self.binding_mut(name) {
            Some(FieldBinding {
                slot: Slot::Value(slot) | Slot::Transient(slot),
                ..
            }) => {
                *slot = Some(value);
                Ok(())
            }
            Some(_) => Err(MapperError::UnknownField(format!(
                "{} is a collection field",
                name
            ))),
            None => {
                self.extra.insert(name, value);
                Ok(())
            }
        }
    }

    pub fn embedded(&self, name: &str) -> MapperResult<&EmbeddedArray> {
        match self.binding(name) {
            Some(FieldBinding {
                slot: Slot::Embedded(array),
                ..
            }) => Ok(array),
            _ => Err(MapperError::UnknownField(format!(
                "{} is not an embedded array of {}",
                name,
                self.schema.name()
            ))),
        }
    }

    pub fn embedded_mut(&mut self, name: &str) -> MapperResult<&mut EmbeddedArray> {
        let schema = self.schema.name().to_string();
        match self.binding_mut(name) {
            Some(FieldBinding {
                slot: Slot::Embedded(array),
                ..
            }) => Ok(array),
            _ => Err(MapperError::UnknownField(format!(
                "{} is not an embedded array of {}",
                name, schema
            ))),
        }
    }

    /// The linked array `name`, keyed by the current value of the parent field.
    pub fn linked_mut(&mut self, name: &str) -> MapperResult<&mut LinkedArray> {
        let key = self.linked_key(name);
        let schema = self.schema.name().to_string();
        match self.binding_mut(name) {
            Some(FieldBinding {
                slot: Slot::Linked(array),
                ..
            }) => {
                array.set_parent_key(key.unwrap_or(Bson::Null));
                Ok(array)
            }
            _ => Err(MapperError::UnknownField(format!(
                "{} is not a linked array of {}",
                name, schema
            ))),
        }
    }

    fn linked_key(&self, name: &str) -> Option<Bson> {
        let binding = self.binding(name)?;
        let collection = binding.rule.collection()?;
        let key = collection.schema.foreign_key(name)?;
        self.get(&key.parent_field).cloned()
    }

    /// Calls an instance method registered on the schema.
    pub fn call(&mut self, method: &str, args: &[Bson]) -> MapperResult<Bson> {
        let method_fn = self.schema.method(method).cloned().ok_or_else(|| {
            MapperError::UnknownField(format!(
                "{} has no method {}",
                self.schema.name(),
                method
            ))
        })?;
        method_fn(self, args)
    }

    /// Loads the parent a foreign key exposed as `alias` points at.
    pub async fn related(&self, alias: &str) -> MapperResult<Option<Instance>> {
        let key = self
            .schema
            .foreign_keys()
            .find(|key| key.alias.as_deref() == Some(alias))
            .cloned()
            .ok_or_else(|| {
                MapperError::UnknownField(format!(
                    "{} exposes no relation {}",
                    self.schema.name(),
                    alias
                ))
            })?;
        let parent = self.connection.registry().get(&key.parent).ok_or_else(|| {
            MapperError::Configuration(format!("schema {} is not registered", key.parent))
        })?;
        let Some(value) = self.get(&key.child_field).cloned() else {
            return Ok(None);
        };

        let backend = self.connection.backend()?;
        let collection = parent.target().collection().to_string();
        let selector = Filter::eq(key.parent_field.clone(), value);
        tracing::debug!(collection = %collection, ?selector, "loading related document");
        match backend.find_one(&collection, &selector, None).await? {
            Some(document) => Ok(Some(Instance::load(
                parent.clone(),
                document,
                Placement::for_target(parent.target()),
                self.connection.clone(),
            )?)),
            None => Ok(None),
        }
    }

    /// Raw persisted form: `_id`, non-transient scalar fields, embedded arrays inline,
    /// then undeclared stored keys. Linked arrays store nothing inline.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert("_id", self.id.clone());
        for binding in &self.fields {
            match &binding.slot {
                Slot::Value(Some(value)) => {
                    document.insert(binding.name.clone(), value.clone());
                }
                Slot::Embedded(array) => {
                    document.insert(binding.name.clone(), array.to_bson());
                }
                Slot::Value(None) | Slot::Transient(_) | Slot::Linked(_) => {}
            }
        }
        for (key, value) in &self.extra {
            document.insert(key.clone(), value.clone());
        }
        document
    }

    /// JSON rendering of [`Instance::to_document`].
    pub fn to_json(&self) -> MapperResult<serde_json::Value> {
        Ok(serde_json::to_value(self.to_document())?)
    }

    /// Deserializes the raw persisted form into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> MapperResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.to_document()))?)
    }

    /// Moves the instance under a new lifecycle and placement, along with every
    /// embedded descendant.
    pub(crate) fn adopt(
        &mut self,
        lifecycle: SharedLifecycle,
        placement: Placement,
        parent: Option<ParentLink>,
    ) {
        self.lifecycle = lifecycle;
        self.placement = placement;
        self.parent = parent;
        for binding in self.fields.iter_mut() {
            if let Slot::Embedded(array) = &mut binding.slot {
                array.rebase(&self.lifecycle, &self.placement, &self.id);
            }
        }
    }

    fn collection_for_insert(&self) -> MapperResult<String> {
        match &self.placement {
            Placement::Root { collection } => Ok(collection.clone()),
            _ => Err(MapperError::Precondition(format!(
                "{} documents are only inserted through their host document",
                self.schema.name()
            ))),
        }
    }

    /// Validates and persists the instance.
    ///
    /// A new document runs its create transforms and is inserted whole. A persisted
    /// document runs its update transforms and sends the recorded instructions as one
    /// partial update; when nothing was recorded no request is issued. Children pushed
    /// onto linked arrays are saved afterwards, concurrently.
    ///
    /// # Errors
    ///
    /// - [`MapperError::Precondition`] if the mapper is closed, or a new embedded
    ///   document is saved on its own
    /// - [`MapperError::Validation`] with every violation found
    /// - [`MapperError::DocumentNotFound`] if the update matched nothing
    /// - transform and backend errors as raised
    pub fn save(&mut self) -> BoxFuture<'_, MapperResult<()>> {
        async move {
            let backend = self.connection.backend()?;
            let stage = if self.is_new() { Stage::New } else { Stage::Update };
            let collection = match stage {
                Stage::New => Some(self.collection_for_insert()?),
                _ => None,
            };

            let errors = self.validate_with(ValidationContext::new(stage)).await?;
            if !errors.is_empty() {
                return Err(ValidationErrors(errors).into());
            }

            if let Some(collection) = collection {
                self.run_transforms(Stage::New).await?;
                tracing::debug!(collection = %collection, id = %self.id, "inserting document");
                backend
                    .insert_document(&collection, self.to_document())
                    .await?;
                self.lifecycle.mark_persisted();
            } else if !self.lifecycle.is_clean() {
                self.run_transforms(Stage::Update).await?;
                update::execute(backend.as_ref(), &self.placement, &self.id, &self.lifecycle)
                    .await?;
            }

            self.flush_linked().await
        }
        .boxed()
    }

    async fn flush_linked(&mut self) -> MapperResult<()> {
        let keys: Vec<Option<Bson>> = self
            .fields
            .iter()
            .map(|binding| match binding.slot {
                Slot::Linked(_) => self.linked_key(&binding.name),
                _ => None,
            })
            .collect();

        let flushes = self
            .fields
            .iter_mut()
            .zip(keys)
            .filter_map(|(binding, key)| match &mut binding.slot {
                Slot::Linked(array) if array.has_pending() => Some(array.flush(key)),
                _ => None,
            });
        try_join_all(flushes).await?;
        Ok(())
    }

    /// Deletes the document.
    ///
    /// Only the before-remove object validators run, followed by the remove transforms.
    ///
    /// # Errors
    ///
    /// - [`MapperError::Precondition`] if the mapper is closed or the document is embedded
    /// - [`MapperError::Validation`] if a before-remove validator objects
    /// - [`MapperError::DocumentNotFound`] if nothing was deleted
    pub async fn destroy(&mut self) -> MapperResult<()> {
        let backend = self.connection.backend()?;
        let collection = match &self.placement {
            Placement::Root { collection } => collection.clone(),
            _ => {
                return Err(MapperError::Precondition(format!(
                    "embedded {} documents cannot be destroyed on their own",
                    self.schema.name()
                )));
            }
        };

        let errors = object_violations(self, &ValidationContext::new(Stage::Remove)).await;
        if !errors.is_empty() {
            return Err(ValidationErrors(errors).into());
        }

        self.run_transforms(Stage::Remove).await?;

        let selector = Filter::eq("_id", self.id.clone());
        tracing::debug!(collection = %collection, ?selector, "removing document");
        let removed = backend.remove(&collection, &selector).await?;
        if removed == 0 {
            return Err(MapperError::DocumentNotFound(
                update::display_id(&self.id),
                collection,
            ));
        }
        self.lifecycle.discard();
        Ok(())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("schema", &self.schema.name())
            .field("id", &self.id)
            .field("is_new", &self.is_new())
            .field("placement", &self.placement)
            .field("document", &self.to_document())
            .finish()
    }
}
