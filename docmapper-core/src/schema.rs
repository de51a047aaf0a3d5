//! Schema compiler and registry.
//!
//! A schema is compiled once from a definer closure into an immutable [`Schema`]
//! descriptor, shared by every instance of it. Compiled schemas are kept in a
//! [`Registry`] so linked relations can resolve their parent by name.
//!
//! ```ignore
//! use docmapper::schema::{ForeignKey, Registry};
//! use docmapper::types::Kind;
//!
//! let registry = Registry::new();
//!
//! let comment = registry.define("Comment", |s| {
//!     s.field("text").of(Kind::String);
//!     s.foreign_key(ForeignKey::to("Post").using("_id").through("comments").as_key("post_id"));
//!     s.in_collection("comments");
//!     Ok(())
//! })?;
//!
//! let post = registry.define("Post", |s| {
//!     s.field("title").of(Kind::String);
//!     s.field("comments").linked_array_of(&comment).with("0:n")?;
//!     s.in_collection("posts");
//!     Ok(())
//! })?;
//! ```

use bson::Bson;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    backend::IndexSpec,
    document::Instance,
    error::{MapperError, MapperResult},
    query::SortDirection,
    transform::{ObjectTransform, TransformEntry},
    types::{FieldType, Hooks, Stage},
    validation::{AsyncObjectValidator, ObjectValidator, Violations},
};

/// Instance method registered on a schema, invoked through [`Instance::call`].
pub type Method = Arc<dyn Fn(&mut Instance, &[Bson]) -> MapperResult<Bson> + Send + Sync>;

/// Whether a collection field is stored inline or in its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Embedded,
    Linked,
}

/// Rule of an embedded or linked array field.
#[derive(Clone)]
pub struct CollectionRule {
    pub kind: CollectionKind,
    pub schema: Arc<Schema>,
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl fmt::Debug for CollectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRule")
            .field("kind", &self.kind)
            .field("schema", &self.schema.name())
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    /// A field of a single type.
    Single(FieldType),
    /// A field whose type was built by extension, root type first.
    Chain(Vec<FieldType>),
    Collection(CollectionRule),
}

/// Compiled metadata of one schema field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub kind: RuleKind,
    /// Never persisted and never recorded in updates.
    pub transient: bool,
    /// Populated by transforms only; always passes validation.
    pub generated: bool,
}

impl FieldRule {
    fn typed(ty: FieldType) -> Self {
        let chain = ty.chain();
        let kind = if chain.len() == 1 {
            RuleKind::Single(ty)
        } else {
            RuleKind::Chain(chain)
        };
        FieldRule {
            kind,
            transient: false,
            generated: false,
        }
    }

    /// The most derived type of a scalar field.
    pub fn field_type(&self) -> Option<&FieldType> {
        match &self.kind {
            RuleKind::Single(ty) => Some(ty),
            RuleKind::Chain(chain) => chain.last(),
            RuleKind::Collection(_) => None,
        }
    }

    pub fn collection(&self) -> Option<&CollectionRule> {
        match &self.kind {
            RuleKind::Collection(rule) => Some(rule),
            _ => None,
        }
    }
}

/// Ordered field name to rule map.
#[derive(Debug, Clone, Default)]
pub struct FieldMap(Vec<(String, FieldRule)>);

impl FieldMap {
    pub fn get(&self, name: &str) -> Option<&FieldRule> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, rule)| rule)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut FieldRule> {
        self.0.iter_mut().find(|(n, _)| n == name).map(|(_, rule)| rule)
    }

    /// Inserts a rule, replacing an existing rule of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, rule: FieldRule) {
        let name = name.into();
        match self.get_mut(&name) {
            Some(existing) => *existing = rule,
            None => self.0.push((name, rule)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.0.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A field map shared between a schema and every schema extended from it.
pub type SharedFieldMap = Arc<RwLock<FieldMap>>;

/// Relation from a child schema back to its parent through a linked array field.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    /// Name of the parent schema.
    pub parent: String,
    /// Parent field whose value the child stores.
    pub parent_field: String,
    /// Linked array field on the parent.
    pub container_field: String,
    /// Child field holding the parent's value.
    pub child_field: String,
    /// Name under which the child can load its parent.
    pub alias: Option<String>,
}

impl ForeignKey {
    pub fn to(parent: impl Into<String>) -> ForeignKeyBuilder {
        ForeignKeyBuilder {
            key: ForeignKey {
                parent: parent.into(),
                parent_field: "_id".to_string(),
                container_field: String::new(),
                child_field: String::new(),
                alias: None,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForeignKeyBuilder {
    key: ForeignKey,
}

impl ForeignKeyBuilder {
    /// Parent field referenced by the key. Defaults to `_id`.
    pub fn using(mut self, parent_field: impl Into<String>) -> Self {
        self.key.parent_field = parent_field.into();
        self
    }

    pub fn through(mut self, container_field: impl Into<String>) -> Self {
        self.key.container_field = container_field.into();
        self
    }

    pub fn as_key(mut self, child_field: impl Into<String>) -> Self {
        self.key.child_field = child_field.into();
        self
    }

    pub fn exposed_as(mut self, alias: impl Into<String>) -> Self {
        self.key.alias = Some(alias.into());
        self
    }
}

/// Where documents of a schema are stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Top-level documents of a collection.
    Collection(String),
    /// Elements of an array field inside documents of a host collection.
    Embedded {
        collection: String,
        array_field: String,
    },
}

impl Target {
    /// Collection the documents physically live in.
    pub fn collection(&self) -> &str {
        match self {
            Target::Collection(collection) => collection,
            Target::Embedded { collection, .. } => collection,
        }
    }
}

/// A compiled schema descriptor.
pub struct Schema {
    name: String,
    fields: SharedFieldMap,
    foreign_keys: HashMap<String, ForeignKey>,
    extensions: BTreeMap<String, Method>,
    indexes: Vec<IndexSpec>,
    validators: Hooks<ObjectValidator>,
    transforms: Hooks<TransformEntry>,
    target: Target,
    lifted: HashSet<String>,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Returns a snapshot of the field rules in declaration order.
    pub fn fields(&self) -> FieldMap {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn field(&self, name: &str) -> Option<FieldRule> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Replaces the rule of a field.
    ///
    /// The field map is shared with every schema extended from this one (and with the
    /// schema this one extends), so the change is visible through all of them.
    pub fn redefine_field(&self, name: impl Into<String>, rule: FieldRule) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, rule);
    }

    /// Returns `true` if both schemas read and write the same field map.
    pub fn shares_fields_with(&self, other: &Schema) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }

    /// Foreign key declared for a parent's linked array field.
    pub fn foreign_key(&self, container_field: &str) -> Option<&ForeignKey> {
        self.foreign_keys.get(container_field)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.foreign_keys.values()
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.extensions.get(name)
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn validators(&self) -> &Hooks<ObjectValidator> {
        &self.validators
    }

    pub fn transforms(&self) -> &Hooks<TransformEntry> {
        &self.transforms
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.target, Target::Embedded { .. })
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("fields", &self.fields().iter().map(|(n, _)| n.to_string()).collect::<Vec<_>>())
            .field("indexes", &self.indexes)
            .finish()
    }
}

/// Named schemas, shared by everything built from one mapper.
#[derive(Clone, Default)]
pub struct Registry {
    schemas: Arc<RwLock<HashMap<String, Arc<Schema>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Compiles a schema and registers it under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Configuration`] if the definer declares a malformed
    /// cardinality, no storage target, or a linked field whose child has no matching
    /// foreign key. Errors returned by the definer itself are passed through.
    pub fn define<F>(&self, name: impl Into<String>, definer: F) -> MapperResult<Arc<Schema>>
    where
        F: FnOnce(&mut SchemaBuilder) -> MapperResult<()>,
    {
        let mut builder = SchemaBuilder::new(name.into(), self.clone());
        definer(&mut builder)?;
        self.register(builder.finish()?)
    }

    /// Compiles a schema extending `base`.
    ///
    /// The new schema starts with copies of the base's foreign keys, methods, indexes,
    /// validators, transforms and storage target. The field map is not copied: both
    /// schemas read and write the same one.
    pub fn extend<F>(
        &self,
        base: &Schema,
        name: impl Into<String>,
        definer: F,
    ) -> MapperResult<Arc<Schema>>
    where
        F: FnOnce(&mut SchemaBuilder) -> MapperResult<()>,
    {
        let mut builder = SchemaBuilder::extending(name.into(), self.clone(), base);
        definer(&mut builder)?;
        self.register(builder.finish()?)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn schemas(&self) -> Vec<Arc<Schema>> {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn register(&self, schema: Schema) -> MapperResult<Arc<Schema>> {
        let schema = Arc::new(schema);
        let replaced = self
            .schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema.name.clone(), schema.clone());
        if replaced.is_some() {
            tracing::warn!(schema = %schema.name, "replacing previously registered schema");
        }
        tracing::debug!(schema = %schema.name, target = ?schema.target, "schema registered");
        Ok(schema)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Registry")
            .field("schemas", &schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder handed to schema definers.
pub struct SchemaBuilder {
    name: String,
    registry: Registry,
    fields: SharedFieldMap,
    foreign_keys: HashMap<String, ForeignKey>,
    extensions: BTreeMap<String, Method>,
    indexes: Vec<IndexSpec>,
    validators: Hooks<ObjectValidator>,
    transforms: Hooks<TransformEntry>,
    target: Option<Target>,
    lifted: HashSet<String>,
}

impl SchemaBuilder {
    fn new(name: String, registry: Registry) -> Self {
        SchemaBuilder {
            name,
            registry,
            fields: Arc::new(RwLock::new(FieldMap::default())),
            foreign_keys: HashMap::new(),
            extensions: BTreeMap::new(),
            indexes: Vec::new(),
            validators: Hooks::default(),
            transforms: Hooks::default(),
            target: None,
            lifted: HashSet::new(),
        }
    }

    fn extending(name: String, registry: Registry, base: &Schema) -> Self {
        SchemaBuilder {
            name,
            registry,
            fields: base.fields.clone(),
            foreign_keys: base.foreign_keys.clone(),
            extensions: base.extensions.clone(),
            indexes: base.indexes.clone(),
            validators: base.validators.clone(),
            transforms: base.transforms.clone(),
            target: Some(base.target.clone()),
            lifted: base.lifted.clone(),
        }
    }

    /// Name of the schema being defined.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declares a persisted field.
    pub fn field(&mut self, name: impl Into<String>) -> FieldDecl<'_> {
        FieldDecl {
            builder: self,
            name: name.into(),
            transient: false,
        }
    }

    /// Declares a field that lives only in memory.
    pub fn transient_field(&mut self, name: impl Into<String>) -> FieldDecl<'_> {
        FieldDecl {
            builder: self,
            name: name.into(),
            transient: true,
        }
    }

    /// Stores documents of this schema as top-level documents of `collection`.
    pub fn in_collection(&mut self, collection: impl Into<String>) -> &mut Self {
        self.target = Some(Target::Collection(collection.into()));
        self
    }

    /// Stores documents of this schema inside `array_field` of documents in `collection`.
    pub fn embedded_in(
        &mut self,
        collection: impl Into<String>,
        array_field: impl Into<String>,
    ) -> &mut Self {
        self.target = Some(Target::Embedded {
            collection: collection.into(),
            array_field: array_field.into(),
        });
        self
    }

    /// Declares a TTL index expiring documents `expire_after_secs` after the date in `field`.
    pub fn ttl_index(
        &mut self,
        field: impl Into<String>,
        expire_after_secs: u64,
        direction: SortDirection,
    ) -> &mut Self {
        self.indexes.push(IndexSpec {
            field: field.into(),
            direction,
            expire_after_secs,
        });
        self
    }

    /// Registers an instance method.
    pub fn method<F>(&mut self, name: impl Into<String>, method: F) -> &mut Self
    where
        F: Fn(&mut Instance, &[Bson]) -> MapperResult<Bson> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.extensions.contains_key(&name) {
            tracing::warn!(schema = %self.name, method = %name, "overriding existing method");
        }
        self.extensions.insert(name, Arc::new(method));
        self
    }

    /// Declares this schema as the child side of a linked array.
    pub fn foreign_key(&mut self, key: ForeignKeyBuilder) -> &mut Self {
        let key = key.key;
        self.foreign_keys.insert(key.container_field.clone(), key);
        self
    }

    /// Registers an object-level validator run before the given stage.
    pub fn validate_before<F>(&mut self, stage: Stage, validator: F) -> &mut Self
    where
        F: Fn(&Instance) -> Result<(), Violations> + Send + Sync + 'static,
    {
        self.validators
            .push(stage, ObjectValidator::Sync(Arc::new(validator)));
        self
    }

    /// Registers an asynchronous object-level validator run before the given stage.
    pub fn validate_async_before<V>(&mut self, stage: Stage, validator: V) -> &mut Self
    where
        V: AsyncObjectValidator + 'static,
    {
        self.validators
            .push(stage, ObjectValidator::Async(Arc::new(validator)));
        self
    }

    /// Registers an object-level transform run before the given stage.
    pub fn transform_before<F>(&mut self, stage: Stage, transform: F) -> &mut Self
    where
        F: Fn(&mut Instance) -> MapperResult<()> + Send + Sync + 'static,
    {
        self.transforms
            .push(stage, TransformEntry::Object(Arc::new(transform)));
        self
    }

    /// Registers an object-level transform that needs to await, run before the given stage.
    pub fn transform_async_before<T>(&mut self, stage: Stage, transform: T) -> &mut Self
    where
        T: ObjectTransform + 'static,
    {
        self.transforms
            .push(stage, TransformEntry::Object(Arc::new(transform)));
        self
    }

    fn insert_field(&mut self, name: &str, rule: FieldRule) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, rule);
    }

    fn finish(mut self) -> MapperResult<Schema> {
        let target = self.target.take().ok_or_else(|| {
            MapperError::Configuration(format!("schema {} has no storage target", self.name))
        })?;

        let fields = self
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.lift_field_transforms(&fields);
        self.check_linked_fields(&fields)?;

        Ok(Schema {
            name: self.name,
            fields: self.fields,
            foreign_keys: self.foreign_keys,
            extensions: self.extensions,
            indexes: self.indexes,
            validators: self.validators,
            transforms: self.transforms,
            target,
            lifted: self.lifted,
        })
    }

    // The most derived type of a chain already carries every inherited transform.
    fn lift_field_transforms(&mut self, fields: &FieldMap) {
        for (name, rule) in fields.iter() {
            if self.lifted.contains(name) {
                continue;
            }
            let Some(ty) = rule.field_type() else {
                continue;
            };
            for stage in [Stage::New, Stage::Update, Stage::Remove] {
                for transform in ty.transforms().for_stage(stage) {
                    self.transforms.push(
                        stage,
                        TransformEntry::Field {
                            field: name.to_string(),
                            transform: transform.clone(),
                        },
                    );
                }
            }
            self.lifted.insert(name.to_string());
        }
    }

    fn check_linked_fields(&self, fields: &FieldMap) -> MapperResult<()> {
        for (name, rule) in fields.iter() {
            let Some(collection) = rule.collection() else {
                continue;
            };
            if collection.kind != CollectionKind::Linked {
                continue;
            }

            let child = &collection.schema;
            if child.is_embedded() {
                return Err(MapperError::Configuration(format!(
                    "linked field {} of {} refers to embedded schema {}",
                    name, self.name, child.name
                )));
            }

            let key = child.foreign_key(name).ok_or_else(|| {
                MapperError::Configuration(format!(
                    "schema {} declares no foreign key through {} for {}",
                    child.name, name, self.name
                ))
            })?;

            if !self.resolves_to_self(&key.parent) {
                return Err(MapperError::Configuration(format!(
                    "foreign key {}.{} refers to {}, which does not resolve to {}",
                    child.name, key.child_field, key.parent, self.name
                )));
            }
        }
        Ok(())
    }

    // A key naming a schema of the same extension family (same field map) also resolves.
    fn resolves_to_self(&self, parent: &str) -> bool {
        if parent == self.name {
            return true;
        }
        self.registry
            .get(parent)
            .is_some_and(|schema| Arc::ptr_eq(&schema.fields, &self.fields))
    }
}

/// A field declaration in progress.
pub struct FieldDecl<'b> {
    builder: &'b mut SchemaBuilder,
    name: String,
    transient: bool,
}

impl<'b> FieldDecl<'b> {
    /// Declares the field's type.
    pub fn of(self, ty: impl Into<FieldType>) {
        let mut rule = FieldRule::typed(ty.into());
        rule.transient = self.transient;
        self.builder.insert_field(&self.name, rule);
    }

    /// Declares a field populated only by the type's transforms.
    pub fn generated_by(self, ty: impl Into<FieldType>) {
        let mut rule = FieldRule::typed(ty.into());
        rule.generated = true;
        rule.transient = self.transient;
        self.builder.insert_field(&self.name, rule);
    }

    /// Declares an array of documents stored inline.
    pub fn embedded_array_of(self, schema: &Arc<Schema>) -> Cardinality<'b> {
        self.collection(CollectionKind::Embedded, schema)
    }

    /// Declares an array of documents stored in the schema's own collection.
    pub fn linked_array_of(self, schema: &Arc<Schema>) -> Cardinality<'b> {
        self.collection(CollectionKind::Linked, schema)
    }

    fn collection(self, kind: CollectionKind, schema: &Arc<Schema>) -> Cardinality<'b> {
        let rule = FieldRule {
            kind: RuleKind::Collection(CollectionRule {
                kind,
                schema: schema.clone(),
                min: None,
                max: None,
            }),
            transient: false,
            generated: false,
        };
        self.builder.insert_field(&self.name, rule);
        Cardinality {
            builder: self.builder,
            name: self.name,
        }
    }
}

/// Optional cardinality bounds of a collection field.
pub struct Cardinality<'b> {
    builder: &'b mut SchemaBuilder,
    name: String,
}

impl Cardinality<'_> {
    /// Sets bounds from `"<min>"`, `"<min>:<max>"` or `"<min>:n"`.
    ///
    /// A bound of zero, or `n`, means unbounded.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Configuration`] for any other form.
    pub fn with(self, cardinality: &str) -> MapperResult<()> {
        let (min, max) = parse_cardinality(cardinality)?;
        let mut fields = self
            .builder
            .fields
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(FieldRule {
            kind: RuleKind::Collection(rule),
            ..
        }) = fields.get_mut(&self.name)
        {
            rule.min = min;
            rule.max = max;
        }
        Ok(())
    }
}

fn parse_cardinality(cardinality: &str) -> MapperResult<(Option<usize>, Option<usize>)> {
    let malformed = || {
        MapperError::Configuration(format!(
            "cardinality must be of form <min>, <min>:<max> or <min>:n, got {:?}",
            cardinality
        ))
    };
    let number = |part: &str| -> MapperResult<usize> {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        part.parse().map_err(|_| malformed())
    };

    let mut parts = cardinality.trim().splitn(2, ':');
    let min = number(parts.next().unwrap_or_default())?;
    let max = match parts.next() {
        None => None,
        Some(part) if part.eq_ignore_ascii_case("n") => None,
        Some(part) => Some(number(part)?),
    };

    Ok((
        Some(min).filter(|min| *min > 0),
        max.filter(|max| *max > 0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kind;

    #[test]
    fn cardinality_forms() {
        assert_eq!(parse_cardinality("1:n").unwrap(), (Some(1), None));
        assert_eq!(parse_cardinality("2:5").unwrap(), (Some(2), Some(5)));
        assert_eq!(parse_cardinality("3").unwrap(), (Some(3), None));
        assert_eq!(parse_cardinality("0:N").unwrap(), (None, None));
        assert_eq!(parse_cardinality("0:0").unwrap(), (None, None));
    }

    #[test]
    fn malformed_cardinality_is_a_configuration_error() {
        for bad in ["", "a", "1:", ":3", "1:2:3", "-1", "1:m"] {
            assert!(
                matches!(parse_cardinality(bad), Err(MapperError::Configuration(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn schema_without_target_fails() {
        let registry = Registry::new();
        let result = registry.define("Loose", |s| {
            s.field("a").of(Kind::String);
            Ok(())
        });
        assert!(matches!(result, Err(MapperError::Configuration(_))));
        assert!(registry.get("Loose").is_none());
    }

    #[test]
    fn chained_types_compile_to_chain_rules() {
        let registry = Registry::new();
        let base = FieldType::from(Kind::String);
        let derived = base.extend(|t| t);

        let schema = registry
            .define("User", |s| {
                s.field("name").of(base.clone());
                s.field("email").of(derived.clone());
                s.in_collection("users");
                Ok(())
            })
            .unwrap();

        assert!(matches!(schema.field("name").unwrap().kind, RuleKind::Single(_)));
        match schema.field("email").unwrap().kind {
            RuleKind::Chain(chain) => assert_eq!(chain.len(), 2),
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn field_transforms_are_lifted_once() {
        let registry = Registry::new();
        let stamped = FieldType::define(|t| t.of(Kind::Date).transform_before(Stage::New, Ok));
        let restamped = stamped.extend(|t| t.transform_before(Stage::Update, Ok));

        let base = registry
            .define("Event", |s| {
                s.field("created").generated_by(stamped.clone());
                s.field("touched").generated_by(restamped.clone());
                s.in_collection("events");
                Ok(())
            })
            .unwrap();

        // created: 1 create; touched: 1 inherited create + 1 update
        assert_eq!(base.transforms().create.len(), 2);
        assert_eq!(base.transforms().update.len(), 1);

        let extended = registry.extend(&base, "Audit", |_| Ok(())).unwrap();
        assert_eq!(extended.transforms().create.len(), 2);
        assert_eq!(extended.transforms().update.len(), 1);
    }

    #[test]
    fn linked_field_requires_foreign_key() {
        let registry = Registry::new();
        let child = registry
            .define("Note", |s| {
                s.field("text").of(Kind::String);
                s.in_collection("notes");
                Ok(())
            })
            .unwrap();

        let result = registry.define("Book", |s| {
            s.field("notes").linked_array_of(&child);
            s.in_collection("books");
            Ok(())
        });
        assert!(matches!(result, Err(MapperError::Configuration(_))));
    }

    #[test]
    fn linked_field_resolves_foreign_key_parent() {
        let registry = Registry::new();
        let child = registry
            .define("Note", |s| {
                s.foreign_key(ForeignKey::to("Book").through("notes").as_key("book_id"));
                s.in_collection("notes");
                Ok(())
            })
            .unwrap();

        let book = registry
            .define("Book", |s| {
                s.field("notes").linked_array_of(&child).with("0:n")?;
                s.in_collection("books");
                Ok(())
            })
            .unwrap();
        assert!(book.field("notes").unwrap().collection().is_some());

        let wrong = registry.define("Shelf", |s| {
            s.field("notes").linked_array_of(&child);
            s.in_collection("shelves");
            Ok(())
        });
        assert!(matches!(wrong, Err(MapperError::Configuration(_))));
    }
}
