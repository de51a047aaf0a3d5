//! Schema-level operations: creating instances and finding stored ones.

use bson::{Bson, Document, ser::serialize_to_bson};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    document::{Binding, Instance, Placement},
    error::{MapperError, MapperResult},
    lifecycle::UpdateStatement,
    mapper::Connection,
    query::{Expr, Projection},
    schema::{Schema, SchemaBuilder, Target},
};

/// A compiled schema bound to the mapper's connection.
#[derive(Debug, Clone)]
pub struct Model {
    schema: Arc<Schema>,
    connection: Connection,
}

impl Model {
    pub(crate) fn new(schema: Arc<Schema>, connection: Connection) -> Self {
        Model { schema, connection }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Creates a new, unsaved instance.
    ///
    /// A missing `_id` is generated. Instances of embedded schemas are unattached until
    /// pushed into a host document's array.
    pub fn create(&self, values: Document) -> MapperResult<Instance> {
        Instance::bind(
            self.schema.clone(),
            values,
            Binding::new(Placement::for_target(self.schema.target())),
            self.connection.clone(),
        )
    }

    /// Creates a new, unsaved instance from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Serialization`] if `value` does not serialize to a document.
    pub fn create_from<T: Serialize>(&self, value: &T) -> MapperResult<Instance> {
        match serialize_to_bson(value)? {
            Bson::Document(values) => self.create(values),
            other => Err(MapperError::Serialization(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    /// Finds the first stored document matching `selector`.
    ///
    /// For embedded schemas the selector is matched against the elements of the host
    /// array field, and the first matching element is returned as a detached instance
    /// whose writes update it in place.
    pub async fn find_one(&self, selector: Expr) -> MapperResult<Option<Instance>> {
        let backend = self.connection.backend()?;
        match self.schema.target() {
            Target::Collection(collection) => {
                tracing::debug!(collection = %collection, ?selector, "finding document");
                match backend.find_one(collection, &selector, None).await? {
                    Some(document) => Ok(Some(self.load(document, Placement::Root {
                        collection: collection.clone(),
                    })?)),
                    None => Ok(None),
                }
            }
            Target::Embedded {
                collection,
                array_field,
            } => {
                let host_selector = selector.prefixed(array_field);
                let projection = Projection::ElemMatch {
                    field: array_field.clone(),
                    filter: selector,
                };
                tracing::debug!(collection = %collection, selector = ?host_selector, "finding embedded document");
                let Some(host) = backend
                    .find_one(collection, &host_selector, Some(&projection))
                    .await?
                else {
                    return Ok(None);
                };

                let host_id = host.get("_id").cloned().ok_or_else(|| {
                    MapperError::InvalidDocument(format!("{} document without _id", collection))
                })?;
                let element = match host.get(array_field) {
                    Some(Bson::Array(elements)) => match elements.first() {
                        Some(Bson::Document(element)) => element.clone(),
                        Some(_) => {
                            return Err(MapperError::InvalidDocument(format!(
                                "{}.{} holds a non-document element",
                                collection, array_field
                            )));
                        }
                        None => return Ok(None),
                    },
                    _ => return Ok(None),
                };

                Ok(Some(self.load(element, Placement::Detached {
                    collection: collection.clone(),
                    host_id,
                    array_field: array_field.clone(),
                })?))
            }
        }
    }

    /// Starts an operation on the documents matching `selector`.
    pub fn find(&self, selector: Expr) -> ModelQuery<'_> {
        ModelQuery {
            model: self,
            selector,
        }
    }

    /// Compiles a schema extending this one and returns its model.
    ///
    /// See [`Registry::extend`](crate::schema::Registry::extend).
    pub fn extend<F>(&self, name: impl Into<String>, definer: F) -> MapperResult<Model>
    where
        F: FnOnce(&mut SchemaBuilder) -> MapperResult<()>,
    {
        let schema = self
            .connection
            .registry()
            .extend(&self.schema, name, definer)?;
        Ok(Model::new(schema, self.connection.clone()))
    }

    fn load(&self, document: Document, placement: Placement) -> MapperResult<Instance> {
        Instance::load(
            self.schema.clone(),
            document,
            placement,
            self.connection.clone(),
        )
    }
}

/// Operations on the documents matching a selector.
pub struct ModelQuery<'m> {
    model: &'m Model,
    selector: Expr,
}

impl ModelQuery<'_> {
    /// Atomically applies `update` to the first matching document and returns it as it
    /// is after the update.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Precondition`] for embedded schemas, whose documents are
    /// not top-level.
    pub async fn update_one_and_get(self, update: UpdateStatement) -> MapperResult<Option<Instance>> {
        let model = self.model;
        let collection = match model.schema.target() {
            Target::Collection(collection) => collection,
            Target::Embedded { .. } => {
                return Err(MapperError::Precondition(format!(
                    "{} documents are embedded; find-and-modify runs on top-level documents",
                    model.schema.name()
                )));
            }
        };

        let backend = model.connection.backend()?;
        tracing::debug!(collection = %collection, selector = ?self.selector, update = %update.to_document(), "find and modify");
        match backend
            .find_and_modify(collection, &self.selector, &update)
            .await?
        {
            Some(document) => Ok(Some(model.load(document, Placement::Root {
                collection: collection.clone(),
            })?)),
            None => Ok(None),
        }
    }
}
