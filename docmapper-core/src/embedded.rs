//! Arrays of documents stored inline in their parent.
//!
//! Elements are materialized when the parent is bound. Each element shares the root
//! document's lifecycle, so a write at any depth is recorded into the one statement the
//! root's next save sends.

use bson::{Bson, Document};
use std::sync::Arc;

use crate::{
    document::{Binding, Instance, ParentLink, Placement},
    error::{MapperError, MapperResult},
    lifecycle::SharedLifecycle,
    mapper::Connection,
    schema::{CollectionKind, Schema},
};

#[derive(Debug)]
pub struct EmbeddedArray {
    field: String,
    schema: Arc<Schema>,
    elements: Vec<Instance>,
    lifecycle: SharedLifecycle,
    owner: Placement,
    owner_id: Bson,
    connection: Connection,
}

impl EmbeddedArray {
    pub(crate) fn bind(
        owner: &Instance,
        field: &str,
        schema: Arc<Schema>,
        raw: Option<Bson>,
    ) -> MapperResult<EmbeddedArray> {
        let mut array = EmbeddedArray {
            field: field.to_string(),
            schema,
            elements: Vec::new(),
            lifecycle: owner.lifecycle.clone(),
            owner: owner.placement.clone(),
            owner_id: owner.id.clone(),
            connection: owner.connection.clone(),
        };

        let raw = match raw {
            None | Some(Bson::Null) => Vec::new(),
            Some(Bson::Array(raw)) => raw,
            Some(other) => {
                return Err(MapperError::InvalidDocument(format!(
                    "embedded array {} holds {:?}, expected an array",
                    field,
                    other.element_type()
                )));
            }
        };

        for (index, element) in raw.into_iter().enumerate() {
            let Bson::Document(values) = element else {
                return Err(MapperError::InvalidDocument(format!(
                    "element {} of embedded array {} is not a document",
                    index, field
                )));
            };
            let instance = Instance::bind(
                array.schema.clone(),
                values,
                array.element_binding(index),
                array.connection.clone(),
            )?;
            array.elements.push(instance);
        }

        Ok(array)
    }

    fn element_binding(&self, index: usize) -> Binding {
        Binding {
            lifecycle: Some(self.lifecycle.clone()),
            placement: self.owner.element(&self.owner_id, &self.field, index),
            parent: Some(self.parent_link(index)),
            persisted: false,
        }
    }

    fn parent_link(&self, index: usize) -> ParentLink {
        ParentLink {
            id: self.owner_id.clone(),
            field: self.field.clone(),
            index: Some(index),
            kind: CollectionKind::Embedded,
        }
    }

    /// Re-anchors the array after its owner was moved under a new lifecycle or placement.
    pub(crate) fn rebase(&mut self, lifecycle: &SharedLifecycle, owner: &Placement, owner_id: &Bson) {
        self.lifecycle = lifecycle.clone();
        self.owner = owner.clone();
        self.owner_id = owner_id.clone();
        for index in 0..self.elements.len() {
            let binding = self.element_binding(index);
            self.elements[index].adopt(lifecycle.clone(), binding.placement, binding.parent);
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn get(&self, index: usize) -> Option<&Instance> {
        self.elements.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Instance> {
        self.elements.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.elements.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        self.elements.iter_mut()
    }

    /// Appends an element.
    ///
    /// The element joins the parent's lifecycle. If the root document is persisted, a
    /// `$push` of the element's raw form is recorded; later writes to the element before
    /// the next save are folded into that pushed form.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::InvalidDocument`] if the element is of another schema.
    pub fn push(&mut self, mut element: Instance) -> MapperResult<()> {
        if element.schema().name() != self.schema.name() {
            return Err(MapperError::InvalidDocument(format!(
                "{} cannot hold {} documents",
                self.field,
                element.schema().name()
            )));
        }

        let index = self.elements.len();
        let binding = self.element_binding(index);
        element.adopt(self.lifecycle.clone(), binding.placement, binding.parent);

        let path = self.owner.path(&self.field);
        self.lifecycle
            .record_push(&path, index, Bson::Document(element.to_document()));
        self.elements.push(element);
        Ok(())
    }

    /// Builds an element from raw values and appends it.
    pub fn push_values(&mut self, values: Document) -> MapperResult<()> {
        let element = Instance::bind(
            self.schema.clone(),
            values,
            self.element_binding(self.elements.len()),
            self.connection.clone(),
        )?;
        self.push(element)
    }

    /// Raw form of every element.
    pub fn to_bson(&self) -> Bson {
        Bson::Array(
            self.elements
                .iter()
                .map(|element| Bson::Document(element.to_document()))
                .collect(),
        )
    }
}
