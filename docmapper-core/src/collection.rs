//! Raw access to a collection of the mapper's backend.
//!
//! Schemas and instances cover normal use. A [`Collection`] bypasses them and talks
//! to the backend with plain documents, which is useful for inspecting what was
//! actually persisted or for seeding data.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::query::Filter;
//!
//! let users = mapper.collection("users")?;
//! let stored = users.find_one(Filter::eq("name", "Alice")).await?;
//! let total = users.count(Filter::and([])).await?;
//! ```

use bson::{Bson, Document, de::deserialize_from_bson};
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::{
    backend::StoreBackend,
    error::MapperResult,
    lifecycle::UpdateStatement,
    query::{Expr, Query},
};

/// An untyped collection bound to a storage backend.
#[derive(Debug, Clone)]
pub struct Collection {
    name: String,
    backend: Arc<dyn StoreBackend>,
}

impl Collection {
    /// Creates a new collection reference (internal use).
    pub(crate) fn new(name: String, backend: Arc<dyn StoreBackend>) -> Self {
        Self { name, backend }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts a raw document.
    ///
    /// # Errors
    ///
    /// Returns a [`MapperError`](crate::error::MapperError) if the operation fails.
    pub async fn insert(&self, document: Document) -> MapperResult<()> {
        self.backend.insert_document(&self.name, document).await
    }

    /// Returns the first document matching `selector`.
    pub async fn find_one(&self, selector: Expr) -> MapperResult<Option<Document>> {
        self.backend.find_one(&self.name, &selector, None).await
    }

    /// Returns the first document matching `selector`, deserialized into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Serialization`](crate::error::MapperError::Serialization)
    /// if the stored document does not fit `T`.
    pub async fn find_one_as<T: DeserializeOwned>(&self, selector: Expr) -> MapperResult<Option<T>> {
        match self.find_one(selector).await? {
            Some(document) => Ok(Some(deserialize_from_bson(Bson::Document(document))?)),
            None => Ok(None),
        }
    }

    /// Queries documents in the collection using a structured query.
    ///
    /// # Arguments
    ///
    /// * `query` - The [`Query`] specifying the selector, sorting, limit and offset
    pub async fn find(&self, query: Query) -> MapperResult<Vec<Document>> {
        self.backend.find(&self.name, query).await
    }

    pub async fn count(&self, selector: Expr) -> MapperResult<u64> {
        self.backend.count(&self.name, &selector).await
    }

    /// Applies `update` to the first document matching `selector`.
    ///
    /// # Returns
    ///
    /// The number of documents matched.
    pub async fn update(&self, selector: Expr, update: &UpdateStatement) -> MapperResult<u64> {
        self.backend.update(&self.name, &selector, update).await
    }

    /// Deletes every document matching `selector`.
    ///
    /// # Returns
    ///
    /// The number of documents removed.
    pub async fn remove(&self, selector: Expr) -> MapperResult<u64> {
        self.backend.remove(&self.name, &selector).await
    }
}
