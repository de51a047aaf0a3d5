//! Storage gateway abstraction used by the mapper.
//!
//! This module defines the traits that abstract over different storage implementations,
//! allowing schemas and instances to be persisted to various backends (in-memory, MongoDB, etc.).
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for the handful of
//! operations the mapper issues: inserts, point lookups, cursor reads, counts, partial
//! updates, find-and-modify, deletes and index creation. Implementations are required to
//! be thread-safe (`Send + Sync`) since a single backend is shared by every instance
//! created through a [`Mapper`](crate::mapper::Mapper).
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmapper::backend::StoreBackend;
//! use docmapper::query::Filter;
//! use bson::doc;
//!
//! backend.insert_document("users", doc! { "_id": 1, "name": "Alice" }).await?;
//! let found = backend.find_one("users", &Filter::eq("_id", 1), None).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    error::MapperResult,
    lifecycle::UpdateStatement,
    query::{Expr, Projection, Query, SortDirection},
};

/// A time-to-live index declared on a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// The indexed field path.
    pub field: String,
    /// Key direction.
    pub direction: SortDirection,
    /// Documents expire this many seconds after the indexed date.
    pub expire_after_secs: u64,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The mapper shares one backend behind an `Arc` and issues calls from
/// concurrently running saves.
///
/// # Error Handling
///
/// Operations return [`MapperResult<T>`](crate::error::MapperResult). Driver failures
/// should be surfaced as [`MapperError::Backend`](crate::error::MapperError::Backend)
/// carrying the driver's message verbatim.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a new document into a collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to insert into. Created automatically if it doesn't exist.
    /// * `document` - The full document, including its `_id`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::DocumentAlreadyExists`](crate::error::MapperError::DocumentAlreadyExists)
    /// when a document with the same `_id` is already stored.
    async fn insert_document(&self, collection: &str, document: Document) -> MapperResult<()>;

    /// Returns the first document matching `selector`, shaped by `projection` if given.
    async fn find_one(
        &self,
        collection: &str,
        selector: &Expr,
        projection: Option<&Projection>,
    ) -> MapperResult<Option<Document>>;

    /// Returns every document matching the query, honoring sort, offset and limit.
    ///
    /// # See Also
    ///
    /// - [`Query`] for constructing queries
    /// - [`crate::query::Filter`] for building selector expressions
    async fn find(&self, collection: &str, query: Query) -> MapperResult<Vec<Document>>;

    /// Counts the documents matching `selector`.
    async fn count(&self, collection: &str, selector: &Expr) -> MapperResult<u64>;

    /// Applies `update` to the first document matching `selector`.
    ///
    /// # Returns
    ///
    /// The number of documents matched (0 or 1).
    async fn update(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<u64>;

    /// Atomically applies `update` to the first document matching `selector` and
    /// returns the document as it is after the update.
    async fn find_and_modify(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<Option<Document>>;

    /// Deletes every document matching `selector`.
    ///
    /// # Returns
    ///
    /// The number of documents removed.
    async fn remove(&self, collection: &str, selector: &Expr) -> MapperResult<u64>;

    /// Ensures an index exists on the collection.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection
    /// * `index` - The index to create
    /// * `background` - Whether the index should be built without blocking the collection
    async fn ensure_index(
        &self,
        collection: &str,
        index: &IndexSpec,
        background: bool,
    ) -> MapperResult<()>;

    /// Gracefully shuts down the backend and releases resources.
    ///
    /// The default implementation is a no-op, but backends holding connections
    /// should close them here.
    async fn shutdown(&self) -> MapperResult<()> {
        Ok(())
    }
}

/// Factory trait for asynchronously creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> MapperResult<Self::Backend>;
}
