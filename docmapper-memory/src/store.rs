//! In-memory storage implementation of the mapper's backend.
//!
//! Documents are kept per collection in insertion order, behind async-safe
//! read-write locks.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document};

use docmapper_core::{
    backend::{IndexSpec, StoreBackend, StoreBackendBuilder},
    error::{MapperError, MapperResult},
    lifecycle::UpdateStatement,
    query::{Expr, Projection, Query, SortDirection},
};

use crate::{
    evaluator::{Comparable, DocumentEvaluator, resolve},
    update,
};

type StoreMap = HashMap<String, Vec<Document>>;
type IndexMap = HashMap<String, Vec<IndexSpec>>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state; clones share
/// the same data, so a test can keep one clone to inspect what a mapper wrote.
///
/// Selectors are evaluated by scanning the collection. Declared indexes are recorded
/// but documents never expire.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackend;
/// use docmapper::query::Filter;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert_document("users", doc! { "_id": 1, "name": "Alice" }).await?;
/// let alice = store.find_one("users", &Filter::eq("_id", 1), None).await?;
/// assert!(alice.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents
    store: Arc<RwLock<StoreMap>>,
    /// collection name -> ensured indexes
    indexes: Arc<RwLock<IndexMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            indexes: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns the indexes ensured on `collection`.
    pub async fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.indexes
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a snapshot of every document in `collection`, in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn project(document: &Document, projection: &Projection) -> Document {
        match projection {
            Projection::ElemMatch { field, filter } => {
                let mut projected = Document::new();
                if let Some(id) = document.get("_id") {
                    projected.insert("_id", id.clone());
                }
                if let Some(Bson::Array(elements)) = document.get(field) {
                    let first = elements.iter().find(|element| match element {
                        Bson::Document(element) => DocumentEvaluator::matches(element, filter),
                        _ => false,
                    });
                    if let Some(first) = first {
                        projected.insert(field.clone(), Bson::Array(vec![first.clone()]));
                    }
                }
                projected
            }
        }
    }

    fn sort_key<'a>(document: &'a Document, field: &str) -> Comparable<'a> {
        resolve(document, field)
            .into_iter()
            .next()
            .map(Comparable::from)
            .unwrap_or(Comparable::Null)
    }

    /// Applies `update` to the first match and returns its post-image.
    async fn modify_first(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(None);
        };
        let Some(document) = documents
            .iter_mut()
            .find(|document| DocumentEvaluator::matches(document, selector))
        else {
            return Ok(None);
        };

        update::apply(document, update, selector)?;
        Ok(Some(document.clone()))
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_document(&self, collection: &str, document: Document) -> MapperResult<()> {
        let id = document
            .get("_id")
            .cloned()
            .ok_or_else(|| MapperError::InvalidDocument("document has no _id".to_string()))?;

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        if documents.iter().any(|stored| stored.get("_id") == Some(&id)) {
            let id = match &id {
                Bson::ObjectId(oid) => oid.to_hex(),
                other => other.to_string(),
            };
            return Err(MapperError::DocumentAlreadyExists(id, collection.to_string()));
        }

        tracing::trace!(collection, "inserting document");
        documents.push(document);
        Ok(())
    }

    async fn find_one(
        &self,
        collection: &str,
        selector: &Expr,
        projection: Option<&Projection>,
    ) -> MapperResult<Option<Document>> {
        let store = self.store.read().await;
        let found = store.get(collection).and_then(|documents| {
            documents
                .iter()
                .find(|document| DocumentEvaluator::matches(document, selector))
        });

        Ok(found.map(|document| match projection {
            Some(projection) => Self::project(document, projection),
            None => document.clone(),
        }))
    }

    async fn find(&self, collection: &str, query: Query) -> MapperResult<Vec<Document>> {
        let store = self.store.read().await;
        let documents = match store.get(collection) {
            Some(documents) => documents,
            None => return Ok(vec![]),
        };

        let mut matched = documents
            .iter()
            .filter(|document| DocumentEvaluator::matches(document, &query.filter))
            .collect::<Vec<_>>();

        if let Some(sort) = &query.sort {
            matched.sort_by(|a, b| {
                let left = Self::sort_key(a, &sort.field);
                let right = Self::sort_key(b, &sort.field);

                match sort.direction {
                    SortDirection::Asc => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
                    SortDirection::Desc => right.partial_cmp(&left).unwrap_or(Ordering::Equal),
                }
            });
        }

        Ok(matched
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count(&self, collection: &str, selector: &Expr) -> MapperResult<u64> {
        let store = self.store.read().await;
        Ok(store
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| DocumentEvaluator::matches(document, selector))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn update(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<u64> {
        tracing::trace!(collection, update = %update.to_document(), "updating document");
        Ok(self
            .modify_first(collection, selector, update)
            .await?
            .map_or(0, |_| 1))
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<Option<Document>> {
        self.modify_first(collection, selector, update).await
    }

    async fn remove(&self, collection: &str, selector: &Expr) -> MapperResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let before = documents.len();
        documents.retain(|document| !DocumentEvaluator::matches(document, selector));
        let removed = (before - documents.len()) as u64;
        tracing::trace!(collection, removed, "removed documents");
        Ok(removed)
    }

    async fn ensure_index(
        &self,
        collection: &str,
        index: &IndexSpec,
        _background: bool,
    ) -> MapperResult<()> {
        let mut indexes = self.indexes.write().await;
        let declared = indexes.entry(collection.to_string()).or_default();
        if !declared.iter().any(|existing| existing.field == index.field) {
            declared.push(index.clone());
        }
        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docmapper_memory::InMemoryStore;
/// use docmapper::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    ///
    /// This always succeeds and returns a freshly initialized store.
    async fn build(self) -> MapperResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
