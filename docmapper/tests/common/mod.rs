#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use docmapper::{
    bson::Document,
    memory::InMemoryStore,
    prelude::*,
    query::Projection,
};

/// Wraps the in-memory store and counts every write request it receives.
#[derive(Debug, Clone, Default)]
pub struct CountingStore {
    pub inner: InMemoryStore,
    inserts: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    last_update: Arc<std::sync::Mutex<Option<UpdateStatement>>>,
}

impl CountingStore {
    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn last_update(&self) -> Option<UpdateStatement> {
        self.last_update.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreBackend for CountingStore {
    async fn insert_document(&self, collection: &str, document: Document) -> MapperResult<()> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.inner.insert_document(collection, document).await
    }

    async fn find_one(
        &self,
        collection: &str,
        selector: &Expr,
        projection: Option<&Projection>,
    ) -> MapperResult<Option<Document>> {
        self.inner.find_one(collection, selector, projection).await
    }

    async fn find(&self, collection: &str, query: Query) -> MapperResult<Vec<Document>> {
        self.inner.find(collection, query).await
    }

    async fn count(&self, collection: &str, selector: &Expr) -> MapperResult<u64> {
        self.inner.count(collection, selector).await
    }

    async fn update(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<u64> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        *self.last_update.lock().unwrap() = Some(update.clone());
        self.inner.update(collection, selector, update).await
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<Option<Document>> {
        self.inner.find_and_modify(collection, selector, update).await
    }

    async fn remove(&self, collection: &str, selector: &Expr) -> MapperResult<u64> {
        self.inner.remove(collection, selector).await
    }

    async fn ensure_index(
        &self,
        collection: &str,
        index: &IndexSpec,
        background: bool,
    ) -> MapperResult<()> {
        self.inner.ensure_index(collection, index, background).await
    }
}

/// Connects a mapper over a fresh counting store.
pub async fn connect(registry: Registry) -> (Mapper, CountingStore) {
    let store = CountingStore::default();
    let mapper = Mapper::connect(registry, store.clone()).await.unwrap();
    (mapper, store)
}

/// Registers `Person { name: string, age: number }` stored in `people`.
pub fn person_schema(registry: &Registry) -> Arc<Schema> {
    registry
        .define("Person", |s| {
            s.field("name").of(Kind::String);
            s.field("age").of(Kind::Number);
            s.transient_field("scratch").of(Kind::Any);
            s.in_collection("people");
            Ok(())
        })
        .unwrap()
}
