use std::time::Duration;
use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions, IndexOptions, ReturnDocument},
};
use docmapper_core::{
    backend::{IndexSpec, StoreBackend, StoreBackendBuilder},
    error::{MapperError, MapperResult},
    lifecycle::UpdateStatement,
    query::{Expr, Projection, Query},
};

use crate::query::MongoQueryTranslator;

const DUPLICATE_KEY: i32 = 11000;

fn backend_error(err: MongoError) -> MapperError {
    MapperError::Backend(err.to_string())
}

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_document(&self, collection: &str, document: Document) -> MapperResult<()> {
        let id = document.get("_id").cloned().unwrap_or(Bson::Null);

        match self.get_collection(collection).insert_one(document).await {
            Ok(_) => Ok(()),
            Err(err) => match err.kind.as_ref() {
                ErrorKind::Write(WriteFailure::WriteError(write_error))
                    if write_error.code == DUPLICATE_KEY =>
                {
                    let id = match &id {
                        Bson::ObjectId(oid) => oid.to_hex(),
                        other => other.to_string(),
                    };
                    Err(MapperError::DocumentAlreadyExists(id, collection.to_string()))
                }
                _ => Err(backend_error(err)),
            },
        }
    }

    async fn find_one(
        &self,
        collection: &str,
        selector: &Expr,
        projection: Option<&Projection>,
    ) -> MapperResult<Option<Document>> {
        let coll = self.get_collection(collection);
        let mut action = coll.find_one(MongoQueryTranslator::translate(selector)?);
        if let Some(projection) = projection {
            action = action.projection(MongoQueryTranslator::projection(projection)?);
        }

        action.await.map_err(backend_error)
    }

    async fn find(&self, collection: &str, query: Query) -> MapperResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        if let Some(sort) = &query.sort {
            options.sort = Some(doc! {
                sort.field.clone(): sort.direction.as_i32(),
            })
        }

        self.get_collection(collection)
            .find(MongoQueryTranslator::translate(&query.filter)?)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn count(&self, collection: &str, selector: &Expr) -> MapperResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::translate(selector)?)
            .await
            .map_err(backend_error)
    }

    async fn update(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<u64> {
        Ok(self
            .get_collection(collection)
            .update_one(MongoQueryTranslator::translate(selector)?, update.to_document())
            .await
            .map_err(backend_error)?
            .matched_count)
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        selector: &Expr,
        update: &UpdateStatement,
    ) -> MapperResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_update(MongoQueryTranslator::translate(selector)?, update.to_document())
            .return_document(ReturnDocument::After)
            .await
            .map_err(backend_error)
    }

    async fn remove(&self, collection: &str, selector: &Expr) -> MapperResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(MongoQueryTranslator::translate(selector)?)
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn ensure_index(
        &self,
        collection: &str,
        index: &IndexSpec,
        background: bool,
    ) -> MapperResult<()> {
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                .keys(doc! { index.field.clone(): index.direction.as_i32() })
                .options(
                    IndexOptions::builder()
                    .expire_after(Duration::from_secs(index.expire_after_secs))
                    .background(background)
                    .build()
                )
                .build()
            )
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn shutdown(&self) -> MapperResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> MapperResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| MapperError::Initialization(e.to_string()))?,
            )
            .map_err(|e| MapperError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
