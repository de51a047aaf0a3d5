//! Entry point tying a schema registry to a storage backend.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::{mapper::Mapper, schema::Registry};
//! use docmapper::memory::InMemoryStore;
//! use docmapper::backend::StoreBackendBuilder;
//!
//! let registry = Registry::new();
//! let users = registry.define("User", |s| { /* ... */ Ok(()) })?;
//!
//! let mapper = Mapper::builder(registry)
//!     .background_indexes(true)
//!     .connect(InMemoryStore::builder().build().await?)
//!     .await?;
//!
//! let mut user = mapper.model(&users).create(doc! { "name": "Alice" })?;
//! user.save().await?;
//! mapper.close().await?;
//! ```

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use crate::{
    backend::StoreBackend,
    collection::Collection,
    error::{MapperError, MapperResult},
    model::Model,
    schema::{Registry, Schema, Target},
};

/// Shared handle to the open backend and the registry, held by every instance.
#[derive(Clone)]
pub struct Connection {
    backend: Arc<RwLock<Option<Arc<dyn StoreBackend>>>>,
    registry: Registry,
}

impl Connection {
    pub(crate) fn new(backend: Arc<dyn StoreBackend>, registry: Registry) -> Self {
        Connection {
            backend: Arc::new(RwLock::new(Some(backend))),
            registry,
        }
    }

    /// The open backend.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Precondition`] once the mapper is closed.
    pub fn backend(&self) -> MapperResult<Arc<dyn StoreBackend>> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| MapperError::Precondition("no open storage connection".to_string()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_open(&self) -> bool {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn take(&self) -> Option<Arc<dyn StoreBackend>> {
        self.backend
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Models bound to one backend.
#[derive(Debug, Clone)]
pub struct Mapper {
    connection: Connection,
}

impl Mapper {
    /// Connects with default options: indexes are ensured, in the background.
    pub async fn connect<B>(registry: Registry, backend: B) -> MapperResult<Mapper>
    where
        B: StoreBackend + 'static,
    {
        Mapper::builder(registry).connect(backend).await
    }

    pub fn builder(registry: Registry) -> MapperBuilder {
        MapperBuilder::new(registry)
    }

    /// Model of a compiled schema.
    pub fn model(&self, schema: &Arc<Schema>) -> Model {
        Model::new(schema.clone(), self.connection.clone())
    }

    /// Model of a schema registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError::Configuration`] if no such schema is registered.
    pub fn model_named(&self, name: &str) -> MapperResult<Model> {
        let schema = self.connection.registry().get(name).ok_or_else(|| {
            MapperError::Configuration(format!("schema {} is not registered", name))
        })?;
        Ok(self.model(&schema))
    }

    pub fn registry(&self) -> &Registry {
        self.connection.registry()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Raw access to a collection.
    pub fn collection(&self, name: &str) -> MapperResult<Collection> {
        Ok(Collection::new(name.to_string(), self.connection.backend()?))
    }

    /// Creates the TTL indexes declared by every registered schema.
    ///
    /// Indexes of embedded schemas are created on the host collection under the host's
    /// array field.
    ///
    /// # Errors
    ///
    /// Returns the first backend error raised.
    pub async fn ensure_indexes(&self, background: bool) -> MapperResult<()> {
        let backend = self.connection.backend()?;
        for schema in self.registry().schemas() {
            for index in schema.indexes() {
                let mut index = index.clone();
                if let Target::Embedded { array_field, .. } = schema.target() {
                    index.field = format!("{}.{}", array_field, index.field);
                }
                let collection = schema.target().collection();
                tracing::debug!(collection, field = %index.field, "ensuring ttl index");
                backend.ensure_index(collection, &index, background).await?;
            }
        }
        Ok(())
    }

    /// Shuts the backend down. Every later operation through this mapper or its
    /// instances fails with [`MapperError::Precondition`].
    pub async fn close(&self) -> MapperResult<()> {
        match self.connection.take() {
            Some(backend) => backend.shutdown().await,
            None => Ok(()),
        }
    }
}

/// Connection options of a [`Mapper`].
#[derive(Debug, Clone)]
pub struct MapperBuilder {
    registry: Registry,
    ensure_indexes: bool,
    background_indexes: bool,
}

impl MapperBuilder {
    pub fn new(registry: Registry) -> Self {
        MapperBuilder {
            registry,
            ensure_indexes: true,
            background_indexes: true,
        }
    }

    /// Whether declared indexes are created when connecting.
    pub fn ensure_indexes(mut self, ensure: bool) -> Self {
        self.ensure_indexes = ensure;
        self
    }

    /// Whether indexes are built without blocking their collection.
    pub fn background_indexes(mut self, background: bool) -> Self {
        self.background_indexes = background;
        self
    }

    /// Opens the mapper over `backend`.
    ///
    /// Index creation failures are logged and skipped.
    pub async fn connect<B>(self, backend: B) -> MapperResult<Mapper>
    where
        B: StoreBackend + 'static,
    {
        let backend: Arc<dyn StoreBackend> = Arc::new(backend);
        let mapper = Mapper {
            connection: Connection::new(backend, self.registry),
        };
        if self.ensure_indexes {
            if let Err(err) = mapper.ensure_indexes(self.background_indexes).await {
                tracing::warn!(error = %err, "failed to ensure indexes");
            }
        }
        Ok(mapper)
    }
}
