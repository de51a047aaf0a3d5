//! Main docmapper crate: a schema-driven object-document mapper.
//!
//! This crate is the primary entry point. It re-exports the core types from
//! `docmapper-core` and provides access to the storage backends.
//!
//! # Features
//!
//! - **Reusable field types** - Kinds, validators, helpers and transforms shared across schemas
//! - **Schema inheritance** - Extended schemas share their base's field map
//! - **Dirty tracking** - Saves send only the instructions implied by what changed
//! - **Embedded and linked arrays** - Sub-documents stored inline or in their own collection
//! - **Concurrent validation** - Every violation is collected, sync and async validators alike
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> MapperResult<()> {
//!     let registry = Registry::new();
//!
//!     let address = registry.define("Address", |s| {
//!         s.field("city").of(Kind::String);
//!         s.embedded_in("people", "addresses");
//!         Ok(())
//!     })?;
//!     let person = registry.define("Person", |s| {
//!         s.field("name").of(Kind::String);
//!         s.field("addresses").embedded_array_of(&address).with("1:n")?;
//!         s.in_collection("people");
//!         Ok(())
//!     })?;
//!
//!     let mapper = Mapper::connect(registry, InMemoryStore::new()).await?;
//!     let mut alice = mapper
//!         .model(&person)
//!         .create(doc! { "name": "Alice", "addresses": [{ "city": "Lisbon" }] })?;
//!     alice.save().await?;
//!
//!     // Recorded as `$set: { "addresses.0.city": "Porto" }`.
//!     alice.embedded_mut("addresses")?.get_mut(0).unwrap().set("city", "Porto")?;
//!     alice.save().await?;
//!
//!     mapper.close().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmapper_core::{
    backend, collection, document, embedded, error, lifecycle, linked, mapper, model, query,
    schema, transform, types, update, validation,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmapper_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmapper_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
